//! Canonical storage-ready record and its column vocabulary
//!
//! A [`CanonicalRecord`] is what the normalizer produces and what the remote
//! table stores. Serialized field names are the table's column names, so the
//! same type decodes snapshot rows and encodes create/update payloads.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

use crate::domain::item::ItemKey;

/// Deployment state collapsed to a binary flag.
///
/// Only the two known display values map to the flag; anything else is kept
/// verbatim, so consumers must not assume the stored value is always `1`/`0`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DeployFlag {
    Enabled,
    Disabled,
    Other(String),
}

impl DeployFlag {
    /// Map on-screen deployment text (`Enabled` / `Disabled`)
    pub fn from_display(raw: &str) -> Self {
        match raw {
            "Enabled" => Self::Enabled,
            "Disabled" => Self::Disabled,
            other => Self::Other(other.to_string()),
        }
    }

    /// Map a stored column value (`1` / `0`)
    pub fn from_stored(raw: &str) -> Self {
        match raw {
            "1" => Self::Enabled,
            "0" => Self::Disabled,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Enabled => "1",
            Self::Disabled => "0",
            Self::Other(raw) => raw,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Enabled => Some(true),
            Self::Disabled => Some(false),
            Self::Other(_) => None,
        }
    }
}

impl Default for DeployFlag {
    fn default() -> Self {
        Self::Other(String::new())
    }
}

impl fmt::Display for DeployFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for DeployFlag {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for DeployFlag {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = column::text_opt(deserializer)?;
        Ok(text.map_or_else(Self::default, |raw| Self::from_stored(&raw)))
    }
}

/// Columns of the definitions table, in table order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RecordField {
    Channel,
    Active,
    Key,
    AppName,
    Path,
    Name,
    DeployedStatus,
    BridgeDeployed,
    DataSource,
    Authentication,
    Style,
    Localization,
    LastUsedDate,
    CreatedDate,
    CreatedBy,
    LastModifiedDate,
    LastModifiedBy,
}

impl RecordField {
    pub const ALL: [Self; 17] = [
        Self::Channel,
        Self::Active,
        Self::Key,
        Self::AppName,
        Self::Path,
        Self::Name,
        Self::DeployedStatus,
        Self::BridgeDeployed,
        Self::DataSource,
        Self::Authentication,
        Self::Style,
        Self::Localization,
        Self::LastUsedDate,
        Self::CreatedDate,
        Self::CreatedBy,
        Self::LastModifiedDate,
        Self::LastModifiedBy,
    ];

    /// Column name in the remote table
    pub fn column(self) -> &'static str {
        match self {
            Self::Channel => "Channel_KW",
            Self::Active => "Active_YN",
            Self::Key => "Caspio_App_Key",
            Self::AppName => "App_Name",
            Self::Path => "Path",
            Self::Name => "Name",
            Self::DeployedStatus => "Deployed_YN",
            Self::BridgeDeployed => "Caspio_Bridge_Deployed_YN",
            Self::DataSource => "Data_Source",
            Self::Authentication => "Authentication",
            Self::Style => "Style",
            Self::Localization => "Localization",
            Self::LastUsedDate => "Last_Used_Date",
            Self::CreatedDate => "Created_Date",
            Self::CreatedBy => "Created_By_Person_Name",
            Self::LastModifiedDate => "Last_Modified_Date",
            Self::LastModifiedBy => "Last_Modified_By_Person_Name",
        }
    }
}

impl fmt::Display for RecordField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.column())
    }
}

/// Normalized representation of one data page.
///
/// Date columns hold either `MM/DD/YYYY` text or, for the created date under
/// the pass-through policy, the source text that could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalRecord {
    #[serde(rename = "Channel_KW", default, deserialize_with = "column::text")]
    pub channel: String,
    #[serde(rename = "Active_YN", default, deserialize_with = "column::text")]
    pub active: String,
    #[serde(rename = "Caspio_App_Key", default, deserialize_with = "column::key")]
    pub key: ItemKey,
    #[serde(rename = "App_Name", default, deserialize_with = "column::text_opt")]
    pub app_name: Option<String>,
    #[serde(rename = "Path", default, deserialize_with = "column::text_opt")]
    pub path: Option<String>,
    #[serde(rename = "Name", default, deserialize_with = "column::text_opt")]
    pub name: Option<String>,
    /// Deployment text as displayed (`Enabled`, `Disabled`, ...)
    #[serde(rename = "Deployed_YN", default, deserialize_with = "column::text")]
    pub deployed_status: String,
    /// Deployment collapsed to `1`/`0`, other values passed through
    #[serde(rename = "Caspio_Bridge_Deployed_YN", default)]
    pub bridge_deployed: DeployFlag,
    #[serde(rename = "Data_Source", default, deserialize_with = "column::text")]
    pub data_source: String,
    #[serde(rename = "Authentication", default, deserialize_with = "column::text")]
    pub authentication: String,
    #[serde(rename = "Style", default, deserialize_with = "column::text")]
    pub style: String,
    #[serde(rename = "Localization", default, deserialize_with = "column::text")]
    pub localization: String,
    #[serde(rename = "Last_Used_Date", default, deserialize_with = "column::text_opt")]
    pub last_used_date: Option<String>,
    #[serde(rename = "Created_Date", default, deserialize_with = "column::text_opt")]
    pub created_date: Option<String>,
    #[serde(rename = "Created_By_Person_Name", default, deserialize_with = "column::text_opt")]
    pub created_by: Option<String>,
    #[serde(rename = "Last_Modified_Date", default, deserialize_with = "column::text_opt")]
    pub last_modified_date: Option<String>,
    #[serde(
        rename = "Last_Modified_By_Person_Name",
        default,
        deserialize_with = "column::text_opt"
    )]
    pub last_modified_by: Option<String>,
}

impl CanonicalRecord {
    /// Value of a column as stored text; `None` when the column is empty
    pub fn field(&self, field: RecordField) -> Option<&str> {
        match field {
            RecordField::Channel => Some(&self.channel),
            RecordField::Active => Some(&self.active),
            RecordField::Key => Some(self.key.as_str()),
            RecordField::AppName => self.app_name.as_deref(),
            RecordField::Path => self.path.as_deref(),
            RecordField::Name => self.name.as_deref(),
            RecordField::DeployedStatus => Some(&self.deployed_status),
            RecordField::BridgeDeployed => Some(self.bridge_deployed.as_str()),
            RecordField::DataSource => Some(&self.data_source),
            RecordField::Authentication => Some(&self.authentication),
            RecordField::Style => Some(&self.style),
            RecordField::Localization => Some(&self.localization),
            RecordField::LastUsedDate => self.last_used_date.as_deref(),
            RecordField::CreatedDate => self.created_date.as_deref(),
            RecordField::CreatedBy => self.created_by.as_deref(),
            RecordField::LastModifiedDate => self.last_modified_date.as_deref(),
            RecordField::LastModifiedBy => self.last_modified_by.as_deref(),
        }
    }
}

/// Lenient column decoding for rows coming back from the store.
///
/// Yes/No columns may come back as booleans and numeric-looking text as
/// numbers; both are folded into the textual form the normalizer writes.
mod column {
    use serde::{Deserialize, Deserializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Stored {
        Text(String),
        Flag(bool),
        Int(i64),
        Float(f64),
    }

    pub(super) fn text_opt<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<String>, D::Error> {
        Ok(Option::<Stored>::deserialize(deserializer)?.map(|value| match value {
            Stored::Text(text) => text,
            Stored::Flag(flag) => String::from(if flag { "1" } else { "0" }),
            Stored::Int(number) => number.to_string(),
            Stored::Float(number) => number.to_string(),
        }))
    }

    pub(super) fn text<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
        Ok(text_opt(deserializer)?.unwrap_or_default())
    }

    /// Rows with a null key decode to a blank key and are dropped by the snapshot
    pub(super) fn key<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<crate::domain::item::ItemKey, D::Error> {
        Ok(text(deserializer)?.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn deploy_flag_maps_display_values() {
        assert_eq!(DeployFlag::from_display("Enabled").as_str(), "1");
        assert_eq!(DeployFlag::from_display("Disabled").as_str(), "0");
        assert_eq!(DeployFlag::from_display("Partial").as_str(), "Partial");
        assert_eq!(DeployFlag::from_display("Partial").as_bool(), None);
        assert_eq!(DeployFlag::from_display("Enabled").as_bool(), Some(true));
    }

    #[test]
    fn decodes_store_row_with_booleans_and_nulls() {
        let row = json!({
            "PK_ID": 17,
            "Channel_KW": "UNIVERSAL",
            "Active_YN": true,
            "Caspio_App_Key": "k1",
            "App_Name": "WorkMovr 4",
            "Path": null,
            "Name": "Weekly Report",
            "Deployed_YN": "Enabled",
            "Caspio_Bridge_Deployed_YN": true,
            "Data_Source": "Tbl_Orders",
            "Authentication": null,
            "Style": "Default",
            "Localization": "English",
            "Last_Used_Date": "01/06/2023",
        });

        let record: CanonicalRecord = serde_json::from_value(row).unwrap();
        assert_eq!(record.active, "1");
        assert_eq!(record.bridge_deployed, DeployFlag::Enabled);
        assert_eq!(record.path, None);
        assert_eq!(record.authentication, "");
        assert_eq!(record.created_date, None);
        assert_eq!(record.field(RecordField::LastUsedDate), Some("01/06/2023"));
    }

    #[test]
    fn serializes_with_table_column_names() {
        let record: CanonicalRecord = serde_json::from_value(json!({
            "Caspio_App_Key": "k1",
            "Caspio_Bridge_Deployed_YN": "Partial",
        }))
        .unwrap();

        let value = serde_json::to_value(&record).unwrap();
        for field in RecordField::ALL {
            assert!(value.get(field.column()).is_some(), "missing column {field}");
        }
        assert_eq!(value["Caspio_Bridge_Deployed_YN"], "Partial");
    }
}
