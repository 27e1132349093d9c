//! Source items enumerated from the hosted app console
//!
//! An [`Item`] is one data page as reported by the console's data page listing.
//! The set of items for a run is fixed when the run starts and never mutated.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable identifier of a data page in the source system (its app key)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct ItemKey(String);

impl ItemKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Keys made only of whitespace are treated as absent
    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl From<&str> for ItemKey {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

impl From<String> for ItemKey {
    fn from(key: String) -> Self {
        Self(key)
    }
}

impl AsRef<str> for ItemKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ItemKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One data page as returned by the source enumeration.
///
/// Field names follow the console's REST payload so the same type is used to
/// decode the listing and to write error ledger lines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    #[serde(rename = "AppKey")]
    pub key: ItemKey,
    #[serde(rename = "AppName", default)]
    pub app_name: Option<String>,
    #[serde(rename = "Path", default)]
    pub path: Option<String>,
    #[serde(rename = "Name", default)]
    pub name: Option<String>,
    #[serde(rename = "DateCreated", default)]
    pub date_created: Option<String>,
    #[serde(rename = "CreatedBy", default)]
    pub created_by: Option<String>,
    #[serde(rename = "DateModified", default)]
    pub date_modified: Option<String>,
    #[serde(rename = "ModifiedBy", default)]
    pub modified_by: Option<String>,
}

impl Item {
    /// Create an item carrying only its key
    pub fn new(key: impl Into<ItemKey>) -> Self {
        Self {
            key: key.into(),
            app_name: None,
            path: None,
            name: None,
            date_created: None,
            created_by: None,
            date_modified: None,
            modified_by: None,
        }
    }
}

impl fmt::Display for Item {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{} ({})", self.key, name),
            None => write!(f, "{}", self.key),
        }
    }
}
