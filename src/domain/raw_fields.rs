//! Raw field bag produced by page extraction
//!
//! The extractor reads a small fixed set of on-screen fields plus the free-text
//! usage history of a page. Nothing here is trusted until
//! [`RawFieldBag::validate`] has confirmed every required field is present.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::domain::errors::NormalizationError;
use crate::domain::item::ItemKey;

/// Keys of the on-screen fields read for every page
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKey {
    Deployed,
    DataSource,
    Authentication,
    Style,
    Localization,
}

impl FieldKey {
    /// All page fields; each one is required for normalization
    pub const REQUIRED: [Self; 5] = [
        Self::Deployed,
        Self::DataSource,
        Self::Authentication,
        Self::Style,
        Self::Localization,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Deployed => "deployed",
            Self::DataSource => "data_source",
            Self::Authentication => "authentication",
            Self::Style => "style",
            Self::Localization => "localization",
        }
    }
}

impl fmt::Display for FieldKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unvalidated text extracted from one page
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawFieldBag {
    #[serde(default)]
    fields: BTreeMap<FieldKey, String>,
    /// Usage-history lines in on-screen order
    #[serde(default)]
    usage_history: Vec<String>,
}

/// Required page fields after presence has been checked
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageFields<'a> {
    pub deployed: &'a str,
    pub data_source: &'a str,
    pub authentication: &'a str,
    pub style: &'a str,
    pub localization: &'a str,
    pub usage_history: &'a [String],
}

impl RawFieldBag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert, handy for extractors and tests
    #[must_use]
    pub fn with(mut self, key: FieldKey, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    #[must_use]
    pub fn with_usage_history<I, S>(mut self, tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.usage_history = tokens.into_iter().map(Into::into).collect();
        self
    }

    pub fn insert(&mut self, key: FieldKey, value: impl Into<String>) {
        self.fields.insert(key, value.into());
    }

    pub fn get(&self, key: FieldKey) -> Option<&str> {
        self.fields.get(&key).map(String::as_str)
    }

    pub fn usage_history(&self) -> &[String] {
        &self.usage_history
    }

    /// Required fields that were not extracted
    pub fn missing_required(&self) -> Vec<FieldKey> {
        FieldKey::REQUIRED
            .iter()
            .copied()
            .filter(|key| !self.fields.contains_key(key))
            .collect()
    }

    /// A partial bag is an item-level failure, never a partial success.
    pub fn validate(&self, key: &ItemKey) -> Result<PageFields<'_>, NormalizationError> {
        let missing = self.missing_required();
        if !missing.is_empty() {
            return Err(NormalizationError::MissingFields {
                key: key.clone(),
                fields: missing.iter().map(|k| k.as_str().to_string()).collect(),
            });
        }

        let field = |k: FieldKey| self.fields.get(&k).map_or("", String::as_str);
        Ok(PageFields {
            deployed: field(FieldKey::Deployed),
            data_source: field(FieldKey::DataSource),
            authentication: field(FieldKey::Authentication),
            style: field(FieldKey::Style),
            localization: field(FieldKey::Localization),
            usage_history: &self.usage_history,
        })
    }
}
