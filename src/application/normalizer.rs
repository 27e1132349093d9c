//! Normalization of extracted page data into canonical records
//!
//! Pure transforms only: deployment text to flag, source timestamps to
//! `MM/DD/YYYY`, and the latest date found in the usage history.

use chrono::{NaiveDate, NaiveDateTime};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::domain::errors::NormalizationError;
use crate::domain::item::Item;
use crate::domain::raw_fields::RawFieldBag;
use crate::domain::record::{CanonicalRecord, DeployFlag};

/// Output format of every date column
pub const RECORD_DATE_FORMAT: &str = "%m/%d/%Y";

const SOURCE_DATE_FORMAT: &str = "%Y-%m-%d";
const USAGE_TIMESTAMP_FORMAT: &str = "%d %b %Y %I:%M %p";

/// Expander link rendered inside the usage-history list
const USAGE_EXPANDER_TOKEN: &str = "less...";

static USAGE_TIMESTAMP: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(\d{2} \w{3} \d{4} \d{2}:\d{2} [AP]M)").expect("usage timestamp pattern")
});

/// What a date column holds when the source text cannot be parsed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DateFallback {
    /// Keep the unparsed source text
    PassThrough,
    /// Leave the column empty
    Absent,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizerSettings {
    /// Constant value of the channel column
    pub channel: String,
    /// Constant value of the active column
    pub active: String,
    pub created_date_fallback: DateFallback,
    pub last_modified_date_fallback: DateFallback,
}

impl Default for NormalizerSettings {
    fn default() -> Self {
        Self {
            channel: "UNIVERSAL".to_string(),
            active: "1".to_string(),
            created_date_fallback: DateFallback::PassThrough,
            last_modified_date_fallback: DateFallback::Absent,
        }
    }
}

/// Stateless item + field bag → record transform
#[derive(Debug, Clone, Default)]
pub struct Normalizer {
    settings: NormalizerSettings,
}

impl Normalizer {
    pub fn new(settings: NormalizerSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &NormalizerSettings {
        &self.settings
    }

    pub fn normalize(
        &self,
        item: &Item,
        bag: &RawFieldBag,
    ) -> Result<CanonicalRecord, NormalizationError> {
        if item.key.is_blank() {
            return Err(NormalizationError::MissingKey);
        }
        let fields = bag.validate(&item.key)?;

        Ok(CanonicalRecord {
            channel: self.settings.channel.clone(),
            active: self.settings.active.clone(),
            key: item.key.clone(),
            app_name: item.app_name.clone(),
            path: item.path.clone(),
            name: item.name.clone(),
            deployed_status: fields.deployed.to_string(),
            bridge_deployed: normalize_deploy_flag(fields.deployed),
            data_source: fields.data_source.to_string(),
            authentication: fields.authentication.to_string(),
            style: fields.style.to_string(),
            localization: fields.localization.to_string(),
            last_used_date: find_last_used_date(fields.usage_history),
            created_date: apply_date_fallback(
                item.date_created.as_deref(),
                self.settings.created_date_fallback,
            ),
            created_by: item.created_by.clone(),
            last_modified_date: apply_date_fallback(
                item.date_modified.as_deref(),
                self.settings.last_modified_date_fallback,
            ),
            last_modified_by: item.modified_by.clone(),
        })
    }
}

/// `Enabled` → `1`, `Disabled` → `0`, anything else unchanged
pub fn normalize_deploy_flag(raw: &str) -> DeployFlag {
    DeployFlag::from_display(raw)
}

/// Reformat the date part of an ISO-8601-like timestamp as `MM/DD/YYYY`
pub fn format_source_date(raw: &str) -> Option<String> {
    let date_part = raw.split('T').next().unwrap_or(raw).trim();
    NaiveDate::parse_from_str(date_part, SOURCE_DATE_FORMAT)
        .ok()
        .map(|date| date.format(RECORD_DATE_FORMAT).to_string())
}

/// Format a source date, falling back per column policy when it does not parse.
/// A missing source date stays missing under either policy.
pub fn apply_date_fallback(raw: Option<&str>, fallback: DateFallback) -> Option<String> {
    let raw = raw?;
    match format_source_date(raw) {
        Some(formatted) => Some(formatted),
        None => match fallback {
            DateFallback::PassThrough => Some(raw.to_string()),
            DateFallback::Absent => None,
        },
    }
}

/// Latest `DD Mon YYYY HH:MM AM/PM` timestamp across all tokens, as `MM/DD/YYYY`
pub fn find_last_used_date<S: AsRef<str>>(tokens: &[S]) -> Option<String> {
    tokens
        .iter()
        .map(AsRef::as_ref)
        .filter(|token| *token != USAGE_EXPANDER_TOKEN)
        .flat_map(|token| USAGE_TIMESTAMP.find_iter(token))
        .filter_map(|m| NaiveDateTime::parse_from_str(m.as_str(), USAGE_TIMESTAMP_FORMAT).ok())
        .max()
        .map(|latest| latest.format(RECORD_DATE_FORMAT).to_string())
}
