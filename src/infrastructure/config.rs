//! Configuration infrastructure
//!
//! Settings are layered with the `config` crate:
//! built-in defaults ← optional config file ← `DATAPAGE_SYNC_*` environment
//! variables (nested keys separated by `__`, e.g.
//! `DATAPAGE_SYNC_STORE__CLIENT_SECRET`). The merged result is validated once
//! before anything uses it.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;
use url::Url;

use crate::application::error_ledger::CorruptLedgerPolicy;
use crate::application::normalizer::NormalizerSettings;

/// Prefix of environment overrides
pub const ENV_PREFIX: &str = "DATAPAGE_SYNC";

const APP_DIR_NAME: &str = "datapage-sync";
const REDACTED: &str = "********";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration: {source}")]
    Load {
        #[from]
        source: config::ConfigError,
    },

    #[error("Configuration validation failed: {message}")]
    Validation { message: String },

    #[error("Failed to write configuration to {path:?}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to encode configuration: {0}")]
    Encode(#[from] serde_json::Error),
}

impl ConfigError {
    fn invalid(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }
}

/// Complete application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub source: SourceConfig,
    pub store: StoreConfig,
    pub sync: SyncConfig,
    pub ledger: LedgerConfig,
    pub normalizer: NormalizerSettings,
    pub logging: LoggingConfig,
}

/// Where items and page data come from
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Application whose data pages are synced (case-insensitive substring)
    pub app_name: String,
    /// Captured page field bags replayed by the capture extractor
    pub capture_file: PathBuf,
    /// Pre-exported item listing; when unset items are enumerated from the store API
    pub items_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Rest,
    Sqlite,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    /// REST API root, e.g. `https://account.example.com/rest/v2/`
    pub base_url: String,
    pub token_url: String,
    pub client_id: String,
    pub client_secret: String,
    /// Table holding the canonical records
    pub table: String,
    pub request_timeout_secs: u64,
    /// Rows requested per snapshot page
    pub page_size: u32,
    pub sqlite_path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub skip_known_items: bool,
    pub retry_pass: bool,
    pub retry_from_ledger: bool,
    pub extract_timeout_secs: u64,
    /// Re-verify the display configuration every N items (0 = never)
    pub reverify_every: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    pub path: PathBuf,
    pub corrupt_policy: CorruptLedgerPolicy,
}

/// Logging configuration settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "error", "warn", "info", "debug", "trace"
    pub level: String,
    /// JSON lines in the log file
    pub json_format: bool,
    pub console_output: bool,
    pub file_output: bool,
    pub log_dir: PathBuf,
    pub file_prefix: String,
    /// Module-specific log level filters (e.g., "sqlx": "warn", "reqwest": "info")
    pub module_filters: HashMap<String, String>,
}

/// Default configuration values
pub mod defaults {
    pub const TABLE: &str = "Datapage_Definitions";
    pub const REQUEST_TIMEOUT_SECS: u64 = 30;
    /// Largest page the REST API serves
    pub const PAGE_SIZE: u32 = 1000;
    pub const SQLITE_FILE: &str = "datapages.db";
    pub const CAPTURE_FILE: &str = "captures.json";

    pub const EXTRACT_TIMEOUT_SECS: u64 = 60;
    pub const REVERIFY_EVERY: usize = 25;

    pub const LEDGER_FILE: &str = "error_ledger.jsonl";

    pub const LOG_LEVEL: &str = "info";
    pub const LOG_FILE_PREFIX: &str = "datapage-sync";
}

/// Per-user data directory, or the working directory when there is none
pub fn app_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|dir| dir.join(APP_DIR_NAME))
        .unwrap_or_else(|| PathBuf::from("."))
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            app_name: String::new(),
            capture_file: PathBuf::from(defaults::CAPTURE_FILE),
            items_file: None,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Rest,
            base_url: String::new(),
            token_url: String::new(),
            client_id: String::new(),
            client_secret: String::new(),
            table: defaults::TABLE.to_string(),
            request_timeout_secs: defaults::REQUEST_TIMEOUT_SECS,
            page_size: defaults::PAGE_SIZE,
            sqlite_path: app_data_dir().join(defaults::SQLITE_FILE),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            skip_known_items: false,
            retry_pass: true,
            retry_from_ledger: true,
            extract_timeout_secs: defaults::EXTRACT_TIMEOUT_SECS,
            reverify_every: defaults::REVERIFY_EVERY,
        }
    }
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            path: app_data_dir().join(defaults::LEDGER_FILE),
            corrupt_policy: CorruptLedgerPolicy::Abort,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        let mut module_filters = HashMap::new();
        module_filters.insert("reqwest".to_string(), "warn".to_string());
        module_filters.insert("hyper".to_string(), "warn".to_string());
        module_filters.insert("sqlx".to_string(), "warn".to_string());

        Self {
            level: defaults::LOG_LEVEL.to_string(),
            json_format: false,
            console_output: true,
            file_output: false,
            log_dir: app_data_dir().join("logs"),
            file_prefix: defaults::LOG_FILE_PREFIX.to_string(),
            module_filters,
        }
    }
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !is_table_name(&self.store.table) {
            return Err(ConfigError::invalid(format!(
                "store.table '{}' must be non-empty and contain only letters, digits and '_'",
                self.store.table
            )));
        }
        if self.store.request_timeout_secs == 0 {
            return Err(ConfigError::invalid("store.request_timeout_secs must be greater than 0"));
        }
        if self.store.page_size == 0 {
            return Err(ConfigError::invalid("store.page_size must be greater than 0"));
        }
        if self.sync.extract_timeout_secs == 0 {
            return Err(ConfigError::invalid("sync.extract_timeout_secs must be greater than 0"));
        }
        for (name, value) in [
            ("store.base_url", &self.store.base_url),
            ("store.token_url", &self.store.token_url),
        ] {
            if !value.is_empty() && Url::parse(value).is_err() {
                return Err(ConfigError::invalid(format!("{name} is not a valid URL: {value}")));
            }
        }
        if self.ledger.path.as_os_str().is_empty() {
            return Err(ConfigError::invalid("ledger.path must not be empty"));
        }
        if !matches!(
            self.logging.level.to_lowercase().as_str(),
            "error" | "warn" | "info" | "debug" | "trace"
        ) {
            return Err(ConfigError::invalid(format!(
                "logging.level '{}' is not a log level",
                self.logging.level
            )));
        }
        Ok(())
    }

    /// Settings the REST backend cannot work without
    pub fn require_rest_credentials(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("store.base_url", &self.store.base_url),
            ("store.token_url", &self.store.token_url),
            ("store.client_id", &self.store.client_id),
            ("store.client_secret", &self.store.client_secret),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigError::invalid(format!(
                    "{name} is required for the rest backend (set {ENV_PREFIX}_{})",
                    name.to_uppercase().replace('.', "__")
                )));
            }
        }
        Ok(())
    }

    /// Copy safe to print: the client secret is masked
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if !copy.store.client_secret.is_empty() {
            copy.store.client_secret = REDACTED.to_string();
        }
        copy
    }
}

/// Store table names end up in request paths and SQL
pub fn is_table_name(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

pub struct ConfigManager;

impl ConfigManager {
    /// Default config file location (`<config dir>/datapage-sync/config.json`)
    pub fn default_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(APP_DIR_NAME).join("config.json"))
    }

    /// Load defaults ← file ← environment and validate.
    ///
    /// An explicit `path` must exist; the default location is optional.
    pub fn load(path: Option<&Path>) -> Result<AppConfig, ConfigError> {
        let mut builder =
            config::Config::builder().add_source(config::Config::try_from(&AppConfig::default())?);

        match path {
            Some(path) => {
                builder = builder.add_source(config::File::from(path).required(true));
            }
            None => {
                if let Some(default_path) = Self::default_config_path() {
                    builder = builder.add_source(config::File::from(default_path).required(false));
                }
            }
        }

        let settings = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: AppConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Write the default configuration as JSON, refusing to overwrite
    pub fn save_default(path: &Path) -> Result<(), ConfigError> {
        if path.exists() {
            return Err(ConfigError::invalid(format!(
                "{} already exists",
                path.display()
            )));
        }
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| ConfigError::Write {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let json = serde_json::to_string_pretty(&AppConfig::default())?;
        std::fs::write(path, json).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })?;
        info!("✅ Default configuration written to {:?}", path);
        Ok(())
    }
}
