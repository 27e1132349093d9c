//! Error taxonomy for the sync pipeline
//!
//! Every per-item failure is one of [`ExtractionError`], [`NormalizationError`]
//! or [`WriteError`]; the orchestrator wraps them in [`SyncError`] and routes
//! the item to the error ledger. [`StoreError`] covers run-level store access
//! (snapshot, enumeration) and [`LedgerError`] covers ledger persistence.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

use crate::domain::item::ItemKey;

/// Failure while reading a page in the shared extraction session
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExtractionError {
    #[error("page for '{key}' could not be opened: {reason}")]
    Navigation { key: ItemKey, reason: String },

    #[error("field '{field}' not readable on '{key}': {reason}")]
    FieldUnavailable {
        key: ItemKey,
        field: String,
        reason: String,
    },

    #[error("display configuration not in effect: {0}")]
    DisplayNotConfigured(String),

    #[error("extraction of '{key}' timed out after {seconds}s")]
    Timeout { key: ItemKey, seconds: u64 },

    #[error("extraction session unavailable: {0}")]
    Session(String),
}

/// Raw field bag could not be turned into a canonical record
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NormalizationError {
    #[error("item key is empty")]
    MissingKey,

    #[error("required field(s) missing for '{key}': {}", .fields.join(", "))]
    MissingFields { key: ItemKey, fields: Vec<String> },
}

/// Which write was being attempted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOperation {
    Create,
    Update,
}

impl fmt::Display for WriteOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Create => f.write_str("create"),
            Self::Update => f.write_str("update"),
        }
    }
}

/// Store rejected or could not be reached for a single record write
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WriteError {
    #[error("store rejected {operation} for '{key}': HTTP {status} - {message}")]
    Rejected {
        operation: WriteOperation,
        key: ItemKey,
        status: u16,
        message: String,
    },

    #[error("store unreachable during {operation} for '{key}': {reason}")]
    Unreachable {
        operation: WriteOperation,
        key: ItemKey,
        reason: String,
    },

    #[error("{operation} for '{key}' timed out after {seconds}s")]
    Timeout {
        operation: WriteOperation,
        key: ItemKey,
        seconds: u64,
    },

    #[error("store backend failed during {operation} for '{key}': {reason}")]
    Backend {
        operation: WriteOperation,
        key: ItemKey,
        reason: String,
    },
}

impl WriteError {
    pub fn key(&self) -> &ItemKey {
        match self {
            Self::Rejected { key, .. }
            | Self::Unreachable { key, .. }
            | Self::Timeout { key, .. }
            | Self::Backend { key, .. } => key,
        }
    }
}

/// Run-level store access failures (snapshot load, item enumeration, auth)
#[derive(Error, Debug, Clone)]
pub enum StoreError {
    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("HTTP {status} from {url}: {message}")]
    Http {
        status: u16,
        url: String,
        message: String,
    },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("response could not be decoded: {0}")]
    Decode(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid table name '{0}'")]
    InvalidTable(String),

    #[error("store request timed out after {0}s")]
    Timeout(u64),
}

/// Error ledger could not be read or written
#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("ledger {path:?} line {line} is corrupt: {reason}")]
    Corrupt {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    #[error("ledger I/O failed on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("ledger entry could not be encoded: {0}")]
    Encode(String),
}

/// Pipeline stage at which an item failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStage {
    Extraction,
    Normalization,
    Write,
}

impl fmt::Display for FailureStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Extraction => f.write_str("extraction"),
            Self::Normalization => f.write_str("normalization"),
            Self::Write => f.write_str("write"),
        }
    }
}

/// Any per-item failure; all variants route the item to the error ledger
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    #[error(transparent)]
    Extraction(#[from] ExtractionError),

    #[error(transparent)]
    Normalization(#[from] NormalizationError),

    #[error(transparent)]
    Write(#[from] WriteError),
}

impl SyncError {
    pub fn stage(&self) -> FailureStage {
        match self {
            Self::Extraction(_) => FailureStage::Extraction,
            Self::Normalization(_) => FailureStage::Normalization,
            Self::Write(_) => FailureStage::Write,
        }
    }
}
