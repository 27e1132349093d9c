//! Domain module - entities, value objects and collaborator traits
//!
//! Pure types shared by every layer. Nothing here performs I/O.

pub mod errors;
pub mod item;
pub mod raw_fields;
pub mod record;
pub mod repositories;

pub use errors::{
    ExtractionError, FailureStage, LedgerError, NormalizationError, StoreError, SyncError,
    WriteError, WriteOperation,
};
pub use item::{Item, ItemKey};
pub use raw_fields::{FieldKey, PageFields, RawFieldBag};
pub use record::{CanonicalRecord, DeployFlag, RecordField};
pub use repositories::{ExtractionSession, ItemSource, PageExtractor, RecordStore};
