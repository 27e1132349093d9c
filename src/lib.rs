//! datapage-sync - incremental mirror of hosted data page metadata
//!
//! Pages enumerated from the app console are extracted, normalized into
//! canonical records, diffed against the remote table and written only when
//! new or changed. Failed items are kept in a durable error ledger and
//! retried on the next pass.

pub mod application;
pub mod domain;
pub mod infrastructure;

pub use application::{RunSummary, SyncOrchestrator, SyncSettings};
pub use domain::{CanonicalRecord, Item, ItemKey, RawFieldBag};
