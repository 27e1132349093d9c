//! Application layer module
//!
//! Normalization, reconciliation, the error ledger and the run orchestrator
//! that sequences them.

pub mod error_ledger;
pub mod normalizer;
pub mod orchestrator;
pub mod reconciler;

pub use error_ledger::{CorruptLedgerPolicy, ErrorLedger, LedgerEntry, LoadedLedger};
pub use normalizer::{DateFallback, Normalizer, NormalizerSettings};
pub use orchestrator::{RunError, RunPhase, RunSummary, SyncOrchestrator, SyncSettings};
pub use reconciler::{reconcile, RemoteSnapshot, SyncAction, COMPARED_FIELDS};
