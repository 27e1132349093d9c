//! Collaborator interfaces for the sync pipeline
//!
//! The orchestrator only talks to the outside world through these traits: a
//! page extractor bound to one shared session, a record store, and an item
//! source for enumeration.

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::errors::{ExtractionError, StoreError, WriteError};
use crate::domain::item::{Item, ItemKey};
use crate::domain::raw_fields::RawFieldBag;
use crate::domain::record::CanonicalRecord;

/// Handle to the single browsing session shared by all extractions of a run.
///
/// Extraction needs `&mut` access, which keeps reads against the session
/// serialized.
#[derive(Debug, Clone)]
pub struct ExtractionSession {
    id: Uuid,
    display_configured: bool,
    pages_opened: usize,
    current: Option<ItemKey>,
}

impl ExtractionSession {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            display_configured: false,
            pages_opened: 0,
            current: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn is_display_configured(&self) -> bool {
        self.display_configured
    }

    pub fn pages_opened(&self) -> usize {
        self.pages_opened
    }

    /// Page the session is currently showing
    pub fn current(&self) -> Option<&ItemKey> {
        self.current.as_ref()
    }

    pub fn mark_display_configured(&mut self, configured: bool) {
        self.display_configured = configured;
    }

    pub fn note_page_opened(&mut self, key: &ItemKey) {
        self.pages_opened += 1;
        self.current = Some(key.clone());
    }
}

impl Default for ExtractionSession {
    fn default() -> Self {
        Self::new()
    }
}

/// Reads raw page fields through a shared session
#[async_trait]
pub trait PageExtractor: Send + Sync {
    /// One-time display configuration; must run before the first field read
    async fn apply_display_configuration(
        &self,
        session: &mut ExtractionSession,
    ) -> Result<(), ExtractionError>;

    /// Whether the display configuration is still in effect
    async fn verify_display_configuration(
        &self,
        session: &mut ExtractionSession,
    ) -> Result<bool, ExtractionError> {
        Ok(session.is_display_configured())
    }

    async fn extract(
        &self,
        session: &mut ExtractionSession,
        item: &Item,
    ) -> Result<RawFieldBag, ExtractionError>;
}

/// Remote table holding canonical records
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Every record currently stored in `table`
    async fn load_snapshot(&self, table: &str) -> Result<Vec<CanonicalRecord>, StoreError>;

    async fn create(&self, table: &str, record: &CanonicalRecord) -> Result<(), WriteError>;

    /// Update the row whose key column equals `key`
    async fn update(
        &self,
        table: &str,
        key: &ItemKey,
        record: &CanonicalRecord,
    ) -> Result<(), WriteError>;
}

/// Enumerates the items of one application
#[async_trait]
pub trait ItemSource: Send + Sync {
    async fn list_items(&self, app_name: &str) -> Result<Vec<Item>, StoreError>;
}
