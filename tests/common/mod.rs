//! Shared fixtures for the pipeline integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use datapage_sync::application::{
    CorruptLedgerPolicy, ErrorLedger, Normalizer, NormalizerSettings, SyncOrchestrator,
    SyncSettings,
};
use datapage_sync::domain::{
    CanonicalRecord, ExtractionError, ExtractionSession, FieldKey, Item, ItemKey, PageExtractor,
    RawFieldBag, RecordStore, StoreError, WriteError,
};
use datapage_sync::infrastructure::MemoryRecordStore;

pub const TABLE: &str = "Datapage_Definitions";

/// What the extractor was asked to do, in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Apply,
    Verify,
    Extract(String),
}

#[derive(Default)]
struct Script {
    calls: Vec<Call>,
    /// Remaining failures per key; `u32::MAX` never recovers
    failures: HashMap<ItemKey, u32>,
}

/// Page extractor driven by canned field bags
pub struct ScriptedExtractor {
    pages: HashMap<ItemKey, RawFieldBag>,
    bootstrap_error: Option<ExtractionError>,
    verify_result: bool,
    /// Keys whose extraction never completes
    stalled: HashSet<ItemKey>,
    /// Cancelled as soon as a scripted failure is returned
    cancel_on_failure: Option<CancellationToken>,
    script: Mutex<Script>,
}

impl ScriptedExtractor {
    pub fn new() -> Self {
        Self {
            pages: HashMap::new(),
            bootstrap_error: None,
            verify_result: true,
            stalled: HashSet::new(),
            cancel_on_failure: None,
            script: Mutex::new(Script::default()),
        }
    }

    pub fn with_page(mut self, key: &str, bag: RawFieldBag) -> Self {
        self.pages.insert(ItemKey::new(key), bag);
        self
    }

    /// Extraction of `key` always fails
    pub fn failing(self, key: &str) -> Self {
        self.failing_times(key, u32::MAX)
    }

    /// Extraction of `key` fails `times` times, then succeeds
    pub fn failing_times(self, key: &str, times: u32) -> Self {
        self.script
            .lock()
            .unwrap()
            .failures
            .insert(ItemKey::new(key), times);
        self
    }

    /// Extraction of `key` hangs until the caller gives up
    pub fn stalling(mut self, key: &str) -> Self {
        self.stalled.insert(ItemKey::new(key));
        self
    }

    /// Cancel `token` right after the first scripted failure, as an
    /// operator interrupt arriving mid-run would
    pub fn cancel_on_failure(mut self, token: CancellationToken) -> Self {
        self.cancel_on_failure = Some(token);
        self
    }

    pub fn with_bootstrap_error(mut self, error: ExtractionError) -> Self {
        self.bootstrap_error = Some(error);
        self
    }

    pub fn verify_returns(mut self, result: bool) -> Self {
        self.verify_result = result;
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.script.lock().unwrap().calls.clone()
    }

    pub fn extracted(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Extract(key) => Some(key),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl PageExtractor for ScriptedExtractor {
    async fn apply_display_configuration(
        &self,
        session: &mut ExtractionSession,
    ) -> Result<(), ExtractionError> {
        self.script.lock().unwrap().calls.push(Call::Apply);
        if let Some(error) = &self.bootstrap_error {
            return Err(error.clone());
        }
        session.mark_display_configured(true);
        Ok(())
    }

    async fn verify_display_configuration(
        &self,
        session: &mut ExtractionSession,
    ) -> Result<bool, ExtractionError> {
        self.script.lock().unwrap().calls.push(Call::Verify);
        Ok(self.verify_result && session.is_display_configured())
    }

    async fn extract(
        &self,
        session: &mut ExtractionSession,
        item: &Item,
    ) -> Result<RawFieldBag, ExtractionError> {
        match self.scripted_outcome(session, item) {
            Some(outcome) => outcome,
            None => std::future::pending().await,
        }
    }
}

impl ScriptedExtractor {
    /// `None` when the page for `item` is set up to stall
    fn scripted_outcome(
        &self,
        session: &mut ExtractionSession,
        item: &Item,
    ) -> Option<Result<RawFieldBag, ExtractionError>> {
        let mut script = self.script.lock().unwrap();
        script.calls.push(Call::Extract(item.key.to_string()));

        if !session.is_display_configured() {
            return Some(Err(ExtractionError::DisplayNotConfigured(
                "not applied".into(),
            )));
        }
        session.note_page_opened(&item.key);

        if let Some(remaining) = script.failures.get_mut(&item.key) {
            if *remaining > 0 {
                if *remaining != u32::MAX {
                    *remaining -= 1;
                }
                if let Some(token) = &self.cancel_on_failure {
                    token.cancel();
                }
                return Some(Err(ExtractionError::Navigation {
                    key: item.key.clone(),
                    reason: "page did not load".into(),
                }));
            }
        }

        if self.stalled.contains(&item.key) {
            return None;
        }

        Some(
            self.pages
                .get(&item.key)
                .cloned()
                .ok_or_else(|| ExtractionError::FieldUnavailable {
                    key: item.key.clone(),
                    field: "deployed".into(),
                    reason: "no such page".into(),
                }),
        )
    }
}

/// Memory store whose snapshot or writes for chosen keys never complete
pub struct StallingStore {
    inner: MemoryRecordStore,
    stalled_writes: HashSet<ItemKey>,
    stall_snapshot: bool,
}

impl StallingStore {
    pub fn new() -> Self {
        Self {
            inner: MemoryRecordStore::new(),
            stalled_writes: HashSet::new(),
            stall_snapshot: false,
        }
    }

    pub fn stalling_writes_for(mut self, key: &str) -> Self {
        self.stalled_writes.insert(ItemKey::new(key));
        self
    }

    pub fn stalling_snapshot(mut self) -> Self {
        self.stall_snapshot = true;
        self
    }

    pub fn records(&self, table: &str) -> Vec<CanonicalRecord> {
        self.inner.records(table)
    }
}

#[async_trait]
impl RecordStore for StallingStore {
    async fn load_snapshot(&self, table: &str) -> Result<Vec<CanonicalRecord>, StoreError> {
        if self.stall_snapshot {
            std::future::pending::<()>().await;
        }
        self.inner.load_snapshot(table).await
    }

    async fn create(&self, table: &str, record: &CanonicalRecord) -> Result<(), WriteError> {
        if self.stalled_writes.contains(&record.key) {
            std::future::pending::<()>().await;
        }
        self.inner.create(table, record).await
    }

    async fn update(
        &self,
        table: &str,
        key: &ItemKey,
        record: &CanonicalRecord,
    ) -> Result<(), WriteError> {
        if self.stalled_writes.contains(key) {
            std::future::pending::<()>().await;
        }
        self.inner.update(table, key, record).await
    }
}

pub fn page(deployed: &str, style: &str) -> RawFieldBag {
    RawFieldBag::new()
        .with(FieldKey::Deployed, deployed)
        .with(FieldKey::DataSource, "Tbl_Orders")
        .with(FieldKey::Authentication, "None")
        .with(FieldKey::Style, style)
        .with(FieldKey::Localization, "English")
        .with_usage_history(["Host page 05 Jan 2023 10:00 AM", "less..."])
}

pub fn item(key: &str) -> Item {
    let mut item = Item::new(key);
    item.app_name = Some("WorkMovr 4".into());
    item.name = Some(format!("Page {key}"));
    item.date_created = Some("2023-01-05T10:00:00".into());
    item
}

/// The record a sync of `item(key)` + `page(deployed, style)` produces
pub fn stored(key: &str, deployed: &str, style: &str) -> CanonicalRecord {
    Normalizer::new(NormalizerSettings::default())
        .normalize(&item(key), &page(deployed, style))
        .unwrap()
}

pub fn settings() -> SyncSettings {
    SyncSettings {
        table: TABLE.to_string(),
        skip_known_items: false,
        retry_pass: true,
        retry_from_ledger: true,
        corrupt_policy: CorruptLedgerPolicy::Abort,
        extract_timeout: Duration::from_secs(5),
        store_timeout: Duration::from_secs(5),
        reverify_every: 0,
    }
}

pub fn orchestrator(
    extractor: Arc<ScriptedExtractor>,
    store: Arc<dyn RecordStore>,
    ledger_path: &Path,
    settings: SyncSettings,
) -> SyncOrchestrator {
    SyncOrchestrator::new(
        extractor,
        store,
        Normalizer::new(NormalizerSettings::default()),
        ErrorLedger::new(ledger_path),
        settings,
    )
}
