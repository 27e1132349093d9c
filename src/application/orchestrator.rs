//! Sync run orchestration
//!
//! A run walks a fixed state machine:
//! `Filtering → Bootstrapping → MainPass → RetryPass → Done`.
//!
//! Items are processed strictly one at a time because every extraction goes
//! through the single [`ExtractionSession`]. Any per-item failure is recorded
//! in the [`ErrorLedger`] and the run moves on to the next item.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::application::error_ledger::{CorruptLedgerPolicy, ErrorLedger, LedgerEntry};
use crate::application::normalizer::Normalizer;
use crate::application::reconciler::{reconcile, RemoteSnapshot, SyncAction};
use crate::domain::errors::{
    ExtractionError, LedgerError, StoreError, SyncError, WriteError, WriteOperation,
};
use crate::domain::item::{Item, ItemKey};
use crate::domain::raw_fields::RawFieldBag;
use crate::domain::record::CanonicalRecord;
use crate::domain::repositories::{ExtractionSession, PageExtractor, RecordStore};
use crate::infrastructure::config::AppConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Filtering,
    Bootstrapping,
    MainPass,
    RetryPass,
    Done,
}

impl RunPhase {
    pub fn next(self) -> Self {
        match self {
            Self::Filtering => Self::Bootstrapping,
            Self::Bootstrapping => Self::MainPass,
            Self::MainPass => Self::RetryPass,
            Self::RetryPass | Self::Done => Self::Done,
        }
    }
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Filtering => "filtering",
            Self::Bootstrapping => "bootstrapping",
            Self::MainPass => "main pass",
            Self::RetryPass => "retry pass",
            Self::Done => "done",
        };
        f.write_str(name)
    }
}

/// Run-level knobs, usually derived from [`AppConfig`]
#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub table: String,
    /// Drop items whose key is already stored instead of diffing them
    pub skip_known_items: bool,
    pub retry_pass: bool,
    /// Include entries persisted by earlier runs in the retry pass
    pub retry_from_ledger: bool,
    pub corrupt_policy: CorruptLedgerPolicy,
    pub extract_timeout: Duration,
    pub store_timeout: Duration,
    /// Re-verify the display configuration every N items (0 = never)
    pub reverify_every: usize,
}

impl SyncSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            table: config.store.table.clone(),
            skip_known_items: config.sync.skip_known_items,
            retry_pass: config.sync.retry_pass,
            retry_from_ledger: config.sync.retry_from_ledger,
            corrupt_policy: config.ledger.corrupt_policy,
            extract_timeout: Duration::from_secs(config.sync.extract_timeout_secs),
            store_timeout: Duration::from_secs(config.store.request_timeout_secs),
            reverify_every: config.sync.reverify_every,
        }
    }
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

/// Failures that end a run before any item is processed or leave the
/// ledger undurable
#[derive(Error, Debug)]
pub enum RunError {
    #[error("remote snapshot could not be loaded: {0}")]
    Snapshot(#[source] StoreError),

    #[error("remote snapshot load timed out after {0}s")]
    SnapshotTimeout(u64),

    #[error("error ledger could not be persisted: {0}")]
    Ledger(#[source] LedgerError),
}

/// End-of-run accounting
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub enumerated: usize,
    /// Items without a usable key
    pub rejected: usize,
    /// Repeated keys collapsed during filtering
    pub duplicates: usize,
    /// Items dropped because the key is already stored
    pub filtered: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub created: usize,
    pub updated: usize,
    pub skipped: usize,
    pub retried: usize,
    pub recovered: usize,
    pub ledger_size: usize,
    pub quarantined: usize,
    pub bootstrapped: bool,
    pub cancelled: bool,
    pub retry_error: Option<String>,
    pub phases: Vec<RunPhase>,
}

impl RunSummary {
    fn new(run_id: Uuid, enumerated: usize) -> Self {
        Self {
            run_id,
            started_at: Utc::now(),
            finished_at: None,
            enumerated,
            rejected: 0,
            duplicates: 0,
            filtered: 0,
            succeeded: 0,
            failed: 0,
            created: 0,
            updated: 0,
            skipped: 0,
            retried: 0,
            recovered: 0,
            ledger_size: 0,
            quarantined: 0,
            bootstrapped: false,
            cancelled: false,
            retry_error: None,
            phases: Vec::new(),
        }
    }

    fn count(&mut self, action: &SyncAction) {
        match action {
            SyncAction::Create => self.created += 1,
            SyncAction::Update { .. } => self.updated += 1,
            SyncAction::Skip => self.skipped += 1,
        }
    }

    pub fn is_clean(&self) -> bool {
        self.failed == 0 && self.ledger_size == 0 && self.retry_error.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum DisplayState {
    NotApplied,
    Ready,
    Failed(String),
}

pub struct SyncOrchestrator {
    extractor: Arc<dyn PageExtractor>,
    store: Arc<dyn RecordStore>,
    normalizer: Normalizer,
    ledger: ErrorLedger,
    settings: SyncSettings,
    session: ExtractionSession,
    phase: RunPhase,
    display: DisplayState,
    since_verified: usize,
    cancel: CancellationToken,
}

impl SyncOrchestrator {
    pub fn new(
        extractor: Arc<dyn PageExtractor>,
        store: Arc<dyn RecordStore>,
        normalizer: Normalizer,
        ledger: ErrorLedger,
        settings: SyncSettings,
    ) -> Self {
        Self {
            extractor,
            store,
            normalizer,
            ledger,
            settings,
            session: ExtractionSession::new(),
            phase: RunPhase::Filtering,
            display: DisplayState::NotApplied,
            since_verified: 0,
            cancel: CancellationToken::new(),
        }
    }

    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    pub fn ledger(&self) -> &ErrorLedger {
        &self.ledger
    }

    pub fn session(&self) -> &ExtractionSession {
        &self.session
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    /// Run one full sync over `items`.
    ///
    /// Per-item failures never surface here; they end up in the summary and
    /// the ledger. Only a snapshot that cannot be loaded or a ledger that
    /// cannot be persisted fails the run.
    pub async fn run(&mut self, items: Vec<Item>) -> Result<RunSummary, RunError> {
        let mut summary = RunSummary::new(Uuid::new_v4(), items.len());
        info!(
            "🚀 Sync run {} started: {} items → table {}",
            summary.run_id,
            items.len(),
            self.settings.table
        );

        let snapshot = self.load_snapshot().await?;
        info!("📥 Remote snapshot loaded: {} records", snapshot.len());

        self.phase = RunPhase::Filtering;
        summary.phases.push(self.phase);
        let queue = self.filter_items(items, &snapshot, &mut summary);

        self.advance(&mut summary);
        let has_work = !queue.is_empty()
            || (self.settings.retry_pass
                && self.settings.retry_from_ledger
                && self.ledger.has_persisted_state().await);
        if has_work && !self.cancel.is_cancelled() {
            summary.bootstrapped = self.bootstrap().await;
        } else {
            debug!("Nothing to extract, bootstrap not needed");
        }

        self.advance(&mut summary);
        let mut succeeded: HashSet<ItemKey> = HashSet::new();
        self.main_pass(&queue, &snapshot, &mut succeeded, &mut summary)
            .await;

        self.advance(&mut summary);
        self.retry_pass(&snapshot, &mut succeeded, &mut summary)
            .await?;

        self.advance(&mut summary);
        summary.succeeded = succeeded.len();
        summary.finished_at = Some(Utc::now());
        info!(
            "🏁 Sync run {} finished: {} succeeded, {} failed (created {}, updated {}, skipped {}), ledger size {}",
            summary.run_id,
            summary.succeeded,
            summary.failed,
            summary.created,
            summary.updated,
            summary.skipped,
            summary.ledger_size
        );
        Ok(summary)
    }

    fn advance(&mut self, summary: &mut RunSummary) {
        self.phase = self.phase.next();
        summary.phases.push(self.phase);
        info!("📍 Phase: {}", self.phase);
    }

    async fn load_snapshot(&self) -> Result<RemoteSnapshot, RunError> {
        let table = self.settings.table.as_str();
        match timeout(
            self.settings.store_timeout,
            RemoteSnapshot::load(self.store.as_ref(), table),
        )
        .await
        {
            Ok(Ok(snapshot)) => Ok(snapshot),
            Ok(Err(e)) => Err(RunError::Snapshot(e)),
            Err(_) => Err(RunError::SnapshotTimeout(
                self.settings.store_timeout.as_secs(),
            )),
        }
    }

    fn filter_items(
        &self,
        items: Vec<Item>,
        snapshot: &RemoteSnapshot,
        summary: &mut RunSummary,
    ) -> Vec<Item> {
        let mut seen: HashSet<ItemKey> = HashSet::with_capacity(items.len());
        let mut queue = Vec::with_capacity(items.len());

        for item in items {
            if item.key.is_blank() {
                warn!("⚠️ Item without key rejected: {:?}", item.name);
                summary.rejected += 1;
                continue;
            }
            if !seen.insert(item.key.clone()) {
                debug!("Duplicate key {} collapsed", item.key);
                summary.duplicates += 1;
                continue;
            }
            if self.settings.skip_known_items && snapshot.contains(&item.key) {
                summary.filtered += 1;
                continue;
            }
            queue.push(item);
        }

        info!(
            "🔎 Filtering: {} queued, {} already stored, {} duplicates, {} rejected",
            queue.len(),
            summary.filtered,
            summary.duplicates,
            summary.rejected
        );
        queue
    }

    /// Apply the display configuration and confirm it took effect
    async fn bootstrap(&mut self) -> bool {
        match self.configure_display().await {
            Ok(()) => {
                info!("✅ Display configuration applied (session {})", self.session.id());
                self.display = DisplayState::Ready;
                self.since_verified = 0;
                true
            }
            Err(e) => {
                error!("❌ Bootstrap failed, no page will be read this run: {}", e);
                self.display = DisplayState::Failed(e.to_string());
                false
            }
        }
    }

    async fn configure_display(&mut self) -> Result<(), ExtractionError> {
        let limit = self.settings.extract_timeout;
        let session_timeout = || {
            ExtractionError::Session(format!(
                "display configuration timed out after {}s",
                limit.as_secs()
            ))
        };

        timeout(
            limit,
            self.extractor.apply_display_configuration(&mut self.session),
        )
        .await
        .map_err(|_| session_timeout())??;

        let verified = timeout(
            limit,
            self.extractor.verify_display_configuration(&mut self.session),
        )
        .await
        .map_err(|_| session_timeout())??;
        if verified {
            Ok(())
        } else {
            Err(ExtractionError::DisplayNotConfigured(
                "configuration did not take effect".to_string(),
            ))
        }
    }

    /// Periodic check that the display configuration survived navigation;
    /// re-applied once if it was lost
    async fn ensure_display(&mut self) -> Result<(), ExtractionError> {
        match &self.display {
            DisplayState::Ready => {}
            DisplayState::NotApplied => {
                return Err(ExtractionError::DisplayNotConfigured(
                    "bootstrap has not run".to_string(),
                ));
            }
            DisplayState::Failed(reason) => {
                return Err(ExtractionError::DisplayNotConfigured(reason.clone()));
            }
        }

        let every = self.settings.reverify_every;
        if every == 0 || self.since_verified < every {
            self.since_verified += 1;
            return Ok(());
        }

        let still_applied = timeout(
            self.settings.extract_timeout,
            self.extractor.verify_display_configuration(&mut self.session),
        )
        .await
        .unwrap_or(Ok(false))?;

        if !still_applied {
            warn!("⚠️ Display configuration lost, re-applying");
            if let Err(e) = self.configure_display().await {
                self.display = DisplayState::Failed(e.to_string());
                return Err(e);
            }
        }
        self.since_verified = 1;
        Ok(())
    }

    async fn main_pass(
        &mut self,
        queue: &[Item],
        snapshot: &RemoteSnapshot,
        succeeded: &mut HashSet<ItemKey>,
        summary: &mut RunSummary,
    ) {
        let total = queue.len();
        for (position, item) in queue.iter().enumerate() {
            if self.cancel.is_cancelled() {
                warn!("🛑 Run cancelled after {}/{} items", position, total);
                summary.cancelled = true;
                break;
            }

            let span = info_span!("item", key = %item.key);
            match self.process_item(item, snapshot).instrument(span).await {
                Ok(action) => {
                    info!("[{}/{}] ✅ {}: {}", position + 1, total, item, action);
                    summary.count(&action);
                    succeeded.insert(item.key.clone());
                }
                Err(e) => {
                    warn!(
                        "[{}/{}] ❌ {} failed at {}: {}",
                        position + 1,
                        total,
                        item,
                        e.stage(),
                        e
                    );
                    self.ledger.record(item, &e).await;
                }
            }
        }
        summary.failed = self.ledger.len();
    }

    async fn retry_pass(
        &mut self,
        snapshot: &RemoteSnapshot,
        succeeded: &mut HashSet<ItemKey>,
        summary: &mut RunSummary,
    ) -> Result<(), RunError> {
        let prior = if self.settings.retry_from_ledger {
            match self.ledger.load_for_retry(self.settings.corrupt_policy).await {
                Ok(loaded) => {
                    summary.quarantined = loaded.quarantined();
                    Some(loaded.entries)
                }
                Err(e) => {
                    error!("❌ Error ledger unreadable, retry pass skipped: {}", e);
                    summary.retry_error = Some(e.to_string());
                    None
                }
            }
        } else {
            Some(Vec::new())
        };

        let Some(prior) = prior else {
            // Ledger file left as is; this run's failures stay in the journal.
            summary.failed = self.ledger.len();
            summary.ledger_size = self.ledger.len();
            return Ok(());
        };

        let retry_items = self.retry_items(&prior, succeeded);
        let can_retry = self.settings.retry_pass
            && summary.bootstrapped
            && !self.cancel.is_cancelled()
            && !retry_items.is_empty();

        if can_retry {
            info!("🔄 Retrying {} item(s)", retry_items.len());
            let total = retry_items.len();
            for (position, item) in retry_items.iter().enumerate() {
                if self.cancel.is_cancelled() {
                    warn!("🛑 Retry pass cancelled after {}/{} items", position, total);
                    summary.cancelled = true;
                    break;
                }
                summary.retried += 1;

                let span = info_span!("item", key = %item.key, retry = true);
                match self.process_item(item, snapshot).instrument(span).await {
                    Ok(action) => {
                        info!("[retry {}/{}] ✅ {}: {}", position + 1, total, item, action);
                        summary.count(&action);
                        summary.recovered += 1;
                        self.ledger.resolve(&item.key);
                        succeeded.insert(item.key.clone());
                    }
                    Err(e) => {
                        warn!(
                            "[retry {}/{}] ❌ {} still failing: {}",
                            position + 1,
                            total,
                            item,
                            e
                        );
                        self.ledger.record(item, &e).await;
                    }
                }
            }
        } else if !retry_items.is_empty() {
            debug!("Retry pass skipped for {} item(s)", retry_items.len());
        }

        summary.failed = self.ledger.len();
        summary.ledger_size = self
            .ledger
            .persist_after_retry(&prior, succeeded)
            .await
            .map_err(RunError::Ledger)?;
        Ok(())
    }

    /// This run's failures followed by earlier unresolved entries, one per key
    fn retry_items(&self, prior: &[LedgerEntry], succeeded: &HashSet<ItemKey>) -> Vec<Item> {
        let mut seen: HashSet<&ItemKey> = HashSet::new();
        self.ledger
            .entries()
            .iter()
            .chain(prior.iter())
            .filter(|entry| !succeeded.contains(entry.key()))
            .filter(|entry| seen.insert(entry.key()))
            .map(|entry| entry.item.clone())
            .collect()
    }

    /// Extract → normalize → reconcile → write for one item
    async fn process_item(
        &mut self,
        item: &Item,
        snapshot: &RemoteSnapshot,
    ) -> Result<SyncAction, SyncError> {
        self.ensure_display().await?;
        let bag = self.extract(item).await?;
        let record = self.normalizer.normalize(item, &bag)?;
        let action = reconcile(&record, snapshot);
        debug!("Reconciled {} → {}", item.key, action);
        self.dispatch(&action, &record).await?;
        Ok(action)
    }

    async fn extract(&mut self, item: &Item) -> Result<RawFieldBag, ExtractionError> {
        let limit = self.settings.extract_timeout;
        timeout(limit, self.extractor.extract(&mut self.session, item))
            .await
            .map_err(|_| ExtractionError::Timeout {
                key: item.key.clone(),
                seconds: limit.as_secs(),
            })?
    }

    async fn dispatch(
        &self,
        action: &SyncAction,
        record: &CanonicalRecord,
    ) -> Result<(), WriteError> {
        let table = self.settings.table.as_str();
        match action {
            SyncAction::Skip => Ok(()),
            SyncAction::Create => {
                self.bounded_write(
                    WriteOperation::Create,
                    &record.key,
                    self.store.create(table, record),
                )
                .await
            }
            SyncAction::Update { .. } => {
                self.bounded_write(
                    WriteOperation::Update,
                    &record.key,
                    self.store.update(table, &record.key, record),
                )
                .await
            }
        }
    }

    async fn bounded_write(
        &self,
        operation: WriteOperation,
        key: &ItemKey,
        write: impl Future<Output = Result<(), WriteError>>,
    ) -> Result<(), WriteError> {
        let limit = self.settings.store_timeout;
        timeout(limit, write).await.map_err(|_| WriteError::Timeout {
            operation,
            key: key.clone(),
            seconds: limit.as_secs(),
        })?
    }
}
