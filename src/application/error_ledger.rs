//! Durable ledger of items that failed to sync
//!
//! On disk the ledger is a JSON-lines file, one failed item per line, keyed by
//! the console's field names so it stays readable by hand. Every
//! [`ErrorLedger::record`] is also appended to `<ledger>.journal`, so failures
//! recorded before a crash survive it. Persisting compacts both into the
//! ledger file (temp file + rename) and removes the journal.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::ffi::OsString;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::domain::errors::{FailureStage, LedgerError, SyncError};
use crate::domain::item::{Item, ItemKey};

/// One unresolved item plus the failure that put it in the ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    #[serde(flatten)]
    pub item: Item,
    #[serde(rename = "FailedStage", default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<FailureStage>,
    #[serde(rename = "LastError", default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(rename = "RecordedAt", default, skip_serializing_if = "Option::is_none")]
    pub recorded_at: Option<DateTime<Utc>>,
}

impl LedgerEntry {
    pub fn new(item: Item, error: &SyncError) -> Self {
        Self {
            item,
            stage: Some(error.stage()),
            last_error: Some(error.to_string()),
            recorded_at: Some(Utc::now()),
        }
    }

    pub fn key(&self) -> &ItemKey {
        &self.item.key
    }
}

/// What to do with ledger lines that cannot be parsed back into an item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorruptLedgerPolicy {
    /// Fail the load and leave the file untouched
    #[default]
    Abort,
    /// Move bad lines to `<ledger>.corrupt` and continue with the rest
    Quarantine,
}

/// Result of reading the persisted ledger
#[derive(Debug, Clone, Default)]
pub struct LoadedLedger {
    pub entries: Vec<LedgerEntry>,
    /// Lines that could not be parsed (quarantine policy only)
    pub corrupt_lines: Vec<String>,
}

impl LoadedLedger {
    pub fn quarantined(&self) -> usize {
        self.corrupt_lines.len()
    }

    pub fn keys(&self) -> HashSet<ItemKey> {
        self.entries.iter().map(|entry| entry.key().clone()).collect()
    }
}

/// In-memory failure set of the current run, backed by the ledger files
#[derive(Debug)]
pub struct ErrorLedger {
    path: PathBuf,
    journal_path: PathBuf,
    entries: Vec<LedgerEntry>,
    index: HashMap<ItemKey, usize>,
    read_only: bool,
}

impl ErrorLedger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self {
            journal_path: sibling(&path, ".journal"),
            path,
            entries: Vec::new(),
            index: HashMap::new(),
            read_only: false,
        }
    }

    /// Ledger that reads the persisted files but never writes them (dry runs)
    pub fn read_only(path: impl Into<PathBuf>) -> Self {
        Self {
            read_only: true,
            ..Self::new(path)
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn journal_path(&self) -> &Path {
        &self.journal_path
    }

    pub fn quarantine_path(&self) -> PathBuf {
        sibling(&self.path, ".corrupt")
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn entries(&self) -> &[LedgerEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, key: &ItemKey) -> bool {
        self.index.contains_key(key)
    }

    /// Add a failed item. Returns `false` when the key was already recorded
    /// this run; the existing entry then only takes the newer error.
    pub async fn record(&mut self, item: &Item, error: &SyncError) -> bool {
        let entry = LedgerEntry::new(item.clone(), error);

        let inserted = match self.index.get(&item.key) {
            Some(&position) => {
                let existing = &mut self.entries[position];
                existing.stage = entry.stage;
                existing.last_error.clone_from(&entry.last_error);
                existing.recorded_at = entry.recorded_at;
                false
            }
            None => {
                self.index.insert(item.key.clone(), self.entries.len());
                self.entries.push(entry.clone());
                true
            }
        };

        if !self.read_only {
            if let Err(e) = self.append_journal(&entry).await {
                warn!("⚠️ Failed to journal ledger entry for {}: {}", item.key, e);
            }
        }
        inserted
    }

    /// Drop an item that has since succeeded
    pub fn resolve(&mut self, key: &ItemKey) -> bool {
        let Some(position) = self.index.remove(key) else {
            return false;
        };
        self.entries.remove(position);
        self.rebuild_index();
        true
    }

    /// Whether a ledger or journal from an earlier run exists on disk
    pub async fn has_persisted_state(&self) -> bool {
        path_exists(&self.path).await || path_exists(&self.journal_path).await
    }

    /// Overwrite the persisted ledger with this run's failures
    pub async fn persist(&self) -> Result<(), LedgerError> {
        if self.read_only {
            debug!("Read-only ledger, skipping persist of {} entries", self.entries.len());
            return Ok(());
        }
        write_entries(&self.path, &self.entries).await?;
        remove_if_exists(&self.journal_path).await?;
        info!("💾 Error ledger persisted: {} entries at {:?}", self.entries.len(), self.path);
        Ok(())
    }

    /// Persist after the retry phase: earlier entries that did not succeed this
    /// run are kept, followed by this run's failures. Returns the ledger size.
    pub async fn persist_after_retry(
        &mut self,
        prior: &[LedgerEntry],
        succeeded: &HashSet<ItemKey>,
    ) -> Result<usize, LedgerError> {
        let mut residual: Vec<LedgerEntry> = prior
            .iter()
            .filter(|entry| !succeeded.contains(entry.key()) && !self.contains(entry.key()))
            .cloned()
            .collect();
        let carried = residual.len();
        residual.extend(self.entries.iter().cloned());

        self.entries = residual;
        self.rebuild_index();
        self.persist().await?;

        debug!(
            "Ledger after retry: {} carried over, {} from this run",
            carried,
            self.entries.len() - carried
        );
        Ok(self.entries.len())
    }

    /// Read the persisted ledger plus any journal left behind by an
    /// interrupted run, de-duplicated by key (latest line wins).
    pub async fn load_for_retry(
        &self,
        policy: CorruptLedgerPolicy,
    ) -> Result<LoadedLedger, LedgerError> {
        let mut loaded = LoadedLedger::default();
        let mut index: HashMap<ItemKey, usize> = HashMap::new();

        if let Some(text) = read_optional(&self.path).await? {
            parse_lines(&self.path, &text, false, policy, &mut loaded, &mut index)?;
        }
        if let Some(text) = read_optional(&self.journal_path).await? {
            parse_lines(&self.journal_path, &text, true, policy, &mut loaded, &mut index)?;
        }

        if !loaded.corrupt_lines.is_empty() {
            warn!(
                "⚠️ {} corrupt ledger line(s) quarantined to {:?}",
                loaded.quarantined(),
                self.quarantine_path()
            );
            if !self.read_only {
                self.append_quarantine(&loaded.corrupt_lines).await?;
            }
        }

        debug!("Loaded {} ledger entries for retry", loaded.entries.len());
        Ok(loaded)
    }

    /// Remove ledger and journal
    pub async fn clear(&mut self) -> Result<(), LedgerError> {
        self.entries.clear();
        self.index.clear();
        if self.read_only {
            return Ok(());
        }
        remove_if_exists(&self.path).await?;
        remove_if_exists(&self.journal_path).await
    }

    fn rebuild_index(&mut self) {
        self.index = self
            .entries
            .iter()
            .enumerate()
            .map(|(position, entry)| (entry.key().clone(), position))
            .collect();
    }

    async fn append_journal(&self, entry: &LedgerEntry) -> Result<(), LedgerError> {
        let mut line = encode(entry)?;
        line.push('\n');
        append(&self.journal_path, line.as_bytes()).await
    }

    async fn append_quarantine(&self, lines: &[String]) -> Result<(), LedgerError> {
        let mut buf = String::new();
        for line in lines {
            buf.push_str(line);
            buf.push('\n');
        }
        append(&self.quarantine_path(), buf.as_bytes()).await
    }
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name: OsString = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> LedgerError + '_ {
    move |source| LedgerError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn encode(entry: &LedgerEntry) -> Result<String, LedgerError> {
    serde_json::to_string(entry).map_err(|e| LedgerError::Encode(e.to_string()))
}

fn parse_lines(
    path: &Path,
    text: &str,
    is_journal: bool,
    policy: CorruptLedgerPolicy,
    loaded: &mut LoadedLedger,
    index: &mut HashMap<ItemKey, usize>,
) -> Result<(), LedgerError> {
    let torn_tail = is_journal && !text.is_empty() && !text.ends_with('\n');
    let last = text.lines().count();

    for (number, line) in text.lines().enumerate().map(|(i, line)| (i + 1, line)) {
        if line.trim().is_empty() {
            continue;
        }
        let entry = match serde_json::from_str::<LedgerEntry>(line) {
            Ok(entry) if !entry.key().is_blank() => entry,
            Ok(_) => {
                corrupt(path, number, "entry has no key".into(), line, policy, loaded)?;
                continue;
            }
            Err(_) if torn_tail && number == last => {
                warn!("⚠️ Dropping torn final journal line {} of {:?}", number, path);
                continue;
            }
            Err(e) => {
                corrupt(path, number, e.to_string(), line, policy, loaded)?;
                continue;
            }
        };

        match index.get(entry.key()) {
            Some(&position) => loaded.entries[position] = entry,
            None => {
                index.insert(entry.key().clone(), loaded.entries.len());
                loaded.entries.push(entry);
            }
        }
    }
    Ok(())
}

fn corrupt(
    path: &Path,
    line: usize,
    reason: String,
    raw: &str,
    policy: CorruptLedgerPolicy,
    loaded: &mut LoadedLedger,
) -> Result<(), LedgerError> {
    match policy {
        CorruptLedgerPolicy::Abort => Err(LedgerError::Corrupt {
            path: path.to_path_buf(),
            line,
            reason,
        }),
        CorruptLedgerPolicy::Quarantine => {
            warn!("⚠️ Corrupt ledger line {} in {:?}: {}", line, path, reason);
            loaded.corrupt_lines.push(raw.to_string());
            Ok(())
        }
    }
}

async fn read_optional(path: &Path) -> Result<Option<String>, LedgerError> {
    match fs::read_to_string(path).await {
        Ok(text) => Ok(Some(text)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(io_error(path)(e)),
    }
}

async fn path_exists(path: &Path) -> bool {
    fs::try_exists(path).await.unwrap_or(false)
}

async fn ensure_parent(path: &Path) -> Result<(), LedgerError> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => {
            fs::create_dir_all(parent).await.map_err(io_error(parent))
        }
        _ => Ok(()),
    }
}

async fn remove_if_exists(path: &Path) -> Result<(), LedgerError> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(io_error(path)(e)),
    }
}

async fn append(path: &Path, bytes: &[u8]) -> Result<(), LedgerError> {
    ensure_parent(path).await?;
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .map_err(io_error(path))?;
    file.write_all(bytes).await.map_err(io_error(path))?;
    file.flush().await.map_err(io_error(path))
}

/// Atomically replace the ledger with `entries`; an empty set removes the file
async fn write_entries(path: &Path, entries: &[LedgerEntry]) -> Result<(), LedgerError> {
    if entries.is_empty() {
        return remove_if_exists(path).await;
    }

    let mut buf = String::new();
    for entry in entries {
        buf.push_str(&encode(entry)?);
        buf.push('\n');
    }

    ensure_parent(path).await?;
    let tmp = sibling(path, ".tmp");
    let mut file = fs::File::create(&tmp).await.map_err(io_error(&tmp))?;
    file.write_all(buf.as_bytes()).await.map_err(io_error(&tmp))?;
    file.sync_all().await.map_err(io_error(&tmp))?;
    drop(file);
    fs::rename(&tmp, path).await.map_err(io_error(path))
}
