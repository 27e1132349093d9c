use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use datapage_sync::application::{
    CorruptLedgerPolicy, ErrorLedger, Normalizer, RunSummary, SyncOrchestrator, SyncSettings,
};
use datapage_sync::domain::{Item, ItemSource, RecordStore};
use datapage_sync::infrastructure::{
    init_logging_with_config, log_system_info, AppConfig, CaptureExtractor, ConfigManager,
    MemoryRecordStore, RestStoreClient, SqliteRecordStore, StoreBackend,
};

#[derive(Parser)]
#[command(name = "datapage-sync")]
#[command(about = "Sync data page metadata from the app console into the definitions table")]
#[command(version)]
struct Cli {
    /// Configuration file (JSON or TOML); defaults to the per-user config location
    #[arg(long, global = true, env = "DATAPAGE_SYNC_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enumerate, extract, reconcile and write every data page, then retry failures
    Sync {
        /// Reconcile against the real table but keep all writes in memory
        #[arg(long)]
        dry_run: bool,
        /// Read the item listing from a JSON file instead of the API
        #[arg(long)]
        items_file: Option<PathBuf>,
        /// Captured page data to replay
        #[arg(long)]
        capture_file: Option<PathBuf>,
    },
    /// Retry only the items recorded in the error ledger
    Retry {
        #[arg(long)]
        capture_file: Option<PathBuf>,
    },
    /// Inspect or clear the error ledger
    Ledger {
        #[command(subcommand)]
        action: LedgerAction,
    },
    /// Show or create configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum LedgerAction {
    /// Print unresolved entries, one JSON object per line
    Show,
    /// Delete the ledger and its journal
    Clear {
        /// Confirm deletion
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration (secret masked)
    Show,
    /// Write a default configuration file
    Init {
        #[arg(long)]
        path: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Commands::Config {
        action: ConfigAction::Init { path },
    } = &cli.command
    {
        let path = match path {
            Some(path) => path.clone(),
            None => ConfigManager::default_config_path()
                .context("No per-user config directory; pass --path")?,
        };
        ConfigManager::save_default(&path)?;
        println!("{}", path.display());
        return Ok(());
    }

    let config =
        ConfigManager::load(cli.config.as_deref()).context("Failed to load configuration")?;
    init_logging_with_config(&config.logging)?;
    log_system_info();

    match cli.command {
        Commands::Sync {
            dry_run,
            items_file,
            capture_file,
        } => {
            let items_file = items_file.or_else(|| config.source.items_file.clone());
            let capture_file = capture_file.unwrap_or_else(|| config.source.capture_file.clone());
            run_sync(&config, dry_run, items_file.as_deref(), &capture_file).await
        }
        Commands::Retry { capture_file } => {
            let capture_file = capture_file.unwrap_or_else(|| config.source.capture_file.clone());
            run_retry(&config, &capture_file).await
        }
        Commands::Ledger { action } => match action {
            LedgerAction::Show => show_ledger(&config).await,
            LedgerAction::Clear { yes } => clear_ledger(&config, yes).await,
        },
        Commands::Config { action } => match action {
            ConfigAction::Show => {
                println!("{}", serde_json::to_string_pretty(&config.redacted())?);
                Ok(())
            }
            ConfigAction::Init { .. } => Ok(()),
        },
    }
}

/// Concrete store plus, for the REST backend, the same client as item source
async fn build_store(
    config: &AppConfig,
) -> Result<(Arc<dyn RecordStore>, Option<Arc<RestStoreClient>>)> {
    match config.store.backend {
        StoreBackend::Rest => {
            config.require_rest_credentials()?;
            let client = Arc::new(RestStoreClient::from_config(&config.store)?);
            let store: Arc<dyn RecordStore> = client.clone();
            Ok((store, Some(client)))
        }
        StoreBackend::Sqlite => {
            let store: Arc<dyn RecordStore> =
                Arc::new(SqliteRecordStore::open(&config.store.sqlite_path).await?);
            Ok((store, None))
        }
        StoreBackend::Memory => {
            warn!("⚠️ Memory backend selected: nothing will be persisted");
            let store: Arc<dyn RecordStore> = Arc::new(MemoryRecordStore::new());
            Ok((store, None))
        }
    }
}

/// Item listing as exported by hand or saved straight from the datapages endpoint
#[derive(Deserialize)]
#[serde(untagged)]
enum ItemListing {
    Plain(Vec<Item>),
    Envelope {
        #[serde(rename = "Result")]
        result: Vec<Item>,
    },
}

impl ItemListing {
    fn into_items(self) -> Vec<Item> {
        match self {
            Self::Plain(items) | Self::Envelope { result: items } => items,
        }
    }
}

async fn load_items(
    config: &AppConfig,
    items_file: Option<&Path>,
    source: Option<&RestStoreClient>,
) -> Result<Vec<Item>> {
    if let Some(path) = items_file {
        let text = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read items file {path:?}"))?;
        let listing: ItemListing = serde_json::from_str(&text).with_context(|| {
            format!("Items file {path:?} must be a JSON array of data pages or a Result envelope")
        })?;
        let items = listing.into_items();
        info!("📚 {} items read from {:?}", items.len(), path);
        return Ok(items);
    }

    let Some(source) = source else {
        bail!("An items file is required unless the rest backend is used");
    };
    if config.source.app_name.trim().is_empty() {
        bail!("source.app_name must be set to enumerate data pages");
    }
    Ok(source.list_items(&config.source.app_name).await?)
}

fn cancel_on_ctrl_c(orchestrator: &SyncOrchestrator) {
    let token = orchestrator.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("🛑 Interrupt received, stopping after the current item");
            token.cancel();
        }
    });
}

async fn run_sync(
    config: &AppConfig,
    dry_run: bool,
    items_file: Option<&Path>,
    capture_file: &Path,
) -> Result<()> {
    let (store, rest_client) = build_store(config).await?;
    let items = load_items(config, items_file, rest_client.as_deref()).await?;
    let extractor = Arc::new(CaptureExtractor::from_file(capture_file).await?);
    let settings = SyncSettings::from_config(config);

    let (store, ledger, shadow) = if dry_run {
        info!("🧪 Dry run: writes stay in memory, ledger is read only");
        let existing = store
            .load_snapshot(&settings.table)
            .await
            .context("Failed to load remote snapshot")?;
        let shadow = Arc::new(MemoryRecordStore::seeded(&settings.table, existing));
        let store: Arc<dyn RecordStore> = shadow.clone();
        (store, ErrorLedger::read_only(&config.ledger.path), Some(shadow))
    } else {
        (store, ErrorLedger::new(&config.ledger.path), None)
    };

    let mut orchestrator = SyncOrchestrator::new(
        extractor,
        store,
        Normalizer::new(config.normalizer.clone()),
        ledger,
        settings,
    );
    cancel_on_ctrl_c(&orchestrator);

    let summary = orchestrator.run(items).await?;
    if let Some(shadow) = shadow {
        for call in shadow.writes() {
            info!("🧪 would {} {} in {}", call.operation, call.key, call.table);
        }
    }
    report(&summary)
}

async fn run_retry(config: &AppConfig, capture_file: &Path) -> Result<()> {
    let (store, _) = build_store(config).await?;
    let extractor = Arc::new(CaptureExtractor::from_file(capture_file).await?);
    let settings = SyncSettings {
        retry_pass: true,
        retry_from_ledger: true,
        ..SyncSettings::from_config(config)
    };

    let ledger = ErrorLedger::new(&config.ledger.path);
    if !ledger.has_persisted_state().await {
        info!("✅ Error ledger is empty, nothing to retry");
        return Ok(());
    }

    let mut orchestrator = SyncOrchestrator::new(
        extractor,
        store,
        Normalizer::new(config.normalizer.clone()),
        ledger,
        settings,
    );
    cancel_on_ctrl_c(&orchestrator);

    let summary = orchestrator.run(Vec::new()).await?;
    report(&summary)
}

fn report(summary: &RunSummary) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(summary)?);
    if let Some(error) = &summary.retry_error {
        warn!("⚠️ Retry pass did not run: {}", error);
    }
    if summary.cancelled {
        warn!("⚠️ Run was cancelled; unprocessed items will be picked up next run");
    }
    Ok(())
}

async fn show_ledger(config: &AppConfig) -> Result<()> {
    let ledger = ErrorLedger::read_only(&config.ledger.path);
    let loaded = ledger
        .load_for_retry(CorruptLedgerPolicy::Quarantine)
        .await
        .context("Failed to read error ledger")?;

    for entry in &loaded.entries {
        println!("{}", serde_json::to_string(entry)?);
    }
    info!(
        "{} unresolved entries in {:?}",
        loaded.entries.len(),
        ledger.path()
    );
    if loaded.quarantined() > 0 {
        warn!("⚠️ {} unreadable line(s) in the ledger", loaded.quarantined());
    }
    Ok(())
}

async fn clear_ledger(config: &AppConfig, confirmed: bool) -> Result<()> {
    if !confirmed {
        bail!("Refusing to clear the error ledger without --yes");
    }
    let mut ledger = ErrorLedger::new(&config.ledger.path);
    ledger.clear().await?;
    info!("🧹 Error ledger cleared: {:?}", ledger.path());
    Ok(())
}
