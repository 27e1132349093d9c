//! Error ledger behaviour across runs: retry, convergence, corruption, cancellation
mod common;

use std::sync::Arc;
use tempfile::tempdir;
use tokio_util::sync::CancellationToken;

use common::{item, orchestrator, page, settings, ScriptedExtractor, TABLE};
use datapage_sync::application::{CorruptLedgerPolicy, ErrorLedger};
use datapage_sync::domain::{ExtractionError, ItemKey, SyncError};
use datapage_sync::infrastructure::MemoryRecordStore;

#[tokio::test]
async fn transient_failure_recovers_in_the_same_run() {
    let dir = tempdir().unwrap();
    let ledger_path = dir.path().join("ledger.jsonl");
    let store = Arc::new(MemoryRecordStore::new());
    let extractor = Arc::new(
        ScriptedExtractor::new()
            .with_page("k1", page("Enabled", "Default"))
            .with_page("k2", page("Enabled", "Default"))
            .failing_times("k2", 1),
    );

    let mut run = orchestrator(extractor.clone(), store.clone(), &ledger_path, settings());
    let summary = run.run(vec![item("k1"), item("k2")]).await.unwrap();

    assert_eq!(summary.retried, 1);
    assert_eq!(summary.recovered, 1);
    assert_eq!(summary.succeeded, 2);
    assert_eq!(summary.failed, 0);
    assert!(summary.is_clean());
    assert_eq!(store.records(TABLE).len(), 2);
    assert_eq!(extractor.extracted(), vec!["k1", "k2", "k2"]);
    assert!(!ledger_path.exists());
}

#[tokio::test]
async fn ledger_converges_to_empty_over_two_runs() {
    let dir = tempdir().unwrap();
    let ledger_path = dir.path().join("ledger.jsonl");
    let store = Arc::new(MemoryRecordStore::new());
    // fails in the main pass and again in the retry pass of the first run
    let extractor = Arc::new(
        ScriptedExtractor::new()
            .with_page("k1", page("Enabled", "Default"))
            .with_page("k2", page("Disabled", "Dark"))
            .failing_times("k2", 2),
    );

    let mut first = orchestrator(extractor.clone(), store.clone(), &ledger_path, settings());
    let summary = first.run(vec![item("k1"), item("k2")]).await.unwrap();
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.ledger_size, 1);
    assert!(ledger_path.exists());

    // second run sees no new items; only the ledger drives it
    let mut second = orchestrator(extractor.clone(), store.clone(), &ledger_path, settings());
    let summary = second.run(Vec::new()).await.unwrap();

    assert!(summary.bootstrapped);
    assert_eq!(summary.retried, 1);
    assert_eq!(summary.recovered, 1);
    assert_eq!(summary.created, 1);
    assert_eq!(summary.ledger_size, 0);
    assert!(!ledger_path.exists());
    assert!(!second.ledger().journal_path().exists());

    let keys: Vec<ItemKey> = store.records(TABLE).into_iter().map(|r| r.key).collect();
    assert_eq!(keys, vec![ItemKey::new("k1"), ItemKey::new("k2")]);
}

#[tokio::test]
async fn unresolved_prior_entries_are_kept() {
    let dir = tempdir().unwrap();
    let ledger_path = dir.path().join("ledger.jsonl");

    let mut prior = ErrorLedger::new(&ledger_path);
    let error = SyncError::from(ExtractionError::Session("console closed".into()));
    prior.record(&item("old"), &error).await;
    prior.persist().await.unwrap();

    let extractor = Arc::new(
        ScriptedExtractor::new()
            .with_page("k1", page("Enabled", "Default"))
            .failing("old"),
    );
    let mut run = orchestrator(
        extractor.clone(),
        Arc::new(MemoryRecordStore::new()),
        &ledger_path,
        settings(),
    );
    let summary = run.run(vec![item("k1")]).await.unwrap();

    assert_eq!(summary.retried, 1);
    assert_eq!(summary.recovered, 0);
    assert_eq!(summary.ledger_size, 1);

    let entries = ErrorLedger::read_only(&ledger_path)
        .load_for_retry(CorruptLedgerPolicy::Abort)
        .await
        .unwrap()
        .entries;
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].key(), &ItemKey::new("old"));
    assert!(entries[0]
        .last_error
        .as_deref()
        .unwrap()
        .contains("page did not load"));
}

#[tokio::test]
async fn corrupt_ledger_aborts_retry_and_is_left_untouched() {
    let dir = tempdir().unwrap();
    let ledger_path = dir.path().join("ledger.jsonl");
    std::fs::write(&ledger_path, "{not json\n").unwrap();

    let extractor = Arc::new(
        ScriptedExtractor::new()
            .with_page("k1", page("Enabled", "Default"))
            .failing("k2"),
    );
    let mut run = orchestrator(
        extractor.clone(),
        Arc::new(MemoryRecordStore::new()),
        &ledger_path,
        settings(),
    );
    let summary = run.run(vec![item("k1"), item("k2")]).await.unwrap();

    assert!(summary.retry_error.is_some());
    assert_eq!(summary.retried, 0);
    assert_eq!(summary.failed, 1);
    assert_eq!(std::fs::read_to_string(&ledger_path).unwrap(), "{not json\n");

    // this run's failure survives in the journal
    let journal = std::fs::read_to_string(run.ledger().journal_path()).unwrap();
    assert!(journal.contains("\"AppKey\":\"k2\""));
}

#[tokio::test]
async fn quarantined_lines_are_set_aside_and_the_rest_retried() {
    let dir = tempdir().unwrap();
    let ledger_path = dir.path().join("ledger.jsonl");
    std::fs::write(
        &ledger_path,
        "{\"AppKey\":\"k2\",\"Name\":\"Orders\"}\ngarbage line\n",
    )
    .unwrap();

    let store = Arc::new(MemoryRecordStore::new());
    let extractor = Arc::new(ScriptedExtractor::new().with_page("k2", page("Enabled", "Default")));
    let mut settings = settings();
    settings.corrupt_policy = CorruptLedgerPolicy::Quarantine;

    let mut run = orchestrator(extractor.clone(), store.clone(), &ledger_path, settings);
    let summary = run.run(Vec::new()).await.unwrap();

    assert_eq!(summary.quarantined, 1);
    assert_eq!(summary.recovered, 1);
    assert_eq!(summary.ledger_size, 0);
    assert_eq!(store.records(TABLE).len(), 1);

    let quarantine = std::fs::read_to_string(run.ledger().quarantine_path()).unwrap();
    assert_eq!(quarantine, "garbage line\n");
}

#[tokio::test]
async fn cancelled_run_still_persists_the_ledger() {
    let dir = tempdir().unwrap();
    let ledger_path = dir.path().join("ledger.jsonl");

    let mut prior = ErrorLedger::new(&ledger_path);
    let error = SyncError::from(ExtractionError::Session("console closed".into()));
    prior.record(&item("old"), &error).await;
    prior.persist().await.unwrap();

    let extractor = Arc::new(
        ScriptedExtractor::new()
            .with_page("k1", page("Enabled", "Default"))
            .with_page("old", page("Enabled", "Default")),
    );
    let mut run = orchestrator(
        extractor.clone(),
        Arc::new(MemoryRecordStore::new()),
        &ledger_path,
        settings(),
    );
    run.cancellation_token().cancel();
    let summary = run.run(vec![item("k1")]).await.unwrap();

    assert!(summary.cancelled);
    assert_eq!(summary.succeeded, 0);
    assert_eq!(summary.retried, 0);
    assert_eq!(summary.ledger_size, 1);
    assert!(extractor.extracted().is_empty());

    let entries = ErrorLedger::read_only(&ledger_path)
        .load_for_retry(CorruptLedgerPolicy::Abort)
        .await
        .unwrap()
        .entries;
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].key(), &ItemKey::new("old"));
}

#[tokio::test]
async fn interrupt_after_a_failure_keeps_that_failure() {
    let dir = tempdir().unwrap();
    let ledger_path = dir.path().join("ledger.jsonl");
    let token = CancellationToken::new();
    let extractor = Arc::new(
        ScriptedExtractor::new()
            .with_page("k2", page("Enabled", "Default"))
            .failing("k1")
            .cancel_on_failure(token.clone()),
    );

    let mut run = orchestrator(
        extractor.clone(),
        Arc::new(MemoryRecordStore::new()),
        &ledger_path,
        settings(),
    )
    .with_cancellation(token);
    let summary = run.run(vec![item("k1"), item("k2")]).await.unwrap();

    assert!(summary.cancelled);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.retried, 0);
    assert_eq!(summary.ledger_size, 1);
    assert_eq!(extractor.extracted(), vec!["k1"]);

    let entries = ErrorLedger::read_only(&ledger_path)
        .load_for_retry(CorruptLedgerPolicy::Abort)
        .await
        .unwrap()
        .entries;
    let keys: Vec<&str> = entries.iter().map(|entry| entry.key().as_str()).collect();
    assert_eq!(keys, vec!["k1"]);
    assert!(!run.ledger().journal_path().exists());
}

#[tokio::test]
async fn dry_run_ledger_leaves_disk_alone() {
    let dir = tempdir().unwrap();
    let ledger_path = dir.path().join("ledger.jsonl");
    let extractor = Arc::new(ScriptedExtractor::new().failing("k1"));

    let mut run = datapage_sync::SyncOrchestrator::new(
        extractor,
        Arc::new(MemoryRecordStore::new()),
        datapage_sync::application::Normalizer::new(Default::default()),
        ErrorLedger::read_only(&ledger_path),
        settings(),
    );
    let summary = run.run(vec![item("k1")]).await.unwrap();

    assert_eq!(summary.failed, 1);
    assert!(!ledger_path.exists());
    assert!(!run.ledger().journal_path().exists());
}
