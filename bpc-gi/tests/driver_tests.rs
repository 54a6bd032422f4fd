//! Integration tests for the classification driver
//!
//! Runs the driver against a temp asset store and the scripted fake
//! classifier from `helpers`.

mod helpers;

use bpc_gi::models::{ClassificationOutcome, Gender, RunStatus};
use bpc_gi::services::{
    Checkpoint, ClassificationDriver, DriverOptions, ProgressEvent, ResultLedger, ResumePolicy,
};
use helpers::{asset_store, write_corrupt, write_jpeg, Behavior, FakeClassifier, RecordingProgress};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn driver(
    store: bpc_gi::services::AssetStore,
    classifier: Arc<FakeClassifier>,
    progress: Arc<RecordingProgress>,
    options: DriverOptions,
) -> ClassificationDriver {
    ClassificationDriver::new(store, classifier, progress, options)
}

// ============================================================================
// Completeness and fault isolation
// ============================================================================

#[tokio::test]
async fn test_every_key_gets_exactly_one_outcome_in_order() {
    let (dir, store) = asset_store();
    for key in 0..5 {
        write_jpeg(dir.path(), key);
    }
    let classifier = Arc::new(
        FakeClassifier::new()
            .on(1, Behavior::Label("Woman", 97.5))
            .on(3, Behavior::Label("Woman", 88.0)),
    );
    let progress = Arc::new(RecordingProgress::default());

    let result = driver(store, classifier, progress.clone(), DriverOptions::default())
        .run_classification(&[0, 1, 2, 3, 4], None, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.keys().collect::<Vec<_>>(), vec![0, 1, 2, 3, 4]);
    assert_eq!(result.status(), RunStatus::Completed);
    assert_eq!(result.by_label(Gender::Man), &[0, 2, 4]);
    assert_eq!(result.by_label(Gender::Woman), &[1, 3]);
    assert!(result.validate_index().is_ok());

    assert_eq!(progress.asset_keys(), vec![0, 1, 2, 3, 4]);
    let events = progress.events();
    assert!(matches!(events.first(), Some(ProgressEvent::RunStarted { total: 5, .. })));
    assert!(matches!(
        events.last(),
        Some(ProgressEvent::RunFinished { status: RunStatus::Completed, .. })
    ));
}

#[tokio::test]
async fn test_corrupt_asset_does_not_stop_the_run() {
    let (dir, store) = asset_store();
    write_jpeg(dir.path(), 0);
    write_corrupt(dir.path(), 1);
    write_jpeg(dir.path(), 2);
    let classifier = Arc::new(FakeClassifier::new().on(2, Behavior::Label("Woman", 91.0)));

    let result = driver(
        store,
        classifier.clone(),
        Arc::new(RecordingProgress::default()),
        DriverOptions::default(),
    )
    .run_classification(&[0, 1, 2], None, &CancellationToken::new())
    .await
    .unwrap();

    assert_eq!(result.len(), 3);
    assert_eq!(result.outcome(0).and_then(|o| o.label()), Some(Gender::Man));
    assert!(result.outcome(1).unwrap().is_failed());
    assert_eq!(result.outcome(2).and_then(|o| o.label()), Some(Gender::Woman));
    // The corrupt file never reaches the classifier
    assert_eq!(classifier.called_keys(), vec![0, 2]);
}

#[tokio::test]
async fn test_classifier_error_is_recorded_as_failure() {
    let (dir, store) = asset_store();
    write_jpeg(dir.path(), 0);
    write_jpeg(dir.path(), 1);
    let classifier = Arc::new(FakeClassifier::new().on(0, Behavior::Error("Face could not be detected")));

    let result = driver(
        store,
        classifier,
        Arc::new(RecordingProgress::default()),
        DriverOptions::default(),
    )
    .run_classification(&[0, 1], None, &CancellationToken::new())
    .await
    .unwrap();

    match result.outcome(0) {
        Some(ClassificationOutcome::Failed { reason }) => {
            assert!(reason.contains("Face could not be detected"), "reason: {}", reason)
        }
        other => panic!("Expected failure, got {:?}", other),
    }
    assert_eq!(result.by_label(Gender::Man), &[1]);
}

#[tokio::test]
async fn test_other_label_is_kept_but_not_pooled() {
    let (dir, store) = asset_store();
    write_jpeg(dir.path(), 0);
    write_jpeg(dir.path(), 1);
    let classifier = Arc::new(FakeClassifier::new().on(1, Behavior::Label("Unknown", 55.0)));

    let result = driver(
        store,
        classifier,
        Arc::new(RecordingProgress::default()),
        DriverOptions::default(),
    )
    .run_classification(&[0, 1], None, &CancellationToken::new())
    .await
    .unwrap();

    assert_eq!(result.outcome(1).and_then(|o| o.label()), Some(Gender::Other));
    assert_eq!(result.by_label(Gender::Man), &[0]);
    assert!(result.by_label(Gender::Woman).is_empty());
    assert_eq!(result.summary().other, 1);
}

#[tokio::test]
async fn test_end_to_end_missing_asset_scenario() {
    let (dir, store) = asset_store();
    write_jpeg(dir.path(), 0);
    write_jpeg(dir.path(), 1);
    let classifier = Arc::new(
        FakeClassifier::new()
            .on(0, Behavior::Label("Man", 99.1))
            .on(1, Behavior::Label("Woman", 98.7)),
    );
    let output = dir.path().join("results.json");

    let result = driver(
        store,
        classifier,
        Arc::new(RecordingProgress::default()),
        DriverOptions::default(),
    )
    .run_classification(&[0, 1, 2], None, &CancellationToken::new())
    .await
    .unwrap();

    assert_eq!(result.by_label(Gender::Man), &[0]);
    assert_eq!(result.by_label(Gender::Woman), &[1]);
    match result.outcome(2) {
        Some(ClassificationOutcome::Failed { reason }) => {
            assert!(reason.contains("not found"), "reason: {}", reason)
        }
        other => panic!("Expected failure for missing asset, got {:?}", other),
    }

    bpc_gi::services::persist_result(&result, &output).unwrap();
    let loaded = ResultLedger::load(&output).unwrap();
    assert_eq!(loaded, result);

    let document: serde_json::Value =
        serde_json::from_slice(&std::fs::read(&output).unwrap()).unwrap();
    assert_eq!(document["byLabel"], serde_json::json!({"Man": [0], "Woman": [1]}));
    assert_eq!(document["perAsset"]["2"]["status"], "failed");
}

// ============================================================================
// Timeout and panic isolation
// ============================================================================

#[tokio::test]
async fn test_hanging_classifier_times_out() {
    let (dir, store) = asset_store();
    write_jpeg(dir.path(), 0);
    write_jpeg(dir.path(), 1);
    let classifier = Arc::new(FakeClassifier::new().on(0, Behavior::Hang));

    let options = DriverOptions {
        item_timeout: Duration::from_millis(100),
        ..Default::default()
    };
    let result = driver(store, classifier, Arc::new(RecordingProgress::default()), options)
        .run_classification(&[0, 1], None, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(
        result.outcome(0),
        Some(&ClassificationOutcome::failed("timeout"))
    );
    assert_eq!(result.by_label(Gender::Man), &[1]);
}

#[tokio::test]
async fn test_admission_wait_does_not_count_against_timeout() {
    let (dir, store) = asset_store();
    for key in 0..3 {
        write_jpeg(dir.path(), key);
    }
    let classifier = Arc::new(
        FakeClassifier::new()
            .with_admission_delay(Duration::from_millis(150))
            .on(2, Behavior::Hang),
    );

    let options = DriverOptions {
        item_timeout: Duration::from_millis(100),
        ..Default::default()
    };
    let result = driver(store, classifier, Arc::new(RecordingProgress::default()), options)
        .run_classification(&[0, 1, 2], None, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.by_label(Gender::Man), &[0, 1]);
    assert_eq!(
        result.outcome(2),
        Some(&ClassificationOutcome::failed("timeout"))
    );
}

#[tokio::test]
async fn test_panicking_classifier_is_isolated() {
    let (dir, store) = asset_store();
    write_jpeg(dir.path(), 0);
    write_jpeg(dir.path(), 1);
    let classifier = Arc::new(FakeClassifier::new().on(0, Behavior::Panic));

    let result = driver(
        store,
        classifier,
        Arc::new(RecordingProgress::default()),
        DriverOptions::default(),
    )
    .run_classification(&[0, 1], None, &CancellationToken::new())
    .await
    .unwrap();

    match result.outcome(0) {
        Some(ClassificationOutcome::Failed { reason }) => {
            assert!(reason.starts_with("classifier panicked"), "reason: {}", reason);
            assert!(reason.contains("model crashed"), "reason: {}", reason);
        }
        other => panic!("Expected failure, got {:?}", other),
    }
    assert_eq!(result.by_label(Gender::Man), &[1]);
}

// ============================================================================
// Cancellation
// ============================================================================

#[tokio::test]
async fn test_cancel_before_start_records_nothing() {
    let (dir, store) = asset_store();
    write_jpeg(dir.path(), 0);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let result = driver(
        store,
        Arc::new(FakeClassifier::new()),
        Arc::new(RecordingProgress::default()),
        DriverOptions::default(),
    )
    .run_classification(&[0], None, &cancel)
    .await
    .unwrap();

    assert!(result.is_empty());
    assert_eq!(result.status(), RunStatus::Cancelled);
}

#[tokio::test]
async fn test_cancel_mid_run_keeps_processed_items() {
    let (dir, store) = asset_store();
    for key in 0..6 {
        write_jpeg(dir.path(), key);
    }
    let mut fake = FakeClassifier::new();
    for key in 0..6 {
        fake = fake.on(key, Behavior::SlowLabel(Duration::from_millis(50), "Woman"));
    }
    let classifier = Arc::new(fake);
    let cancel = CancellationToken::new();

    let trigger = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(120)).await;
            cancel.cancel();
        })
    };

    let result = driver(
        store,
        classifier.clone(),
        Arc::new(RecordingProgress::default()),
        DriverOptions::default(),
    )
    .run_classification(&[0, 1, 2, 3, 4, 5], None, &cancel)
    .await
    .unwrap();
    trigger.await.unwrap();

    assert_eq!(result.status(), RunStatus::Cancelled);
    assert!(!result.is_empty());
    assert!(result.len() < 6);
    // Every started item was finished and recorded, in input order
    assert_eq!(classifier.called_keys(), result.keys().collect::<Vec<_>>());
    let expected: Vec<u32> = (0..result.len() as u32).collect();
    assert_eq!(result.keys().collect::<Vec<_>>(), expected);
    assert!(result.validate_index().is_ok());
}

// ============================================================================
// Resume policies
// ============================================================================

#[tokio::test]
async fn test_resume_carries_all_prior_outcomes() {
    let (dir, store) = asset_store();
    for key in 0..4 {
        write_jpeg(dir.path(), key);
    }
    let first = driver(
        store.clone(),
        Arc::new(FakeClassifier::new().on(1, Behavior::Error("server busy"))),
        Arc::new(RecordingProgress::default()),
        DriverOptions::default(),
    )
    .run_classification(&[0, 1], None, &CancellationToken::new())
    .await
    .unwrap();

    let classifier = Arc::new(FakeClassifier::new().on(3, Behavior::Label("Woman", 93.0)));
    let progress = Arc::new(RecordingProgress::default());
    let resumed = driver(store, classifier.clone(), progress.clone(), DriverOptions::default())
        .run_classification(
            &[0, 1, 2, 3],
            Some((&first, ResumePolicy::Resume)),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_ne!(resumed.run_id(), first.run_id());
    assert_eq!(classifier.called_keys(), vec![2, 3]);
    assert_eq!(resumed.outcome(0), first.outcome(0));
    assert_eq!(resumed.outcome(1), first.outcome(1));
    assert_eq!(resumed.by_label(Gender::Man), &[0, 2]);
    assert_eq!(resumed.by_label(Gender::Woman), &[3]);

    let carried: Vec<_> = progress
        .events()
        .into_iter()
        .filter_map(|e| match e {
            ProgressEvent::Classified { key, carried_over: true, .. } => Some(key),
            _ => None,
        })
        .collect();
    assert_eq!(carried, vec![0]);
}

#[tokio::test]
async fn test_retry_failed_classifies_failed_keys_again() {
    let (dir, store) = asset_store();
    for key in 0..3 {
        write_jpeg(dir.path(), key);
    }
    let first = driver(
        store.clone(),
        Arc::new(FakeClassifier::new().on(1, Behavior::Error("server busy"))),
        Arc::new(RecordingProgress::default()),
        DriverOptions::default(),
    )
    .run_classification(&[0, 1, 2], None, &CancellationToken::new())
    .await
    .unwrap();
    assert_eq!(first.failed_keys(), vec![1]);

    let classifier = Arc::new(FakeClassifier::new().on(1, Behavior::Label("Woman", 90.0)));
    let retried = driver(
        store,
        classifier.clone(),
        Arc::new(RecordingProgress::default()),
        DriverOptions::default(),
    )
    .run_classification(
        &[0, 1, 2],
        Some((&first, ResumePolicy::RetryFailed)),
        &CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(classifier.called_keys(), vec![1]);
    assert!(retried.failed_keys().is_empty());
    assert_eq!(retried.by_label(Gender::Man), &[0, 2]);
    assert_eq!(retried.by_label(Gender::Woman), &[1]);
    assert_eq!(retried.keys().collect::<Vec<_>>(), vec![0, 1, 2]);
}

#[tokio::test]
async fn test_fresh_policy_ignores_prior() {
    let (dir, store) = asset_store();
    write_jpeg(dir.path(), 0);
    let first = driver(
        store.clone(),
        Arc::new(FakeClassifier::new()),
        Arc::new(RecordingProgress::default()),
        DriverOptions::default(),
    )
    .run_classification(&[0], None, &CancellationToken::new())
    .await
    .unwrap();

    let classifier = Arc::new(FakeClassifier::new());
    driver(
        store,
        classifier.clone(),
        Arc::new(RecordingProgress::default()),
        DriverOptions::default(),
    )
    .run_classification(&[0], Some((&first, ResumePolicy::Fresh)), &CancellationToken::new())
    .await
    .unwrap();

    assert_eq!(classifier.called_keys(), vec![0]);
}

// ============================================================================
// Parallelism
// ============================================================================

#[tokio::test]
async fn test_parallel_run_preserves_input_order() {
    let (dir, store) = asset_store();
    for key in 0..8 {
        write_jpeg(dir.path(), key);
    }
    let mut fake = FakeClassifier::new().reentrant();
    for key in 0..8 {
        // Earlier keys take longer, so completion order is reversed
        let delay = Duration::from_millis(20 * (8 - key as u64));
        let label = if key % 2 == 0 { "Man" } else { "Woman" };
        fake = fake.on(key, Behavior::SlowLabel(delay, label));
    }
    let classifier = Arc::new(fake);
    let progress = Arc::new(RecordingProgress::default());

    let options = DriverOptions {
        workers: 4,
        ..Default::default()
    };
    let keys: Vec<u32> = (0..8).collect();
    let result = driver(store, classifier.clone(), progress.clone(), options)
        .run_classification(&keys, None, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.keys().collect::<Vec<_>>(), keys);
    assert_eq!(progress.asset_keys(), keys);
    assert_eq!(result.by_label(Gender::Man), &[0, 2, 4, 6]);
    assert_eq!(result.by_label(Gender::Woman), &[1, 3, 5, 7]);
    assert!(classifier.max_in_flight() > 1);
    assert!(classifier.max_in_flight() <= 4);
}

#[tokio::test]
async fn test_non_reentrant_classifier_runs_sequentially() {
    let (dir, store) = asset_store();
    for key in 0..4 {
        write_jpeg(dir.path(), key);
    }
    let mut fake = FakeClassifier::new();
    for key in 0..4 {
        fake = fake.on(key, Behavior::SlowLabel(Duration::from_millis(10), "Man"));
    }
    let classifier = Arc::new(fake);

    let options = DriverOptions {
        workers: 4,
        ..Default::default()
    };
    let driver = driver(
        store,
        classifier.clone(),
        Arc::new(RecordingProgress::default()),
        options,
    );
    assert_eq!(driver.effective_workers(), 1);

    driver
        .run_classification(&[0, 1, 2, 3], None, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(classifier.max_in_flight(), 1);
}

// ============================================================================
// Input handling and checkpoints
// ============================================================================

#[tokio::test]
async fn test_duplicate_input_keys_processed_once() {
    let (dir, store) = asset_store();
    write_jpeg(dir.path(), 0);
    write_jpeg(dir.path(), 1);
    let classifier = Arc::new(FakeClassifier::new());

    let result = driver(
        store,
        classifier.clone(),
        Arc::new(RecordingProgress::default()),
        DriverOptions::default(),
    )
    .run_classification(&[0, 1, 0], None, &CancellationToken::new())
    .await
    .unwrap();

    assert_eq!(result.keys().collect::<Vec<_>>(), vec![0, 1]);
    assert_eq!(classifier.called_keys(), vec![0, 1]);
}

#[tokio::test]
async fn test_checkpoint_writes_loadable_partial_result() {
    let (dir, store) = asset_store();
    for key in 0..5 {
        write_jpeg(dir.path(), key);
    }
    let checkpoint = dir.path().join("results.json");
    let options = DriverOptions {
        checkpoint: Some(Checkpoint {
            path: checkpoint.clone(),
            interval: 2,
        }),
        ..Default::default()
    };

    let result = driver(
        store,
        Arc::new(FakeClassifier::new()),
        Arc::new(RecordingProgress::default()),
        options,
    )
    .run_classification(&[0, 1, 2, 3, 4], None, &CancellationToken::new())
    .await
    .unwrap();

    // Last checkpoint after the fourth record; the final write is the caller's
    let partial = ResultLedger::load(&checkpoint).unwrap();
    assert_eq!(partial.status(), RunStatus::InProgress);
    assert_eq!(partial.run_id(), result.run_id());
    assert_eq!(partial.keys().collect::<Vec<_>>(), vec![0, 1, 2, 3]);
    assert!(partial.finished_at().is_none());
}

#[tokio::test]
async fn test_unwritable_checkpoint_fails_the_run() {
    let (dir, store) = asset_store();
    write_jpeg(dir.path(), 0);
    let options = DriverOptions {
        checkpoint: Some(Checkpoint {
            path: dir.path().join("missing-dir").join("results.json"),
            interval: 1,
        }),
        ..Default::default()
    };

    let outcome = driver(
        store,
        Arc::new(FakeClassifier::new()),
        Arc::new(RecordingProgress::default()),
        options,
    )
    .run_classification(&[0], None, &CancellationToken::new())
    .await;

    assert!(matches!(outcome, Err(bpc_gi::GiError::Persist { .. })));
}
