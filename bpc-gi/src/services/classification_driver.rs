//! Classification driver
//!
//! Walks a list of asset keys in input order, resolves each through the
//! asset store, runs the attribute classifier inside a fault-isolating
//! boundary and records exactly one outcome per key in the result ledger.
//!
//! Per-item faults (missing file, classifier error, panic, timeout) become
//! `Failed` outcomes and the run continues. Only run-level I/O failures and
//! ledger invariant violations abort the run.

use crate::error::GiResult;
use crate::models::{AssetKey, ClassificationOutcome, RunResult, RunStatus};
use crate::services::asset_store::AssetStore;
use crate::services::classifier::AttributeClassifier;
use crate::services::progress::{ProgressEvent, ProgressSink};
use crate::services::result_ledger::{persist_result, ResultLedger};
use futures::{future, stream, FutureExt, StreamExt};
use std::any::Any;
use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Default per-item classifier timeout
pub const DEFAULT_ITEM_TIMEOUT: Duration = Duration::from_secs(120);

/// How outcomes of a prior run are reused
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResumePolicy {
    /// Ignore the prior run and classify every key
    #[default]
    Fresh,
    /// Carry over every prior outcome; classify keys the prior never reached
    Resume,
    /// Carry over labeled outcomes; classify failed and unseen keys
    RetryFailed,
}

impl ResumePolicy {
    /// Prior outcome to reuse for `key`, if any
    fn carried(self, prior: &RunResult, key: AssetKey) -> Option<ClassificationOutcome> {
        let outcome = prior.outcome(key)?;
        match self {
            ResumePolicy::Fresh => None,
            ResumePolicy::Resume => Some(outcome.clone()),
            ResumePolicy::RetryFailed if outcome.is_failed() => None,
            ResumePolicy::RetryFailed => Some(outcome.clone()),
        }
    }
}

/// Periodic persistence of the in-progress ledger
#[derive(Debug, Clone)]
pub struct Checkpoint {
    pub path: PathBuf,
    /// Records between two checkpoint writes
    pub interval: usize,
}

/// Driver settings
#[derive(Debug, Clone)]
pub struct DriverOptions {
    /// Upper bound on in-flight classifier calls
    pub workers: usize,
    pub item_timeout: Duration,
    pub checkpoint: Option<Checkpoint>,
}

impl Default for DriverOptions {
    fn default() -> Self {
        Self {
            workers: 1,
            item_timeout: DEFAULT_ITEM_TIMEOUT,
            checkpoint: None,
        }
    }
}

/// One item as it leaves the classification stage
struct Processed {
    key: AssetKey,
    path: PathBuf,
    outcome: ClassificationOutcome,
    carried_over: bool,
}

/// Drives one classification run
pub struct ClassificationDriver {
    store: AssetStore,
    classifier: Arc<dyn AttributeClassifier>,
    progress: Arc<dyn ProgressSink>,
    options: DriverOptions,
}

impl ClassificationDriver {
    pub fn new(
        store: AssetStore,
        classifier: Arc<dyn AttributeClassifier>,
        progress: Arc<dyn ProgressSink>,
        options: DriverOptions,
    ) -> Self {
        Self {
            store,
            classifier,
            progress,
            options,
        }
    }

    /// In-flight bound actually used for this classifier
    pub fn effective_workers(&self) -> usize {
        let requested = self.options.workers.max(1);
        if requested > 1 && !self.classifier.is_reentrant() {
            warn!(
                classifier = self.classifier.name(),
                requested,
                "Classifier is not reentrant, running sequentially"
            );
            return 1;
        }
        requested
    }

    /// Classify `keys` in order and return the run result
    ///
    /// `prior` supplies outcomes of an earlier run to reuse under the given
    /// policy. Once `cancel` fires no further keys are started; items already
    /// in flight finish and are recorded, and the result comes back with
    /// status `cancelled`. Duplicate keys in the input are processed once.
    pub async fn run_classification(
        &self,
        keys: &[AssetKey],
        prior: Option<(&RunResult, ResumePolicy)>,
        cancel: &CancellationToken,
    ) -> GiResult<RunResult> {
        let start_time = Instant::now();
        let keys = dedup_keys(keys);
        let total = keys.len();
        let workers = self.effective_workers();

        let mut ledger = ResultLedger::new(self.store.root());
        let run_id = ledger.result().run_id();

        info!(
            run_id = %run_id,
            asset_root = %self.store.root().display(),
            total,
            workers,
            classifier = self.classifier.name(),
            "Starting classification run"
        );
        if let Some((prior_result, policy)) = prior {
            info!(
                run_id = %run_id,
                prior_run_id = %prior_result.run_id(),
                prior_entries = prior_result.len(),
                policy = ?policy,
                "Reusing outcomes from prior run"
            );
        }
        self.progress.on_event(&ProgressEvent::RunStarted {
            run_id,
            asset_root: self.store.root().to_path_buf(),
            total,
        });

        let mut results = stream::iter(keys)
            .take_while(|_| future::ready(!cancel.is_cancelled()))
            .map(|key| {
                let carried = prior.and_then(|(result, policy)| policy.carried(result, key));
                self.process(key, carried)
            })
            .buffered(workers);

        let mut since_checkpoint = 0usize;
        while let Some(item) = results.next().await {
            self.report(run_id, &item);
            ledger.record(item.key, item.outcome)?;

            since_checkpoint += 1;
            if let Some(checkpoint) = &self.options.checkpoint {
                if checkpoint.interval > 0 && since_checkpoint >= checkpoint.interval {
                    persist_result(ledger.result(), &checkpoint.path)?;
                    debug!(
                        run_id = %run_id,
                        recorded = ledger.len(),
                        path = %checkpoint.path.display(),
                        "Checkpoint written"
                    );
                    since_checkpoint = 0;
                }
            }
        }

        let status = if cancel.is_cancelled() && ledger.len() < total {
            RunStatus::Cancelled
        } else {
            RunStatus::Completed
        };
        let result = ledger.finish(status);

        let summary = result.summary();
        info!(
            run_id = %run_id,
            status = status.as_str(),
            processed = summary.processed,
            men = summary.men,
            women = summary.women,
            other = summary.other,
            failed = summary.failed,
            elapsed_ms = start_time.elapsed().as_millis() as u64,
            "Classification run finished"
        );
        self.progress.on_event(&ProgressEvent::RunFinished {
            run_id,
            status,
            summary,
            elapsed: start_time.elapsed(),
        });

        Ok(result)
    }

    /// Resolve and classify one key, or reuse a carried outcome
    async fn process(&self, key: AssetKey, carried: Option<ClassificationOutcome>) -> Processed {
        let path = self.store.path_for(key);
        if let Some(outcome) = carried {
            return Processed {
                key,
                path,
                outcome,
                carried_over: true,
            };
        }

        let outcome = match self.store.resolve(key) {
            Ok(path) => self.classify_isolated(&path).await,
            Err(e) => ClassificationOutcome::failed(e.to_string()),
        };
        Processed {
            key,
            path,
            outcome,
            carried_over: false,
        }
    }

    /// Classifier call bounded by the item timeout, with panics caught
    ///
    /// Admission (`ready`) happens before the timeout starts.
    async fn classify_isolated(&self, path: &std::path::Path) -> ClassificationOutcome {
        if let Err(panic) = AssertUnwindSafe(self.classifier.ready()).catch_unwind().await {
            return ClassificationOutcome::failed(format!(
                "classifier panicked: {}",
                panic_message(panic.as_ref())
            ));
        }

        let call = AssertUnwindSafe(self.classifier.classify(path)).catch_unwind();
        match tokio::time::timeout(self.options.item_timeout, call).await {
            Err(_) => ClassificationOutcome::failed("timeout"),
            Ok(Err(panic)) => ClassificationOutcome::failed(format!(
                "classifier panicked: {}",
                panic_message(panic.as_ref())
            )),
            Ok(Ok(Err(e))) => ClassificationOutcome::failed(e.to_string()),
            Ok(Ok(Ok(result))) => result.into_outcome(),
        }
    }

    fn report(&self, run_id: uuid::Uuid, item: &Processed) {
        let event = match &item.outcome {
            ClassificationOutcome::Labeled {
                label, confidence, ..
            } => ProgressEvent::Classified {
                run_id,
                key: item.key,
                path: item.path.clone(),
                label: *label,
                confidence: *confidence,
                carried_over: item.carried_over,
            },
            ClassificationOutcome::Failed { reason } => ProgressEvent::Failed {
                run_id,
                key: item.key,
                path: item.path.clone(),
                reason: reason.clone(),
            },
        };
        self.progress.on_event(&event);
    }
}

fn dedup_keys(keys: &[AssetKey]) -> Vec<AssetKey> {
    let mut seen = HashSet::with_capacity(keys.len());
    let mut unique = Vec::with_capacity(keys.len());
    for &key in keys {
        if seen.insert(key) {
            unique.push(key);
        } else {
            warn!(key, "Duplicate key in input, processing it once");
        }
    }
    unique
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
