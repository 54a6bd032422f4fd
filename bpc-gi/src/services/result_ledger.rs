//! Result ledger
//!
//! Owns the `RunResult` of the current run. `record` is the only mutation
//! entry point; the label buckets are updated inside the same call, so they
//! cannot drift from the per-asset outcomes. Persistence goes through an
//! atomic temp-file-and-rename write.

use crate::error::{GiError, GiResult, LedgerError};
use crate::models::{AssetKey, ClassificationOutcome, RunResult, RunStatus};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Single-writer owner of one run's outcomes
#[derive(Debug)]
pub struct ResultLedger {
    result: RunResult,
}

impl ResultLedger {
    /// Start an empty ledger for assets under `asset_root`
    pub fn new(asset_root: impl Into<PathBuf>) -> Self {
        Self {
            result: RunResult::new(asset_root.into()),
        }
    }

    /// Append one outcome
    ///
    /// Fails with `DuplicateKey` if the key was already recorded in this run;
    /// the ledger is unchanged in that case.
    pub fn record(
        &mut self,
        key: AssetKey,
        outcome: ClassificationOutcome,
    ) -> Result<(), LedgerError> {
        self.result.insert(key, outcome)
    }

    /// Current state of the run
    pub fn result(&self) -> &RunResult {
        &self.result
    }

    pub fn len(&self) -> usize {
        self.result.len()
    }

    pub fn is_empty(&self) -> bool {
        self.result.is_empty()
    }

    /// Write the full run result to `destination` atomically
    pub fn persist(&self, destination: &Path) -> GiResult<()> {
        persist_result(&self.result, destination)
    }

    /// Close the run and hand out the final result
    pub fn finish(mut self, status: RunStatus) -> RunResult {
        self.result.set_status(status);
        self.result
    }

    /// Read and re-validate a persisted run result
    pub fn load(source: &Path) -> GiResult<RunResult> {
        let content = std::fs::read(source).map_err(|e| GiError::Read {
            path: source.to_path_buf(),
            source: e,
        })?;

        let result: RunResult =
            serde_json::from_slice(&content).map_err(|e| GiError::Format {
                path: source.to_path_buf(),
                message: e.to_string(),
            })?;

        debug!(
            path = %source.display(),
            run_id = %result.run_id(),
            entries = result.len(),
            "Loaded run result"
        );
        Ok(result)
    }
}

/// Serialize a run result and write it atomically
pub fn persist_result(result: &RunResult, destination: &Path) -> GiResult<()> {
    let json = serde_json::to_vec_pretty(result)?;
    bpc_common::fs::write_atomic(destination, &json)
        .map_err(|e| GiError::persist(destination, e))?;

    info!(
        path = %destination.display(),
        entries = result.len(),
        status = result.status().as_str(),
        "Run result persisted"
    );
    Ok(())
}
