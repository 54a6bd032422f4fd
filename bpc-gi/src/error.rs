//! Error types for bpc-gi
//!
//! Three classes of failure:
//! - per-item classification faults never surface here; they become
//!   `ClassificationOutcome::Failed` records
//! - run-level I/O faults (`AssetRoot*`, `Persist`, `Read`) abort the run
//! - ledger invariant violations (`LedgerError`, `Format`) fail loudly

use crate::models::{AssetKey, Gender};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Ledger invariant violations
#[derive(Debug, Error)]
pub enum LedgerError {
    /// The same key was recorded twice in one run
    #[error("Asset key {0} already recorded in this run")]
    DuplicateKey(AssetKey),

    /// A stored bucket disagrees with the per-asset outcomes
    #[error("{label} index {stored:?} does not match per-asset outcomes {derived:?}")]
    IndexMismatch {
        label: Gender,
        stored: Vec<AssetKey>,
        derived: Vec<AssetKey>,
    },
}

/// bpc-gi error type
#[derive(Debug, Error)]
pub enum GiError {
    /// Asset store root does not exist
    #[error("Asset store root not found: {0}")]
    AssetRootMissing(PathBuf),

    /// Asset store root exists but is not a directory
    #[error("Asset store root is not a directory: {0}")]
    AssetRootNotDirectory(PathBuf),

    /// Result or pools document could not be written
    #[error("Failed to persist {path}: {source}")]
    Persist {
        path: PathBuf,
        #[source]
        source: bpc_common::Error,
    },

    /// Result document could not be read
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Result document is unparseable or violates ledger invariants
    #[error("Invalid result document {path}: {message}")]
    Format { path: PathBuf, message: String },

    /// Asset store maintenance failure
    #[error(transparent)]
    Asset(#[from] crate::services::asset_store::AssetError),

    /// Ledger invariant violation during a run
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl GiError {
    pub fn persist(path: &Path, source: bpc_common::Error) -> Self {
        GiError::Persist {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Result type for bpc-gi operations
pub type GiResult<T> = Result<T, GiError>;
