//! Common error types for BPC

use std::path::PathBuf;
use thiserror::Error;

/// Common result type for BPC operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across BPC pipeline stages
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error tied to a specific file
    #[error("IO error on {path}: {source}")]
    FileIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid user input or request parameter
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl Error {
    /// Attach the offending path to an I/O error
    pub fn file_io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::FileIo {
            path: path.into(),
            source,
        }
    }
}
