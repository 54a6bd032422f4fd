//! Data models for bpc-gi (Gender Identification)

pub mod outcome;
pub mod pools;
pub mod run_result;

pub use outcome::{AssetKey, ClassificationOutcome, Gender};
pub use pools::LabelPools;
pub use run_result::{RunResult, RunStatus, RunSummary};
