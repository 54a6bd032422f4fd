//! Service modules for the gender identification stage

pub mod asset_store;
pub mod classification_driver;
pub mod classifier;
pub mod command_classifier;
pub mod deepface_client;
pub mod progress;
pub mod result_ledger;

pub use asset_store::{AssetError, AssetLayout, AssetStore, RenumberReport};
pub use classification_driver::{
    Checkpoint, ClassificationDriver, DriverOptions, ResumePolicy, DEFAULT_ITEM_TIMEOUT,
};
pub use classifier::{AttributeClassifier, AttributeResult, ClassifyError};
pub use command_classifier::CommandClassifier;
pub use deepface_client::DeepFaceHttpClassifier;
pub use progress::{
    JsonLinesProgress, ProgressEvent, ProgressFanOut, ProgressSink, TracingProgress,
};
pub use result_ledger::{persist_result, ResultLedger};
