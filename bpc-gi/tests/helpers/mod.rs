//! Shared fixtures for bpc-gi integration tests
//!
//! - `write_jpeg` / `write_corrupt`: asset store fixtures
//! - `FakeClassifier`: deterministic classifier keyed by file name
//! - `RecordingProgress`: progress sink that keeps every event

#![allow(dead_code)]

use bpc_gi::services::{
    AssetLayout, AssetStore, AttributeClassifier, AttributeResult, ClassifyError, ProgressEvent,
    ProgressSink,
};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tempfile::TempDir;

/// Minimal JFIF header, enough for magic-byte detection
pub const JPEG_HEADER: [u8; 12] = [
    0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, b'J', b'F', b'I', b'F', 0x00, 0x01,
];

/// Create a temp asset store directory and open it with the default layout
pub fn asset_store() -> (TempDir, AssetStore) {
    let dir = TempDir::new().unwrap();
    let store = AssetStore::open(dir.path(), AssetLayout::default()).unwrap();
    (dir, store)
}

pub fn write_jpeg(dir: &Path, key: u32) -> PathBuf {
    let path = dir.join(AssetLayout::default().file_name(key));
    let mut bytes = JPEG_HEADER.to_vec();
    bytes.extend_from_slice(&[0u8; 64]);
    std::fs::write(&path, bytes).unwrap();
    path
}

/// Write a file that has the asset name but is not an image
pub fn write_corrupt(dir: &Path, key: u32) -> PathBuf {
    let path = dir.join(AssetLayout::default().file_name(key));
    std::fs::write(&path, b"this is not an image at all, just text").unwrap();
    path
}

/// Scripted reaction of the fake classifier
#[derive(Debug, Clone)]
pub enum Behavior {
    Label(&'static str, f64),
    Error(&'static str),
    Panic,
    Hang,
    SlowLabel(Duration, &'static str),
}

/// Classifier answering from a script keyed by file name
///
/// Unscripted files are classified "Man" with confidence 90.
pub struct FakeClassifier {
    script: HashMap<String, Behavior>,
    reentrant: bool,
    admission_delay: Option<Duration>,
    calls: Mutex<Vec<PathBuf>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl FakeClassifier {
    pub fn new() -> Self {
        Self {
            script: HashMap::new(),
            reentrant: false,
            admission_delay: None,
            calls: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn on(mut self, key: u32, behavior: Behavior) -> Self {
        self.script
            .insert(AssetLayout::default().file_name(key), behavior);
        self
    }

    pub fn reentrant(mut self) -> Self {
        self.reentrant = true;
        self
    }

    /// Delay every call in `ready`, like a rate limiter would
    pub fn with_admission_delay(mut self, delay: Duration) -> Self {
        self.admission_delay = Some(delay);
        self
    }

    /// Keys the driver actually sent to the classifier, in call order
    pub fn called_keys(&self) -> Vec<u32> {
        let layout = AssetLayout::default();
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter_map(|p| p.file_name()?.to_str().and_then(|n| layout.parse_key(n)))
            .collect()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    async fn respond(&self, behavior: Behavior) -> Result<AttributeResult, ClassifyError> {
        match behavior {
            Behavior::Label(label, confidence) => Ok(result(label, confidence)),
            Behavior::Error(message) => Err(ClassifyError::AnalysisFailed(message.to_string())),
            Behavior::Panic => panic!("model crashed"),
            Behavior::Hang => {
                std::future::pending::<()>().await;
                unreachable!()
            }
            Behavior::SlowLabel(delay, label) => {
                tokio::time::sleep(delay).await;
                Ok(result(label, 80.0))
            }
        }
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait::async_trait]
impl AttributeClassifier for FakeClassifier {
    fn name(&self) -> &'static str {
        "fake"
    }

    fn is_reentrant(&self) -> bool {
        self.reentrant
    }

    async fn ready(&self) {
        if let Some(delay) = self.admission_delay {
            tokio::time::sleep(delay).await;
        }
    }

    async fn classify(&self, image_path: &Path) -> Result<AttributeResult, ClassifyError> {
        self.calls.lock().unwrap().push(image_path.to_path_buf());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let _guard = InFlight(&self.in_flight);

        let name = image_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default();
        let behavior = self
            .script
            .get(name)
            .cloned()
            .unwrap_or(Behavior::Label("Man", 90.0));
        self.respond(behavior).await
    }
}

pub fn result(label: &str, confidence: f64) -> AttributeResult {
    let other = if label == "Man" { "Woman" } else { "Man" };
    let scores = BTreeMap::from([
        (label.to_string(), confidence),
        (other.to_string(), 100.0 - confidence),
    ]);
    AttributeResult {
        dominant_label: label.to_string(),
        raw: serde_json::json!({
            "dominant_gender": label,
            "gender": scores,
            "region": {"x": 10, "y": 12, "w": 64, "h": 64},
        }),
        scores,
    }
}

/// Progress sink keeping every event
#[derive(Default)]
pub struct RecordingProgress {
    events: Mutex<Vec<ProgressEvent>>,
}

impl RecordingProgress {
    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Keys of per-asset events, in emission order
    pub fn asset_keys(&self) -> Vec<u32> {
        self.events()
            .iter()
            .filter_map(|e| match e {
                ProgressEvent::Classified { key, .. } | ProgressEvent::Failed { key, .. } => {
                    Some(*key)
                }
                _ => None,
            })
            .collect()
    }
}

impl ProgressSink for RecordingProgress {
    fn on_event(&self, event: &ProgressEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}
