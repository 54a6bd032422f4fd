//! Progress reporting
//!
//! The driver emits one event per processed asset plus run start/finish
//! events. Sinks are observers only: a failing sink never affects the run or
//! the ledger.

use crate::models::{AssetKey, Gender, RunStatus, RunSummary};
use chrono::Utc;
use serde_json::json;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

/// Observation emitted by the classification driver
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    RunStarted {
        run_id: Uuid,
        asset_root: PathBuf,
        total: usize,
    },
    Classified {
        run_id: Uuid,
        key: AssetKey,
        path: PathBuf,
        label: Gender,
        confidence: Option<f64>,
        /// Reused from a prior run rather than classified again
        carried_over: bool,
    },
    Failed {
        run_id: Uuid,
        key: AssetKey,
        path: PathBuf,
        reason: String,
    },
    RunFinished {
        run_id: Uuid,
        status: RunStatus,
        summary: RunSummary,
        elapsed: Duration,
    },
}

/// Receiver of progress events
pub trait ProgressSink: Send + Sync {
    fn on_event(&self, event: &ProgressEvent);
}

/// One tracing line per asset
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingProgress;

impl ProgressSink for TracingProgress {
    fn on_event(&self, event: &ProgressEvent) {
        match event {
            ProgressEvent::RunStarted {
                run_id,
                asset_root,
                total,
            } => info!(
                run_id = %run_id,
                "Classifying {} assets in {}",
                total,
                asset_root.display()
            ),
            ProgressEvent::Classified {
                key,
                path,
                label,
                confidence,
                carried_over,
                ..
            } => {
                let confidence = confidence
                    .map(|c| format!(" ({:.1}%)", c))
                    .unwrap_or_default();
                let carried = if *carried_over { " [carried over]" } else { "" };
                info!(key, "{}: {}{}{}", path.display(), label, confidence, carried);
            }
            ProgressEvent::Failed {
                key, path, reason, ..
            } => warn!(key, "{}: classification failed: {}", path.display(), reason),
            ProgressEvent::RunFinished {
                run_id,
                status,
                summary,
                elapsed,
            } => info!(
                run_id = %run_id,
                "Run {}: {} processed, {} men, {} women, {} other, {} failed in {:.1}s",
                status.as_str(),
                summary.processed,
                summary.men,
                summary.women,
                summary.other,
                summary.failed,
                elapsed.as_secs_f64()
            ),
        }
    }
}

/// Appends one JSON object per processed asset to a file
pub struct JsonLinesProgress {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
}

impl JsonLinesProgress {
    /// Open `path` for appending, creating it if needed
    pub fn append(path: &Path) -> std::io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    fn record(event: &ProgressEvent) -> Option<serde_json::Value> {
        let timestamp = Utc::now();
        match event {
            ProgressEvent::Classified {
                run_id,
                key,
                path,
                label,
                confidence,
                carried_over,
            } => Some(json!({
                "runId": run_id,
                "key": key,
                "path": path,
                "status": "labeled",
                "label": label,
                "confidence": confidence,
                "carriedOver": carried_over,
                "timestamp": timestamp,
            })),
            ProgressEvent::Failed {
                run_id,
                key,
                path,
                reason,
            } => Some(json!({
                "runId": run_id,
                "key": key,
                "path": path,
                "status": "failed",
                "reason": reason,
                "timestamp": timestamp,
            })),
            ProgressEvent::RunStarted { .. } | ProgressEvent::RunFinished { .. } => None,
        }
    }
}

impl ProgressSink for JsonLinesProgress {
    fn on_event(&self, event: &ProgressEvent) {
        let Some(record) = Self::record(event) else {
            return;
        };

        let Ok(mut writer) = self.writer.lock() else {
            return;
        };
        let written = serde_json::to_writer(&mut *writer, &record)
            .map_err(std::io::Error::from)
            .and_then(|_| writer.write_all(b"\n"))
            .and_then(|_| writer.flush());
        if let Err(e) = written {
            warn!("Progress log {} write failed: {}", self.path.display(), e);
        }
    }
}

/// Forwards every event to several sinks
#[derive(Default, Clone)]
pub struct ProgressFanOut {
    sinks: Vec<Arc<dyn ProgressSink>>,
}

impl ProgressFanOut {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl ProgressSink for ProgressFanOut {
    fn on_event(&self, event: &ProgressEvent) {
        for sink in &self.sinks {
            sink.on_event(event);
        }
    }
}
