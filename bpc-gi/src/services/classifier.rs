//! Attribute classifier capability
//!
//! The face attribute model is an opaque external capability. The driver only
//! sees this trait, so the pipeline runs the same against the DeepFace HTTP
//! service, a local command, or a deterministic fake in tests.

use crate::models::{ClassificationOutcome, Gender};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

/// Classifier faults (isolated per asset by the driver)
#[derive(Debug, Error)]
pub enum ClassifyError {
    /// Image file vanished between resolve and classify
    #[error("Image file not found: {0}")]
    FileNotFound(String),

    /// Transport-level failure talking to the classifier service
    #[error("Classifier request failed: {0}")]
    Request(String),

    /// Classifier process could not be started or awaited
    #[error("Failed to execute classifier: {0}")]
    Execution(String),

    /// Classifier ran but reported an error
    #[error("Classifier analysis failed: {0}")]
    AnalysisFailed(String),

    /// Classifier answered with something we cannot interpret
    #[error("Malformed classifier response: {0}")]
    MalformedResponse(String),

    /// Classifier found no face in the image
    #[error("No face detected")]
    NoFaceDetected,

    /// I/O error reading the image
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Classifier answer for one image
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeResult {
    /// Dominant label string as reported ("Man", "Woman", ...)
    pub dominant_label: String,
    /// Per-label scores
    pub scores: BTreeMap<String, f64>,
    /// Complete face record returned by the classifier
    pub raw: Value,
}

impl AttributeResult {
    /// Parse a DeepFace-style gender analysis
    ///
    /// Accepts the HTTP envelope `{"results": [face, ..]}`, a bare array of
    /// faces, or a single face object. The first face wins.
    pub fn from_deepface_json(value: Value) -> Result<Self, ClassifyError> {
        let face = match value {
            Value::Object(mut map) if map.contains_key("results") => {
                first_face(map.remove("results").unwrap_or(Value::Null))?
            }
            Value::Array(_) => first_face(value)?,
            Value::Object(map) => Value::Object(map),
            other => {
                return Err(ClassifyError::MalformedResponse(format!(
                    "expected object or array, got {}",
                    json_type(&other)
                )))
            }
        };

        if let Some(error) = face.get("error").and_then(Value::as_str) {
            return Err(ClassifyError::AnalysisFailed(error.to_string()));
        }

        let dominant_label = face
            .get("dominant_gender")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                ClassifyError::MalformedResponse("missing dominant_gender".to_string())
            })?
            .to_string();

        let scores = match face.get("gender") {
            Some(Value::Object(map)) => map
                .iter()
                .filter_map(|(label, score)| score.as_f64().map(|s| (label.clone(), s)))
                .collect(),
            Some(Value::Null) | None => BTreeMap::new(),
            Some(other) => {
                return Err(ClassifyError::MalformedResponse(format!(
                    "gender scores must be an object, got {}",
                    json_type(other)
                )))
            }
        };

        Ok(Self {
            dominant_label,
            scores,
            raw: face,
        })
    }

    /// Confidence of the dominant label, if scored
    pub fn confidence(&self) -> Option<f64> {
        self.scores.get(&self.dominant_label).copied()
    }

    /// Convert into a labeled outcome
    pub fn into_outcome(self) -> ClassificationOutcome {
        let confidence = self.confidence();
        ClassificationOutcome::Labeled {
            label: Gender::from_label(&self.dominant_label),
            confidence,
            scores: self.scores,
            attributes: self.raw,
        }
    }
}

fn first_face(faces: Value) -> Result<Value, ClassifyError> {
    match faces {
        Value::Array(faces) => faces
            .into_iter()
            .next()
            .ok_or(ClassifyError::NoFaceDetected),
        other => Err(ClassifyError::MalformedResponse(format!(
            "expected array of faces, got {}",
            json_type(&other)
        ))),
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// External face attribute classifier
///
/// Implementations may be slow, fail, or panic; the driver bounds each call
/// with a timeout and catches panics.
#[async_trait::async_trait]
pub trait AttributeClassifier: Send + Sync {
    /// Classifier name for logs
    fn name(&self) -> &'static str;

    /// Whether concurrent `classify` calls are safe
    ///
    /// The driver falls back to one call at a time when this is false.
    fn is_reentrant(&self) -> bool {
        false
    }

    /// Wait until the classifier admits another call (e.g. rate limiting)
    ///
    /// The driver awaits this before starting the timed `classify` call, so
    /// admission waits never count against the item timeout.
    async fn ready(&self) {}

    /// Classify one image
    async fn classify(&self, image_path: &Path) -> Result<AttributeResult, ClassifyError>;
}
