//! Per-asset classification outcome

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Stable sequential identifier of one candidate image
pub type AssetKey = u32;

/// Gender label assigned by the attribute classifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Gender {
    Man,
    Woman,
    /// Any label outside the two expected categories
    Other,
}

impl Gender {
    /// Labels that own a bucket in the derived index
    pub const POOLED: [Gender; 2] = [Gender::Man, Gender::Woman];

    /// Map a classifier label string onto the closed label set
    ///
    /// Unrecognized values map to `Other`, never to an error.
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "man" | "male" => Gender::Man,
            "woman" | "female" => Gender::Woman,
            _ => Gender::Other,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Gender::Man => "Man",
            Gender::Woman => "Woman",
            Gender::Other => "Other",
        }
    }
}

impl fmt::Display for Gender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of classifying one asset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ClassificationOutcome {
    /// Classifier returned a label
    Labeled {
        label: Gender,
        /// Score of the dominant label as reported by the classifier (0-100)
        #[serde(default, skip_serializing_if = "Option::is_none")]
        confidence: Option<f64>,
        /// Raw per-label scores (e.g. {"Man": 97.1, "Woman": 2.9})
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        scores: BTreeMap<String, f64>,
        /// Full classifier payload, kept for audit
        #[serde(default)]
        attributes: serde_json::Value,
    },
    /// Classification fault, isolated to this asset
    Failed { reason: String },
}

impl ClassificationOutcome {
    pub fn failed(reason: impl Into<String>) -> Self {
        ClassificationOutcome::Failed {
            reason: reason.into(),
        }
    }

    /// Label if the asset was classified
    pub fn label(&self) -> Option<Gender> {
        match self {
            ClassificationOutcome::Labeled { label, .. } => Some(*label),
            ClassificationOutcome::Failed { .. } => None,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, ClassificationOutcome::Failed { .. })
    }

    /// Short human-readable summary for progress lines
    pub fn summary(&self) -> String {
        match self {
            ClassificationOutcome::Labeled {
                label,
                confidence: Some(confidence),
                ..
            } => format!("{} ({:.1}%)", label, confidence),
            ClassificationOutcome::Labeled { label, .. } => label.to_string(),
            ClassificationOutcome::Failed { reason } => format!("error: {}", reason),
        }
    }
}
