//! Run result: per-asset outcomes plus the derived label index
//!
//! `perAsset` is the primary data. The `byLabel` buckets are derived from it
//! on every insert and re-derived on load; a stored document whose buckets
//! disagree with its outcomes is rejected, never repaired.

use super::outcome::{AssetKey, ClassificationOutcome, Gender};
use crate::error::LedgerError;
use chrono::{DateTime, Utc};
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Lifecycle status of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Checkpoint written while the run was still going
    InProgress,
    /// Every scheduled key was processed
    Completed,
    /// Stopped early; holds everything processed before the stop
    Cancelled,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::InProgress => "in_progress",
            RunStatus::Completed => "completed",
            RunStatus::Cancelled => "cancelled",
        }
    }
}

/// Outcome counts of a run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub processed: usize,
    pub men: usize,
    pub women: usize,
    pub other: usize,
    pub failed: usize,
}

/// Full output of one classification run
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "RunResultDocument")]
pub struct RunResult {
    run_id: Uuid,
    started_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
    status: RunStatus,
    asset_root: PathBuf,
    per_asset: Vec<(AssetKey, ClassificationOutcome)>,
    positions: HashMap<AssetKey, usize>,
    men: Vec<AssetKey>,
    women: Vec<AssetKey>,
}

impl RunResult {
    pub(crate) fn new(asset_root: PathBuf) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            finished_at: None,
            status: RunStatus::InProgress,
            asset_root,
            per_asset: Vec::new(),
            positions: HashMap::new(),
            men: Vec::new(),
            women: Vec::new(),
        }
    }

    /// Append one outcome and update the bucket of that key only
    ///
    /// A duplicate key leaves the result untouched.
    pub(crate) fn insert(
        &mut self,
        key: AssetKey,
        outcome: ClassificationOutcome,
    ) -> Result<(), LedgerError> {
        if self.positions.contains_key(&key) {
            return Err(LedgerError::DuplicateKey(key));
        }

        match outcome.label() {
            Some(Gender::Man) => self.men.push(key),
            Some(Gender::Woman) => self.women.push(key),
            Some(Gender::Other) | None => {}
        }
        self.positions.insert(key, self.per_asset.len());
        self.per_asset.push((key, outcome));
        Ok(())
    }

    pub(crate) fn set_status(&mut self, status: RunStatus) {
        self.status = status;
        self.finished_at = match status {
            RunStatus::InProgress => None,
            RunStatus::Completed | RunStatus::Cancelled => Some(Utc::now()),
        };
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }

    pub fn status(&self) -> RunStatus {
        self.status
    }

    pub fn asset_root(&self) -> &Path {
        &self.asset_root
    }

    pub fn len(&self) -> usize {
        self.per_asset.len()
    }

    pub fn is_empty(&self) -> bool {
        self.per_asset.is_empty()
    }

    pub fn contains(&self, key: AssetKey) -> bool {
        self.positions.contains_key(&key)
    }

    pub fn outcome(&self, key: AssetKey) -> Option<&ClassificationOutcome> {
        self.positions.get(&key).map(|&i| &self.per_asset[i].1)
    }

    /// Outcomes in processing order
    pub fn entries(&self) -> impl Iterator<Item = (AssetKey, &ClassificationOutcome)> {
        self.per_asset.iter().map(|(key, outcome)| (*key, outcome))
    }

    /// Keys in processing order
    pub fn keys(&self) -> impl Iterator<Item = AssetKey> + '_ {
        self.per_asset.iter().map(|(key, _)| *key)
    }

    /// Indexed bucket for a label (`Other` has none and yields an empty slice)
    pub fn by_label(&self, label: Gender) -> &[AssetKey] {
        match label {
            Gender::Man => &self.men,
            Gender::Woman => &self.women,
            Gender::Other => &[],
        }
    }

    /// Keys with the given label, computed from `perAsset` (works for `Other` too)
    pub fn keys_with_label(&self, label: Gender) -> Vec<AssetKey> {
        self.entries()
            .filter(|(_, outcome)| outcome.label() == Some(label))
            .map(|(key, _)| key)
            .collect()
    }

    /// Keys whose classification failed, in processing order
    pub fn failed_keys(&self) -> Vec<AssetKey> {
        self.entries()
            .filter(|(_, outcome)| outcome.is_failed())
            .map(|(key, _)| key)
            .collect()
    }

    pub fn summary(&self) -> RunSummary {
        let mut summary = RunSummary {
            processed: self.per_asset.len(),
            men: self.men.len(),
            women: self.women.len(),
            ..RunSummary::default()
        };
        for (_, outcome) in &self.per_asset {
            match outcome.label() {
                Some(Gender::Other) => summary.other += 1,
                None => summary.failed += 1,
                Some(Gender::Man) | Some(Gender::Woman) => {}
            }
        }
        summary
    }

    /// Check that every bucket equals the filter of `perAsset` by its label
    pub fn validate_index(&self) -> Result<(), LedgerError> {
        for label in Gender::POOLED {
            let derived = self.keys_with_label(label);
            if derived.as_slice() != self.by_label(label) {
                return Err(LedgerError::IndexMismatch {
                    label,
                    stored: self.by_label(label).to_vec(),
                    derived,
                });
            }
        }
        Ok(())
    }
}

// ============================================================================
// Persisted document format
// ============================================================================

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RunResultDocumentRef<'a> {
    run_id: Uuid,
    started_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
    status: RunStatus,
    asset_root: &'a Path,
    per_asset: PerAssetRef<'a>,
    by_label: LabelBucketsRef<'a>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RunResultDocument {
    run_id: Uuid,
    started_at: DateTime<Utc>,
    #[serde(default)]
    finished_at: Option<DateTime<Utc>>,
    status: RunStatus,
    asset_root: PathBuf,
    per_asset: PerAssetEntries,
    by_label: LabelBuckets,
}

#[derive(Serialize)]
struct LabelBucketsRef<'a> {
    #[serde(rename = "Man")]
    man: &'a [AssetKey],
    #[serde(rename = "Woman")]
    woman: &'a [AssetKey],
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct LabelBuckets {
    #[serde(rename = "Man")]
    man: Vec<AssetKey>,
    #[serde(rename = "Woman")]
    woman: Vec<AssetKey>,
}

/// `perAsset` as a JSON object keyed by stringified key, in processing order
struct PerAssetRef<'a>(&'a [(AssetKey, ClassificationOutcome)]);

impl Serialize for PerAssetRef<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (key, outcome) in self.0 {
            map.serialize_entry(&key.to_string(), outcome)?;
        }
        map.end()
    }
}

/// Order-preserving `perAsset` reader; duplicates are kept for validation
struct PerAssetEntries(Vec<(AssetKey, ClassificationOutcome)>);

impl<'de> Deserialize<'de> for PerAssetEntries {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct EntriesVisitor;

        impl<'de> Visitor<'de> for EntriesVisitor {
            type Value = PerAssetEntries;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of asset keys to outcomes")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut entries = Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some((key, outcome)) =
                    access.next_entry::<String, ClassificationOutcome>()?
                {
                    let key: AssetKey = key.parse().map_err(|_| {
                        serde::de::Error::custom(format!("invalid asset key {:?}", key))
                    })?;
                    entries.push((key, outcome));
                }
                Ok(PerAssetEntries(entries))
            }
        }

        deserializer.deserialize_map(EntriesVisitor)
    }
}

impl Serialize for RunResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        RunResultDocumentRef {
            run_id: self.run_id,
            started_at: self.started_at,
            finished_at: self.finished_at,
            status: self.status,
            asset_root: &self.asset_root,
            per_asset: PerAssetRef(&self.per_asset),
            by_label: LabelBucketsRef {
                man: &self.men,
                woman: &self.women,
            },
        }
        .serialize(serializer)
    }
}

impl TryFrom<RunResultDocument> for RunResult {
    type Error = LedgerError;

    fn try_from(doc: RunResultDocument) -> Result<Self, Self::Error> {
        let mut result = RunResult {
            run_id: doc.run_id,
            started_at: doc.started_at,
            finished_at: doc.finished_at,
            status: doc.status,
            asset_root: doc.asset_root,
            per_asset: Vec::new(),
            positions: HashMap::new(),
            men: Vec::new(),
            women: Vec::new(),
        };
        for (key, outcome) in doc.per_asset.0 {
            result.insert(key, outcome)?;
        }

        // Stored buckets replace the derived ones, then must match `perAsset`
        result.men = doc.by_label.man;
        result.women = doc.by_label.woman;
        result.validate_index()?;

        Ok(result)
    }
}
