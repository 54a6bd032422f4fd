//! Labeled pools handed to profile assignment
//!
//! Profile assignment pairs the i-th male bot user with `men_images[i]` and the
//! i-th female bot user with `women_images[i]`, so file names are listed in
//! key order of the bucket.

use super::outcome::Gender;
use super::run_result::RunResult;
use crate::services::asset_store::AssetLayout;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelPools {
    pub men_images: Vec<String>,
    pub women_images: Vec<String>,
}

impl LabelPools {
    pub fn from_result(result: &RunResult, layout: &AssetLayout) -> Self {
        let names = |label| {
            result
                .by_label(label)
                .iter()
                .map(|&key| layout.file_name(key))
                .collect()
        };
        Self {
            men_images: names(Gender::Man),
            women_images: names(Gender::Woman),
        }
    }

    /// Write the pools document atomically
    pub fn persist(&self, destination: &std::path::Path) -> crate::error::GiResult<()> {
        let json = serde_json::to_vec_pretty(self)?;
        bpc_common::fs::write_atomic(destination, &json).map_err(|e| {
            crate::error::GiError::persist(destination, e)
        })
    }
}
