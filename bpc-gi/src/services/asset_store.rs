//! Asset store: a flat directory of candidate face images
//!
//! Every image is addressed by its sequential key through a fixed file name
//! pattern (`avatar-{key}.jpg` by default). Acquisition and cropping stages
//! fill the directory; this stage only reads it, except for `renumber`, which
//! shifts keys when pools from several sources are merged.

use crate::error::{GiError, GiResult};
use crate::models::AssetKey;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::ops::Range;
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

/// Bytes read for magic byte detection
const MAGIC_HEADER_LEN: usize = 64;

/// Per-asset faults; recorded as failed outcomes by the driver
#[derive(Debug, Error)]
pub enum AssetError {
    /// No file at the expected path
    #[error("Asset file not found: {0}")]
    NotFound(PathBuf),

    /// Path exists but is a directory or other non-file entry
    #[error("Asset is not a regular file: {0}")]
    NotAFile(PathBuf),

    /// Zero-byte file (interrupted download)
    #[error("Asset file is empty: {0}")]
    EmptyFile(PathBuf),

    /// Magic bytes do not match any image format
    #[error("Asset is not an image ({detected}): {path}")]
    NotAnImage { path: PathBuf, detected: String },

    /// File exists but cannot be read
    #[error("Cannot read asset {path}: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Renumbering would overwrite an existing file
    #[error("Refusing to overwrite existing asset: {0}")]
    TargetExists(PathBuf),

    /// Rename during renumbering failed
    #[error("Cannot rename {from} to {to}: {source}")]
    RenameFailed {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Renumbering would push a key past the key space
    #[error("Key {key} + offset {offset} overflows")]
    KeyOverflow { key: AssetKey, offset: AssetKey },
}

/// File naming pattern of the asset store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetLayout {
    /// File name prefix before the key
    #[serde(default = "default_prefix")]
    pub prefix: String,
    /// File extension without the dot
    #[serde(default = "default_extension")]
    pub extension: String,
}

fn default_prefix() -> String {
    "avatar-".to_string()
}

fn default_extension() -> String {
    "jpg".to_string()
}

impl Default for AssetLayout {
    fn default() -> Self {
        Self {
            prefix: default_prefix(),
            extension: default_extension(),
        }
    }
}

impl AssetLayout {
    /// File name for a key (`avatar-12.jpg`)
    pub fn file_name(&self, key: AssetKey) -> String {
        format!("{}{}.{}", self.prefix, key, self.extension)
    }

    /// Parse a file name back into its key
    pub fn parse_key(&self, file_name: &str) -> Option<AssetKey> {
        let stem = file_name
            .strip_prefix(&self.prefix)?
            .strip_suffix(&self.extension)?
            .strip_suffix('.')?;
        if stem.is_empty() || !stem.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        stem.parse().ok()
    }
}

/// Outcome of a renumber pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenumberReport {
    /// (old key, new key) pairs in the order they were renamed
    pub renamed: Vec<(AssetKey, AssetKey)>,
    /// Keys in the range that had no file
    pub missing: Vec<AssetKey>,
}

/// Asset store rooted at one directory
#[derive(Debug, Clone)]
pub struct AssetStore {
    root: PathBuf,
    layout: AssetLayout,
}

impl AssetStore {
    /// Open an existing asset store
    ///
    /// A missing root is a run-level fault: nothing can be classified.
    pub fn open(root: impl Into<PathBuf>, layout: AssetLayout) -> GiResult<Self> {
        let root = root.into();
        if !root.exists() {
            return Err(GiError::AssetRootMissing(root));
        }
        if !root.is_dir() {
            return Err(GiError::AssetRootNotDirectory(root));
        }
        Ok(Self { root, layout })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn layout(&self) -> &AssetLayout {
        &self.layout
    }

    /// Expected path of a key, whether or not the file exists
    pub fn path_for(&self, key: AssetKey) -> PathBuf {
        self.root.join(self.layout.file_name(key))
    }

    /// Resolve a key to a readable image file
    pub fn resolve(&self, key: AssetKey) -> Result<PathBuf, AssetError> {
        let path = self.path_for(key);

        let metadata = match std::fs::metadata(&path) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(AssetError::NotFound(path));
            }
            Err(source) => return Err(AssetError::Unreadable { path, source }),
        };

        if !metadata.is_file() {
            return Err(AssetError::NotAFile(path));
        }
        if metadata.len() == 0 {
            return Err(AssetError::EmptyFile(path));
        }

        verify_image_header(&path)?;
        Ok(path)
    }

    /// Keys of all files matching the layout, ascending
    pub fn discover_keys(&self) -> GiResult<Vec<AssetKey>> {
        let mut keys = Vec::new();

        for entry in WalkDir::new(&self.root).min_depth(1).max_depth(1) {
            match entry {
                Ok(entry) => {
                    if !entry.file_type().is_file() {
                        continue;
                    }
                    if let Some(key) = entry
                        .file_name()
                        .to_str()
                        .and_then(|name| self.layout.parse_key(name))
                    {
                        keys.push(key);
                    }
                }
                Err(e) => {
                    tracing::warn!("Error accessing entry: {}", e);
                }
            }
        }

        keys.sort_unstable();
        keys.dedup();

        tracing::debug!(
            root = %self.root.display(),
            count = keys.len(),
            "Discovered asset keys"
        );
        Ok(keys)
    }

    /// Dense key range to process
    ///
    /// With an explicit count this is `0..count`. Otherwise the range ends after
    /// the highest key on disk, so gaps inside it show up as failed outcomes.
    pub fn key_range(&self, count: Option<AssetKey>) -> GiResult<Range<AssetKey>> {
        if let Some(count) = count {
            return Ok(0..count);
        }
        let end = self
            .discover_keys()?
            .last()
            .map(|max| max.saturating_add(1))
            .unwrap_or(0);
        Ok(0..end)
    }

    /// Rename every key in `range` to `key + offset`
    ///
    /// All targets are checked before the first rename, so a conflict leaves
    /// the store untouched. Keys without a file are skipped and reported.
    pub fn renumber(&self, range: Range<AssetKey>, offset: AssetKey) -> GiResult<RenumberReport> {
        let mut report = RenumberReport::default();
        if offset == 0 {
            return Ok(report);
        }

        let mut moves = Vec::new();
        for key in range.clone() {
            let new_key = key
                .checked_add(offset)
                .ok_or(AssetError::KeyOverflow { key, offset })?;
            let source = self.path_for(key);
            if !source.is_file() {
                report.missing.push(key);
                continue;
            }
            let target = self.path_for(new_key);
            // Targets inside the range are vacated earlier in the descending pass
            if target.exists() && !range.contains(&new_key) {
                return Err(AssetError::TargetExists(target).into());
            }
            moves.push((key, new_key, source, target));
        }

        // Highest key first so overlapping ranges never clobber a pending source
        for (key, new_key, source, target) in moves.into_iter().rev() {
            std::fs::rename(&source, &target).map_err(|e| AssetError::RenameFailed {
                from: source.clone(),
                to: target.clone(),
                source: e,
            })?;
            tracing::debug!("Renamed {} -> {}", source.display(), target.display());
            report.renamed.push((key, new_key));
        }

        tracing::info!(
            renamed = report.renamed.len(),
            missing = report.missing.len(),
            offset,
            "Asset keys renumbered"
        );
        Ok(report)
    }
}

/// Check the magic bytes of an asset
fn verify_image_header(path: &Path) -> Result<(), AssetError> {
    let unreadable = |source| AssetError::Unreadable {
        path: path.to_path_buf(),
        source,
    };

    let mut file = File::open(path).map_err(unreadable)?;
    let mut buffer = [0u8; MAGIC_HEADER_LEN];
    let mut filled = 0;
    while filled < buffer.len() {
        match file.read(&mut buffer[filled..]).map_err(unreadable)? {
            0 => break,
            n => filled += n,
        }
    }

    let header = &buffer[..filled];
    if infer::is_image(header) {
        return Ok(());
    }

    let detected = infer::get(header)
        .map(|kind| kind.mime_type().to_string())
        .unwrap_or_else(|| "unknown format".to_string());
    Err(AssetError::NotAnImage {
        path: path.to_path_buf(),
        detected,
    })
}
