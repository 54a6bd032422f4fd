//! Atomic file writes
//!
//! Every durable artifact (run results, checkpoints, exported pools) is written
//! to a uniquely named temp file in the target's directory, flushed to disk,
//! then renamed over the target. A crash at any point leaves either the
//! previous file or the new one, never a truncated mix of both. Concurrent
//! writers to the same target each get their own temp file; the last rename
//! wins.

use crate::{Error, Result};
use std::fs::File;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;

/// Write `contents` to `target` atomically (temp file + fsync + rename)
pub fn write_atomic(target: &Path, contents: &[u8]) -> Result<()> {
    if target.file_name().is_none() {
        return Err(Error::InvalidInput(format!(
            "Not a file path: {}",
            target.display()
        )));
    }

    let parent = target
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));

    // Dropping the temp file on any error path removes it
    let mut tmp = NamedTempFile::new_in(parent).map_err(|e| Error::file_io(parent, e))?;
    tmp.write_all(contents)
        .and_then(|_| tmp.as_file().sync_all())
        .map_err(|e| Error::file_io(tmp.path(), e))?;

    tmp.persist(target)
        .map_err(|e| Error::file_io(target, e.error))?;

    sync_parent_dir(parent);

    tracing::debug!(path = %target.display(), bytes = contents.len(), "Atomic write complete");
    Ok(())
}

/// Make the rename durable (best-effort, Unix only)
#[cfg(unix)]
fn sync_parent_dir(parent: &Path) {
    if let Ok(dir) = File::open(parent) {
        let _ = dir.sync_all();
    }
}

#[cfg(not(unix))]
fn sync_parent_dir(_parent: &Path) {}
