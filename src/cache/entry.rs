//! Cache entry definitions.

use std::fs;
use std::io;
use std::path::Path;
use std::time::UNIX_EPOCH;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::CacheError;

/// A single record inside a cache subsection.
///
/// The layout matches one `{title: {mtime, value}}` item of the legacy
/// `cache.json` document, so legacy entries deserialize directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Modification time of the source file when the value was computed,
    /// in seconds since the Unix epoch.
    #[serde(default)]
    pub mtime: f64,
    /// The cached payload.
    pub value: Value,
}

impl CacheEntry {
    /// Create a new entry.
    #[must_use]
    pub fn new(mtime: f64, value: Value) -> Self {
        Self { mtime, value }
    }

    /// Whether this entry is still valid for a source file whose current
    /// modification time is `ondisk_mtime`.
    ///
    /// The entry goes stale only when the file is strictly newer.
    #[must_use]
    pub fn is_fresh(&self, ondisk_mtime: f64) -> bool {
        ondisk_mtime <= self.mtime
    }
}

/// Read a file's modification time as fractional seconds since the Unix epoch.
///
/// # Errors
///
/// - [`CacheError::SourceMissing`] if the file does not exist
/// - [`CacheError::Io`] for any other metadata failure
pub fn file_mtime(path: &Path) -> Result<f64, CacheError> {
    let metadata = fs::metadata(path).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => CacheError::SourceMissing(path.to_path_buf()),
        _ => CacheError::Io {
            path: path.to_path_buf(),
            source: e,
        },
    })?;

    let modified = metadata.modified().map_err(|e| CacheError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;

    // Pre-epoch timestamps are clamped to zero
    Ok(modified
        .duration_since(UNIX_EPOCH)
        .map_or(0.0, |d| d.as_secs_f64()))
}
