//! Reading of the legacy single-file cache.
//!
//! Older installations kept every subsection in one JSON document:
//!
//! ```json
//! {
//!   "safetensors-metadata": {
//!     "lora/foo": {"mtime": 1700000000.0, "value": {"ss_output_name": "foo"}}
//!   }
//! }
//! ```
//!
//! The document is read once and imported into the partitioned store by
//! [`DiskCache`](super::DiskCache).

use std::fs;
use std::io;
use std::path::Path;

use serde_json::{Map, Value};

use super::CacheEntry;

/// Legacy cache contents: subsection name to `(title, entry)` pairs, in file order.
pub type LegacyCache = Vec<(String, Vec<(String, CacheEntry)>)>;

/// Read and parse a legacy cache file.
///
/// Returns `None` when the file is missing or cannot be parsed; a corrupt
/// file is logged and otherwise ignored. Individual malformed entries are
/// skipped with a warning.
pub fn read_legacy(path: &Path) -> Option<LegacyCache> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return None,
        Err(e) => {
            log::error!(
                "Issue occurred while trying to read {}: {}",
                path.display(),
                e
            );
            return None;
        }
    };

    let document: Map<String, Value> = match serde_json::from_str(&content) {
        Ok(document) => document,
        Err(e) => {
            log::error!(
                "Issue occurred while trying to read {}: {}",
                path.display(),
                e
            );
            return None;
        }
    };

    let mut subsections = Vec::with_capacity(document.len());
    for (subsection, keyvalues) in document {
        let Value::Object(keyvalues) = keyvalues else {
            log::warn!("Skipping legacy subsection '{}': not an object", subsection);
            continue;
        };

        let mut entries = Vec::with_capacity(keyvalues.len());
        for (title, raw) in keyvalues {
            match serde_json::from_value::<CacheEntry>(raw) {
                Ok(entry) => entries.push((title, entry)),
                Err(e) => log::warn!(
                    "Skipping legacy entry '{}/{}': {}",
                    subsection,
                    title,
                    e
                ),
            }
        }
        subsections.push((subsection, entries));
    }

    Some(subsections)
}

/// Total number of entries across all subsections.
#[must_use]
pub fn entry_count(cache: &LegacyCache) -> usize {
    cache.iter().map(|(_, entries)| entries.len()).sum()
}
