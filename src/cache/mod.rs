//! Keyed disk cache for modeldex.
//!
//! This module memoizes expensive per-file computations (such as reading the
//! metadata header of a safetensors file) across runs. Entries are keyed by a
//! `(subsection, title)` pair and invalidated by the modification time of the
//! source file they were computed from.
//!
//! # Architecture
//!
//! * [`database`]: SQLite-backed storage for one subsection, with overflow
//!   files for large values and oldest-first size culling.
//! * [`entry`]: The `{mtime, value}` record and mtime helpers.
//! * [`legacy`]: Reader for the old single-file `cache.json` layout.
//!
//! [`DiskCache`] owns every opened subsection. Subsections are created lazily
//! on first access; creation is serialized by an init lock so concurrent first
//! access opens each store once. Before the first subsection is created, a
//! legacy `cache.json` is imported if the partitioned cache directory does not
//! exist yet.
//!
//! # Cache Invalidation
//!
//! An entry is fresh while the source file's current mtime is not greater
//! than the mtime stored with it. A stale entry is recomputed and overwritten.
//!
//! # Example
//!
//! ```no_run
//! use modeldex::cache::{CacheConfig, CacheError, DiskCache};
//! use std::path::Path;
//!
//! let cache = DiskCache::open(CacheConfig::in_dir(Path::new("/tmp/modeldex")));
//! let value: Option<String> = cache
//!     .get_or_compute("demo", "title", Path::new("/etc/hostname"), || {
//!         Ok::<_, CacheError>(Some("expensive".to_string()))
//!     })
//!     .unwrap();
//! ```

pub mod database;
pub mod entry;
pub mod legacy;

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

pub use database::{SubsectionStats, SubsectionStore};
pub use entry::{file_mtime, CacheEntry};

use crate::progress::ProgressCallback;

/// Default size ceiling of a subsection (4 GiB).
pub const DEFAULT_SIZE_LIMIT: u64 = 1 << 32;
/// Default threshold above which values are stored as separate files (256 KiB).
pub const DEFAULT_MIN_FILE_SIZE: u64 = 1 << 18;

/// Result type for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// Errors that can occur while using the disk cache.
#[derive(thiserror::Error, Debug)]
pub enum CacheError {
    /// The file an entry is validated against does not exist.
    #[error("Source file not found: {0}")]
    SourceMissing(PathBuf),

    /// An I/O error occurred on a source file or the cache directory.
    #[error("I/O error for {path}: {source}")]
    Io {
        /// Path where the error occurred
        path: PathBuf,
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// The SQLite store of a subsection failed.
    #[error("Cache database error in subsection '{subsection}': {source}")]
    Database {
        /// Subsection whose store failed
        subsection: String,
        /// The underlying SQLite error
        #[source]
        source: rusqlite::Error,
    },

    /// A value could not be serialized or a stored value could not be read back.
    #[error("Invalid cached value for '{title}': {source}")]
    Serialization {
        /// Title of the entry
        title: String,
        /// The underlying JSON error
        #[source]
        source: serde_json::Error,
    },

    /// The subsection name cannot be used as a directory name.
    #[error("Invalid subsection name: '{0}'")]
    InvalidSubsection(String),

    /// A thread panicked while holding a cache lock.
    #[error("Cache lock poisoned")]
    LockPoisoned,
}

/// Location and limits of the disk cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Directory holding one subdirectory per subsection.
    pub dir: PathBuf,
    /// Single-file cache from older versions, imported once.
    pub legacy_file: PathBuf,
    /// Size ceiling of each subsection in bytes.
    #[serde(deserialize_with = "crate::config::deserialize_size")]
    pub size_limit: u64,
    /// Values at least this large are stored as separate files.
    #[serde(deserialize_with = "crate::config::deserialize_size")]
    pub min_file_size: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self::in_dir(Path::new("."))
    }
}

impl CacheConfig {
    /// Cache layout rooted at `base`: `base/.cache/` and `base/cache.json`.
    #[must_use]
    pub fn in_dir(base: &Path) -> Self {
        Self {
            dir: base.join(".cache"),
            legacy_file: base.join("cache.json"),
            size_limit: DEFAULT_SIZE_LIMIT,
            min_file_size: DEFAULT_MIN_FILE_SIZE,
        }
    }
}

/// Process-wide, subsection-partitioned persistent cache.
///
/// Share it behind an [`Arc`]; all methods take `&self`.
pub struct DiskCache {
    config: CacheConfig,
    stores: RwLock<HashMap<String, Arc<SubsectionStore>>>,
    init_lock: Mutex<()>,
    legacy_checked: AtomicBool,
    progress: Option<Arc<dyn ProgressCallback>>,
}

impl std::fmt::Debug for DiskCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiskCache")
            .field("config", &self.config)
            .field("progress", &self.progress.as_ref().map(|_| "<callback>"))
            .finish_non_exhaustive()
    }
}

impl DiskCache {
    /// Open a cache with the given configuration.
    ///
    /// Nothing touches the disk until the first subsection is used.
    #[must_use]
    pub fn open(config: CacheConfig) -> Self {
        Self {
            config,
            stores: RwLock::new(HashMap::new()),
            init_lock: Mutex::new(()),
            legacy_checked: AtomicBool::new(false),
            progress: None,
        }
    }

    /// Report legacy conversion progress to `progress`.
    #[must_use]
    pub fn with_progress(mut self, progress: Arc<dyn ProgressCallback>) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Resolve the store for `name`, creating it on first use.
    pub fn subsection(&self, name: &str) -> CacheResult<Arc<SubsectionStore>> {
        // Fast path: already open
        if let Some(store) = self
            .stores
            .read()
            .map_err(|_| CacheError::LockPoisoned)?
            .get(name)
        {
            return Ok(Arc::clone(store));
        }

        validate_subsection(name)?;

        let _guard = self.init_lock.lock().map_err(|_| CacheError::LockPoisoned)?;

        self.import_legacy_if_needed()?;

        let mut stores = self.stores.write().map_err(|_| CacheError::LockPoisoned)?;
        if let Some(store) = stores.get(name) {
            return Ok(Arc::clone(store));
        }

        let store = Arc::new(self.open_store(name)?);
        stores.insert(name.to_string(), Arc::clone(&store));
        Ok(store)
    }

    fn open_store(&self, name: &str) -> CacheResult<SubsectionStore> {
        SubsectionStore::open(
            name,
            &self.config.dir.join(name),
            self.config.size_limit,
            self.config.min_file_size,
        )
    }

    /// Import the legacy single-file cache, at most once per process.
    ///
    /// Runs only when the partitioned directory does not exist yet, so a
    /// later process finds the directory and skips the import. Must be
    /// called with `init_lock` held.
    fn import_legacy_if_needed(&self) -> CacheResult<()> {
        if self.legacy_checked.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        if self.config.dir.exists() || !self.config.legacy_file.is_file() {
            return Ok(());
        }

        let Some(legacy) = legacy::read_legacy(&self.config.legacy_file) else {
            return Ok(());
        };

        let total = legacy::entry_count(&legacy);
        log::info!(
            "Converting {} legacy cache entries from {}",
            total,
            self.config.legacy_file.display()
        );

        if let Some(ref progress) = self.progress {
            progress.on_phase_start("converting cache", total);
        }

        let mut stores = self.stores.write().map_err(|_| CacheError::LockPoisoned)?;
        let mut done = 0;
        for (subsection, entries) in legacy {
            if let Err(e) = validate_subsection(&subsection) {
                log::warn!("Skipping legacy subsection: {}", e);
                done += entries.len();
                continue;
            }

            let store = match stores.get(&subsection) {
                Some(store) => Arc::clone(store),
                None => {
                    let store = Arc::new(self.open_store(&subsection)?);
                    stores.insert(subsection.clone(), Arc::clone(&store));
                    store
                }
            };

            for (title, entry) in entries {
                store.set(&title, &entry)?;
                done += 1;
                if let Some(ref progress) = self.progress {
                    progress.on_progress(done, &title);
                }
            }
        }

        if let Some(ref progress) = self.progress {
            progress.on_phase_end("converting cache");
        }

        Ok(())
    }

    /// Raw entry lookup without freshness checks.
    pub fn get(&self, subsection: &str, title: &str) -> CacheResult<Option<CacheEntry>> {
        self.subsection(subsection)?.get(title)
    }

    /// Raw entry write.
    pub fn set(&self, subsection: &str, title: &str, entry: &CacheEntry) -> CacheResult<()> {
        self.subsection(subsection)?.set(title, entry)
    }

    /// Return the cached value for `title`, computing and storing it when absent or stale.
    ///
    /// The entry is stale when `source` has been modified after the entry was
    /// written. `compute` runs only on a miss; if it returns `Ok(None)` nothing
    /// is stored and `None` is returned, so failures are retried next time.
    ///
    /// # Errors
    ///
    /// - Errors returned by `compute` are propagated unchanged.
    /// - [`CacheError::SourceMissing`] / [`CacheError::Io`] if `source` cannot be stat'ed.
    /// - Storage errors of the subsection.
    pub fn get_or_compute<T, E, F>(
        &self,
        subsection: &str,
        title: &str,
        source: &Path,
        compute: F,
    ) -> Result<Option<T>, E>
    where
        T: Serialize + DeserializeOwned,
        E: From<CacheError>,
        F: FnOnce() -> Result<Option<T>, E>,
    {
        let store = self.subsection(subsection)?;
        let ondisk_mtime = file_mtime(source)?;

        if let Some(entry) = store.get(title)? {
            if entry.is_fresh(ondisk_mtime) {
                match serde_json::from_value::<T>(entry.value) {
                    Ok(value) => {
                        log::trace!("Cache hit: {}/{}", subsection, title);
                        return Ok(Some(value));
                    }
                    Err(e) => {
                        log::debug!(
                            "Cached value for {}/{} has an unexpected shape, regenerating: {}",
                            subsection,
                            title,
                            e
                        );
                    }
                }
            } else {
                log::trace!("Cache stale: {}/{}", subsection, title);
            }
        } else {
            log::trace!("Cache miss: {}/{}", subsection, title);
        }

        let Some(value) = compute()? else {
            return Ok(None);
        };

        let json = serde_json::to_value(&value).map_err(|e| CacheError::Serialization {
            title: title.to_string(),
            source: e,
        })?;
        store.set(title, &CacheEntry::new(ondisk_mtime, json))?;

        Ok(Some(value))
    }

    /// Remove every entry of a subsection. Returns the number of removed entries.
    pub fn clear(&self, subsection: &str) -> CacheResult<u64> {
        self.subsection(subsection)?.clear()
    }

    /// Entry count and stored size of a subsection.
    pub fn stats(&self, subsection: &str) -> CacheResult<SubsectionStats> {
        self.subsection(subsection)?.stats()
    }

    /// Names of all subsections present on disk, sorted.
    pub fn subsections(&self) -> CacheResult<Vec<String>> {
        let read_dir = match fs::read_dir(&self.config.dir) {
            Ok(read_dir) => read_dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(CacheError::Io {
                    path: self.config.dir.clone(),
                    source: e,
                })
            }
        };

        let mut names: Vec<String> = read_dir
            .filter_map(Result::ok)
            .filter(|e| e.path().join("cache.db").is_file())
            .filter_map(|e| e.file_name().to_str().map(str::to_string))
            .collect();
        names.sort();
        Ok(names)
    }

    /// Flush and release every open subsection.
    pub fn close(self) -> CacheResult<()> {
        let stores = self
            .stores
            .into_inner()
            .map_err(|_| CacheError::LockPoisoned)?;
        for store in stores.values() {
            store.checkpoint()?;
        }
        log::debug!("Closed {} cache subsection(s)", stores.len());
        Ok(())
    }
}

/// Subsection names become directory names, so they must be a single plain component.
fn validate_subsection(name: &str) -> CacheResult<()> {
    if name.is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\'])
        || name.contains('\0')
    {
        return Err(CacheError::InvalidSubsection(name.to_string()));
    }
    Ok(())
}
