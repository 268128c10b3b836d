//! Model index: discovery, name and alias resolution.
//!
//! # Overview
//!
//! [`ModelIndex::rescan`] walks every directory of the index's category,
//! builds a [`ModelRecord`] per model file and publishes the result as a new
//! [`IndexSnapshot`]. Readers clone the current snapshot `Arc` and keep a
//! consistent view while a rescan builds the next one.
//!
//! # Resolution
//!
//! Every record is reachable by its `name` (file stem) and its `alias`
//! (`ss_output_name` from the training metadata). When two records claim the
//! same alias, that alias becomes forbidden: it no longer resolves, and
//! [`IndexSnapshot::display_name`] shows the record's name instead.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use modeldex::cache::DiskCache;
//! use modeldex::config::Config;
//! use modeldex::models::ModelIndex;
//! use modeldex::registry::ModelPaths;
//!
//! let config = Config::default();
//! let cache = Arc::new(DiskCache::open(config.cache.clone()));
//! let paths = Arc::new(ModelPaths::from_config(&config));
//! let index = ModelIndex::new(paths, cache, config.index.clone());
//!
//! let summary = index.rescan().unwrap();
//! println!("{} models", summary.records);
//! if let Some(record) = index.resolve("add_detail") {
//!     println!("{}", record.filename.display());
//! }
//! ```

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use unicode_normalization::UnicodeNormalization;

use super::record::{is_safetensors, ModelRecord};
use super::safetensors::{read_metadata, Metadata, METADATA_SUBSECTION};
use super::{IndexConfig, ModelError};
use crate::cache::DiskCache;
use crate::progress::ProgressCallback;
use crate::registry::ModelPaths;
use crate::scanner::Walker;

/// Progress phase reported while indexing model files.
pub const SCAN_PHASE: &str = "scanning models";

/// Statistics of one rescan.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScanSummary {
    /// Candidate files found by the walk
    pub files_seen: usize,
    /// Records in the new index (after duplicate names collapsed)
    pub records: usize,
    /// Files skipped because they could not be read
    pub skipped: usize,
    /// Forbidden aliases, including configured seeds
    pub forbidden_aliases: usize,
    /// Wall time of the rescan
    pub duration: Duration,
}

/// Immutable view of the index produced by one rescan.
#[derive(Debug, Default)]
pub struct IndexSnapshot {
    records: Vec<Arc<ModelRecord>>,
    by_name: HashMap<String, usize>,
    aliases: HashMap<String, Arc<ModelRecord>>,
    forbidden: HashSet<String>,
    by_shorthash: HashMap<String, Arc<ModelRecord>>,
}

/// Case-fold an alias for forbidden-set comparisons.
fn fold_alias(alias: &str) -> String {
    alias.nfc().collect::<String>().to_lowercase()
}

impl IndexSnapshot {
    /// Empty snapshot with the given forbidden alias seeds.
    #[must_use]
    pub fn with_forbidden<S: AsRef<str>>(seeds: &[S]) -> Self {
        Self {
            forbidden: seeds.iter().map(|s| fold_alias(s.as_ref())).collect(),
            ..Self::default()
        }
    }

    /// Add a record. A record with an already indexed name replaces the
    /// earlier one in place, along with the alias and hash keys that still
    /// point at it.
    pub fn insert(&mut self, record: ModelRecord) {
        let record = Arc::new(record);

        match self.by_name.get(&record.name) {
            Some(&position) => {
                let replaced = std::mem::replace(&mut self.records[position], Arc::clone(&record));
                self.aliases.retain(|_, r| !Arc::ptr_eq(r, &replaced));
                self.by_shorthash.retain(|_, r| !Arc::ptr_eq(r, &replaced));
            }
            None => {
                self.by_name.insert(record.name.clone(), self.records.len());
                self.records.push(Arc::clone(&record));
            }
        }

        if self.aliases.contains_key(&record.alias) {
            log::debug!("Alias '{}' is ambiguous", record.alias);
            self.forbidden.insert(fold_alias(&record.alias));
        }

        self.aliases.insert(record.name.clone(), Arc::clone(&record));
        self.aliases.insert(record.alias.clone(), Arc::clone(&record));

        if let Some(shorthash) = &record.shorthash {
            self.by_shorthash.insert(shorthash.clone(), Arc::clone(&record));
        }
    }

    /// Records in discovery order.
    pub fn records(&self) -> impl Iterator<Item = &ModelRecord> {
        self.records.iter().map(AsRef::as_ref)
    }

    /// Number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the snapshot holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Whether an alias is forbidden (case-insensitive).
    #[must_use]
    pub fn is_forbidden(&self, alias: &str) -> bool {
        self.forbidden.contains(&fold_alias(alias))
    }

    /// Number of forbidden aliases.
    #[must_use]
    pub fn forbidden_count(&self) -> usize {
        self.forbidden.len()
    }

    /// Look up a record by name, then by alias unless the alias is forbidden.
    #[must_use]
    pub fn resolve(&self, id: &str) -> Option<&ModelRecord> {
        if let Some(&position) = self.by_name.get(id) {
            return Some(self.records[position].as_ref());
        }
        if self.is_forbidden(id) {
            return None;
        }
        self.aliases.get(id).map(AsRef::as_ref)
    }

    /// Look up a record by the first 12 characters of its hash.
    #[must_use]
    pub fn resolve_hash(&self, shorthash: &str) -> Option<&ModelRecord> {
        self.by_shorthash.get(shorthash).map(AsRef::as_ref)
    }

    /// Name to show for a record: its alias, or its name when the alias is forbidden.
    #[must_use]
    pub fn display_name<'a>(&self, record: &'a ModelRecord) -> &'a str {
        if self.is_forbidden(&record.alias) {
            &record.name
        } else {
            &record.alias
        }
    }
}

/// Index of the model files in one registry category.
pub struct ModelIndex {
    paths: Arc<ModelPaths>,
    cache: Arc<DiskCache>,
    config: IndexConfig,
    progress: Option<Arc<dyn ProgressCallback>>,
    snapshot: RwLock<Arc<IndexSnapshot>>,
}

impl std::fmt::Debug for ModelIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelIndex")
            .field("config", &self.config)
            .field("cache", &self.cache)
            .field("progress", &self.progress.as_ref().map(|_| "<callback>"))
            .finish_non_exhaustive()
    }
}

impl ModelIndex {
    /// Create an empty index. Call [`rescan`](Self::rescan) to populate it.
    #[must_use]
    pub fn new(paths: Arc<ModelPaths>, cache: Arc<DiskCache>, config: IndexConfig) -> Self {
        let snapshot = IndexSnapshot::with_forbidden(&config.forbidden_aliases);
        Self {
            paths,
            cache,
            config,
            progress: None,
            snapshot: RwLock::new(Arc::new(snapshot)),
        }
    }

    /// Report rescan progress to `progress`.
    #[must_use]
    pub fn with_progress(mut self, progress: Arc<dyn ProgressCallback>) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Rebuild the index from disk and publish it.
    ///
    /// Files that cannot be accessed are logged and skipped. Files whose
    /// header cannot be parsed are kept with empty metadata.
    ///
    /// # Errors
    ///
    /// [`ModelError::Registry`] if the category is not configured, or a cache
    /// error that is not specific to one file.
    pub fn rescan(&self) -> Result<ScanSummary, ModelError> {
        let start = Instant::now();
        let folder = self.paths.folder(&self.config.category)?;

        let mut candidates = Vec::new();
        for dir in &folder.paths {
            let outcome = Walker::new(dir, folder.walker_config()).walk();
            for error in &outcome.errors {
                log::warn!("{}", error);
            }
            candidates.extend(outcome.files);
        }

        let mut summary = ScanSummary {
            files_seen: candidates.len(),
            ..ScanSummary::default()
        };

        if let Some(progress) = &self.progress {
            progress.on_phase_start(SCAN_PHASE, candidates.len());
        }

        let mut snapshot = IndexSnapshot::with_forbidden(&self.config.forbidden_aliases);
        for (i, path) in candidates.iter().enumerate() {
            if let Some(progress) = &self.progress {
                progress.on_progress(i + 1, &path.to_string_lossy());
            }

            let Some(name) = path.file_stem().map(|s| s.to_string_lossy().into_owned()) else {
                continue;
            };

            match self.load_metadata(&name, path) {
                Ok(metadata) => snapshot.insert(ModelRecord::new(name, path, metadata)),
                Err(e) if e.is_file_access() => {
                    log::warn!("Failed to load model {} from {}: {}", name, path.display(), e);
                    summary.skipped += 1;
                }
                Err(e) => return Err(e),
            }
        }

        if let Some(progress) = &self.progress {
            progress.on_phase_end(SCAN_PHASE);
        }

        summary.records = snapshot.len();
        summary.forbidden_aliases = snapshot.forbidden_count();
        summary.duration = start.elapsed();

        let mut current = self.snapshot.write().map_err(|_| ModelError::LockPoisoned)?;
        *current = Arc::new(snapshot);

        log::info!(
            "Indexed {} {} from {} file(s) in {:.2?}",
            summary.records,
            self.config.category,
            summary.files_seen,
            summary.duration
        );
        Ok(summary)
    }

    /// Cached metadata of one file; empty for non-safetensors files and
    /// unparsable headers.
    fn load_metadata(&self, name: &str, path: &Path) -> Result<Metadata, ModelError> {
        if !is_safetensors(path) {
            return Ok(Metadata::new());
        }

        let title = format!("{}/{}", self.config.title_prefix, name);
        let cached = self
            .cache
            .get_or_compute(METADATA_SUBSECTION, &title, path, || {
                match read_metadata(path) {
                    Ok(metadata) => Ok(Some(metadata)),
                    Err(e) if e.is_io() => Err(ModelError::from(e)),
                    Err(e) => {
                        log::warn!("{}", e);
                        Ok(None)
                    }
                }
            });

        match cached {
            Ok(metadata) => Ok(metadata.unwrap_or_default()),
            Err(e) if e.is_file_access() => Err(e),
            Err(ModelError::Cache(e)) => {
                log::warn!("Metadata cache unavailable for {}: {}", path.display(), e);
                Ok(Metadata::new())
            }
            Err(e) => Err(e),
        }
    }

    /// Current snapshot.
    #[must_use]
    pub fn snapshot(&self) -> Arc<IndexSnapshot> {
        match self.snapshot.read() {
            Ok(guard) => Arc::clone(&*guard),
            Err(poisoned) => Arc::clone(&*poisoned.into_inner()),
        }
    }

    /// Records in discovery order.
    #[must_use]
    pub fn list(&self) -> Vec<ModelRecord> {
        self.snapshot().records().cloned().collect()
    }

    /// Look up a record by name or alias.
    #[must_use]
    pub fn resolve(&self, id: &str) -> Option<ModelRecord> {
        self.snapshot().resolve(id).cloned()
    }

    /// Look up a record by short hash.
    #[must_use]
    pub fn resolve_hash(&self, shorthash: &str) -> Option<ModelRecord> {
        self.snapshot().resolve_hash(shorthash).cloned()
    }

    /// Name to show for a record.
    #[must_use]
    pub fn display_name(&self, record: &ModelRecord) -> String {
        self.snapshot().display_name(record).to_string()
    }

    /// Number of indexed records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    /// Whether the index is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }
}
