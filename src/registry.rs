//! Model path registry.
//!
//! Maps logical model categories (`checkpoints`, `loras`, ...) to the
//! directories they are discovered in and the file extensions they accept.
//! The registry keeps a cached filename list per category, computed on
//! first use and recomputed by [`ModelPaths::refresh`] (useful when models
//! live on network storage and change behind our back).
//!
//! With [`ModelPaths::with_cache`] the lists are also persisted in the
//! `filename-lists` cache subsection, stamped with the newest modification
//! time of the category's directories. A persisted list is reused until one
//! of those directories changes; changes inside nested subdirectories only
//! show up after an explicit refresh.
//!
//! # Example
//!
//! ```no_run
//! use modeldex::config::Config;
//! use modeldex::registry::ModelPaths;
//!
//! let registry = ModelPaths::from_config(&Config::default());
//! for entry in registry.checkpoints().unwrap() {
//!     println!("{} -> {}", entry.name, entry.full_path.display());
//! }
//! ```

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

use crate::cache::{file_mtime, CacheEntry, DiskCache};
use crate::config::Config;
use crate::scanner::{natural_cmp, normalize_extension, Walker, WalkerConfig};

/// Category holding full model checkpoints.
pub const CHECKPOINTS: &str = "checkpoints";
/// Category holding LoRA networks.
pub const LORAS: &str = "loras";
/// Cache subsection holding persisted filename lists, titled by category.
pub const FILENAME_LIST_SUBSECTION: &str = "filename-lists";

/// Directories and extensions of one model category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FolderConfig {
    /// Directories searched for this category, in priority order.
    #[serde(default)]
    pub paths: Vec<PathBuf>,
    /// Accepted extensions with leading dot; empty accepts every file.
    #[serde(default)]
    pub extensions: Vec<String>,
}

impl FolderConfig {
    /// Create a folder configuration.
    #[must_use]
    pub fn new(paths: Vec<PathBuf>, extensions: &[&str]) -> Self {
        Self {
            paths,
            extensions: extensions.iter().map(|e| normalize_extension(e)).collect(),
        }
    }

    /// Walker configuration matching this category.
    #[must_use]
    pub fn walker_config(&self) -> WalkerConfig {
        if self.extensions.is_empty() {
            WalkerConfig::default()
        } else {
            WalkerConfig::with_extensions(&self.extensions)
        }
    }
}

/// Errors raised by registry lookups.
#[derive(thiserror::Error, Debug)]
pub enum RegistryError {
    /// An empty category name was given.
    #[error("folder_name is required")]
    FolderNameRequired,

    /// The category is not configured.
    #[error("unknown model category '{name}'{}", suggestion_suffix(.suggestion))]
    UnknownCategory {
        /// Requested category
        name: String,
        /// Closest configured category, if any is similar
        suggestion: Option<String>,
    },

    /// A relative model path tried to leave its directory.
    #[error("invalid model path: '{0}'")]
    InvalidPath(String),
}

fn suggestion_suffix(suggestion: &Option<String>) -> String {
    suggestion
        .as_ref()
        .map(|s| format!(" (did you mean '{s}'?)"))
        .unwrap_or_default()
}

/// One entry of the checkpoint listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckpointEntry {
    /// File name without directories
    pub name: String,
    /// Path relative to its model directory, `/`-separated
    pub path: String,
    /// Absolute location on disk
    pub full_path: PathBuf,
}

/// Registry of model categories and their cached filename lists.
#[derive(Debug)]
pub struct ModelPaths {
    folders: BTreeMap<String, FolderConfig>,
    filename_cache: RwLock<HashMap<String, Vec<String>>>,
    store: Option<Arc<DiskCache>>,
}

impl ModelPaths {
    /// Create a registry over the given categories.
    #[must_use]
    pub fn new(folders: BTreeMap<String, FolderConfig>) -> Self {
        Self {
            folders,
            filename_cache: RwLock::new(HashMap::new()),
            store: None,
        }
    }

    /// Persist filename lists in `cache` so they outlive the process.
    #[must_use]
    pub fn with_cache(mut self, cache: Arc<DiskCache>) -> Self {
        self.store = Some(cache);
        self
    }

    /// Create a registry from the `folders` section of the configuration.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self::new(config.folders.clone())
    }

    /// Configured category names, sorted.
    pub fn categories(&self) -> impl Iterator<Item = &str> {
        self.folders.keys().map(String::as_str)
    }

    /// Look up a category.
    pub fn folder(&self, category: &str) -> Result<&FolderConfig, RegistryError> {
        if category.is_empty() {
            return Err(RegistryError::FolderNameRequired);
        }

        self.folders
            .get(category)
            .ok_or_else(|| RegistryError::UnknownCategory {
                name: category.to_string(),
                suggestion: self.suggest(category),
            })
    }

    /// Directories configured for a category.
    pub fn folder_paths(&self, category: &str) -> Result<&[PathBuf], RegistryError> {
        Ok(&self.folder(category)?.paths)
    }

    /// Extensions accepted for a category.
    pub fn extensions(&self, category: &str) -> Result<&[String], RegistryError> {
        Ok(&self.folder(category)?.extensions)
    }

    /// Closest configured category name.
    fn suggest(&self, category: &str) -> Option<String> {
        self.folders
            .keys()
            .map(|k| (k, strsim::jaro_winkler(category, k)))
            .filter(|(_, score)| *score > 0.8)
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(k, _)| k.clone())
    }

    /// Cached list of relative file paths for a category.
    ///
    /// Computed on first use; call [`refresh`](Self::refresh) to rescan.
    pub fn filename_list(&self, category: &str) -> Result<Vec<String>, RegistryError> {
        let folder = self.folder(category)?;

        if let Ok(cache) = self.filename_cache.read() {
            if let Some(list) = cache.get(category) {
                return Ok(list.clone());
            }
        }

        if let Some(list) = self.load_persisted(category, folder) {
            if let Ok(mut cache) = self.filename_cache.write() {
                cache.insert(category.to_string(), list.clone());
            }
            return Ok(list);
        }

        self.refresh(category)
    }

    /// Rescan a category's directories and replace its cached filename list.
    pub fn refresh(&self, category: &str) -> Result<Vec<String>, RegistryError> {
        let folder = self.folder(category)?;
        let stamp = newest_dir_mtime(folder);
        let list = Self::scan_filenames(folder);

        log::debug!("Category '{}' lists {} file(s)", category, list.len());

        if let Ok(mut cache) = self.filename_cache.write() {
            cache.insert(category.to_string(), list.clone());
        }
        self.persist(category, stamp, &list);
        Ok(list)
    }

    /// Persisted list of a category, if no configured directory changed since.
    fn load_persisted(&self, category: &str, folder: &FolderConfig) -> Option<Vec<String>> {
        let store = self.store.as_ref()?;
        let entry = match store.get(FILENAME_LIST_SUBSECTION, category) {
            Ok(entry) => entry?,
            Err(e) => {
                log::warn!("Filename list cache unavailable for '{}': {}", category, e);
                return None;
            }
        };

        if !entry.is_fresh(newest_dir_mtime(folder)) {
            log::debug!("Persisted filename list for '{}' is stale", category);
            return None;
        }
        serde_json::from_value(entry.value).ok()
    }

    fn persist(&self, category: &str, stamp: f64, list: &[String]) {
        let Some(store) = &self.store else {
            return;
        };
        let entry = CacheEntry::new(stamp, serde_json::json!(list));
        if let Err(e) = store.set(FILENAME_LIST_SUBSECTION, category, &entry) {
            log::warn!("Failed to persist filename list for '{}': {}", category, e);
        }
    }

    fn scan_filenames(folder: &FolderConfig) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut list = Vec::new();

        for dir in &folder.paths {
            let outcome = Walker::new(dir, folder.walker_config()).walk();
            for file in outcome.files {
                let Ok(relative) = file.strip_prefix(dir) else {
                    continue;
                };
                let relative = relative_string(relative);
                // An earlier directory shadows later ones
                if seen.insert(relative.clone()) {
                    list.push(relative);
                }
            }
        }

        list.sort_by(|a, b| natural_cmp(a, b));
        list
    }

    /// Resolve a relative model path to the first directory containing it.
    ///
    /// # Errors
    ///
    /// [`RegistryError::InvalidPath`] for absolute paths or paths with `..`.
    pub fn full_path(&self, category: &str, filename: &str) -> Result<Option<PathBuf>, RegistryError> {
        let folder = self.folder(category)?;
        let relative = Path::new(filename);

        if filename.is_empty()
            || relative
                .components()
                .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        {
            return Err(RegistryError::InvalidPath(filename.to_string()));
        }

        Ok(folder
            .paths
            .iter()
            .map(|dir| dir.join(relative))
            .find(|candidate| candidate.is_file()))
    }

    /// Checkpoint listing with absolute paths.
    pub fn checkpoints(&self) -> Result<Vec<CheckpointEntry>, RegistryError> {
        self.entries(CHECKPOINTS)
    }

    /// Listing of any category in the checkpoint entry shape.
    pub fn entries(&self, category: &str) -> Result<Vec<CheckpointEntry>, RegistryError> {
        let list = self.filename_list(category)?;
        let mut entries = Vec::with_capacity(list.len());

        for path in list {
            let full_path = self
                .full_path(category, &path)?
                .unwrap_or_else(|| PathBuf::from(&path));
            let name = Path::new(&path)
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.clone());
            entries.push(CheckpointEntry {
                name,
                path,
                full_path,
            });
        }

        Ok(entries)
    }
}

/// Newest modification time among a category's existing directories.
fn newest_dir_mtime(folder: &FolderConfig) -> f64 {
    folder
        .paths
        .iter()
        .filter_map(|dir| file_mtime(dir).ok())
        .fold(0.0, f64::max)
}

/// Render a relative path with `/` separators on every platform.
fn relative_string(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
