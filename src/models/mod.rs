//! Model discovery and metadata.
//!
//! # Architecture
//!
//! - [`safetensors`]: Header metadata reader
//! - [`record`]: [`ModelRecord`] and base model version detection
//! - [`index`]: [`ModelIndex`], the name/alias lookup rebuilt on every rescan
//!
//! Metadata reads go through the [`DiskCache`](crate::cache::DiskCache), so
//! a rescan only opens files that changed since they were last indexed.

pub mod index;
pub mod record;
pub mod safetensors;

use serde::{Deserialize, Serialize};

pub use index::{IndexSnapshot, ModelIndex, ScanSummary};
pub use record::{ModelRecord, SdVersion};
pub use safetensors::{Metadata, SafetensorsError};

use crate::cache::CacheError;
use crate::registry::RegistryError;

/// Errors raised by the model index.
#[derive(thiserror::Error, Debug)]
pub enum ModelError {
    /// No model matches the requested identifier.
    #[error("Model not found: '{0}'")]
    NotFound(String),

    /// The index's category is not usable.
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// The metadata cache failed.
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// A model file could not be read.
    #[error(transparent)]
    Safetensors(#[from] SafetensorsError),

    /// A thread panicked while holding the index lock.
    #[error("Model index lock poisoned")]
    LockPoisoned,
}

impl ModelError {
    /// Whether the error concerns access to a single model file.
    ///
    /// Such errors skip the file during a rescan instead of aborting it.
    #[must_use]
    pub fn is_file_access(&self) -> bool {
        match self {
            Self::Cache(CacheError::SourceMissing(_) | CacheError::Io { .. }) => true,
            Self::Safetensors(e) => e.is_io(),
            _ => false,
        }
    }
}

/// Settings of a model index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Registry category whose directories are scanned.
    pub category: String,
    /// Prefix of metadata cache titles (`<prefix>/<name>`).
    pub title_prefix: String,
    /// Aliases that never resolve, compared case-insensitively.
    pub forbidden_aliases: Vec<String>,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            category: crate::registry::LORAS.to_string(),
            title_prefix: "lora".to_string(),
            forbidden_aliases: vec!["none".to_string(), "Addams".to_string()],
        }
    }
}
