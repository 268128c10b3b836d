//! Scanner module for directory traversal.
//!
//! This module provides functionality for:
//! - Recursive directory walking using jwalk
//! - Extension filtering and hidden-directory pruning
//! - Natural ordering of discovered files
//!
//! # Architecture
//!
//! The scanner is divided into submodules:
//! - [`walker`]: Directory traversal and file discovery
//! - [`natural`]: Natural sort keys (`img2` before `img10`)

pub mod natural;
pub mod walker;

use std::path::PathBuf;

pub use natural::{natural_cmp, NaturalKey};
pub use walker::{WalkOutcome, Walker};

/// Configuration for directory walking.
#[derive(Debug, Clone)]
pub struct WalkerConfig {
    /// Follow symbolic links during traversal.
    pub follow_symlinks: bool,

    /// Prune directories whose name starts with `.`.
    pub skip_hidden: bool,

    /// Allowed extensions, lowercase with leading dot (e.g. `.safetensors`).
    /// `None` accepts every file.
    pub extensions: Option<Vec<String>>,
}

impl Default for WalkerConfig {
    fn default() -> Self {
        Self {
            follow_symlinks: true,
            skip_hidden: true,
            extensions: None,
        }
    }
}

impl WalkerConfig {
    /// Default configuration restricted to the given extensions.
    ///
    /// Extensions are normalized to lowercase with a leading dot.
    #[must_use]
    pub fn with_extensions<S: AsRef<str>>(extensions: &[S]) -> Self {
        Self {
            extensions: Some(extensions.iter().map(|e| normalize_extension(e.as_ref())).collect()),
            ..Self::default()
        }
    }
}

/// Normalize an extension to lowercase with a leading dot.
#[must_use]
pub fn normalize_extension(extension: &str) -> String {
    let lower = extension.trim().to_lowercase();
    if lower.starts_with('.') {
        lower
    } else {
        format!(".{lower}")
    }
}

/// Errors that can occur during directory scanning.
#[derive(thiserror::Error, Debug)]
pub enum ScanError {
    /// Permission was denied when accessing a file or directory.
    #[error("Permission denied: {0}")]
    PermissionDenied(PathBuf),

    /// The specified path was not found.
    #[error("Path not found: {0}")]
    NotFound(PathBuf),

    /// An I/O error occurred while accessing a file.
    #[error("I/O error for {path}: {source}")]
    Io {
        /// Path where the error occurred
        path: PathBuf,
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
    },
}
