//! Directory walker implementation using jwalk.
//!
//! # Overview
//!
//! [`Walker`] enumerates the files below a model or output directory:
//!
//! - Symlinks are followed by default (model folders are often links to
//!   shared storage)
//! - Directories whose name starts with `.` are pruned
//! - Files are filtered by a lowercase extension allow-list
//! - The result is ordered naturally: first by containing directory, then
//!   by file name, so `lora2/` comes before `lora10/`
//!
//! A root that does not exist yields no files and no errors.
//!
//! # Example
//!
//! ```no_run
//! use modeldex::scanner::{Walker, WalkerConfig};
//! use std::path::Path;
//!
//! let config = WalkerConfig::with_extensions(&[".safetensors", ".pt"]);
//! let outcome = Walker::new(Path::new("/models/loras"), config).walk();
//! for path in &outcome.files {
//!     println!("{}", path.display());
//! }
//! ```

use std::path::{Path, PathBuf};

use jwalk::WalkDir;

use super::natural::NaturalKey;
use super::{ScanError, WalkerConfig};

/// Files found by a walk plus the errors encountered on the way.
#[derive(Debug, Default)]
pub struct WalkOutcome {
    /// Matching files in natural order
    pub files: Vec<PathBuf>,
    /// Non-fatal errors (unreadable directories, broken links)
    pub errors: Vec<ScanError>,
}

/// Directory walker for model and image discovery.
#[derive(Debug)]
pub struct Walker {
    /// Root path to walk
    root: PathBuf,
    /// Walker configuration
    config: WalkerConfig,
}

impl Walker {
    /// Create a new walker for the given path.
    #[must_use]
    pub fn new(path: &Path, config: WalkerConfig) -> Self {
        Self {
            root: path.to_path_buf(),
            config,
        }
    }

    /// Check if a file passes the extension filter.
    fn passes_extension_filter(&self, path: &Path) -> bool {
        let Some(allowed) = &self.config.extensions else {
            return true;
        };

        let extension = path
            .extension()
            .and_then(|s| s.to_str())
            .map(|s| format!(".{}", s.to_lowercase()))
            .unwrap_or_default();

        allowed.iter().any(|a| *a == extension)
    }

    /// Walk the directory tree and return matching files in natural order.
    pub fn walk(&self) -> WalkOutcome {
        let mut outcome = WalkOutcome::default();

        if !self.root.exists() {
            log::debug!("Skipping missing directory: {}", self.root.display());
            return outcome;
        }

        let skip_hidden = self.config.skip_hidden;
        let walk_dir = WalkDir::new(&self.root)
            .follow_links(self.config.follow_symlinks)
            .skip_hidden(false)
            .process_read_dir(move |depth, _path, _read_dir_state, children| {
                // The first read lists the root itself, which is never pruned
                if depth.is_none() {
                    return;
                }
                if skip_hidden {
                    // Prune hidden directories; hidden files inside visible directories stay
                    children.retain(|child| match child {
                        Ok(entry) => {
                            !(entry.file_type().is_dir()
                                && entry.file_name().to_string_lossy().starts_with('.'))
                        }
                        Err(_) => true,
                    });
                }
            });

        for entry_result in walk_dir {
            match entry_result {
                Ok(entry) => {
                    if entry.file_type().is_dir() {
                        continue;
                    }

                    let path = entry.path();
                    if !self.passes_extension_filter(&path) {
                        log::trace!("Skipping file due to extension filter: {}", path.display());
                        continue;
                    }

                    outcome.files.push(path);
                }
                Err(e) => {
                    let path = e
                        .path()
                        .map_or_else(|| self.root.clone(), std::borrow::ToOwned::to_owned);
                    outcome.errors.push(self.handle_jwalk_error(path, e));
                }
            }
        }

        outcome.files.sort_by_cached_key(|path| {
            let dir = path
                .parent()
                .map(|p| p.to_string_lossy().into_owned())
                .unwrap_or_default();
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            (NaturalKey::new(&dir), NaturalKey::new(&name))
        });

        outcome
    }

    /// Convert a jwalk error into a [`ScanError`].
    fn handle_jwalk_error(&self, path: PathBuf, error: jwalk::Error) -> ScanError {
        log::warn!("Walker error for {}: {}", path.display(), error);

        let kind = error.io_error().map(std::io::Error::kind);
        match kind {
            Some(std::io::ErrorKind::PermissionDenied) => ScanError::PermissionDenied(path),
            Some(std::io::ErrorKind::NotFound) => ScanError::NotFound(path),
            _ => ScanError::Io {
                path,
                source: std::io::Error::other(error.to_string()),
            },
        }
    }
}
