//! Generated image listing and deletion.
//!
//! # Overview
//!
//! Images are written to an output directory, or to a temp directory for
//! previews. This module lists the `.png`/`.jpg` files below either one and
//! deletes single images by their path relative to it:
//! - Move to system trash (default, recoverable)
//! - Permanent deletion (with explicit flag)
//!
//! # Example
//!
//! ```no_run
//! use modeldex::outputs::{OutputDirs, OutputKind, OutputsConfig};
//!
//! let dirs = OutputDirs::from_config(&OutputsConfig::default());
//! for image in dirs.list_images(OutputKind::Output) {
//!     println!("{}", image.name);
//! }
//! dirs.delete_image("ComfyUI_00001_.png", OutputKind::Output, false).unwrap();
//! ```

use std::fmt;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::scanner::{Walker, WalkerConfig};

/// Extensions listed as images.
pub const IMAGE_EXTENSIONS: &[&str] = &[".png", ".jpg"];

/// Error type for image operations.
#[derive(Debug, thiserror::Error)]
pub enum OutputError {
    /// No file name was given.
    #[error("filename is required")]
    FilenameRequired,

    /// The file name is absolute or escapes its directory.
    #[error("invalid filename: {0}")]
    InvalidFilename(String),

    /// The image does not exist.
    #[error("file {0} not found")]
    NotFound(PathBuf),

    /// Permission denied when attempting to delete.
    #[error("permission denied: {0}")]
    PermissionDenied(PathBuf),

    /// Trash operation failed.
    #[error("trash operation failed for {path}: {message}")]
    TrashFailed { path: PathBuf, message: String },

    /// Permanent delete operation failed.
    #[error("permanent delete failed for {path}: {message}")]
    PermanentDeleteFailed { path: PathBuf, message: String },

    /// General I/O error.
    #[error("I/O error for {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Which image directory to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputKind {
    /// Final outputs.
    #[default]
    Output,
    /// Previews and intermediate images.
    Temp,
}

impl OutputKind {
    /// `Temp` when `temp` is set, else `Output`.
    #[must_use]
    pub fn from_temp_flag(temp: bool) -> Self {
        if temp {
            Self::Temp
        } else {
            Self::Output
        }
    }
}

impl fmt::Display for OutputKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Output => write!(f, "output"),
            Self::Temp => write!(f, "temp"),
        }
    }
}

/// Image directory configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputsConfig {
    /// Directory holding final outputs.
    pub output_dir: PathBuf,
    /// Directory holding temporary images.
    pub temp_dir: PathBuf,
}

impl Default for OutputsConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("output"),
            temp_dir: PathBuf::from("temp"),
        }
    }
}

/// An image found in an output directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutputImage {
    /// File name without directories
    pub name: String,
    /// Location on disk
    pub full_path: PathBuf,
}

/// Result of a successful deletion.
#[derive(Debug, Clone)]
pub struct DeleteResult {
    /// Path that was deleted.
    pub path: PathBuf,
    /// Size of the deleted file in bytes.
    pub size: u64,
    /// Whether deletion was permanent (true) or to trash (false).
    pub permanent: bool,
}

/// The output and temp image directories.
#[derive(Debug, Clone)]
pub struct OutputDirs {
    output: PathBuf,
    temp: PathBuf,
}

impl OutputDirs {
    /// Create from configuration.
    #[must_use]
    pub fn from_config(config: &OutputsConfig) -> Self {
        Self {
            output: config.output_dir.clone(),
            temp: config.temp_dir.clone(),
        }
    }

    /// Directory of the given kind.
    #[must_use]
    pub fn dir(&self, kind: OutputKind) -> &Path {
        match kind {
            OutputKind::Output => &self.output,
            OutputKind::Temp => &self.temp,
        }
    }

    /// Images below the directory, in natural order. A missing directory is empty.
    #[must_use]
    pub fn list_images(&self, kind: OutputKind) -> Vec<OutputImage> {
        let config = WalkerConfig {
            skip_hidden: false,
            ..WalkerConfig::with_extensions(IMAGE_EXTENSIONS)
        };
        let outcome = Walker::new(self.dir(kind), config).walk();
        for error in &outcome.errors {
            log::warn!("{}", error);
        }

        outcome
            .files
            .into_iter()
            .map(|full_path| OutputImage {
                name: full_path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default(),
                full_path,
            })
            .collect()
    }

    /// Delete one image, given by its path relative to the directory.
    ///
    /// # Errors
    ///
    /// - [`OutputError::FilenameRequired`] for an empty name
    /// - [`OutputError::InvalidFilename`] for absolute names or names containing `..`
    /// - [`OutputError::NotFound`] if no such file exists in the directory
    /// - Trash or removal failures
    pub fn delete_image(
        &self,
        filename: &str,
        kind: OutputKind,
        permanent: bool,
    ) -> Result<DeleteResult, OutputError> {
        let path = self.image_path(filename, kind)?;
        if permanent {
            permanent_delete(&path)
        } else {
            delete_to_trash(&path)
        }
    }

    /// Validate a relative image name and join it to the directory.
    pub fn image_path(&self, filename: &str, kind: OutputKind) -> Result<PathBuf, OutputError> {
        if filename.is_empty() {
            return Err(OutputError::FilenameRequired);
        }

        let relative = Path::new(filename);
        if filename.starts_with('/')
            || filename.contains("..")
            || relative
                .components()
                .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        {
            return Err(OutputError::InvalidFilename(filename.to_string()));
        }

        let path = self.dir(kind).join(relative);
        if !path.is_file() {
            return Err(OutputError::NotFound(PathBuf::from(filename)));
        }
        Ok(path)
    }
}

fn file_size(path: &Path) -> Result<u64, OutputError> {
    fs::metadata(path)
        .map(|m| m.len())
        .map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => OutputError::NotFound(path.to_path_buf()),
            io::ErrorKind::PermissionDenied => OutputError::PermissionDenied(path.to_path_buf()),
            _ => OutputError::Io {
                path: path.to_path_buf(),
                source: e,
            },
        })
}

/// Move a file to the system trash.
pub fn delete_to_trash(path: &Path) -> Result<DeleteResult, OutputError> {
    let size = file_size(path)?;

    trash::delete(path).map_err(|e| {
        log::error!("Trash operation failed for {}: {}", path.display(), e);
        OutputError::TrashFailed {
            path: path.to_path_buf(),
            message: e.to_string(),
        }
    })?;

    log::info!("Moved to trash: {} ({} bytes)", path.display(), size);

    Ok(DeleteResult {
        path: path.to_path_buf(),
        size,
        permanent: false,
    })
}

/// Permanently delete a file.
///
/// **WARNING**: This operation cannot be undone.
pub fn permanent_delete(path: &Path) -> Result<DeleteResult, OutputError> {
    let size = file_size(path)?;

    fs::remove_file(path).map_err(|e| {
        log::error!("Permanent delete failed for {}: {}", path.display(), e);
        OutputError::PermanentDeleteFailed {
            path: path.to_path_buf(),
            message: e.to_string(),
        }
    })?;

    log::info!("Permanently deleted: {} ({} bytes)", path.display(), size);

    Ok(DeleteResult {
        path: path.to_path_buf(),
        size,
        permanent: true,
    })
}
