//! Structured error handling and exit codes.

use serde::Serialize;

use crate::models::{ModelError, SafetensorsError};
use crate::outputs::OutputError;
use crate::registry::RegistryError;

/// Exit codes for the modeldex application.
///
/// - 0: Success
/// - 1: General error (unexpected failure)
/// - 2: Validation error (bad or missing input, unknown category)
/// - 3: Not found (referenced file or record absent)
/// - 4: Partial success (completed, but some model files were skipped)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ExitCode {
    /// Success: the command completed normally.
    Success = 0,
    /// General error: An unexpected error occurred.
    GeneralError = 1,
    /// The input was rejected before any work was done.
    ValidationError = 2,
    /// A referenced file or model record does not exist.
    NotFound = 3,
    /// Partial success: completed but some files could not be read.
    PartialSuccess = 4,
}

impl ExitCode {
    /// Get the numeric exit code.
    #[must_use]
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    /// Get the machine-readable code prefix.
    #[must_use]
    pub fn code_prefix(self) -> &'static str {
        match self {
            Self::Success => "MD000",
            Self::GeneralError => "MD001",
            Self::ValidationError => "MD002",
            Self::NotFound => "MD003",
            Self::PartialSuccess => "MD004",
        }
    }

    /// Classify an application error into an exit code.
    ///
    /// Walks the error chain looking for the library error types that carry
    /// validation or not-found meaning; anything else is a general error.
    #[must_use]
    pub fn from_error(err: &anyhow::Error) -> Self {
        for cause in err.chain() {
            if let Some(e) = cause.downcast_ref::<RegistryError>() {
                return Self::from_registry_error(e);
            }
            if let Some(e) = cause.downcast_ref::<OutputError>() {
                return match e {
                    OutputError::FilenameRequired | OutputError::InvalidFilename(_) => {
                        Self::ValidationError
                    }
                    OutputError::NotFound(_) => Self::NotFound,
                    _ => Self::GeneralError,
                };
            }
            if let Some(e) = cause.downcast_ref::<ModelError>() {
                return match e {
                    ModelError::NotFound(_) => Self::NotFound,
                    ModelError::Registry(e) => Self::from_registry_error(e),
                    ModelError::Safetensors(e) => Self::from_safetensors_error(e),
                    _ => Self::GeneralError,
                };
            }
            if let Some(e) = cause.downcast_ref::<SafetensorsError>() {
                return Self::from_safetensors_error(e);
            }
        }
        Self::GeneralError
    }

    fn from_safetensors_error(err: &SafetensorsError) -> Self {
        match err {
            SafetensorsError::Io { source, .. } if source.kind() == std::io::ErrorKind::NotFound => {
                Self::NotFound
            }
            _ => Self::GeneralError,
        }
    }

    fn from_registry_error(err: &RegistryError) -> Self {
        match err {
            RegistryError::FolderNameRequired
            | RegistryError::UnknownCategory { .. }
            | RegistryError::InvalidPath(_) => Self::ValidationError,
        }
    }
}

/// Structured error information for JSON output.
#[derive(Debug, Serialize)]
pub struct StructuredError {
    /// The error code (e.g., "MD001")
    pub code: String,
    /// The exit code number
    pub exit_code: i32,
    /// Human-readable error message
    pub message: String,
    /// The chain of underlying causes, outermost first
    pub causes: Vec<String>,
}

impl StructuredError {
    /// Create a new structured error from an anyhow error and an exit code.
    #[must_use]
    pub fn new(err: &anyhow::Error, exit_code: ExitCode) -> Self {
        Self {
            code: exit_code.code_prefix().to_string(),
            exit_code: exit_code.as_i32(),
            message: err.to_string(),
            causes: err.chain().skip(1).map(ToString::to_string).collect(),
        }
    }
}
