//! One discovered model file and its detected base model version.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;

use super::safetensors::{order_metadata, value_text, Metadata};

/// Number of hash characters used for short hash lookups.
pub const SHORTHASH_LEN: usize = 12;

/// Stable Diffusion generation a network was trained against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SdVersion {
    /// No metadata to decide from.
    Unknown,
    /// SD 1.x.
    V1,
    /// SD 2.x.
    V2,
    /// SDXL.
    #[serde(rename = "sdxl")]
    VariantXL,
}

impl SdVersion {
    /// Detect the version from training metadata.
    #[must_use]
    pub fn detect(metadata: &Metadata) -> Self {
        let base = metadata
            .get("ss_base_model_version")
            .map(value_text)
            .unwrap_or_default();
        if base.starts_with("sdxl_") {
            return Self::VariantXL;
        }

        if metadata.get("ss_v2").map(value_text).as_deref() == Some("True") {
            return Self::V2;
        }

        if metadata.is_empty() {
            Self::Unknown
        } else {
            Self::V1
        }
    }
}

impl fmt::Display for SdVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unknown => "unknown",
            Self::V1 => "v1",
            Self::V2 => "v2",
            Self::VariantXL => "sdxl",
        };
        write!(f, "{name}")
    }
}

/// A model file known to the index.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelRecord {
    /// File stem, unique within the index.
    pub name: String,
    /// Absolute location on disk.
    pub filename: PathBuf,
    /// Training metadata, well-known keys first.
    pub metadata: Metadata,
    /// `ss_output_name` from the metadata, or `name`.
    pub alias: String,
    /// Detected base model version.
    pub version: SdVersion,
    /// `sshs_model_hash` from the metadata.
    pub hash: Option<String>,
    /// First [`SHORTHASH_LEN`] characters of `hash`.
    pub shorthash: Option<String>,
}

impl ModelRecord {
    /// Build a record from a file and its (possibly empty) metadata.
    #[must_use]
    pub fn new(name: impl Into<String>, filename: &Path, metadata: Metadata) -> Self {
        let name = name.into();
        let metadata = order_metadata(metadata);

        let alias = metadata
            .get("ss_output_name")
            .map(value_text)
            .unwrap_or_else(|| name.clone());

        let hash = metadata
            .get("sshs_model_hash")
            .map(value_text)
            .filter(|h| !h.is_empty());
        let shorthash = hash
            .as_ref()
            .map(|h| h.chars().take(SHORTHASH_LEN).collect::<String>());

        let version = SdVersion::detect(&metadata);

        Self {
            name,
            filename: filename.to_path_buf(),
            metadata,
            alias,
            version,
            hash,
            shorthash,
        }
    }

    /// Whether the file is a safetensors file (the only format carrying metadata).
    #[must_use]
    pub fn is_safetensors(&self) -> bool {
        is_safetensors(&self.filename)
    }
}

/// Case-insensitive `.safetensors` extension check.
#[must_use]
pub fn is_safetensors(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("safetensors"))
}
