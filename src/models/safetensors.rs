//! Safetensors header metadata reader.
//!
//! A safetensors file starts with an 8-byte little-endian header length `n`
//! followed by `n` bytes of JSON. Training tools store their parameters as
//! string values under the `__metadata__` key; several of those strings are
//! themselves JSON documents (tag frequencies, dataset dirs) and are
//! expanded here when they parse.

use std::fs::File;
use std::io::{BufReader, ErrorKind, Read};
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};

/// Cache subsection holding parsed safetensors metadata.
pub const METADATA_SUBSECTION: &str = "safetensors-metadata";

/// Largest header accepted (100 MiB).
pub const MAX_HEADER_SIZE: u64 = 100 * 1024 * 1024;

/// Ordered metadata of one model file.
pub type Metadata = Map<String, Value>;

/// Keys shown first, in this order. Unknown keys follow in file order.
const METADATA_PRIORITY: &[(&str, u32)] = &[
    ("ss_sd_model_name", 1),
    ("ss_resolution", 2),
    ("ss_clip_skip", 3),
    ("ss_num_train_images", 10),
    ("ss_tag_frequency", 20),
];

const DEFAULT_PRIORITY: u32 = 999;

/// Errors raised while reading a safetensors header.
#[derive(thiserror::Error, Debug)]
pub enum SafetensorsError {
    /// The file could not be opened or read.
    #[error("I/O error for {path}: {source}")]
    Io {
        /// File being read
        path: PathBuf,
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// The file does not start with a safetensors header.
    #[error("{0} is not a safetensors file")]
    NotSafetensors(PathBuf),

    /// The declared header is larger than [`MAX_HEADER_SIZE`].
    #[error("{path}: header of {size} bytes exceeds the 100 MiB limit")]
    HeaderTooLarge {
        /// File being read
        path: PathBuf,
        /// Declared header length
        size: u64,
    },

    /// The header is not valid JSON.
    #[error("{path}: invalid header JSON: {source}")]
    Json {
        /// File being read
        path: PathBuf,
        /// The underlying JSON error
        #[source]
        source: serde_json::Error,
    },
}

impl SafetensorsError {
    /// Whether the file itself could not be accessed (as opposed to malformed content).
    #[must_use]
    pub fn is_io(&self) -> bool {
        matches!(self, Self::Io { .. })
    }
}

/// Read the `__metadata__` section of a safetensors file.
///
/// String values starting with `{` are expanded with [`expand_json_string`].
/// The returned map keeps the header's key order; use [`order_metadata`]
/// for display order.
///
/// # Errors
///
/// [`SafetensorsError::Io`] when the file cannot be read, any other variant
/// when its content is not a usable header.
pub fn read_metadata(path: &Path) -> Result<Metadata, SafetensorsError> {
    let io_error = |source: std::io::Error| {
        if source.kind() == ErrorKind::UnexpectedEof {
            SafetensorsError::NotSafetensors(path.to_path_buf())
        } else {
            SafetensorsError::Io {
                path: path.to_path_buf(),
                source,
            }
        }
    };

    let file = File::open(path).map_err(io_error)?;
    let mut reader = BufReader::new(file);

    let mut len_bytes = [0u8; 8];
    reader.read_exact(&mut len_bytes).map_err(io_error)?;
    let header_len = u64::from_le_bytes(len_bytes);

    if header_len <= 2 {
        return Err(SafetensorsError::NotSafetensors(path.to_path_buf()));
    }
    if header_len > MAX_HEADER_SIZE {
        return Err(SafetensorsError::HeaderTooLarge {
            path: path.to_path_buf(),
            size: header_len,
        });
    }

    let mut start = [0u8; 2];
    reader.read_exact(&mut start).map_err(io_error)?;
    if start != *b"{\"" && start != *b"{'" {
        return Err(SafetensorsError::NotSafetensors(path.to_path_buf()));
    }

    // Bounded by MAX_HEADER_SIZE above
    let mut header = Vec::with_capacity(header_len as usize);
    header.extend_from_slice(&start);
    reader
        .by_ref()
        .take(header_len - 2)
        .read_to_end(&mut header)
        .map_err(io_error)?;
    if header.len() as u64 != header_len {
        return Err(SafetensorsError::NotSafetensors(path.to_path_buf()));
    }

    let json: Value = serde_json::from_slice(&header).map_err(|e| SafetensorsError::Json {
        path: path.to_path_buf(),
        source: e,
    })?;

    let metadata = match json {
        Value::Object(mut root) => match root.remove("__metadata__") {
            Some(Value::Object(map)) => map,
            _ => Map::new(),
        },
        _ => Map::new(),
    };

    Ok(metadata
        .into_iter()
        .map(|(k, v)| (k, expand_json_string(v)))
        .collect())
}

/// Parse a string value holding a JSON object; anything else is returned unchanged.
#[must_use]
pub fn expand_json_string(value: Value) -> Value {
    match value {
        Value::String(s) if s.starts_with('{') => serde_json::from_str(&s).unwrap_or(Value::String(s)),
        other => other,
    }
}

fn priority(key: &str) -> u32 {
    METADATA_PRIORITY
        .iter()
        .find(|(k, _)| *k == key)
        .map_or(DEFAULT_PRIORITY, |(_, p)| *p)
}

/// Reorder metadata so well-known keys come first.
///
/// The sort is stable: keys of equal priority keep their relative order.
#[must_use]
pub fn order_metadata(metadata: Metadata) -> Metadata {
    let mut entries: Vec<(String, Value)> = metadata.into_iter().collect();
    entries.sort_by_key(|(k, _)| priority(k));
    entries.into_iter().collect()
}

/// Text form of a metadata value, as the training scripts wrote it.
///
/// Booleans render as `True`/`False` so `ss_v2 = true` and `ss_v2 = "True"`
/// compare alike.
#[must_use]
pub fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Bool(true) => "True".to_string(),
        Value::Bool(false) => "False".to_string(),
        Value::Null => "None".to_string(),
        other => other.to_string(),
    }
}
