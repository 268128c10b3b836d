//! JSON output for listings.
//!
//! Listings are written as a JSON array of items. Model items mirror what
//! host processes expect from the LoRA listing endpoint:
//!
//! ```json
//! [
//!   {
//!     "name": "add_detail",
//!     "alias": "detail",
//!     "path": "/models/loras/add_detail.safetensors",
//!     "metadata": { "ss_sd_model_name": "v1-5-pruned.ckpt" }
//!   }
//! ]
//! ```
//!
//! `metadata` is present only when requested.

use std::io::Write;

use serde::Serialize;

use crate::models::{Metadata, ModelRecord};

/// A model record in JSON format.
#[derive(Debug, Clone, Serialize)]
pub struct JsonModel {
    /// File stem
    pub name: String,
    /// Alias from the training metadata, or the name
    pub alias: String,
    /// Location on disk
    pub path: String,
    /// Training metadata, when requested
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,
}

impl JsonModel {
    /// Create from a record, with or without its metadata.
    #[must_use]
    pub fn from_record(record: &ModelRecord, include_metadata: bool) -> Self {
        Self {
            name: record.name.clone(),
            alias: record.alias.clone(),
            path: record.filename.to_string_lossy().into_owned(),
            metadata: include_metadata.then(|| record.metadata.clone()),
        }
    }
}

/// JSON array writer for any listing.
pub struct JsonOutput<'a, T: Serialize> {
    items: &'a [T],
}

impl<'a, T: Serialize> JsonOutput<'a, T> {
    /// Wrap a listing.
    #[must_use]
    pub fn new(items: &'a [T]) -> Self {
        Self { items }
    }

    /// Serialize to a compact JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self.items)
    }

    /// Serialize to a pretty-printed JSON string.
    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self.items)
    }

    /// Write pretty-printed JSON followed by a newline.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or writing fails.
    pub fn write_to<W: Write>(&self, mut writer: W) -> std::io::Result<()> {
        serde_json::to_writer_pretty(&mut writer, self.items)?;
        writeln!(writer)
    }
}
