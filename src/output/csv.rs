//! CSV output for listings.
//!
//! One row per item with a header row. Checkpoints and images serialize
//! their fields directly; models use [`CsvModelRow`], which flattens a
//! record into plain columns (metadata is omitted).
//!
//! # Model columns
//!
//! - `name`: File stem
//! - `alias`: Name shown to users
//! - `path`: Location on disk
//! - `version`: Detected base model (`unknown`, `v1`, `v2`, `sdxl`)
//! - `hash`: Short hash, empty when unknown

use std::io;

use serde::Serialize;
use thiserror::Error;

use crate::models::{IndexSnapshot, ModelRecord};

/// Errors that can occur during CSV output generation.
#[derive(Debug, Error)]
pub enum CsvOutputError {
    /// I/O error during writing.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Error during CSV serialization.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

/// A model record as a CSV row.
#[derive(Debug, Serialize)]
pub struct CsvModelRow {
    name: String,
    alias: String,
    path: String,
    version: String,
    hash: String,
}

impl CsvModelRow {
    /// Flatten a record. `alias` is the display name within `snapshot`.
    #[must_use]
    pub fn new(record: &ModelRecord, snapshot: &IndexSnapshot) -> Self {
        Self {
            name: record.name.clone(),
            alias: snapshot.display_name(record).to_string(),
            path: record.filename.to_string_lossy().into_owned(),
            version: record.version.to_string(),
            hash: record.shorthash.clone().unwrap_or_default(),
        }
    }
}

/// CSV writer for any listing.
pub struct CsvOutput<'a, T: Serialize> {
    rows: &'a [T],
}

impl<'a, T: Serialize> CsvOutput<'a, T> {
    /// Wrap a listing.
    #[must_use]
    pub fn new(rows: &'a [T]) -> Self {
        Self { rows }
    }

    /// Write the CSV output to the given writer.
    ///
    /// # Errors
    ///
    /// Returns `CsvOutputError` if writing or serialization fails.
    pub fn write_to<W: io::Write>(&self, writer: W) -> Result<(), CsvOutputError> {
        let mut csv_writer = csv::Writer::from_writer(writer);
        for row in self.rows {
            csv_writer.serialize(row)?;
        }
        csv_writer.flush()?;
        Ok(())
    }

    /// Generate CSV output as a string.
    ///
    /// # Errors
    ///
    /// Returns `CsvOutputError` if serialization fails.
    pub fn to_string(&self) -> Result<String, CsvOutputError> {
        let mut buffer = Vec::new();
        self.write_to(&mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}
