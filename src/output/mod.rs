//! Output formatters for listings.
//!
//! - JSON for automation and for host processes that consume the listings
//! - CSV for spreadsheet import
//!
//! Models serialize as `{name, alias, path, metadata?}`, checkpoints as
//! `{name, path, full_path}` and images as `{name, full_path}`.
//!
//! # Example
//!
//! ```no_run
//! use modeldex::output::json::{JsonModel, JsonOutput};
//! # let index: modeldex::models::ModelIndex = unimplemented!();
//!
//! let models: Vec<JsonModel> = index
//!     .list()
//!     .iter()
//!     .map(|r| JsonModel::from_record(r, false))
//!     .collect();
//! println!("{}", JsonOutput::new(&models).to_json_pretty().unwrap());
//! ```

pub mod csv;
pub mod json;

pub use csv::{CsvModelRow, CsvOutput};
pub use json::{JsonModel, JsonOutput};
