//! Command-line interface definitions for modeldex.
//!
//! Global options (verbosity, config file, error format) apply to every
//! subcommand.
//!
//! # Example
//!
//! ```bash
//! # List LoRA networks with their training metadata as JSON
//! modeldex loras --metadata --output json
//!
//! # Find the file behind an alias
//! modeldex loras --resolve add_detail
//!
//! # Checkpoints as CSV, rescanning the model directories first
//! modeldex checkpoints --refresh --output csv
//!
//! # Move a generated image to the trash
//! modeldex outputs delete ComfyUI_00001_.png
//!
//! # Inspect the metadata cache
//! modeldex -v cache stats safetensors-metadata
//! ```

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

/// Model discovery and metadata cache for Stable Diffusion model folders.
///
/// modeldex indexes checkpoints and LoRA networks, reads the training
/// metadata embedded in safetensors headers, and caches it on disk so later
/// runs only reopen files that changed.
#[derive(Debug, Parser)]
#[command(name = "modeldex")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Increase verbosity level (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Configuration file (default: config.toml in the platform config directory)
    #[arg(long, value_name = "FILE", global = true, env = "MODELDEX_CONFIG")]
    pub config: Option<PathBuf>,

    /// Metadata cache directory, overriding the configuration
    #[arg(long, value_name = "PATH", global = true)]
    pub cache_dir: Option<PathBuf>,

    /// Print errors as JSON objects on stderr
    #[arg(long, global = true)]
    pub json_errors: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// List model checkpoints
    Checkpoints(CheckpointsArgs),
    /// List or resolve LoRA networks
    Loras(LorasArgs),
    /// Print the metadata embedded in a safetensors file
    Metadata(MetadataArgs),
    /// List or delete generated images
    Outputs {
        #[command(subcommand)]
        action: OutputsCommand,
    },
    /// Inspect or clear the metadata cache
    Cache {
        #[command(subcommand)]
        action: CacheCommand,
    },
}

/// Arguments for the checkpoints subcommand.
#[derive(Debug, Args)]
pub struct CheckpointsArgs {
    /// Rescan the checkpoint directories instead of using the saved list
    #[arg(long)]
    pub refresh: bool,

    /// Output format
    #[arg(short, long, value_enum, default_value = "text")]
    pub output: OutputFormat,
}

/// Arguments for the loras subcommand.
///
/// The LoRA directories are rescanned on every run; unchanged files are
/// served from the metadata cache.
#[derive(Debug, Args)]
pub struct LorasArgs {
    /// Include the training metadata of each network
    #[arg(long)]
    pub metadata: bool,

    /// Print only the network with this name, alias or short hash
    #[arg(long, value_name = "ID")]
    pub resolve: Option<String>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "text")]
    pub output: OutputFormat,
}

/// Arguments for the metadata subcommand.
#[derive(Debug, Args)]
pub struct MetadataArgs {
    /// Safetensors file to read
    #[arg(value_name = "FILE")]
    pub file: PathBuf,
}

/// Image subcommands.
#[derive(Debug, Subcommand)]
pub enum OutputsCommand {
    /// List generated images
    List {
        /// Use the temp directory instead of the output directory
        #[arg(long)]
        temp: bool,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        output: OutputFormat,
    },
    /// Delete one image (moved to the trash unless --permanent)
    Delete {
        /// Image path relative to the output directory
        #[arg(value_name = "NAME")]
        name: String,

        /// Use the temp directory instead of the output directory
        #[arg(long)]
        temp: bool,

        /// Use permanent deletion instead of moving to trash
        ///
        /// Warning: Files cannot be recovered after permanent deletion.
        #[arg(long)]
        permanent: bool,

        /// Skip confirmation prompts (required with --permanent in non-interactive mode)
        #[arg(short = 'y', long)]
        yes: bool,
    },
}

/// Cache subcommands.
#[derive(Debug, Subcommand)]
pub enum CacheCommand {
    /// Show entry counts and sizes (all subsections when none is given)
    Stats {
        /// Subsection to inspect
        #[arg(value_name = "SUBSECTION")]
        subsection: Option<String>,
    },
    /// Remove every entry of a subsection
    Clear {
        /// Subsection to clear
        #[arg(value_name = "SUBSECTION")]
        subsection: String,
    },
}

/// Output format for listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// One line per item
    Text,
    /// JSON array for scripting
    Json,
    /// CSV output for spreadsheets
    Csv,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Text => write!(f, "text"),
            OutputFormat::Json => write!(f, "json"),
            OutputFormat::Csv => write!(f, "csv"),
        }
    }
}

/// Parse a human-readable size string into bytes.
///
/// Supports suffixes: B, KB, KiB, MB, MiB, GB, GiB, TB, TiB
/// Case-insensitive. Numbers without suffix are treated as bytes.
///
/// # Examples
///
/// ```
/// use modeldex::cli::parse_size;
///
/// assert_eq!(parse_size("1024").unwrap(), 1024);
/// assert_eq!(parse_size("256KiB").unwrap(), 262_144);
/// assert_eq!(parse_size("4GiB").unwrap(), 1 << 32);
/// ```
/// # Errors
///
/// Returns an error if the string is empty, contains an invalid number,
/// a negative number, or an unknown size suffix.
pub fn parse_size(s: &str) -> Result<u64, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("Size cannot be empty".to_string());
    }

    let (num_str, suffix) = match s.find(|c: char| !c.is_ascii_digit() && c != '.') {
        Some(idx) => (&s[..idx], s[idx..].trim().to_uppercase()),
        None => (s, String::new()),
    };

    let num: f64 = num_str
        .parse()
        .map_err(|_| format!("Invalid number: '{num_str}'"))?;

    if num < 0.0 {
        return Err("Size cannot be negative".to_string());
    }

    let multiplier: u64 = match suffix.as_str() {
        "" | "B" => 1,
        "KB" | "K" => 1_000,
        "KIB" => 1_024,
        "MB" | "M" => 1_000_000,
        "MIB" => 1_048_576,
        "GB" | "G" => 1_000_000_000,
        "GIB" => 1_073_741_824,
        "TB" | "T" => 1_000_000_000_000,
        "TIB" => 1_099_511_627_776,
        _ => return Err(format!("Unknown size suffix: '{suffix}'")),
    };

    Ok((num * multiplier as f64) as u64)
}
