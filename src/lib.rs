//! modeldex - model discovery and metadata caching
//!
//! Indexes Stable Diffusion checkpoints and LoRA networks found in configured
//! model directories, reads the training metadata embedded in safetensors
//! headers, and memoizes it in a subsection-partitioned disk cache keyed by
//! file modification time.
//!
//! # Modules
//!
//! - [`cache`]: Keyed disk cache with mtime invalidation and legacy import
//! - [`models`]: Model index, safetensors metadata, version detection
//! - [`registry`]: Model categories and their directories
//! - [`outputs`]: Generated image listing and deletion
//! - [`scanner`]: Directory walking and natural ordering
//! - [`output`]: JSON and CSV formatters

pub mod cache;
pub mod cli;
pub mod config;
pub mod error;
pub mod logging;
pub mod models;
pub mod output;
pub mod outputs;
pub mod progress;
pub mod registry;
pub mod scanner;

use std::io::{self, BufRead, IsTerminal, Write};
use std::sync::Arc;

use anyhow::{Context, Result};
use bytesize::ByteSize;
use serde::Serialize;

use crate::cache::DiskCache;
use crate::cli::{CacheCommand, Cli, Commands, LorasArgs, OutputFormat, OutputsCommand};
use crate::config::Config;
use crate::error::ExitCode;
use crate::models::{safetensors, ModelError, ModelIndex, ModelRecord};
use crate::output::{CsvModelRow, CsvOutput, JsonModel, JsonOutput};
use crate::outputs::{OutputDirs, OutputKind};
use crate::progress::{Progress, ProgressCallback};
use crate::registry::{ModelPaths, CHECKPOINTS};

/// Run one CLI invocation and return the exit code to report.
///
/// # Errors
///
/// Any failure of the selected command; [`ExitCode::from_error`] classifies it.
pub fn run_app(cli: Cli) -> Result<ExitCode> {
    logging::init_logging(cli.verbose, cli.quiet);

    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(dir) = cli.cache_dir {
        config.cache.legacy_file = dir.with_file_name("cache.json");
        config.cache.dir = dir;
    }
    log::debug!("Cache directory: {}", config.cache.dir.display());

    let progress: Arc<dyn ProgressCallback> = Arc::new(Progress::new(cli.quiet));

    match cli.command {
        Commands::Checkpoints(args) => {
            let cache = Arc::new(DiskCache::open(config.cache.clone()).with_progress(progress));
            let registry = ModelPaths::from_config(&config).with_cache(Arc::clone(&cache));
            if args.refresh {
                registry.refresh(CHECKPOINTS)?;
            }
            let entries = registry.checkpoints()?;
            drop(registry);
            if let Ok(cache) = Arc::try_unwrap(cache) {
                cache.close()?;
            }
            write_listing(&entries, args.output, |e| {
                format!("{}\t{}", e.path, e.full_path.display())
            })?;
            Ok(ExitCode::Success)
        }
        Commands::Loras(args) => run_loras(&config, &args, progress),
        Commands::Metadata(args) => {
            let metadata = safetensors::read_metadata(&args.file)
                .with_context(|| format!("Failed to read metadata of {}", args.file.display()))?;
            let metadata = safetensors::order_metadata(metadata);
            let stdout = io::stdout();
            let mut out = stdout.lock();
            serde_json::to_writer_pretty(&mut out, &metadata)?;
            writeln!(out)?;
            Ok(ExitCode::Success)
        }
        Commands::Outputs { action } => {
            let dirs = OutputDirs::from_config(&config.outputs);
            run_outputs(&dirs, action)
        }
        Commands::Cache { action } => {
            let cache = DiskCache::open(config.cache.clone()).with_progress(progress);
            run_cache(&cache, action)?;
            cache.close()?;
            Ok(ExitCode::Success)
        }
    }
}

fn run_loras(config: &Config, args: &LorasArgs, progress: Arc<dyn ProgressCallback>) -> Result<ExitCode> {
    let cache = Arc::new(DiskCache::open(config.cache.clone()).with_progress(Arc::clone(&progress)));
    let paths = Arc::new(ModelPaths::from_config(config));

    let index = ModelIndex::new(Arc::clone(&paths), Arc::clone(&cache), config.index.clone())
        .with_progress(progress);
    let summary = index.rescan()?;
    let snapshot = index.snapshot();
    drop(index);

    let records: Vec<&ModelRecord> = match &args.resolve {
        Some(id) => {
            let record = snapshot
                .resolve(id)
                .or_else(|| snapshot.resolve_hash(id))
                .ok_or_else(|| ModelError::NotFound(id.clone()))?;
            vec![record]
        }
        None => snapshot.records().collect(),
    };

    match args.output {
        OutputFormat::Json => {
            let models: Vec<JsonModel> = records
                .iter()
                .map(|r| JsonModel::from_record(r, args.metadata))
                .collect();
            JsonOutput::new(&models).write_to(io::stdout().lock())?;
        }
        OutputFormat::Csv => {
            let rows: Vec<CsvModelRow> = records
                .iter()
                .map(|r| CsvModelRow::new(r, &snapshot))
                .collect();
            CsvOutput::new(&rows).write_to(io::stdout().lock())?;
        }
        OutputFormat::Text => {
            let stdout = io::stdout();
            let mut out = stdout.lock();
            for record in &records {
                writeln!(
                    out,
                    "{}\t{}\t{}",
                    snapshot.display_name(record),
                    record.version,
                    record.filename.display()
                )?;
                if args.metadata {
                    for (key, value) in &record.metadata {
                        writeln!(out, "    {}: {}", key, safetensors::value_text(value))?;
                    }
                }
            }
        }
    }

    if let Ok(cache) = Arc::try_unwrap(cache) {
        cache.close()?;
    }

    if summary.skipped > 0 {
        log::warn!("{} model file(s) could not be read", summary.skipped);
        Ok(ExitCode::PartialSuccess)
    } else {
        Ok(ExitCode::Success)
    }
}

fn run_outputs(dirs: &OutputDirs, action: OutputsCommand) -> Result<ExitCode> {
    match action {
        OutputsCommand::List { temp, output } => {
            let images = dirs.list_images(OutputKind::from_temp_flag(temp));
            write_listing(&images, output, |i| i.full_path.display().to_string())?;
        }
        OutputsCommand::Delete {
            name,
            temp,
            permanent,
            yes,
        } => {
            let kind = OutputKind::from_temp_flag(temp);
            if permanent && !yes && !confirm(&format!("Permanently delete {name} from {kind}?"))? {
                anyhow::bail!("Permanent deletion of {name} was not confirmed (use --yes)");
            }
            let result = dirs.delete_image(&name, kind, permanent)?;
            println!(
                "{} {} ({})",
                if result.permanent { "Deleted" } else { "Moved to trash:" },
                result.path.display(),
                ByteSize(result.size)
            );
        }
    }
    Ok(ExitCode::Success)
}

fn run_cache(cache: &DiskCache, action: CacheCommand) -> Result<()> {
    match action {
        CacheCommand::Stats { subsection } => {
            let names = match subsection {
                Some(name) => vec![name],
                None => cache.subsections()?,
            };
            for name in names {
                let stats = cache.stats(&name)?;
                println!("{}\t{} entries\t{}", name, stats.entries, ByteSize(stats.total_size));
            }
        }
        CacheCommand::Clear { subsection } => {
            let removed = cache.clear(&subsection)?;
            println!("Removed {removed} entries from {subsection}");
        }
    }
    Ok(())
}

/// Ask a yes/no question on the terminal. Non-interactive sessions answer no.
fn confirm(question: &str) -> Result<bool> {
    if !io::stdin().is_terminal() {
        return Ok(false);
    }
    eprint!("{question} [y/N] ");
    io::stderr().flush()?;

    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer)?;
    Ok(matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"))
}

/// Print a listing to stdout in the requested format.
fn write_listing<T: Serialize>(
    items: &[T],
    format: OutputFormat,
    text: impl Fn(&T) -> String,
) -> Result<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    match format {
        OutputFormat::Json => JsonOutput::new(items).write_to(&mut out)?,
        OutputFormat::Csv => CsvOutput::new(items).write_to(&mut out)?,
        OutputFormat::Text => {
            for item in items {
                writeln!(out, "{}", text(item))?;
            }
        }
    }
    Ok(())
}
