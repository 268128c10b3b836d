//! Application configuration management.
//!
//! Configuration is layered with figment:
//!
//! 1. Built-in defaults ([`Config::default`])
//! 2. A TOML file (`--config PATH`, or `config.toml` in the platform config directory)
//! 3. `MODELDEX_` environment variables, `__` separating nested keys
//!    (e.g. `MODELDEX_CACHE__SIZE_LIMIT=1GiB`)
//!
//! # Example file
//!
//! ```toml
//! [cache]
//! dir = "/var/lib/modeldex/.cache"
//! size_limit = "4GiB"
//!
//! [folders.loras]
//! paths = ["/models/loras", "/mnt/shared/loras"]
//! extensions = [".pt", ".ckpt", ".safetensors"]
//!
//! [outputs]
//! output_dir = "/srv/output"
//!
//! [index]
//! forbidden_aliases = ["none", "Addams"]
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use directories::ProjectDirs;
use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Deserializer, Serialize};

use crate::cache::CacheConfig;
use crate::models::IndexConfig;
use crate::outputs::OutputsConfig;
use crate::registry::FolderConfig;

/// Environment variable prefix for configuration overrides.
pub const ENV_PREFIX: &str = "MODELDEX_";

/// Application configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Disk cache location and limits.
    pub cache: CacheConfig,
    /// Model categories and the directories they are discovered in.
    pub folders: BTreeMap<String, FolderConfig>,
    /// Output and temp image directories.
    pub outputs: OutputsConfig,
    /// Model index settings.
    pub index: IndexConfig,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = ProjectDirs::from("com", "modeldex", "modeldex")
            .map_or_else(|| PathBuf::from("."), |dirs| dirs.data_dir().to_path_buf());

        let mut folders = BTreeMap::new();
        folders.insert(
            "checkpoints".to_string(),
            FolderConfig::new(
                vec![PathBuf::from("models/checkpoints")],
                &[".ckpt", ".pt", ".bin", ".pth", ".safetensors"],
            ),
        );
        folders.insert(
            "loras".to_string(),
            FolderConfig::new(
                vec![PathBuf::from("models/loras")],
                &[".pt", ".ckpt", ".safetensors"],
            ),
        );

        Self {
            cache: CacheConfig::in_dir(&data_dir),
            folders,
            outputs: OutputsConfig::default(),
            index: IndexConfig::default(),
        }
    }
}

impl Config {
    /// Load the configuration from defaults, a TOML file and the environment.
    ///
    /// An explicitly given `path` must exist; the default platform path is
    /// used only when present.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(Config::default()));

        match path {
            Some(path) => {
                if !path.is_file() {
                    anyhow::bail!("Config file not found: {}", path.display());
                }
                log::debug!("Loading config from {}", path.display());
                figment = figment.merge(Toml::file(path));
            }
            None => {
                if let Ok(default_path) = Self::config_path() {
                    if default_path.is_file() {
                        log::debug!("Loading config from {}", default_path.display());
                        figment = figment.merge(Toml::file(default_path));
                    }
                }
            }
        }

        figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));

        figment.extract().context("Failed to load configuration")
    }

    /// Get the default platform-specific configuration path.
    pub fn config_path() -> Result<PathBuf> {
        let project_dirs = ProjectDirs::from("com", "modeldex", "modeldex")
            .ok_or_else(|| anyhow::anyhow!("Failed to determine project directories"))?;
        Ok(project_dirs.config_dir().join("config.toml"))
    }
}

/// Deserialize a byte size given either as a number or as a string like `"4GiB"`.
pub fn deserialize_size<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Size {
        Bytes(u64),
        Text(String),
    }

    match Size::deserialize(deserializer)? {
        Size::Bytes(n) => Ok(n),
        Size::Text(s) => crate::cli::parse_size(&s).map_err(serde::de::Error::custom),
    }
}
