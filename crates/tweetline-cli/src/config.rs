//! Configuration loading from TOML files

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;
use tweetline_filter::config::{
    DEFAULT_INPUT_FOLDER, DEFAULT_OUTPUT_FOLDER, DEFAULT_READ_TIMEOUT, DEFAULT_WORKERS,
};
use tweetline_filter::land::DEFAULT_MESSAGES_FOLDER;

/// Global configuration for tweetline
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub store: StoreConfig,
    pub filter: FilterSection,
    pub land: LandSection,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Directory tree under `root`
    #[default]
    Local,
    /// S3/GCS-compatible XML API at `endpoint`
    Http,
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Local => "local",
            Self::Http => "http",
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: Backend,
    /// Root directory of the local backend
    pub root: PathBuf,
    pub endpoint: String,
    pub bucket: String,
    #[serde(deserialize_with = "deserialize_env_var")]
    pub token: Option<String>,
    /// Entries per listing page
    pub page_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: Backend::Local,
            root: PathBuf::from("./data"),
            endpoint: "https://storage.googleapis.com".to_string(),
            bucket: "prefs-2020".to_string(),
            token: std::env::var("TWEETLINE_TOKEN").ok(),
            page_size: tweetline_core::store::DEFAULT_PAGE_SIZE,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FilterSection {
    pub input_folder: String,
    pub output_folder: String,
    pub workers: usize,
    /// Per-object deadline in seconds
    pub read_timeout: u64,
    /// Seconds between progress lines
    pub progress_secs: u64,
}

impl Default for FilterSection {
    fn default() -> Self {
        Self {
            input_folder: DEFAULT_INPUT_FOLDER.to_string(),
            output_folder: DEFAULT_OUTPUT_FOLDER.to_string(),
            workers: DEFAULT_WORKERS,
            read_timeout: DEFAULT_READ_TIMEOUT.as_secs(),
            progress_secs: 5,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LandSection {
    pub folder: String,
    pub messages_folder: String,
    pub progress_secs: u64,
}

impl Default for LandSection {
    fn default() -> Self {
        Self {
            folder: DEFAULT_INPUT_FOLDER.to_string(),
            messages_folder: DEFAULT_MESSAGES_FOLDER.to_string(),
            progress_secs: 60,
        }
    }
}

/// Deserialize a string that may be a `${VAR}` environment reference
fn deserialize_env_var<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let opt: Option<String> = Option::deserialize(deserializer)?;
    Ok(opt.and_then(|s| expand_env_var(&s)))
}

/// `${VAR}` resolves to the variable's value (None when unset); anything else is literal
fn expand_env_var(s: &str) -> Option<String> {
    match s.strip_prefix("${").and_then(|s| s.strip_suffix('}')) {
        Some(var_name) => std::env::var(var_name).ok(),
        None => Some(s.to_string()),
    }
}

impl Config {
    /// Load configuration from default locations
    ///
    /// Search order:
    /// 1. ./tweetline.toml
    /// 2. `<user config dir>/tweetline/config.toml`
    ///
    /// Falls back to defaults when neither exists.
    pub fn load() -> Result<Self> {
        let local_config = PathBuf::from("tweetline.toml");
        if local_config.exists() {
            return Self::from_file(&local_config);
        }

        if let Some(dirs) = directories::ProjectDirs::from("", "", "tweetline") {
            let user_config = dirs.config_dir().join("config.toml");
            if user_config.exists() {
                return Self::from_file(&user_config);
            }
        }

        log::debug!("No config file found, using defaults");
        Ok(Self::default())
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        log::debug!("Loaded config from {}", path.display());
        Ok(config)
    }
}
