use crate::{AppError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub const CONFIG_FILE: &str = "config.json";

const DEFAULT_RETRIES: u32 = 3;
const DEFAULT_MAX_PARALLEL: usize = 2;

/// Persistent configuration. Unknown keys in the file are ignored and
/// missing keys fill in from defaults, so old config files keep working.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Base folder used when no category is chosen.
    #[serde(default = "default_download_path")]
    pub download_path: PathBuf,
    /// Named category -> folder path.
    #[serde(default)]
    pub categories: BTreeMap<String, PathBuf>,
    #[serde(default)]
    pub default_category: Option<String>,
    /// Folder the previous batch downloaded into.
    #[serde(default)]
    pub last_used_path: Option<PathBuf>,
    /// Retry count handed to the engine for transient failures.
    #[serde(default = "default_retries")]
    pub retries: u32,
    #[serde(default = "default_max_parallel")]
    pub max_parallel_downloads: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            download_path: default_download_path(),
            categories: BTreeMap::new(),
            default_category: None,
            last_used_path: None,
            retries: DEFAULT_RETRIES,
            max_parallel_downloads: DEFAULT_MAX_PARALLEL,
        }
    }
}

impl AppConfig {
    /// Worker pool size for the task runner; a misconfigured zero degrades
    /// to sequential rather than aborting.
    pub fn concurrency_limit(&self) -> usize {
        self.max_parallel_downloads.max(1)
    }
}

fn default_download_path() -> PathBuf {
    std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
}

fn default_retries() -> u32 {
    DEFAULT_RETRIES
}

fn default_max_parallel() -> usize {
    DEFAULT_MAX_PARALLEL
}

/// Loads the config, writing a default file on first run. A file that
/// exists but does not parse is a fatal startup error.
pub fn load(path: &Path) -> Result<AppConfig> {
    if !path.exists() {
        let config = AppConfig::default();
        save(path, &config)?;
        log::info!("no config found, wrote defaults to {}", path.display());
        return Ok(config);
    }

    let bytes = std::fs::read(path)?;
    let parsed: AppConfig = serde_json::from_slice(&bytes).map_err(|e| {
        AppError::Config(format!("failed to parse {}: {e}", path.display()))
    })?;
    Ok(parsed)
}

pub fn save(path: &Path, config: &AppConfig) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let json = serde_json::to_string_pretty(config)?;
    std::fs::write(path, format!("{json}\n"))?;
    Ok(())
}
