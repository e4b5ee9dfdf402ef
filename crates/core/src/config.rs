use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::backend::InferenceBackend;
use crate::executor::RetryPolicy;
use crate::pipeline::PipelineOptions;
use crate::types::EnhancementTier;

const CONFIG_FILE_NAME: &str = "config.toml";
const ENV_DATA_DIR: &str = "SNAPGRID_DATA_DIR";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AppConfig {
    pub paths: PathsConfig,
    pub upscale: UpscaleConfig,
    pub inference: InferenceConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PathsConfig {
    pub models_dir: PathBuf,
}

/// Tile geometry and retry tuning. The high tier defaults to a smaller
/// tile: its model's memory footprint per pixel is 4x that of the
/// standard tier.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct UpscaleConfig {
    pub tile_size_standard: u32,
    pub tile_size_high: u32,
    pub pad: u32,
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
    pub inter_tile_pause_ms: u64,
    /// Connect timeout for fetching missing weights during model load.
    pub model_load_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct InferenceConfig {
    /// "cuda" or "cpu". Unknown values fall back to "cuda".
    pub backend: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            paths: PathsConfig::default(),
            upscale: UpscaleConfig::default(),
            inference: InferenceConfig::default(),
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            models_dir: PathBuf::from("models"),
        }
    }
}

impl Default for UpscaleConfig {
    fn default() -> Self {
        Self {
            tile_size_standard: 64,
            tile_size_high: 32,
            pad: 16,
            max_retries: 2,
            retry_backoff_ms: 250,
            inter_tile_pause_ms: 0,
            model_load_timeout_secs: 15,
        }
    }
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            backend: InferenceBackend::Cuda.to_string(),
        }
    }
}

impl UpscaleConfig {
    pub fn tile_size_for(&self, tier: EnhancementTier) -> u32 {
        match tier {
            EnhancementTier::Standard => self.tile_size_standard,
            EnhancementTier::High => self.tile_size_high,
        }
    }

    pub fn pipeline_options_for(&self, tier: EnhancementTier) -> PipelineOptions {
        PipelineOptions {
            tile_size: self.tile_size_for(tier),
            pad: self.pad,
            retry: RetryPolicy {
                max_retries: self.max_retries,
                backoff: std::time::Duration::from_millis(self.retry_backoff_ms),
            },
            inter_tile_pause: std::time::Duration::from_millis(self.inter_tile_pause_ms),
        }
    }
}

impl InferenceConfig {
    pub fn backend(&self) -> InferenceBackend {
        InferenceBackend::from_str_lossy(&self.backend)
    }
}

impl AppConfig {
    pub fn load_from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;

        if raw.trim().is_empty() {
            return Ok(Self::default());
        }

        toml::from_str(&raw)
            .with_context(|| format!("failed to parse config TOML: {}", path.display()))
    }

    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        let parent = path
            .parent()
            .context("config path does not have a parent directory")?;
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create config directory: {}", parent.display()))?;

        let encoded = toml::to_string_pretty(self).context("failed to serialize config TOML")?;
        fs::write(path, encoded)
            .with_context(|| format!("failed to write config file: {}", path.display()))?;

        Ok(())
    }
}

/// Resolve the data directory with 3-tier priority:
/// 1. CLI override if provided
/// 2. SNAPGRID_DATA_DIR environment variable
/// 3. Default: ./data
pub fn data_dir(cli_override: Option<&Path>) -> PathBuf {
    if let Some(path) = cli_override {
        return path.to_path_buf();
    }

    if let Some(env_dir) = env::var_os(ENV_DATA_DIR) {
        return PathBuf::from(env_dir);
    }

    PathBuf::from("data")
}

/// Returns the path to config.toml within the given data directory.
pub fn config_path(data_dir: &Path) -> PathBuf {
    data_dir.join(CONFIG_FILE_NAME)
}

/// Initialize the data directory structure on first run:
/// - Creates data_dir if missing
/// - Writes default config.toml only if file doesn't exist
pub fn initialize_data_dir(data_dir: &Path) -> Result<()> {
    if !data_dir.exists() {
        fs::create_dir_all(data_dir)
            .with_context(|| format!("failed to create data directory: {}", data_dir.display()))?;
    }

    let cfg_path = config_path(data_dir);
    if !cfg_path.exists() {
        let default_cfg = AppConfig::default();
        default_cfg.save_to_path(&cfg_path)?;
    }

    Ok(())
}

/// Resolve a path relative to a base directory.
/// Returns the path as-is if absolute, otherwise joins it to base.
pub fn resolve_relative_to(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}
