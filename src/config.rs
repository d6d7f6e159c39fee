//! Runtime configuration, loaded from an optional JSON file.

use crate::assets::RetryConfig;
use crate::inference::Backend;
use crate::mask::EdgeEnhancement;
use crate::worker::LoaderConfig;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_ENCODER_URL: &str =
    "https://huggingface.co/vietanhdev/segment-anything-2-onnx-models/resolve/main/sam2_hiera_tiny.encoder.onnx";
pub const DEFAULT_DECODER_URL: &str =
    "https://huggingface.co/vietanhdev/segment-anything-2-onnx-models/resolve/main/sam2_hiera_tiny.decoder.onnx";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Encoder model location (https URL, file URL or path)
    pub encoder_url: String,
    /// Decoder model location
    pub decoder_url: String,
    /// Model cache directory; `None` disables caching
    pub cache_dir: Option<PathBuf>,
    /// Per-attempt download timeout
    pub download_timeout_secs: u64,
    pub retry: RetryConfig,
    /// Execution backends, fastest first
    pub backends: Vec<Backend>,
    pub intra_threads: usize,
    /// Target animation frame count
    pub frame_count: usize,
    /// Trajectory smoothing factor in `[0, 1]`
    pub smoothing_factor: f32,
    /// Preview loop duration
    pub preview_cycle_ms: u64,
    pub edge: EdgeEnhancement,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            encoder_url: DEFAULT_ENCODER_URL.to_string(),
            decoder_url: DEFAULT_DECODER_URL.to_string(),
            cache_dir: dirs_next::cache_dir().map(|dir| dir.join("maskmotion").join("models")),
            download_timeout_secs: 120,
            retry: RetryConfig::default(),
            backends: Backend::default_order(),
            intra_threads: 4,
            frame_count: 49,
            smoothing_factor: 0.5,
            preview_cycle_ms: 2000,
            edge: EdgeEnhancement::default(),
        }
    }
}

impl Config {
    /// Read a JSON config file; missing fields take their defaults
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config = serde_json::from_str(&text)
            .with_context(|| format!("Invalid config file {}", path.display()))?;
        tracing::debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Defaults when no file is given
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    pub fn preview_cycle(&self) -> Duration {
        Duration::from_millis(self.preview_cycle_ms)
    }

    pub fn loader_config(&self) -> LoaderConfig {
        LoaderConfig {
            encoder_url: self.encoder_url.clone(),
            decoder_url: self.decoder_url.clone(),
            cache_dir: self.cache_dir.clone(),
            retry: self.retry.clone(),
            download_timeout: Duration::from_secs(self.download_timeout_secs),
            backends: self.backends.clone(),
            intra_threads: self.intra_threads,
        }
    }
}
