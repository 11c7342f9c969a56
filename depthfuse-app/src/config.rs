//! Run configuration, read from an optional TOML file.
//!
//! Every field has a default, so an empty file (or no file) is valid. The
//! defaults match the sensor this tool was first calibrated against.

use depthfuse_recon::preview::DEFAULT_MAX_DEPTH;
use depthfuse_recon::{FusionParams, Intrinsics, Preset};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Depth camera intrinsics in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct CameraConfig {
    #[serde(default = "default_fx")]
    pub fx: f32,
    #[serde(default = "default_fy")]
    pub fy: f32,
    #[serde(default = "default_cx")]
    pub cx: f32,
    #[serde(default = "default_cy")]
    pub cy: f32,
}

/// Reconstruction volume.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct VolumeConfig {
    /// Voxels per axis.
    #[serde(default = "default_volume_dims")]
    pub dims: u32,
    /// Edge length in metres.
    #[serde(default = "default_volume_size")]
    pub size_m: f32,
}

/// Raw depth preview and presentation.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PreviewConfig {
    /// Depth (sensor units) shown at full brightness.
    #[serde(default = "default_max_depth")]
    pub max_depth: f32,
    /// Keyboard poll per iteration, in milliseconds.
    #[serde(default = "default_key_poll_ms")]
    pub key_poll_ms: u64,
    /// Write every presented image here as PNG.
    #[serde(default)]
    pub dump_dir: Option<PathBuf>,
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub enable_tracy: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub camera: CameraConfig,
    #[serde(default)]
    pub volume: VolumeConfig,
    /// Sensor depth units per metre; the preset's value when unset.
    #[serde(default)]
    pub depth_factor: Option<f32>,
    #[serde(default)]
    pub preview: PreviewConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_fx() -> f32 {
    597.0702
}
fn default_fy() -> f32 {
    595.1533
}
fn default_cx() -> f32 {
    317.4329
}
fn default_cy() -> f32 {
    240.6083
}
fn default_volume_dims() -> u32 {
    1024
}
fn default_volume_size() -> f32 {
    3.0
}
fn default_max_depth() -> f32 {
    DEFAULT_MAX_DEPTH
}
fn default_key_poll_ms() -> u64 {
    1
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            fx: default_fx(),
            fy: default_fy(),
            cx: default_cx(),
            cy: default_cy(),
        }
    }
}

impl Default for VolumeConfig {
    fn default() -> Self {
        Self {
            dims: default_volume_dims(),
            size_m: default_volume_size(),
        }
    }
}

impl Default for PreviewConfig {
    fn default() -> Self {
        Self {
            max_depth: default_max_depth(),
            key_poll_ms: default_key_poll_ms(),
            dump_dir: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            enable_tracy: false,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            camera: CameraConfig::default(),
            volume: VolumeConfig::default(),
            depth_factor: None,
            preview: PreviewConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Fusion parameters for `preset` with this configuration's camera and
    /// volume applied.
    pub fn fusion_params(&self, preset: Preset) -> FusionParams {
        let camera = self.camera;
        let mut params = FusionParams::for_preset(preset)
            .with_intrinsics(Intrinsics::new(camera.fx, camera.fy, camera.cx, camera.cy))
            .with_cubic_volume(self.volume.dims, self.volume.size_m);
        if let Some(depth_factor) = self.depth_factor {
            params = params.with_depth_factor(depth_factor);
        }
        params
    }
}

/// Load the config file, or defaults when no path is given.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let mut cfg = match path {
        Some(path) => load_from(path)?,
        None => Config::default(),
    };
    apply_env_overrides(&mut cfg, |key| std::env::var(key).ok());
    Ok(cfg)
}

/// Load the config from a specific path.
pub(crate) fn load_from(path: &Path) -> Result<Config, ConfigError> {
    let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&raw).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Apply `DEPTHFUSE_*` overrides looked up through `var`.
///
/// | Variable | Config field |
/// |---|---|
/// | `DEPTHFUSE_LOG_LEVEL` | `logging.level` |
/// | `DEPTHFUSE_DUMP_DIR` | `preview.dump_dir` |
pub fn apply_env_overrides(cfg: &mut Config, var: impl Fn(&str) -> Option<String>) {
    if let Some(level) = var("DEPTHFUSE_LOG_LEVEL") {
        cfg.logging.level = level;
    }
    if let Some(dir) = var("DEPTHFUSE_DUMP_DIR") {
        cfg.preview.dump_dir = Some(PathBuf::from(dir));
    }
}
