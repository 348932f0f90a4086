//! Gateway configuration.
//!
//! Handles loading, validating, and merging `imgserve.toml` files. Stock
//! defaults are the base layer; a user file only needs the keys it wants to
//! change.
//!
//! ## Configuration Options
//!
//! ```toml
//! # All options are optional - defaults shown below
//!
//! [limits]
//! process_timeout = 10      # Seconds per evaluation, 0 disables the deadline
//! max_pages = 256           # Frames decoded from animated inputs
//! max_pixels = 71000000     # Largest decoded canvas, 0 = unlimited
//!
//! [output]
//! enabled = ["jpeg", "png", "webp", "avif", "tiff", "gif", "json"]
//! quality = 80              # JPEG/AVIF quality (1-100)
//! ```
//!
//! Unknown keys are rejected to catch typos early.

use crate::format::OutputSet;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

/// File name looked up by [`discover_config`].
pub const CONFIG_FILE: &str = "imgserve.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Gateway configuration loaded from `imgserve.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GatewayConfig {
    /// Resource limits applied to every request.
    pub limits: LimitsConfig,
    /// Encoder selection and quality.
    pub output: OutputConfig,
}

impl GatewayConfig {
    /// Validate config values are within acceptable ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=100).contains(&self.output.quality) {
            return Err(ConfigError::Validation(
                "output.quality must be 1-100".into(),
            ));
        }
        if self.output.enabled.is_empty() {
            return Err(ConfigError::Validation(
                "output.enabled must not be empty".into(),
            ));
        }
        if !(1..=10_000).contains(&self.limits.max_pages) {
            return Err(ConfigError::Validation(
                "limits.max_pages must be 1-10000".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LimitsConfig {
    /// Evaluation budget in seconds. 0 disables the deadline guard.
    pub process_timeout: u64,
    pub max_pages: u32,
    /// Largest decoded canvas (width x height of the whole strip).
    pub max_pixels: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            process_timeout: 10,
            max_pages: 256,
            max_pixels: 71_000_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OutputConfig {
    pub enabled: OutputSet,
    pub quality: u32,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            enabled: OutputSet::all(),
            quality: 80,
        }
    }
}

/// Returns the stock default config as a `toml::Value::Table`.
pub fn stock_defaults_value() -> toml::Value {
    toml::Value::try_from(GatewayConfig::default()).expect("default config must serialize")
}

/// Recursively merge `overlay` on top of `base`.
///
/// - Tables are merged key-by-key (overlay keys override base keys).
/// - Non-table values in overlay replace base values entirely.
/// - Keys in base that are not in overlay are preserved.
pub fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                let merged = match base_table.remove(&key) {
                    Some(base_val) => merge_toml(base_val, overlay_val),
                    None => overlay_val,
                };
                base_table.insert(key, merged);
            }
            toml::Value::Table(base_table)
        }
        (_, overlay) => overlay,
    }
}

/// Load a config file as a raw TOML value.
///
/// Returns `Ok(None)` if the file does not exist.
pub fn load_raw_config(path: &Path) -> Result<Option<toml::Value>, ConfigError> {
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(path)?;
    let value: toml::Value = toml::from_str(&content)?;
    Ok(Some(value))
}

/// Merge an optional overlay onto a base value, then deserialize and validate.
pub fn resolve_config(
    base: toml::Value,
    overlay: Option<toml::Value>,
) -> Result<GatewayConfig, ConfigError> {
    let merged = match overlay {
        Some(ov) => merge_toml(base, ov),
        None => base,
    };
    let config: GatewayConfig = merged.try_into()?;
    config.validate()?;
    Ok(config)
}

/// Load an explicitly named config file on top of stock defaults.
///
/// Unlike [`discover_config`], a missing file is an error.
pub fn load_config(path: &Path) -> Result<GatewayConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    let overlay: toml::Value = toml::from_str(&content)?;
    resolve_config(stock_defaults_value(), Some(overlay))
}

/// Load `imgserve.toml` from `dir` if present, else the stock defaults.
pub fn discover_config(dir: &Path) -> Result<GatewayConfig, ConfigError> {
    let overlay = load_raw_config(&dir.join(CONFIG_FILE))?;
    resolve_config(stock_defaults_value(), overlay)
}

/// Returns a fully-commented stock `imgserve.toml` with all keys and explanations.
///
/// Used by the `gen-config` CLI command.
pub fn stock_config_toml() -> &'static str {
    r##"# imgserve configuration
# ======================
# All settings are optional. Remove or comment out any you don't need.
# Values shown below are the defaults.
# Unknown keys will cause an error.

# ---------------------------------------------------------------------------
# Resource limits
# ---------------------------------------------------------------------------
[limits]
# Wall-clock budget for one evaluation, in seconds. 0 disables the deadline.
process_timeout = 10

# Frames decoded from animated GIF/WebP inputs.
max_pages = 256

# Reject inputs whose decoded canvas has more pixels than this. 0 = unlimited.
max_pixels = 71000000

# ---------------------------------------------------------------------------
# Output
# ---------------------------------------------------------------------------
[output]
# Encoders requests may select. "json" returns image metadata instead of pixels.
enabled = ["jpeg", "png", "webp", "avif", "tiff", "gif", "json"]

# JPEG/AVIF encoding quality (1 = worst, 100 = best).
quality = 80
"##
}
