//! Service configuration.
//!
//! Settings come from a TOML file (default `./levelcast.toml`), then
//! `.env`/process environment overrides for the artifact paths and log
//! level. A missing file is not an error: every field has a default that
//! points at the conventional `./product/` artifact directory.
//!
//! # Environment injection
//! `apply_overrides` takes the variable lookup as a closure instead of
//! reading `std::env` directly, so override behaviour is tested without
//! touching the process environment.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::logging::LogLevel;
use crate::lstm::Architecture;
use crate::model::DISPLAY_PRECISION;

pub const DEFAULT_CONFIG_PATH: &str = "./levelcast.toml";

pub const ENV_WEIGHTS: &str = "LEVELCAST_WEIGHTS";
pub const ENV_FEATURE_SCALER: &str = "LEVELCAST_FEATURE_SCALER";
pub const ENV_TARGET_SCALER: &str = "LEVELCAST_TARGET_SCALER";
pub const ENV_LOG_LEVEL: &str = "LEVELCAST_LOG_LEVEL";

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// The config file exists but could not be read.
    Io(String),
    /// The config file is not valid TOML for this schema.
    Parse(String),
    /// Values parse but are unusable.
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(msg) => write!(f, "Config I/O error: {}", msg),
            ConfigError::Parse(msg) => write!(f, "Config parse error: {}", msg),
            ConfigError::Invalid(msg) => write!(f, "Invalid config: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

/// Locations of the three startup artifacts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArtifactPaths {
    pub weights: PathBuf,
    pub feature_scaler: PathBuf,
    pub target_scaler: PathBuf,
}

impl Default for ArtifactPaths {
    fn default() -> Self {
        Self {
            weights: PathBuf::from("./product/best_lstm_model.lcw"),
            feature_scaler: PathBuf::from("./product/scaler_features.json"),
            target_scaler: PathBuf::from("./product/scaler_target.json"),
        }
    }
}

/// Network dimensions. Must match the trained weights.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSection {
    pub input_size: usize,
    pub hidden_size: usize,
    pub num_layers: usize,
    /// Training-time dropout. Recorded for reference; inference never
    /// applies it.
    pub dropout: f32,
}

impl Default for ModelSection {
    fn default() -> Self {
        let arch = Architecture::REFERENCE;
        Self {
            input_size: arch.input_size,
            hidden_size: arch.hidden_size,
            num_layers: arch.num_layers,
            dropout: 0.3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputSection {
    /// Decimal digits in the display value.
    pub display_precision: u32,
}

impl Default for OutputSection {
    fn default() -> Self {
        Self {
            display_precision: DISPLAY_PRECISION,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    pub level: String,
    pub file: Option<String>,
    pub timestamps: bool,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
            timestamps: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub artifacts: ArtifactPaths,
    pub model: ModelSection,
    pub output: OutputSection,
    pub logging: LoggingSection,
}

impl ServiceConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: ServiceConfig =
            toml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Loads `path`, falling back to defaults when the file does not exist.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&text)
    }

    /// Loads `path`, then applies `.env` and process environment overrides.
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();
        let mut config = Self::load(path)?;
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Replaces artifact paths and log level with any values `lookup`
    /// returns. Empty values are ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get(ENV_WEIGHTS) {
            self.artifacts.weights = PathBuf::from(v);
        }
        if let Some(v) = get(ENV_FEATURE_SCALER) {
            self.artifacts.feature_scaler = PathBuf::from(v);
        }
        if let Some(v) = get(ENV_TARGET_SCALER) {
            self.artifacts.target_scaler = PathBuf::from(v);
        }
        if let Some(v) = get(ENV_LOG_LEVEL) {
            self.logging.level = v;
        }
    }

    /// Rejects architectures other than the trained one, out-of-range
    /// dropout, and unknown log levels.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let arch = self.architecture();
        if arch != Architecture::REFERENCE {
            let r = Architecture::REFERENCE;
            return Err(ConfigError::Invalid(format!(
                "model must be input_size={}, hidden_size={}, num_layers={} (got {}, {}, {})",
                r.input_size,
                r.hidden_size,
                r.num_layers,
                arch.input_size,
                arch.hidden_size,
                arch.num_layers
            )));
        }
        if !(0.0..1.0).contains(&self.model.dropout) {
            return Err(ConfigError::Invalid(format!(
                "dropout must be in [0, 1), got {}",
                self.model.dropout
            )));
        }
        if self.output.display_precision > 10 {
            return Err(ConfigError::Invalid(format!(
                "display_precision must be at most 10, got {}",
                self.output.display_precision
            )));
        }
        self.log_level()?;
        Ok(())
    }

    pub fn architecture(&self) -> Architecture {
        Architecture {
            input_size: self.model.input_size,
            hidden_size: self.model.hidden_size,
            num_layers: self.model.num_layers,
            output_size: Architecture::REFERENCE.output_size,
        }
    }

    pub fn log_level(&self) -> Result<LogLevel, ConfigError> {
        self.logging.level.parse().map_err(ConfigError::Invalid)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
