//! Camera acquisition configuration.
//!
//! Exposure and gain are fixed for the lifetime of a camera. Auto-exposure is
//! always disabled so frame timing stays deterministic for downstream
//! trackers.

use crate::device::{DeviceIdentity, MockConfig};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Configuration for camera acquisition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Fixed exposure time in milliseconds.
    pub exposure_ms: f64,
    /// Fixed gain (camera-specific units, usually dB).
    pub gain: f64,
    /// USB `vendor:product` in hex, e.g. `"2bdf:0102"`. Empty disables bus reset.
    pub bus_identity: String,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            exposure_ms: 5.0,
            gain: 10.0,
            bus_identity: String::new(),
        }
    }
}

impl CaptureConfig {
    /// Creates a configuration with the given exposure and gain.
    pub fn new(exposure_ms: f64, gain: f64, bus_identity: impl Into<String>) -> Self {
        Self {
            exposure_ms,
            gain,
            bus_identity: bus_identity.into(),
        }
    }

    /// Exposure in the device's native microsecond unit.
    #[inline]
    pub fn exposure_us(&self) -> f64 {
        self.exposure_ms * 1000.0
    }

    /// Parsed bus identity, if one is configured and well formed.
    pub fn identity(&self) -> Option<DeviceIdentity> {
        DeviceIdentity::from_config(&self.bus_identity)
    }

    /// Validates the configuration parameters.
    ///
    /// A malformed bus identity is deliberately not an error here; it only
    /// disables bus resets.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.exposure_ms.is_finite() || self.exposure_ms <= 0.0 {
            return Err(ConfigError::InvalidExposure(self.exposure_ms));
        }
        if !self.gain.is_finite() || self.gain < 0.0 {
            return Err(ConfigError::InvalidGain(self.gain));
        }
        Ok(())
    }
}

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid exposure time: {0} ms")]
    InvalidExposure(f64),
    #[error("invalid gain: {0}")]
    InvalidGain(f64),
    #[error("invalid bus identity \"{0}\" (expected hex vendor:product)")]
    InvalidBusIdentity(String),
    #[error("failed to read config file: {0}")]
    FileReadError(String),
    #[error("failed to parse config file: {0}")]
    ParseError(String),
}

/// Full configuration file format.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FileConfig {
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub mock: MockConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

/// Output configuration for the demo binary.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Number of frames to read; 0 reads until interrupted.
    pub frame_count: u64,
    /// Metrics server port (0 to disable).
    pub metrics_port: u16,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            frame_count: 200,
            metrics_port: 9090,
        }
    }
}

impl FileConfig {
    /// Loads configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::FileReadError(e.to_string()))?;
        Self::from_toml(&content)
    }

    /// Parses configuration from TOML text.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: FileConfig =
            toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.capture.validate()?;
        Ok(config)
    }
}
