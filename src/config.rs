//! Configuration system using Figment.
//!
//! Configuration is loaded from:
//! 1. a TOML file (base configuration, every key optional)
//! 2. environment variables prefixed with `SLOGIC_`
//!
//! # Example
//! ```no_run
//! use daq_driver_slogic::config::SlogicConfig;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = SlogicConfig::load_from("config/slogic.toml")?;
//! config.validate()?;
//! println!("Pool capacity: {}", config.acquisition.pool_capacity);
//! # Ok(())
//! # }
//! ```

use std::path::Path;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SlogicError};
use crate::model::{DeviceSettings, ModelKind, PatternMode};

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SlogicConfig {
    /// Streaming engine tuning
    pub acquisition: AcquisitionConfig,
    /// Device selection and sampling settings
    pub device: DeviceConfig,
    /// Log output
    pub logging: LoggingConfig,
}

/// Streaming engine tuning knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionConfig {
    /// Nominal time covered by one bulk request before probing
    pub planning_duration_ms: u64,
    /// Fractional margin on the per-request duration for timeouts and stall detection
    pub tolerance: f64,
    /// Transfer granularity; payloads are multiples of this (power of two)
    pub block_size: usize,
    /// The probe never goes below this payload
    pub min_payload_bytes: usize,
    /// Maximum number of concurrently outstanding requests
    pub pool_capacity: usize,
    /// How long the probe waits for its cancelled request to come back
    pub probe_drain_timeout_ms: u64,
    /// Per-round wait when a failed start drains its cancelled requests
    pub teardown_poll_ms: u64,
    /// Top the pool up again on every streaming tick
    pub refill_on_tick: bool,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            planning_duration_ms: 125,
            tolerance: 0.3,
            block_size: 32 * 1024,
            min_payload_bytes: 32 * 1024,
            pool_capacity: 16,
            probe_drain_timeout_ms: 3000,
            teardown_poll_ms: 10,
            refill_on_tick: true,
        }
    }
}

impl AcquisitionConfig {
    /// Validate engine tuning values.
    pub fn validate(&self) -> Result<()> {
        if self.planning_duration_ms == 0 {
            return Err(SlogicError::invalid_config(
                "planning_duration_ms must be greater than 0",
            ));
        }
        if !self.tolerance.is_finite() || self.tolerance < 0.0 {
            return Err(SlogicError::invalid_config(format!(
                "tolerance must be a non-negative number, got {}",
                self.tolerance
            )));
        }
        if !self.block_size.is_power_of_two() {
            return Err(SlogicError::invalid_config(format!(
                "block_size must be a power of two, got {}",
                self.block_size
            )));
        }
        if self.min_payload_bytes == 0 || self.min_payload_bytes % self.block_size != 0 {
            return Err(SlogicError::invalid_config(format!(
                "min_payload_bytes ({}) must be a non-zero multiple of block_size ({})",
                self.min_payload_bytes, self.block_size
            )));
        }
        if self.pool_capacity == 0 {
            return Err(SlogicError::invalid_config(
                "pool_capacity must be greater than 0",
            ));
        }
        Ok(())
    }

    /// Probe drain timeout as a [`Duration`].
    pub fn probe_drain_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_drain_timeout_ms)
    }

    /// Teardown poll interval as a [`Duration`].
    pub fn teardown_poll(&self) -> Duration {
        Duration::from_millis(self.teardown_poll_ms)
    }
}

/// Device selection and sampling settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Hardware variant
    pub model: ModelKind,
    /// Channel width (applied before the sample rate)
    pub channels: Option<u32>,
    /// Sample rate in Hz
    pub samplerate: Option<u64>,
    /// Number of samples to acquire
    pub limit_samples: u64,
    /// Forwarding behaviour
    pub pattern_mode: PatternMode,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            model: ModelKind::default(),
            channels: None,
            samplerate: None,
            limit_samples: 1_000_000,
            pattern_mode: PatternMode::Normal,
        }
    }
}

impl DeviceConfig {
    /// Build negotiated device settings from this configuration.
    pub fn settings(&self) -> DeviceSettings {
        let mut settings = DeviceSettings::new(self.model.model());
        if let Some(channels) = self.channels {
            settings.set_channels(channels);
        }
        if let Some(rate) = self.samplerate {
            settings.set_samplerate(rate);
        }
        settings.set_limit_samples(self.limit_samples);
        settings.set_pattern_mode(self.pattern_mode);
        settings
    }
}

/// Log output settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Logging level (trace, debug, info, warn, error)
    pub level: String,
    /// Output format (pretty, compact, json)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "compact".to_string(),
        }
    }
}

impl SlogicConfig {
    /// Load configuration from a specific file path merged with `SLOGIC_` env vars.
    ///
    /// Missing keys fall back to defaults; a missing file is not an error.
    /// Example override: `SLOGIC_ACQUISITION__POOL_CAPACITY=8`.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config = Figment::from(Serialized::defaults(SlogicConfig::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("SLOGIC_").split("__"))
            .extract()?;
        Ok(config)
    }

    /// Load defaults merged with `SLOGIC_` env vars only.
    pub fn from_env() -> Result<Self> {
        let config = Figment::from(Serialized::defaults(SlogicConfig::default()))
            .merge(Env::prefixed("SLOGIC_").split("__"))
            .extract()?;
        Ok(config)
    }

    /// Validate configuration after loading.
    pub fn validate(&self) -> Result<()> {
        self.acquisition.validate()?;

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(SlogicError::invalid_config(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.logging.level,
                valid_levels.join(", ")
            )));
        }

        let valid_formats = ["pretty", "compact", "json"];
        if !valid_formats.contains(&self.logging.format.to_lowercase().as_str()) {
            return Err(SlogicError::invalid_config(format!(
                "Invalid log format '{}'. Must be one of: {}",
                self.logging.format,
                valid_formats.join(", ")
            )));
        }

        Ok(())
    }

    /// Render the effective configuration as TOML.
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| SlogicError::invalid_config(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_validate() {
        let config = SlogicConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.acquisition.planning_duration_ms, 125);
        assert_eq!(config.acquisition.block_size, 32 * 1024);
    }

    #[test]
    fn test_block_size_must_be_power_of_two() {
        let config = AcquisitionConfig {
            block_size: 3000,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_floor_must_align_to_block() {
        let config = AcquisitionConfig {
            min_payload_bytes: 48 * 1024,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = AcquisitionConfig {
            min_payload_bytes: 64 * 1024,
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_log_level() {
        let mut config = SlogicConfig::default();
        config.logging.level = "loud".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[acquisition]
pool_capacity = 4
tolerance = 0.5

[device]
model = "lite8"
channels = 4
samplerate = 80000000
limit_samples = 2048
"#
        )
        .unwrap();

        let config = SlogicConfig::load_from(file.path()).unwrap();
        assert_eq!(config.acquisition.pool_capacity, 4);
        assert_eq!(config.acquisition.tolerance, 0.5);
        // Untouched keys keep their defaults
        assert_eq!(config.acquisition.planning_duration_ms, 125);

        let settings = config.device.settings();
        assert_eq!(settings.model().name, "SLogic Lite 8");
        assert_eq!(settings.channels(), 4);
        assert_eq!(settings.samplerate(), 80_000_000);
        assert_eq!(settings.limit_samples(), 2048);
    }

    #[test]
    fn test_shipped_config_is_valid() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("config/slogic.toml");
        let config = SlogicConfig::load_from(path).unwrap();
        config.validate().unwrap();

        let settings = config.device.settings();
        assert_eq!(settings.channels(), 8);
        assert_eq!(settings.samplerate(), 400_000_000);
    }

    #[test]
    fn test_toml_round_trip_renders() {
        let rendered = SlogicConfig::default().to_toml_string().unwrap();
        assert!(rendered.contains("[acquisition]"));
        assert!(rendered.contains("pool_capacity"));
    }
}
