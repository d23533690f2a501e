use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::devices::registers::RegisterType;

/// Period between two power readings in run mode.
pub const POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Process-wide settings, built once at startup and never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub inverter: InverterConfig,
    pub meter: MeterConfig,
    pub max_power_watts: u32,        // inverter rated output, maps to full deflection
    pub calibration_levels: Vec<u8>, // commanded levels in percent
    pub calibration_file: PathBuf,
    pub max_backoff_secs: u64,       // cap for the retry delay after faults
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InverterConfig {
    pub host: String,
    pub port: u16, // Modbus must be enabled in the inverter settings
    pub unit_id: u8,
    pub timeout_ms: u64,
    pub power_register: RegisterConfig,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RegisterConfig {
    pub address: u16,
    pub data_type: RegisterType,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MeterConfig {
    pub gpio_pin: u8,
    pub pwm_frequency_hz: f64,
    pub full_scale: f64, // dial value at full deflection
}

impl Default for Config {
    fn default() -> Self {
        Self {
            inverter: InverterConfig::default(),
            meter: MeterConfig::default(),
            max_power_watts: 5760,
            calibration_levels: vec![0, 25, 50, 75, 100],
            calibration_file: PathBuf::from("calibration.json"),
            max_backoff_secs: 30,
        }
    }
}

impl Default for InverterConfig {
    fn default() -> Self {
        Self {
            host: "192.168.0.160".to_string(),
            port: 502,
            unit_id: 1,
            timeout_ms: 3000,
            // Instantaneous active power, INT32 watts
            power_register: RegisterConfig {
                address: 30775,
                data_type: RegisterType::I32,
            },
        }
    }
}

impl Default for MeterConfig {
    fn default() -> Self {
        Self {
            gpio_pin: 23,
            pwm_frequency_hz: 100.0,
            full_scale: 100.0,
        }
    }
}

impl Config {
    /// Load settings from a JSON file. Fields missing from the file keep
    /// their compiled-in defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        info!("Loading configuration from {}", path.display());
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Config = serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_power_watts == 0 {
            return Err(ConfigError::Invalid("max_power_watts must be positive".into()));
        }
        if !(self.meter.full_scale.is_finite() && self.meter.full_scale > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "meter.full_scale must be a positive number, got {}",
                self.meter.full_scale
            )));
        }
        if !(self.meter.pwm_frequency_hz.is_finite() && self.meter.pwm_frequency_hz > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "meter.pwm_frequency_hz must be a positive number, got {}",
                self.meter.pwm_frequency_hz
            )));
        }
        if self.calibration_levels.len() < 2 {
            return Err(ConfigError::Invalid(
                "calibration_levels needs at least two levels".into(),
            ));
        }
        if let Some(level) = self.calibration_levels.iter().find(|&&l| l > 100) {
            return Err(ConfigError::Invalid(format!(
                "calibration level {}% is above 100%",
                level
            )));
        }
        if self.calibration_levels.windows(2).any(|w| w[0] >= w[1]) {
            return Err(ConfigError::Invalid(
                "calibration_levels must be strictly ascending".into(),
            ));
        }
        if self.max_backoff_secs == 0 {
            return Err(ConfigError::Invalid("max_backoff_secs must be positive".into()));
        }
        Ok(())
    }

    pub fn inverter_timeout(&self) -> Duration {
        Duration::from_millis(self.inverter.timeout_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_secs(self.max_backoff_secs)
    }
}
