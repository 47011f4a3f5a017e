//! Driver configuration using Figment
//!
//! Configuration is loaded from:
//! 1. a TOML file (default `config/prevac.toml`)
//! 2. environment variables prefixed with `PREVAC_`, nested keys separated
//!    by a double underscore
//!
//! ```text
//! PREVAC_APPLICATION__LOG_LEVEL=debug
//! PREVAC_PORT__PATH=/dev/ttyUSB1
//! PREVAC_TMC13__CHANNEL=2
//! ```
//!
//! The driver sections (`[tm1x]`, `[tmc13]`, `[shutter]`) are turned into
//! the same GUI parameter set the host would hand over, so the command line
//! tool and a host exercise one code path.
//!
//! # Example
//!
//! ```no_run
//! use prevac_tm::config::DriverConfig;
//!
//! let config = DriverConfig::load_from("config/prevac.toml")?;
//! println!("Port: {}", config.port.path);
//! # Ok::<(), prevac_tm::config::ConfigError>(())
//! ```

use crate::core::GuiParameters;
use crate::instrument::tm1x::{SampleRate, Tm1xModel};
use crate::protocol::v1::Tm1xAddress;
use crate::protocol::ChecksumPolicy;
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The TOML file or an environment variable could not be read.
    #[error("Configuration load error: {0}")]
    LoadError(#[from] Box<figment::Error>),
    /// A value was read but is out of range.
    #[error("Configuration validation error: {0}")]
    ValidationError(String),
}

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverConfig {
    /// Application name and log level.
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Serial port shared by all drivers.
    pub port: PortConfig,
    /// TM13/TM14 logger, if present.
    #[serde(default)]
    pub tm1x: Option<Tm1xConfig>,
    /// TMC13 thickness logger, if present.
    #[serde(default)]
    pub tmc13: Option<Tmc13Config>,
    /// TMC13 shutter switch, if present.
    #[serde(default)]
    pub shutter: Option<ShutterConfig>,
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Name shown in the startup log line.
    #[serde(default = "default_name")]
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            log_level: default_log_level(),
        }
    }
}

/// Serial port settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortConfig {
    /// Serial port (e.g., "/dev/ttyUSB0", "COM3")
    pub path: String,
    /// Baud rate, 57600 for both device families.
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// Read timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

/// TM13/TM14 settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tm1xConfig {
    /// "TM13" or "TM14"
    #[serde(default = "default_tm1x_model")]
    pub model: String,
    /// 10, 4, 2, 1 or 0.5; TM13 always samples at 4 Hz
    #[serde(default = "default_sample_rate")]
    pub sample_rate_hz: f64,
    /// Routing bytes of the monitor.
    #[serde(default)]
    pub address: Tm1xAddress,
    /// Film density in g/cm³
    #[serde(default = "default_density")]
    pub density: f64,
    /// Acoustic impedance ratio
    #[serde(default = "default_impedance")]
    pub impedance_ratio: f64,
    /// Tooling factor in percent
    #[serde(default = "default_tooling")]
    pub tooling_factor: f64,
    /// Wait after an address change before looking for the answer
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
    /// Wait per logic group during the group scan
    #[serde(default = "default_scan_timeout_ms")]
    pub scan_timeout_ms: u64,
    /// Default handling of response checksum mismatches
    #[serde(default = "default_tm1x_checksum")]
    pub checksum: ChecksumPolicy,
    /// Per-command overrides keyed by command name
    /// ("frequency", "product_number", "serial_number", "no_operation")
    #[serde(default)]
    pub checksum_overrides: BTreeMap<String, ChecksumPolicy>,
}

/// TMC13 thickness logger settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tmc13Config {
    /// Thickness channel 1-6
    #[serde(default = "default_channel")]
    pub channel: u8,
    /// Unique ID used for host registration
    #[serde(default = "default_host_id")]
    pub host_id: String,
    /// Zero the thickness reading on configure.
    #[serde(default)]
    pub reset_thickness: bool,
    /// Tooling factor in percent, written on configure when set
    #[serde(default)]
    pub tooling_factor: Option<f64>,
    /// Density in g/cm³, written on configure when set
    #[serde(default)]
    pub density: Option<f64>,
    /// Acoustic impedance in 1e5 g/cm²/s, written on configure when set
    #[serde(default)]
    pub acoustic_impedance: Option<f64>,
}

/// TMC13 shutter switch settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShutterConfig {
    /// Shutter channel 1-6.
    #[serde(default = "default_channel")]
    pub channel: u8,
    /// Unique ID used for host registration.
    #[serde(default = "default_host_id")]
    pub host_id: String,
    /// "As is", "Open" or "Closed"
    #[serde(default = "default_shutter_state")]
    pub start_state: String,
    /// "As is", "Open" or "Closed"
    #[serde(default = "default_shutter_state")]
    pub end_state: String,
}

// ============================================================================
// Default value functions
// ============================================================================

fn default_name() -> String {
    "PREVAC logger".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_baud_rate() -> u32 {
    57600
}

fn default_timeout_ms() -> u64 {
    1000
}

fn default_tm1x_model() -> String {
    "TM13".to_string()
}

fn default_sample_rate() -> f64 {
    4.0
}

fn default_density() -> f64 {
    1.3
}

fn default_impedance() -> f64 {
    1.0
}

fn default_tooling() -> f64 {
    100.0
}

fn default_settle_delay_ms() -> u64 {
    500
}

fn default_scan_timeout_ms() -> u64 {
    100
}

fn default_tm1x_checksum() -> ChecksumPolicy {
    ChecksumPolicy::Lenient
}

fn default_channel() -> u8 {
    1
}

fn default_host_id() -> String {
    "PrevacRs".to_string()
}

fn default_shutter_state() -> String {
    "As is".to_string()
}

// ============================================================================
// Configuration Loading and Validation
// ============================================================================

impl DriverConfig {
    /// Load configuration from `config/prevac.toml` and the environment.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config/prevac.toml")
    }

    /// Load configuration from a specific file path
    ///
    /// # Errors
    ///
    /// Returns a ConfigError if the file cannot be loaded or is invalid.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config: Self = Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("PREVAC_").split("__"))
            .extract()
            .map_err(|e| ConfigError::LoadError(Box::new(e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration after loading
    ///
    /// Checks:
    /// - Log level is valid (trace, debug, info, warn, error)
    /// - Port path is set and baud rate is non-zero
    /// - At least one driver section is present
    /// - Driver sections hold values their drivers accept
    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        if self.port.path.is_empty() {
            return Err(ConfigError::ValidationError(
                "'port.path' cannot be empty".to_string(),
            ));
        }
        if self.port.baud_rate == 0 {
            return Err(ConfigError::ValidationError(
                "'port.baud_rate' must be > 0".to_string(),
            ));
        }

        if self.tm1x.is_none() && self.tmc13.is_none() && self.shutter.is_none() {
            return Err(ConfigError::ValidationError(
                "No driver configured. Add a [tm1x], [tmc13] or [shutter] section".to_string(),
            ));
        }

        if let Some(tm1x) = &self.tm1x {
            tm1x.validate()?;
        }
        if let Some(tmc13) = &self.tmc13 {
            tmc13.validate()?;
        }
        if let Some(shutter) = &self.shutter {
            shutter.validate()?;
        }

        Ok(())
    }
}

fn validate_positive(section: &str, field: &str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::ValidationError(format!(
            "'{}.{}' must be a positive number, got {}",
            section, field, value
        )))
    }
}

fn validate_channel(section: &str, channel: u8) -> Result<(), ConfigError> {
    if (1..=6).contains(&channel) {
        Ok(())
    } else {
        Err(ConfigError::ValidationError(format!(
            "'{}.channel' must be 1-6, got {}",
            section, channel
        )))
    }
}

impl Tm1xConfig {
    /// Check model, sample rate and calibration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let model: Tm1xModel = self
            .model
            .parse()
            .map_err(|e: crate::error::DaqError| ConfigError::ValidationError(e.to_string()))?;
        if model == Tm1xModel::Tm14 {
            SampleRate::from_hz(self.sample_rate_hz)
                .map_err(|e| ConfigError::ValidationError(e.to_string()))?;
        }
        validate_positive("tm1x", "density", self.density)?;
        validate_positive("tm1x", "impedance_ratio", self.impedance_ratio)?;
        validate_positive("tm1x", "tooling_factor", self.tooling_factor)
    }

    /// GUI parameters equivalent to this section.
    pub fn gui_parameters(&self) -> GuiParameters {
        let mut parameters = GuiParameters::new();
        parameters
            .insert("Device", self.model.as_str())
            .insert("Sample rate in Hz", self.sample_rate_hz)
            .insert("Density in g/cm^3", self.density)
            .insert("Acoustic impedance ratio", self.impedance_ratio)
            .insert("Tooling in %", self.tooling_factor);
        parameters
    }
}

impl Tmc13Config {
    /// Check channel and any material values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_channel("tmc13", self.channel)?;
        if let Some(tooling) = self.tooling_factor {
            validate_positive("tmc13", "tooling_factor", tooling)?;
        }
        if let Some(density) = self.density {
            validate_positive("tmc13", "density", density)?;
        }
        if let Some(impedance) = self.acoustic_impedance {
            validate_positive("tmc13", "acoustic_impedance", impedance)?;
        }
        Ok(())
    }

    /// GUI parameters equivalent to this section.
    pub fn gui_parameters(&self) -> GuiParameters {
        let mut parameters = GuiParameters::new();
        parameters
            .insert("Channel", self.channel.to_string())
            .insert("Reset thickness", self.reset_thickness)
            .insert("Set Tooling", self.tooling_factor.is_some())
            .insert("Tooling in %", self.tooling_factor.unwrap_or(100.0).to_string())
            .insert("Set Density", self.density.is_some())
            .insert("Density in g/cm^3", self.density.unwrap_or(1.3).to_string())
            .insert("Set Acoustic Impedance", self.acoustic_impedance.is_some())
            .insert(
                "Acoustic impedance in 1e5 g/cm²/s",
                self.acoustic_impedance.unwrap_or(1.0),
            );
        parameters
    }
}

impl ShutterConfig {
    /// Check channel and target states.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_channel("shutter", self.channel)?;
        let valid_states = ["As is", "Open", "Closed"];
        for (field, state) in [("start_state", &self.start_state), ("end_state", &self.end_state)] {
            if !valid_states.contains(&state.as_str()) {
                return Err(ConfigError::ValidationError(format!(
                    "Invalid shutter.{} '{}'. Must be one of: {}",
                    field,
                    state,
                    valid_states.join(", ")
                )));
            }
        }
        Ok(())
    }

    /// GUI parameters equivalent to this section.
    pub fn gui_parameters(&self) -> GuiParameters {
        let mut parameters = GuiParameters::new();
        parameters
            .insert("Channel", self.channel.to_string())
            .insert("SweepMode", "State")
            .insert("State at start", self.start_state.as_str())
            .insert("State at end", self.end_state.as_str());
        parameters
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn base_config() -> DriverConfig {
        DriverConfig {
            application: ApplicationConfig::default(),
            port: PortConfig {
                path: "/dev/ttyUSB0".to_string(),
                baud_rate: 57600,
                timeout_ms: 1000,
            },
            tm1x: None,
            tmc13: Some(Tmc13Config {
                channel: 1,
                host_id: default_host_id(),
                reset_thickness: false,
                tooling_factor: None,
                density: Some(2.7),
                acoustic_impedance: None,
            }),
            shutter: None,
        }
    }

    #[test]
    fn test_config_validation_valid() {
        assert!(base_config().validate().is_ok());
    }

    #[test]
    fn test_invalid_log_level() {
        let mut config = base_config();
        config.application.log_level = "loud".to_string();
        let result = config.validate();
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("Invalid log_level"));
    }

    #[test]
    fn test_missing_driver_section() {
        let mut config = base_config();
        config.tmc13 = None;
        assert!(config
            .validate()
            .unwrap_err()
            .to_string()
            .contains("No driver configured"));
    }

    #[test]
    fn test_channel_out_of_range() {
        let mut config = base_config();
        if let Some(tmc13) = config.tmc13.as_mut() {
            tmc13.channel = 7;
        }
        assert!(config
            .validate()
            .unwrap_err()
            .to_string()
            .contains("tmc13.channel"));
    }

    #[test]
    fn test_negative_density_rejected() {
        let mut config = base_config();
        if let Some(tmc13) = config.tmc13.as_mut() {
            tmc13.density = Some(-1.0);
        }
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_tm14_sample_rate_checked() {
        let mut tm1x = Tm1xConfig {
            model: "TM14".to_string(),
            sample_rate_hz: 3.0,
            address: Tm1xAddress::default(),
            density: 1.0,
            impedance_ratio: 1.0,
            tooling_factor: 100.0,
            settle_delay_ms: 0,
            scan_timeout_ms: 0,
            checksum: ChecksumPolicy::Lenient,
            checksum_overrides: BTreeMap::new(),
        };
        assert!(tm1x.validate().is_err());
        tm1x.sample_rate_hz = 0.5;
        assert!(tm1x.validate().is_ok());
        tm1x.model = "TM15".to_string();
        assert!(tm1x.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
[application]
log_level = "debug"

[port]
path = "COM3"

[tm1x]
model = "TM14"
sample_rate_hz = 10.0
checksum = "strict"

[tm1x.address]
device_address = 1
device_group = 161
logic_group = 37
driver_address = 1

[tm1x.checksum_overrides]
product_number = "ignore"
"#
        )
        .unwrap();

        let config = DriverConfig::load_from(file.path()).unwrap();
        assert_eq!(config.port.path, "COM3");
        assert_eq!(config.port.baud_rate, 57600);
        let tm1x = config.tm1x.unwrap();
        assert_eq!(tm1x.address.logic_group, 37);
        assert_eq!(tm1x.checksum, ChecksumPolicy::Strict);
        assert_eq!(
            tm1x.checksum_overrides.get("product_number"),
            Some(&ChecksumPolicy::Ignore)
        );
        assert_eq!(tm1x.tooling_factor, 100.0);
    }

    #[test]
    fn test_gui_parameters_from_tmc13_section() {
        let config = base_config();
        let parameters = config.tmc13.unwrap().gui_parameters();
        assert_eq!(parameters.i64("Channel").unwrap(), 1);
        assert!(parameters.bool("Set Density").unwrap());
        assert_eq!(parameters.f64("Density in g/cm^3").unwrap(), 2.7);
        assert!(!parameters.bool("Set Tooling").unwrap());
    }
}
