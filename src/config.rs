//! # Configuration Module
//!
//! Handles loading and validating configuration from TOML files.
//!
//! ```toml
//! [general]
//! input_device = "/dev/input/event3"
//! destination = "192.168.42.1:777"
//! grab_device = true
//! output_format = "ardupilot-udp-simple"
//! update_interval_ms = 10
//! ```
//!
//! Every key is optional. Command-line arguments override the file.

use serde::de::Error;
use serde::Deserialize;
use std::fs;
use std::io;
use std::path::Path;
use std::time::Duration;

use tracing::debug;

use crate::error::{DemaRcError, Result};
use crate::telemetry::WireFormat;

/// Configuration file read when `-c/--config` is not given.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/dema-rc/dema-rc.toml";

/// Main configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,
}

/// `[general]` table
#[derive(Debug, Deserialize, Clone)]
pub struct GeneralConfig {
    /// Device path; scanned for when absent
    #[serde(default)]
    pub input_device: Option<String>,

    /// `host[:port]` telemetry destination
    #[serde(default)]
    pub destination: Option<String>,

    #[serde(default = "default_grab_device")]
    pub grab_device: bool,

    #[serde(default = "default_output_format")]
    pub output_format: String,

    #[serde(default = "default_update_interval_ms")]
    pub update_interval_ms: u64,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            input_device: None,
            destination: None,
            grab_device: default_grab_device(),
            output_format: default_output_format(),
            update_interval_ms: default_update_interval_ms(),
        }
    }
}

// Default value functions
fn default_grab_device() -> bool { true }
fn default_output_format() -> String { WireFormat::Simple.name().to_string() }
fn default_update_interval_ms() -> u64 { 10 }

fn invalid(msg: impl std::fmt::Display) -> DemaRcError {
    DemaRcError::Config(toml::de::Error::custom(msg))
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - File cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use dema_rc::config::Config;
    ///
    /// let config = Config::load("/etc/dema-rc/dema-rc.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Load from `path`, or from [`DEFAULT_CONFIG_PATH`] if `None`
    ///
    /// A missing file at the default path yields the defaults; a missing
    /// file at an explicit path is an error.
    ///
    /// # Errors
    ///
    /// Same as [`Config::load`].
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => match Self::load(DEFAULT_CONFIG_PATH) {
                Err(DemaRcError::Io(e)) if e.kind() == io::ErrorKind::NotFound => {
                    debug!("No configuration at {}, using defaults", DEFAULT_CONFIG_PATH);
                    Ok(Self::default())
                }
                other => other,
            },
        }
    }

    /// Parse and validate TOML text
    ///
    /// # Errors
    ///
    /// Returns `Config` on syntax or validation errors.
    pub fn parse(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Selected wire format
    ///
    /// # Errors
    ///
    /// Returns `Config` if `output_format` names no known format.
    pub fn wire_format(&self) -> Result<WireFormat> {
        self.general
            .output_format
            .parse()
            .map_err(|_| invalid(format!("unknown output_format '{}'", self.general.output_format)))
    }

    /// Telemetry timer interval
    #[must_use]
    pub fn update_interval(&self) -> Duration {
        Duration::from_millis(self.general.update_interval_ms)
    }

    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns error if any configuration value is out of valid range
    fn validate(&self) -> Result<()> {
        if matches!(&self.general.input_device, Some(path) if path.is_empty()) {
            return Err(invalid("input_device cannot be empty"));
        }

        if matches!(&self.general.destination, Some(dest) if dest.is_empty()) {
            return Err(invalid("destination cannot be empty"));
        }

        if self.general.update_interval_ms == 0 || self.general.update_interval_ms > 1000 {
            return Err(invalid("update_interval_ms must be between 1 and 1000"));
        }

        self.wire_format()?;

        Ok(())
    }
}
