//! # Error Types
//!
//! Custom error types for dema-rc using `thiserror`.

use std::path::PathBuf;

use thiserror::Error;

/// Main error type for dema-rc
#[derive(Debug, Error)]
pub enum DemaRcError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// Command-line usage errors
    #[error("Invalid arguments: {0}")]
    Args(String),

    /// The input device could not be opened
    #[error("Can't open {}: {source}", path.display())]
    DeviceOpen {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// No usable controller was found while scanning /dev/input
    #[error("No supported controller found")]
    ControllerNotFound,

    /// The device does not report absolute axis events
    #[error("Unsupported device {0}: EV_ABS events are not supported")]
    UnsupportedDevice(String),

    /// The device lacks some of the axes the controller profile needs
    #[error("Not all required axes supported by this input ({found} of {required})")]
    InsufficientAxes { found: usize, required: usize },

    /// Telemetry destination could not be parsed or resolved
    #[error("Could not parse address {0}")]
    InvalidDestination(String),

    /// No reactor source is registered under the given key
    #[error("Source not found: {0}")]
    SourceNotFound(u64),

    /// Timer interval that would leave the timer disarmed
    #[error("Invalid timer interval: {0:?}")]
    InvalidInterval(std::time::Duration),

    /// System call errors
    #[error("System error: {0}")]
    Sys(#[from] nix::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for dema-rc
pub type Result<T> = std::result::Result<T, DemaRcError>;
