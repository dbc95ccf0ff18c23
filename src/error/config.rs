// Configuration error types and constants

use crate::error::ErrorCode;
use log::error;
use std::fmt;

/// Configuration error code constants
///
/// Error code range: 1001-1006
pub struct ConfigErrorCodes {}

impl ConfigErrorCodes {
    /// Configuration file could not be read
    pub const READ_FAILED: i32 = 1001;

    /// Configuration JSON could not be parsed
    pub const PARSE_FAILED: i32 = 1002;

    /// A numeric parameter is outside its valid range
    pub const OUT_OF_RANGE: i32 = 1003;

    /// Minimum spike width exceeds maximum spike width
    pub const WIDTH_BOUNDS_INVERTED: i32 = 1004;

    /// Acquisition source shape does not match the configuration
    pub const CHANNEL_MISMATCH: i32 = 1005;

    /// Source sample period does not match the configured sampling frequency
    pub const PERIOD_MISMATCH: i32 = 1006;
}

/// Log a configuration error with structured context
///
/// The logging is non-blocking and will not panic on failure.
pub fn log_config_error(err: &ConfigError, context: &str) {
    error!(
        "Config error in {}: code={}, component=AppConfig, message={}",
        context,
        err.code(),
        err.message()
    );
}

/// Configuration-related errors
///
/// Error code range: 1001-1006
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// Reading the configuration file failed
    ReadFailed { path: String, reason: String },

    /// The configuration file is not valid JSON for `AppConfig`
    ParseFailed { reason: String },

    /// A parameter is outside its valid range
    OutOfRange { field: &'static str, value: f64 },

    /// `min_spike_width_ms` is larger than `max_spike_width_ms`
    WidthBoundsInverted { min_ms: f64, max_ms: f64 },

    /// The source provides a different number of channels than configured
    ChannelMismatch { expected: usize, actual: usize },

    /// The source sample period disagrees with the sampling frequency
    PeriodMismatch { expected_hz: f64, actual_hz: f64 },
}

impl ErrorCode for ConfigError {
    fn code(&self) -> i32 {
        match self {
            ConfigError::ReadFailed { .. } => ConfigErrorCodes::READ_FAILED,
            ConfigError::ParseFailed { .. } => ConfigErrorCodes::PARSE_FAILED,
            ConfigError::OutOfRange { .. } => ConfigErrorCodes::OUT_OF_RANGE,
            ConfigError::WidthBoundsInverted { .. } => ConfigErrorCodes::WIDTH_BOUNDS_INVERTED,
            ConfigError::ChannelMismatch { .. } => ConfigErrorCodes::CHANNEL_MISMATCH,
            ConfigError::PeriodMismatch { .. } => ConfigErrorCodes::PERIOD_MISMATCH,
        }
    }

    fn message(&self) -> String {
        match self {
            ConfigError::ReadFailed { path, reason } => {
                format!("Failed to read config file {}: {}", path, reason)
            }
            ConfigError::ParseFailed { reason } => {
                format!("Failed to parse config JSON: {}", reason)
            }
            ConfigError::OutOfRange { field, value } => {
                format!("Parameter {} out of range (got {})", field, value)
            }
            ConfigError::WidthBoundsInverted { min_ms, max_ms } => format!(
                "Minimum spike width {} ms exceeds maximum spike width {} ms",
                min_ms, max_ms
            ),
            ConfigError::ChannelMismatch { expected, actual } => format!(
                "Source provides {} channels but {} are configured",
                actual, expected
            ),
            ConfigError::PeriodMismatch {
                expected_hz,
                actual_hz,
            } => format!(
                "Source samples at {} Hz but sampling frequency is configured as {} Hz",
                actual_hz, expected_hz
            ),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ConfigError::{:?} (code {}): {}",
            self,
            self.code(),
            self.message()
        )
    }
}

impl std::error::Error for ConfigError {}

impl From<serde_json::Error> for ConfigError {
    fn from(err: serde_json::Error) -> Self {
        ConfigError::ParseFailed {
            reason: err.to_string(),
        }
    }
}
