// Error types for the MEA spike pipeline
//
// Configuration and engine lifecycle failures are typed with numeric codes so
// the CLI and any embedding host can report them consistently. Data-path
// conditions (overflow, degenerate blocks, rejected spikes) are not errors;
// they are counted in cycle reports and telemetry.

mod config;
mod engine;

pub use config::{log_config_error, ConfigError, ConfigErrorCodes};
pub use engine::{log_engine_error, EngineError, EngineErrorCodes};

/// Error codes for structured error reporting
///
/// This trait provides a standard way to get error codes and messages
/// from custom error types.
pub trait ErrorCode {
    /// Get the numeric error code
    fn code(&self) -> i32;

    /// Get the human-readable error message
    fn message(&self) -> String;
}
