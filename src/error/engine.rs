// Engine lifecycle error types and constants

use crate::error::ErrorCode;
use log::error;
use std::fmt;

use super::ConfigError;

/// Engine error code constants
///
/// Error code range: 2001-2006
pub struct EngineErrorCodes {}

impl EngineErrorCodes {
    /// Engine is already running
    pub const ALREADY_RUNNING: i32 = 2001;

    /// Engine is not running
    pub const NOT_RUNNING: i32 = 2002;

    /// Configuration rejected while starting or patching the engine
    pub const INVALID_CONFIG: i32 = 2003;

    /// Acquisition source could not be opened or read
    pub const SOURCE_FAILED: i32 = 2004;

    /// A worker thread could not be spawned or panicked
    pub const THREAD_FAILED: i32 = 2005;

    /// Parameter patch queue is full or closed
    pub const COMMAND_QUEUE_FAILED: i32 = 2006;
}

/// Log an engine error with structured context
///
/// The logging is non-blocking and will not panic on failure.
pub fn log_engine_error(err: &EngineError, context: &str) {
    error!(
        "Engine error in {}: code={}, component=MeaEngine, message={}",
        context,
        err.code(),
        err.message()
    );
}

/// Engine lifecycle errors
///
/// Error code range: 2001-2006
#[derive(Debug, Clone, PartialEq)]
pub enum EngineError {
    /// Engine is already running
    AlreadyRunning,

    /// Engine is not running
    NotRunning,

    /// Configuration was rejected
    InvalidConfig(ConfigError),

    /// Acquisition source failure
    SourceFailed { reason: String },

    /// Worker thread failure
    ThreadFailed { thread: &'static str, reason: String },

    /// Command queue failure
    CommandQueueFailed { reason: String },
}

impl ErrorCode for EngineError {
    fn code(&self) -> i32 {
        match self {
            EngineError::AlreadyRunning => EngineErrorCodes::ALREADY_RUNNING,
            EngineError::NotRunning => EngineErrorCodes::NOT_RUNNING,
            EngineError::InvalidConfig(_) => EngineErrorCodes::INVALID_CONFIG,
            EngineError::SourceFailed { .. } => EngineErrorCodes::SOURCE_FAILED,
            EngineError::ThreadFailed { .. } => EngineErrorCodes::THREAD_FAILED,
            EngineError::CommandQueueFailed { .. } => EngineErrorCodes::COMMAND_QUEUE_FAILED,
        }
    }

    fn message(&self) -> String {
        match self {
            EngineError::AlreadyRunning => {
                "Engine already running. Call stop() first.".to_string()
            }
            EngineError::NotRunning => "Engine not running. Call start() first.".to_string(),
            EngineError::InvalidConfig(err) => {
                format!("Invalid configuration: {}", err.message())
            }
            EngineError::SourceFailed { reason } => {
                format!("Acquisition source failed: {}", reason)
            }
            EngineError::ThreadFailed { thread, reason } => {
                format!("Thread {} failed: {}", thread, reason)
            }
            EngineError::CommandQueueFailed { reason } => {
                format!("Parameter patch not queued: {}", reason)
            }
        }
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "EngineError::{:?} (code {}): {}",
            self,
            self.code(),
            self.message()
        )
    }
}

impl std::error::Error for EngineError {}

impl From<ConfigError> for EngineError {
    fn from(err: ConfigError) -> Self {
        EngineError::InvalidConfig(err)
    }
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        EngineError::SourceFailed {
            reason: err.to_string(),
        }
    }
}
