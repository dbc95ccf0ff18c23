// MEA Spikes - multichannel spike detection pipeline
// Real-time voltage intake feeding a lock-free detection and event pipeline

// Module declarations
pub mod acquisition;
pub mod config;
pub mod detection;
pub mod engine;
pub mod error;
pub mod raster;
pub mod telemetry;

// Re-exports for convenience
pub use config::{AppConfig, DetectionConfig, DetectionParams, ThresholdPolarity};
pub use detection::{CycleReport, Rejection, SpikeEvent, SpikeEventReceiver};
pub use engine::{MeaEngine, OfflineRunner, ParamPatch, RunReport};
pub use error::{ConfigError, EngineError, ErrorCode};

use tracing::Level;

/// Install a stderr formatting subscriber
///
/// Safe to call more than once; later calls are ignored.
pub fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let _ = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .try_init();
}
