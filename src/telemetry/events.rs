//! Telemetry event types describing pipeline health for the CLI and any
//! attached subscriber.

use serde::{Deserialize, Serialize};

use crate::detection::Rejection;

/// Engine lifecycle stages
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LifecyclePhase {
    EngineStarted,
    EngineStopping,
    EngineStopped,
    ParamsApplied,
}

/// Diagnostic error codes surfaced via telemetry metrics.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticError {
    SourceFailure,
    ThreadPanic,
    CommandQueue,
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum MetricEvent {
    CycleSummary {
        cycle: u64,
        samples: usize,
        spikes: usize,
        rejected: u64,
        unterminated: usize,
        skipped_blocks: usize,
    },
    CycleLatency {
        avg_ms: f32,
        max_ms: f32,
        sample_count: usize,
    },
    SpikeRejected {
        channel: usize,
        reason: Rejection,
    },
    SamplesDropped {
        channel: usize,
        count: u64,
    },
    EventsDropped {
        count: u64,
    },
    ThresholdTrained {
        channel: usize,
        threshold: f64,
    },
    BufferOccupancy {
        channel: String,
        percent: f32,
    },
    Lifecycle {
        phase: LifecyclePhase,
        timestamp_ms: u64,
    },
    Error {
        code: DiagnosticError,
        context: String,
    },
}
