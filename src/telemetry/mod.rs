//! Pipeline telemetry collector and helpers.
//!
//! Every metric is folded into a [`PipelineTally`], appended to a short tail
//! of recent events and rebroadcast to subscribers. Only the detection cycle
//! and the engine publish; the real-time producer never touches telemetry.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::detection::{CycleReport, Rejection, RejectionCounts};

pub mod events;

pub use events::{DiagnosticError, LifecyclePhase, MetricEvent};

/// Global telemetry hub shared across the crate.
static HUB: Lazy<TelemetryHub> = Lazy::new(TelemetryHub::default);

/// Access the global telemetry hub.
pub fn hub() -> &'static TelemetryHub {
    &HUB
}

/// Running totals folded from every published metric
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineTally {
    pub cycles: u64,
    pub samples: u64,
    pub spikes: u64,
    pub rejections: RejectionCounts,
    pub unterminated: u64,
    pub samples_dropped: u64,
    pub events_dropped: u64,
    pub thresholds_trained: u64,
    pub errors: u64,
}

impl PipelineTally {
    fn fold(&mut self, event: &MetricEvent) {
        match event {
            MetricEvent::CycleSummary {
                samples,
                spikes,
                unterminated,
                ..
            } => {
                self.cycles += 1;
                self.samples += *samples as u64;
                self.spikes += *spikes as u64;
                self.unterminated += *unterminated as u64;
            }
            MetricEvent::SpikeRejected { reason, .. } => self.rejections.record(*reason),
            MetricEvent::SamplesDropped { count, .. } => self.samples_dropped += count,
            MetricEvent::EventsDropped { count } => self.events_dropped += count,
            MetricEvent::ThresholdTrained { .. } => self.thresholds_trained += 1,
            MetricEvent::Error { .. } => self.errors += 1,
            MetricEvent::CycleLatency { .. }
            | MetricEvent::BufferOccupancy { .. }
            | MetricEvent::Lifecycle { .. } => {}
        }
    }
}

/// Detection cycle duration over the latency window
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CycleLatency {
    pub avg_ms: f32,
    pub max_ms: f32,
    pub sample_count: usize,
}

/// Pipeline health as seen by the collector, for the CLI report
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySnapshot {
    pub tally: PipelineTally,
    pub cycle_latency: Option<CycleLatency>,
    /// Latest lifecycle phase reached by the engine
    pub lifecycle: Option<LifecyclePhase>,
    /// Most recent metrics, oldest first
    pub recent: Vec<MetricEvent>,
    pub total_events: u64,
    /// Metrics pushed out of `recent` by newer ones
    pub evicted_events: u64,
}

#[derive(Default)]
struct CollectorState {
    snapshot: TelemetrySnapshot,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Folds metrics into a tally plus a bounded tail, and rebroadcasts them
pub struct TelemetryCollector {
    tx: broadcast::Sender<MetricEvent>,
    state: Mutex<CollectorState>,
    recent_capacity: usize,
}

impl TelemetryCollector {
    pub fn new(buffer: usize, recent_capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(buffer);
        Self {
            tx,
            state: Mutex::new(CollectorState::default()),
            recent_capacity,
        }
    }

    pub fn publish(&self, event: MetricEvent) {
        {
            let mut state = lock(&self.state);
            let snapshot = &mut state.snapshot;
            snapshot.total_events += 1;
            snapshot.tally.fold(&event);
            match &event {
                MetricEvent::CycleLatency {
                    avg_ms,
                    max_ms,
                    sample_count,
                } => {
                    snapshot.cycle_latency = Some(CycleLatency {
                        avg_ms: *avg_ms,
                        max_ms: *max_ms,
                        sample_count: *sample_count,
                    });
                }
                MetricEvent::Lifecycle { phase, .. } => snapshot.lifecycle = Some(*phase),
                _ => {}
            }
            if self.recent_capacity > 0 {
                if snapshot.recent.len() == self.recent_capacity {
                    snapshot.recent.remove(0);
                    snapshot.evicted_events += 1;
                }
                snapshot.recent.push(event.clone());
            }
        }

        // No subscribers is fine
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MetricEvent> {
        self.tx.subscribe()
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        lock(&self.state).snapshot.clone()
    }
}

impl Default for TelemetryCollector {
    fn default() -> Self {
        Self::new(256, 32)
    }
}

/// Rolling window of detection cycle durations with an incremental sum
struct LatencyWindow {
    durations: VecDeque<f32>,
    capacity: usize,
    sum: f32,
}

impl LatencyWindow {
    fn new(capacity: usize) -> Self {
        Self {
            durations: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
            sum: 0.0,
        }
    }

    fn observe(&mut self, duration_ms: f32) -> CycleLatency {
        if self.durations.len() == self.capacity {
            if let Some(oldest) = self.durations.pop_front() {
                self.sum -= oldest;
            }
        }
        let duration_ms = duration_ms.max(0.0);
        self.durations.push_back(duration_ms);
        self.sum += duration_ms;

        let sample_count = self.durations.len();
        CycleLatency {
            avg_ms: self.sum / sample_count as f32,
            max_ms: self.durations.iter().copied().fold(0.0, f32::max),
            sample_count,
        }
    }
}

/// Top-level hub wrapping collector state plus derived gauges.
pub struct TelemetryHub {
    collector: TelemetryCollector,
    latency: Mutex<LatencyWindow>,
    buffer_gauges: Mutex<HashMap<String, f32>>,
}

impl TelemetryHub {
    pub fn new(channel_capacity: usize, recent_capacity: usize, latency_window: usize) -> Self {
        Self {
            collector: TelemetryCollector::new(channel_capacity, recent_capacity),
            latency: Mutex::new(LatencyWindow::new(latency_window)),
            buffer_gauges: Mutex::new(HashMap::new()),
        }
    }

    pub fn collector(&self) -> &TelemetryCollector {
        &self.collector
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        self.collector.snapshot()
    }

    /// Summarise one detection cycle and fold its duration into the latency window
    pub fn record_cycle(&self, report: &CycleReport, duration_ms: f32) {
        self.collector.publish(MetricEvent::CycleSummary {
            cycle: report.cycle,
            samples: report.samples,
            spikes: report.spikes_published,
            rejected: report.rejections.total(),
            unterminated: report.unterminated,
            skipped_blocks: report.skipped_blocks,
        });

        if report.dropped_events > 0 {
            self.collector.publish(MetricEvent::EventsDropped {
                count: report.dropped_events,
            });
        }

        let latency = lock(&self.latency).observe(duration_ms);
        self.collector.publish(MetricEvent::CycleLatency {
            avg_ms: latency.avg_ms,
            max_ms: latency.max_ms,
            sample_count: latency.sample_count,
        });
    }

    pub fn record_rejection(&self, channel: usize, reason: Rejection) {
        self.collector
            .publish(MetricEvent::SpikeRejected { channel, reason });
    }

    pub fn record_samples_dropped(&self, channel: usize, count: u64) {
        self.collector
            .publish(MetricEvent::SamplesDropped { channel, count });
    }

    pub fn record_threshold_trained(&self, channel: usize, threshold: f64) {
        self.collector
            .publish(MetricEvent::ThresholdTrained { channel, threshold });
    }

    /// Emit an occupancy gauge, skipping changes under 2.5 points
    pub fn record_buffer_occupancy(&self, channel: &str, percent: f32) {
        let normalized = percent.clamp(0.0, 100.0);
        let mut gauges = lock(&self.buffer_gauges);

        let should_emit = gauges
            .get(channel)
            .map(|last| (last - normalized).abs() >= 2.5)
            .unwrap_or(true);

        if should_emit {
            gauges.insert(channel.to_string(), normalized);
            self.collector.publish(MetricEvent::BufferOccupancy {
                channel: channel.to_string(),
                percent: normalized,
            });
        }
    }

    pub fn record_lifecycle(&self, phase: LifecyclePhase) {
        self.collector.publish(MetricEvent::Lifecycle {
            phase,
            timestamp_ms: now_timestamp_ms(),
        });
    }

    pub fn record_error(&self, code: DiagnosticError, context: impl Into<String>) {
        self.collector.publish(MetricEvent::Error {
            code,
            context: context.into(),
        });
    }
}

impl Default for TelemetryHub {
    fn default() -> Self {
        Self::new(256, 32, 32)
    }
}

fn now_timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
