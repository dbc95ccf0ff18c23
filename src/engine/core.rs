//! MeaEngine: threaded orchestration of the spike pipeline.
//!
//! Owns the real-time producer thread and the detection cycle thread, hands
//! the spike event receiver to the caller, and funnels `ParamPatch` commands
//! to the detection thread so reconfiguration only happens between cycles.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::acquisition::{
    spawn_realtime_thread, voltage_channels, AcquisitionSource, IntakeCounters, Pacing,
    RealtimeLoop, RealtimeSummary,
};
use crate::config::{AppConfig, DetectionConfig, ThresholdPolarity};
use crate::detection::{
    spike_event_channel, ChannelSummary, CycleReport, DetectionWorker, EventCounters,
    SpikeEventReceiver,
};
use crate::engine::offline::check_source;
use crate::error::{log_config_error, EngineError};
use crate::telemetry::{self, DiagnosticError, LifecyclePhase};

/// Patch describing parameter updates to apply to the running engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParamPatch {
    #[serde(default)]
    pub threshold_polarity: Option<ThresholdPolarity>,
    #[serde(default)]
    pub threshold_multiplier: Option<f64>,
    #[serde(default)]
    pub num_pre: Option<usize>,
    #[serde(default)]
    pub num_post: Option<usize>,
    #[serde(default)]
    pub max_spike_width_ms: Option<f64>,
    #[serde(default)]
    pub min_spike_width_ms: Option<f64>,
    #[serde(default)]
    pub max_spike_amp: Option<f64>,
    #[serde(default)]
    pub min_spike_slope: Option<f64>,
    #[serde(default)]
    pub dead_time_ms: Option<f64>,
    #[serde(default)]
    pub downsample: Option<usize>,
    #[serde(default)]
    pub num_updates_for_train: Option<usize>,
    /// Restart threshold training on every channel
    #[serde(default)]
    pub reset_thresholds: bool,
}

impl ParamPatch {
    /// `base` with every field this patch sets replaced
    pub fn apply_to(&self, base: &DetectionConfig) -> DetectionConfig {
        let mut config = base.clone();
        if let Some(v) = self.threshold_polarity {
            config.threshold_polarity = v;
        }
        if let Some(v) = self.threshold_multiplier {
            config.threshold_multiplier = v;
        }
        if let Some(v) = self.num_pre {
            config.num_pre = v;
        }
        if let Some(v) = self.num_post {
            config.num_post = v;
        }
        if let Some(v) = self.max_spike_width_ms {
            config.max_spike_width_ms = v;
        }
        if let Some(v) = self.min_spike_width_ms {
            config.min_spike_width_ms = v;
        }
        if let Some(v) = self.max_spike_amp {
            config.max_spike_amp = v;
        }
        if let Some(v) = self.min_spike_slope {
            config.min_spike_slope = v;
        }
        if let Some(v) = self.dead_time_ms {
            config.dead_time_ms = v;
        }
        if let Some(v) = self.downsample {
            config.downsample = v;
        }
        if let Some(v) = self.num_updates_for_train {
            config.num_updates_for_train = v;
        }
        config
    }
}

/// Live counters readable while the engine runs
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineStats {
    pub running: bool,
    pub ticks: u64,
    pub dropped_samples: u64,
    pub spikes_published: u64,
    pub dropped_events: u64,
    pub cycles: u64,
}

/// Final tallies returned by [`MeaEngine::stop`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineSummary {
    pub producer: RealtimeSummary,
    pub detection: CycleReport,
    pub per_channel: Vec<ChannelSummary>,
}

struct DetectionOutcome {
    totals: CycleReport,
    per_channel: Vec<ChannelSummary>,
}

struct Session {
    producer_running: Arc<AtomicBool>,
    producer: JoinHandle<RealtimeSummary>,
    detection: JoinHandle<DetectionOutcome>,
    command_tx: mpsc::Sender<ParamPatch>,
    intake_counters: IntakeCounters,
    event_counters: EventCounters,
    cycles: Arc<AtomicU64>,
}

pub struct MeaEngine {
    config: AppConfig,
    session: Option<Session>,
}

impl MeaEngine {
    pub fn new(config: AppConfig) -> Result<Self, EngineError> {
        config.validate()?;
        Ok(Self {
            config,
            session: None,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.session.is_some()
    }

    /// Spawn the producer and detection threads over `source`
    ///
    /// Returns the pull side of the spike event channel.
    pub fn start(
        &mut self,
        source: Box<dyn AcquisitionSource>,
    ) -> Result<SpikeEventReceiver, EngineError> {
        if self.session.is_some() {
            return Err(EngineError::AlreadyRunning);
        }
        check_source(&self.config, source.as_ref())?;

        let acquisition = &self.config.acquisition;
        let (intake, taps) =
            voltage_channels(acquisition.num_channels, acquisition.voltage_buffer_capacity);
        let intake_counters = intake.counters().clone();
        let (publisher, receiver) = spike_event_channel(acquisition.event_buffer_capacity);
        let event_counters = publisher.counters().clone();
        let worker = DetectionWorker::new(
            taps,
            publisher,
            &self.config.detection,
            acquisition.sampling_frequency_hz,
            acquisition.voltage_buffer_capacity,
        )?;

        let producer_running = Arc::new(AtomicBool::new(true));
        let producer_done = Arc::new(AtomicBool::new(false));
        let cycles = Arc::new(AtomicU64::new(0));
        let (command_tx, command_rx) = mpsc::channel(64);

        let detection = spawn_detection_thread(
            worker,
            command_rx,
            Arc::clone(&producer_done),
            Arc::clone(&cycles),
            Duration::from_secs_f64(acquisition.detection_window_ms / 1000.0),
        )?;

        let realtime = RealtimeLoop::new(
            source,
            intake,
            Arc::clone(&producer_running),
            Arc::clone(&producer_done),
            Pacing::WallClock,
        );
        let producer = match spawn_realtime_thread(realtime) {
            Ok(handle) => handle,
            Err(err) => {
                // Detection thread exits once it sees the producer is done
                producer_done.store(true, Ordering::Release);
                let _ = detection.join();
                return Err(err);
            }
        };

        self.session = Some(Session {
            producer_running,
            producer,
            detection,
            command_tx,
            intake_counters,
            event_counters,
            cycles,
        });
        telemetry::hub().record_lifecycle(LifecyclePhase::EngineStarted);
        tracing::info!(
            "[MeaEngine] Started: {} channels at {} Hz",
            self.config.acquisition.num_channels,
            self.config.acquisition.sampling_frequency_hz
        );
        Ok(receiver)
    }

    /// Stop the producer, let detection drain what is buffered, join both threads
    pub fn stop(&mut self) -> Result<EngineSummary, EngineError> {
        let session = self.session.take().ok_or(EngineError::NotRunning)?;
        telemetry::hub().record_lifecycle(LifecyclePhase::EngineStopping);

        session.producer_running.store(false, Ordering::Release);
        let producer = join_thread(session.producer, "mea-realtime");
        drop(session.command_tx);
        // Joined even when the producer died; it exits once producer_done is raised
        let detection = join_thread(session.detection, "mea-detection");
        let producer = producer?;
        let detection = detection?;

        telemetry::hub().record_lifecycle(LifecyclePhase::EngineStopped);
        tracing::info!(
            "[MeaEngine] Stopped: {} ticks, {} spikes, {} samples dropped",
            producer.ticks,
            detection.totals.spikes_published,
            detection.totals.dropped_samples
        );
        Ok(EngineSummary {
            producer,
            detection: detection.totals,
            per_channel: detection.per_channel,
        })
    }

    /// Queue a parameter change for the next gap between detection cycles
    pub fn apply_patch(&mut self, patch: ParamPatch) -> Result<(), EngineError> {
        let session = self.session.as_ref().ok_or(EngineError::NotRunning)?;
        let updated = patch.apply_to(&self.config.detection);
        updated.validate()?;

        session
            .command_tx
            .try_send(patch)
            .map_err(|err| EngineError::CommandQueueFailed {
                reason: err.to_string(),
            })?;
        self.config.detection = updated;
        Ok(())
    }

    pub fn stats(&self) -> EngineStats {
        match &self.session {
            Some(session) => EngineStats {
                running: !session.producer.is_finished(),
                ticks: session.intake_counters.ticks(),
                dropped_samples: session.intake_counters.total_dropped(),
                spikes_published: session.event_counters.published(),
                dropped_events: session.event_counters.dropped(),
                cycles: session.cycles.load(Ordering::Relaxed),
            },
            None => EngineStats::default(),
        }
    }
}

impl Drop for MeaEngine {
    fn drop(&mut self) {
        if self.session.is_some() {
            let _ = self.stop();
        }
    }
}

fn join_thread<T>(handle: JoinHandle<T>, thread: &'static str) -> Result<T, EngineError> {
    handle.join().map_err(|_| {
        telemetry::hub().record_error(DiagnosticError::ThreadPanic, thread);
        EngineError::ThreadFailed {
            thread,
            reason: "thread panicked".to_string(),
        }
    })
}

fn spawn_detection_thread(
    mut worker: DetectionWorker,
    mut command_rx: mpsc::Receiver<ParamPatch>,
    producer_done: Arc<AtomicBool>,
    cycles: Arc<AtomicU64>,
    period: Duration,
) -> Result<JoinHandle<DetectionOutcome>, EngineError> {
    thread::Builder::new()
        .name("mea-detection".to_string())
        .spawn(move || {
            tracing::info!("[DetectionThread] Starting, cycle period {:?}", period);
            let mut next_cycle = Instant::now() + period;
            loop {
                // Sampled before draining so the final cycle sees everything pushed
                let finished = producer_done.load(Ordering::Acquire);

                while let Ok(patch) = command_rx.try_recv() {
                    apply_queued_patch(&mut worker, &patch);
                }

                worker.run_cycle();
                cycles.fetch_add(1, Ordering::Relaxed);

                if finished && worker.pending_samples() == 0 {
                    break;
                }

                let now = Instant::now();
                if next_cycle > now {
                    thread::sleep(next_cycle - now);
                }
                next_cycle += period;
            }
            tracing::info!("[DetectionThread] Producer finished and buffers drained, exiting");
            DetectionOutcome {
                totals: worker.totals().clone(),
                per_channel: worker.channel_summaries(),
            }
        })
        .map_err(|err| EngineError::ThreadFailed {
            thread: "mea-detection",
            reason: err.to_string(),
        })
}

fn apply_queued_patch(worker: &mut DetectionWorker, patch: &ParamPatch) {
    let updated = patch.apply_to(worker.config());
    if updated != *worker.config() {
        if let Err(err) = worker.reconfigure(updated) {
            log_config_error(&err, "apply_patch");
            telemetry::hub().record_error(DiagnosticError::CommandQueue, err.to_string());
            return;
        }
    }
    if patch.reset_thresholds {
        worker.reset_thresholds();
    }
    telemetry::hub().record_lifecycle(LifecyclePhase::ParamsApplied);
}

#[cfg(test)]
mod tests;
