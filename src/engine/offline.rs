//! Deterministic single-threaded runner.
//!
//! Plays the producer and both consumers in lockstep: push one detection
//! window of ticks, run a detection cycle, refresh the raster on its own
//! cadence. Same pipeline objects as the threaded engine, no timing noise.

use serde::{Deserialize, Serialize};

use crate::acquisition::{voltage_channels, AcquisitionSource, VoltageIntake};
use crate::config::AppConfig;
use crate::detection::{
    spike_event_channel, ChannelSummary, CycleReport, DetectionWorker, RejectionCounts, SpikeEvent,
};
use crate::error::{ConfigError, EngineError};
use crate::raster::{RasterAggregator, RasterSnapshot};

/// Summary of a completed run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub channels: usize,
    pub sampling_frequency_hz: f64,
    pub ticks: u64,
    pub duration_s: f64,
    pub cycles: u64,
    /// Spikes that reached the event channel
    pub spike_count: u64,
    pub dropped_samples: u64,
    pub dropped_events: u64,
    pub rejections: RejectionCounts,
    pub unterminated: usize,
    pub skipped_blocks: usize,
    pub per_channel: Vec<ChannelSummary>,
    pub raster_points: usize,
}

/// Refuse sources whose shape disagrees with the configuration
pub fn check_source(config: &AppConfig, source: &dyn AcquisitionSource) -> Result<(), ConfigError> {
    let expected = config.acquisition.num_channels;
    let actual = source.channel_count();
    if expected != actual {
        return Err(ConfigError::ChannelMismatch { expected, actual });
    }
    let expected_hz = config.acquisition.sampling_frequency_hz;
    let actual_hz = source.sampling_frequency_hz();
    if (expected_hz - actual_hz).abs() > 1e-9 * expected_hz.max(1.0) {
        return Err(ConfigError::PeriodMismatch {
            expected_hz,
            actual_hz,
        });
    }
    Ok(())
}

pub struct OfflineRunner {
    config: AppConfig,
    intake: VoltageIntake,
    worker: DetectionWorker,
    raster: RasterAggregator,
    frame: Vec<f64>,
    ticks: u64,
}

impl OfflineRunner {
    pub fn new(config: AppConfig) -> Result<Self, EngineError> {
        config.validate()?;
        let acquisition = &config.acquisition;
        let per_cycle = config.samples_per_cycle();
        // A whole detection window must fit or the lockstep run would drop samples
        let ring_capacity = acquisition.voltage_buffer_capacity.max(per_cycle);

        let (intake, taps) = voltage_channels(acquisition.num_channels, ring_capacity);
        let (publisher, receiver) = spike_event_channel(acquisition.event_buffer_capacity);
        let worker = DetectionWorker::new(
            taps,
            publisher,
            &config.detection,
            acquisition.sampling_frequency_hz,
            ring_capacity,
        )?;
        let raster = RasterAggregator::new(receiver, acquisition.num_channels, config.raster.clone());

        Ok(Self {
            frame: vec![0.0; acquisition.num_channels],
            config,
            intake,
            worker,
            raster,
            ticks: 0,
        })
    }

    pub fn run(&mut self, source: &mut dyn AcquisitionSource) -> Result<RunReport, EngineError> {
        self.run_with(source, |_| {}, |_| {})
    }

    /// Run `source` to exhaustion, reporting each cycle and each spike as the raster drains it
    pub fn run_with<C, E>(
        &mut self,
        source: &mut dyn AcquisitionSource,
        mut on_cycle: C,
        mut on_event: E,
    ) -> Result<RunReport, EngineError>
    where
        C: FnMut(&CycleReport),
        E: FnMut(&SpikeEvent),
    {
        check_source(&self.config, source)?;
        let fs = self.config.acquisition.sampling_frequency_hz;
        let per_cycle = self.config.samples_per_cycle();
        let refresh_s = self.config.raster.refresh_ms as f64 / 1000.0;
        let mut next_refresh_s = refresh_s;

        tracing::info!(
            "[OfflineRunner] {} channels at {} Hz, {} ticks per cycle",
            self.frame.len(),
            fs,
            per_cycle
        );

        loop {
            let mut pushed = 0;
            let mut exhausted = false;
            while pushed < per_cycle {
                if !source.read_tick(&mut self.frame) {
                    exhausted = true;
                    break;
                }
                self.intake.push_tick(&self.frame);
                pushed += 1;
            }
            self.ticks += pushed as u64;

            if pushed > 0 {
                let report = self.worker.run_cycle();
                on_cycle(&report);
            }

            let now_s = self.ticks as f64 / fs;
            if exhausted || now_s >= next_refresh_s {
                // Keep draining until the event channel is empty at the end
                loop {
                    let outcome = self.raster.refresh_with(now_s, &mut on_event);
                    if !exhausted || outcome.drained == 0 {
                        break;
                    }
                }
                while next_refresh_s <= now_s {
                    next_refresh_s += refresh_s.max(f64::EPSILON);
                }
            }

            if exhausted {
                break;
            }
        }

        Ok(self.report())
    }

    pub fn report(&self) -> RunReport {
        let totals = self.worker.totals();
        let fs = self.config.acquisition.sampling_frequency_hz;
        RunReport {
            channels: self.frame.len(),
            sampling_frequency_hz: fs,
            ticks: self.ticks,
            duration_s: self.ticks as f64 / fs,
            cycles: totals.cycle,
            spike_count: self.raster.total_drained(),
            dropped_samples: totals.dropped_samples,
            dropped_events: totals.dropped_events,
            rejections: totals.rejections,
            unterminated: totals.unterminated,
            skipped_blocks: totals.skipped_blocks,
            per_channel: self.worker.channel_summaries(),
            raster_points: self.raster.points().count(),
        }
    }

    pub fn raster(&self) -> &RasterAggregator {
        &self.raster
    }

    pub fn raster_snapshot(&self) -> RasterSnapshot {
        self.raster.snapshot()
    }

    pub fn worker(&self) -> &DetectionWorker {
        &self.worker
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquisition::{SyntheticConfig, SyntheticSource};

    fn config(channels: usize) -> AppConfig {
        let mut config = AppConfig::default();
        config.acquisition.num_channels = channels;
        config.detection.num_updates_for_train = 5;
        config.raster.refresh_ms = 500;
        config
    }

    fn source(channels: usize, seconds: f64) -> SyntheticSource {
        SyntheticSource::new(SyntheticConfig {
            num_channels: channels,
            duration_s: Some(seconds),
            spike_rate_hz: 10.0,
            ..SyntheticConfig::default()
        })
    }

    #[test]
    fn test_rejects_mismatched_source() {
        let mut runner = OfflineRunner::new(config(4)).unwrap();
        let err = runner.run(&mut source(3, 0.1)).unwrap_err();
        assert_eq!(
            err,
            EngineError::InvalidConfig(ConfigError::ChannelMismatch {
                expected: 4,
                actual: 3
            })
        );
    }

    #[test]
    fn test_run_counts_ticks_and_cycles() {
        let mut runner = OfflineRunner::new(config(2)).unwrap();
        let mut cycles = 0;
        let mut events = 0;
        let report = runner
            .run_with(&mut source(2, 2.0), |_| cycles += 1, |_| events += 1)
            .unwrap();

        assert_eq!(report.ticks, 40_000);
        assert_eq!(report.cycles, 40);
        assert_eq!(cycles, 40);
        assert_eq!(report.dropped_samples, 0);
        assert_eq!(report.dropped_events, 0);
        assert!(report.spike_count > 0);
        assert_eq!(events as u64, report.spike_count);
        assert!(report.per_channel.iter().all(|c| c.trained));
    }

    #[test]
    fn test_same_seed_same_report() {
        let a = OfflineRunner::new(config(2))
            .unwrap()
            .run(&mut source(2, 1.0))
            .unwrap();
        let b = OfflineRunner::new(config(2))
            .unwrap()
            .run(&mut source(2, 1.0))
            .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut bad = config(2);
        bad.acquisition.sampling_frequency_hz = 0.0;
        assert!(matches!(
            OfflineRunner::new(bad),
            Err(EngineError::InvalidConfig(ConfigError::OutOfRange { .. }))
        ));
    }
}
