// Detection - consumer side of the pipeline
//
// This module runs the slower detection cycle over whatever the real-time
// loop has buffered since the previous cycle.
//
// Architecture:
// - DetectionWorker: drains every channel's voltage ring once per cycle
// - ChannelPipeline: per-channel block, threshold estimator and detector
// - Pipeline: VoltageBlock -> ThresholdEstimator -> SpikeDetector -> validator
// - Output: SpikeEvent pushed to the global event ring via EventPublisher
//
// Parameters change only between cycles, never mid-scan.

use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::acquisition::VoltageTaps;
use crate::config::{DetectionConfig, DetectionParams};
use crate::error::ConfigError;
use crate::telemetry;

pub mod block;
pub mod detector;
pub mod events;
pub mod threshold;
pub mod validator;

pub use block::VoltageBlock;
pub use detector::{Candidate, DetectorState, ScanOutcome, SpikeDetector};
pub use events::{spike_event_channel, EventCounters, EventPublisher, SpikeEvent, SpikeEventReceiver};
pub use threshold::{block_rms, ThresholdEstimator, ThresholdUpdate};
pub use validator::{validate, Rejection, RejectionCounts};

/// What one detection cycle did across all channels
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CycleReport {
    pub cycle: u64,
    /// Fresh samples processed
    pub samples: usize,
    pub spikes_published: usize,
    pub rejections: RejectionCounts,
    /// Crossings still open when their block ran out
    pub unterminated: usize,
    /// Blocks not scanned: silent (zero-sum) or still too short
    pub skipped_blocks: usize,
    /// Voltage samples dropped by the intake since the previous cycle
    pub dropped_samples: u64,
    /// Accepted spikes lost to a full event channel this cycle
    pub dropped_events: u64,
    /// Channels whose threshold froze this cycle
    pub trained_channels: usize,
}

/// Per-channel view for reports
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelSummary {
    pub channel: usize,
    /// Trained RMS estimate, volts
    pub threshold: f64,
    /// `threshold_multiplier * threshold`, volts
    pub detection_level: f64,
    pub trained: bool,
    pub spikes: u64,
    pub dropped_samples: u64,
}

/// Result of running one channel's block through the pipeline
#[derive(Debug, Clone, Copy, Default)]
struct ChannelOutcome {
    samples: usize,
    skipped: bool,
    trained: bool,
    scan: ScanOutcome,
}

/// Everything the detection stage owns for one electrode
pub struct ChannelPipeline {
    channel: usize,
    block: VoltageBlock,
    estimator: ThresholdEstimator,
    detector: SpikeDetector,
    spikes: u64,
}

impl ChannelPipeline {
    pub fn new(channel: usize, params: &DetectionParams, block_capacity: usize) -> Self {
        Self {
            channel,
            block: VoltageBlock::with_capacity(block_capacity + params.carry_over_length()),
            estimator: ThresholdEstimator::new(params.num_updates_for_train),
            detector: SpikeDetector::new(),
            spikes: 0,
        }
    }

    pub fn block_mut(&mut self) -> &mut VoltageBlock {
        &mut self.block
    }

    pub fn estimator(&self) -> &ThresholdEstimator {
        &self.estimator
    }

    pub fn detector(&self) -> &SpikeDetector {
        &self.detector
    }

    pub fn spikes(&self) -> u64 {
        self.spikes
    }

    /// Threshold update plus detection over the pending block
    fn process(
        &mut self,
        params: &DetectionParams,
        publisher: &mut EventPublisher,
        rejections: &mut RejectionCounts,
    ) -> ChannelOutcome {
        let mut outcome = ChannelOutcome::default();
        if !self.block.has_fresh() {
            return outcome;
        }
        // First block shorter than the windows need: keep accumulating
        if self.block.len() < SpikeDetector::min_block_len(params) {
            outcome.skipped = true;
            return outcome;
        }

        let fresh = self.block.fresh();
        outcome.samples = fresh.len();
        if fresh.iter().sum::<f64>() == 0.0 {
            // Acquisition inactive: nothing to learn from, nothing to detect
            self.detector.reset();
            self.block.retain_tail(params.carry_over_length());
            outcome.skipped = true;
            return outcome;
        }

        let update = self
            .estimator
            .update(fresh, params.downsample, params.num_updates_for_train);
        if let ThresholdUpdate::Trained { threshold } = update {
            outcome.trained = true;
            tracing::debug!(
                "[Detection] Channel {} threshold trained at {:.3} uV",
                self.channel,
                threshold * 1e6
            );
            telemetry::hub().record_threshold_trained(self.channel, threshold);
        }

        let threshold = self.estimator.threshold();
        if threshold > 0.0 {
            let level = params.threshold_multiplier * threshold;
            let channel = self.channel;
            let block = &self.block;
            let spikes = &mut self.spikes;
            outcome.scan = self
                .detector
                .scan(block.samples(), level, params, |candidate| {
                    match validate(candidate.waveform, candidate.width, params) {
                        Ok(()) => {
                            let sample_index = block.absolute_index(candidate.peak);
                            let published = publisher.publish(SpikeEvent {
                                channel,
                                sample_index,
                                timestamp_s: sample_index as f64 * params.sample_period_s,
                                threshold: level,
                                waveform: candidate.waveform.to_vec(),
                            });
                            if published {
                                *spikes += 1;
                            }
                            true
                        }
                        Err(rejection) => {
                            rejections.record(rejection);
                            telemetry::hub().record_rejection(channel, rejection);
                            false
                        }
                    }
                });
        }

        self.block.retain_tail(params.carry_over_length());
        outcome
    }

    /// Samples were lost after this cycle's block; resume detection past them
    fn skip_gap(&mut self, missing: u64) {
        tracing::debug!(
            "[Detection] Channel {} lost {} samples, restarting block at the gap",
            self.channel,
            missing
        );
        self.block.skip_gap(missing);
        self.detector.reset();
    }

    /// Drop carry-over and owed dead time; threshold training is kept
    fn reset_scan(&mut self) {
        self.block.discard_tail();
        self.detector.reset();
    }
}

/// Runs detection cycles over every channel
pub struct DetectionWorker {
    taps: VoltageTaps,
    publisher: EventPublisher,
    channels: Vec<ChannelPipeline>,
    config: DetectionConfig,
    params: DetectionParams,
    sampling_frequency_hz: f64,
    cycle: u64,
    seen_dropped: Vec<u64>,
    seen_dropped_events: u64,
    totals: CycleReport,
}

impl DetectionWorker {
    pub fn new(
        taps: VoltageTaps,
        publisher: EventPublisher,
        config: &DetectionConfig,
        sampling_frequency_hz: f64,
        block_capacity: usize,
    ) -> Result<Self, ConfigError> {
        let params = DetectionParams::resolve(config, sampling_frequency_hz)?;
        let num_channels = taps.num_channels();
        let channels = (0..num_channels)
            .map(|channel| ChannelPipeline::new(channel, &params, block_capacity))
            .collect();

        tracing::info!(
            "[Detection] {} channels, carry-over {} samples, waveform {} samples",
            num_channels,
            params.carry_over_length(),
            params.waveform_len()
        );

        Ok(Self {
            taps,
            publisher,
            channels,
            config: config.clone(),
            params,
            sampling_frequency_hz,
            cycle: 0,
            seen_dropped: vec![0; num_channels],
            seen_dropped_events: 0,
            totals: CycleReport::default(),
        })
    }

    /// Drain every voltage ring and run one detection pass
    pub fn run_cycle(&mut self) -> CycleReport {
        let started = Instant::now();
        self.cycle += 1;
        self.publisher.begin_cycle();

        let mut report = CycleReport {
            cycle: self.cycle,
            ..CycleReport::default()
        };
        let hub = telemetry::hub();
        hub.record_buffer_occupancy("voltage", self.taps.peak_occupancy_percent());

        for (channel, pipeline) in self.channels.iter_mut().enumerate() {
            self.taps.drain_channel(channel, pipeline.block.intake());
            // Read straight after the drain: drop-newest puts these past the drained samples
            let dropped = self.taps.counters().dropped(channel);
            let new_drops = dropped - self.seen_dropped[channel];

            let outcome = pipeline.process(&self.params, &mut self.publisher, &mut report.rejections);
            report.samples += outcome.samples;
            if outcome.skipped {
                report.skipped_blocks += 1;
            }
            if outcome.trained {
                report.trained_channels += 1;
            }
            if outcome.scan.unterminated {
                report.unterminated += 1;
            }

            if new_drops > 0 {
                self.seen_dropped[channel] = dropped;
                report.dropped_samples += new_drops;
                pipeline.skip_gap(new_drops);
                hub.record_samples_dropped(channel, new_drops);
            }
        }

        report.spikes_published = self.publisher.cycle_published();
        let dropped_events = self.publisher.counters().dropped();
        report.dropped_events = dropped_events - self.seen_dropped_events;
        self.seen_dropped_events = dropped_events;

        if report.dropped_samples > 0 || report.dropped_events > 0 {
            tracing::warn!(
                "[Detection] Cycle {}: dropped {} voltage samples, {} spike events",
                report.cycle,
                report.dropped_samples,
                report.dropped_events
            );
        }
        tracing::trace!(
            "[Detection] Cycle {}: {} samples, {} spikes, {} rejected",
            report.cycle,
            report.samples,
            report.spikes_published,
            report.rejections.total()
        );

        hub.record_cycle(&report, started.elapsed().as_secs_f32() * 1000.0);
        self.accumulate(&report);
        report
    }

    fn accumulate(&mut self, report: &CycleReport) {
        let totals = &mut self.totals;
        totals.cycle = report.cycle;
        totals.samples += report.samples;
        totals.spikes_published += report.spikes_published;
        totals.rejections.merge(&report.rejections);
        totals.unterminated += report.unterminated;
        totals.skipped_blocks += report.skipped_blocks;
        totals.dropped_samples += report.dropped_samples;
        totals.dropped_events += report.dropped_events;
        totals.trained_channels += report.trained_channels;
    }

    /// Apply new detection parameters between cycles
    ///
    /// Carry-over tails and owed dead time are discarded because their
    /// lengths depend on the parameters. Thresholds keep training.
    pub fn reconfigure(&mut self, config: DetectionConfig) -> Result<(), ConfigError> {
        let params = DetectionParams::resolve(&config, self.sampling_frequency_hz)?;
        for pipeline in &mut self.channels {
            pipeline.reset_scan();
        }
        tracing::info!(
            "[Detection] Reconfigured: polarity {:?}, multiplier {}, widths {}..={} samples",
            params.polarity,
            params.threshold_multiplier,
            params.min_spike_width,
            params.max_spike_width
        );
        self.params = params;
        self.config = config;
        Ok(())
    }

    /// Restart threshold training on every channel
    pub fn reset_thresholds(&mut self) {
        for pipeline in &mut self.channels {
            pipeline.estimator.reset();
            pipeline.reset_scan();
        }
    }

    pub fn config(&self) -> &DetectionConfig {
        &self.config
    }

    pub fn params(&self) -> &DetectionParams {
        &self.params
    }

    /// Running sums over every cycle so far
    pub fn totals(&self) -> &CycleReport {
        &self.totals
    }

    pub fn pending_samples(&self) -> usize {
        self.taps.total_pending()
    }

    pub fn channel(&self, channel: usize) -> Option<&ChannelPipeline> {
        self.channels.get(channel)
    }

    pub fn channel_summaries(&self) -> Vec<ChannelSummary> {
        self.channels
            .iter()
            .map(|pipeline| {
                let threshold = pipeline.estimator.threshold();
                ChannelSummary {
                    channel: pipeline.channel,
                    threshold,
                    detection_level: threshold * self.params.threshold_multiplier,
                    trained: pipeline.estimator.is_trained(),
                    spikes: pipeline.spikes,
                    dropped_samples: self.taps.counters().dropped(pipeline.channel),
                }
            })
            .collect()
    }
}
