//! Acquisition sources feeding the real-time loop
//!
//! The rig normally delivers one voltage per electrode per tick. Without DAQ
//! hardware the engine is driven by a source implementing
//! [`AcquisitionSource`]: a seeded synthetic MEA recording with known spike
//! times, or a multichannel WAV file replayed frame by frame.

use rand::{rngs::StdRng, Rng, SeedableRng};
use std::path::Path;

use crate::error::EngineError;

/// Anything that can produce one voltage per channel per tick
pub trait AcquisitionSource: Send {
    fn channel_count(&self) -> usize;
    fn sampling_frequency_hz(&self) -> f64;
    /// Fill `frame` (one slot per channel) with the next tick, in volts
    ///
    /// Returns `false` once the source is exhausted; `frame` is then untouched.
    fn read_tick(&mut self, frame: &mut [f64]) -> bool;
}

/// Parameters for [`SyntheticSource`]
#[derive(Debug, Clone, PartialEq)]
pub struct SyntheticConfig {
    pub num_channels: usize,
    pub sampling_frequency_hz: f64,
    /// Recording length; `None` runs until stopped
    pub duration_s: Option<f64>,
    /// Background noise RMS in volts
    pub noise_rms: f64,
    /// Trough depth of the spike template in volts
    pub spike_amplitude: f64,
    /// Mean firing rate per channel
    pub spike_rate_hz: f64,
    /// Refractory gap enforced between spikes on one channel
    pub min_gap_ms: f64,
    pub seed: u64,
    /// Interval (seconds) during which every channel reads exactly 0 V
    pub dropout: Option<(f64, f64)>,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            num_channels: 60,
            sampling_frequency_hz: 20_000.0,
            duration_s: Some(10.0),
            noise_rms: 5e-6,
            spike_amplitude: 60e-6,
            spike_rate_hz: 5.0,
            min_gap_ms: 5.0,
            seed: 42,
            dropout: None,
        }
    }
}

struct ChannelSchedule {
    /// Tick at which the next template starts
    next_onset: u64,
    /// Tick at which the currently playing template started
    active_onset: Option<u64>,
}

/// Seeded synthetic MEA recording
///
/// Each channel carries Gaussian-like noise plus biphasic extracellular spikes
/// (sharp negative trough followed by a slower positive rebound) at
/// exponentially distributed intervals. Trough positions are recorded so
/// detections can be scored.
pub struct SyntheticSource {
    config: SyntheticConfig,
    rng: StdRng,
    template: Vec<f64>,
    trough_offset: u64,
    channels: Vec<ChannelSchedule>,
    ground_truth: Vec<Vec<u64>>,
    total_ticks: Option<u64>,
    dropout_ticks: Option<(u64, u64)>,
    tick: u64,
}

impl SyntheticSource {
    pub fn new(config: SyntheticConfig) -> Self {
        let fs = config.sampling_frequency_hz;
        let template = spike_template(config.spike_amplitude, fs);
        let trough_offset = template
            .iter()
            .enumerate()
            .fold((0, 0.0), |best, (i, &v)| if v < best.1 { (i, v) } else { best })
            .0 as u64;

        let mut rng = StdRng::seed_from_u64(config.seed);
        let mut channels = Vec::with_capacity(config.num_channels);
        for _ in 0..config.num_channels {
            let first = next_interval_ticks(&mut rng, &config);
            channels.push(ChannelSchedule {
                next_onset: first,
                active_onset: None,
            });
        }

        let total_ticks = config.duration_s.map(|d| (d * fs).round() as u64);
        let dropout_ticks = config
            .dropout
            .map(|(start, end)| ((start * fs).round() as u64, (end * fs).round() as u64));

        Self {
            ground_truth: vec![Vec::new(); config.num_channels],
            config,
            rng,
            template,
            trough_offset,
            channels,
            total_ticks,
            dropout_ticks,
            tick: 0,
        }
    }

    /// Sample indices of every spike trough emitted so far, per channel
    pub fn ground_truth(&self) -> &[Vec<u64>] {
        &self.ground_truth
    }

    pub fn ticks_emitted(&self) -> u64 {
        self.tick
    }

    fn in_dropout(&self) -> bool {
        self.dropout_ticks
            .map(|(start, end)| self.tick >= start && self.tick < end)
            .unwrap_or(false)
    }
}

impl AcquisitionSource for SyntheticSource {
    fn channel_count(&self) -> usize {
        self.config.num_channels
    }

    fn sampling_frequency_hz(&self) -> f64 {
        self.config.sampling_frequency_hz
    }

    fn read_tick(&mut self, frame: &mut [f64]) -> bool {
        if let Some(total) = self.total_ticks {
            if self.tick >= total {
                return false;
            }
        }
        let tick = self.tick;
        let dropout = self.in_dropout();

        for (channel, slot) in frame.iter_mut().enumerate().take(self.config.num_channels) {
            let schedule = &mut self.channels[channel];
            if tick == schedule.next_onset {
                schedule.active_onset = Some(tick);
                let trough = tick + self.trough_offset;
                if self.total_ticks.map_or(true, |total| trough < total) {
                    self.ground_truth[channel].push(trough);
                }
                schedule.next_onset =
                    tick.saturating_add(next_interval_ticks(&mut self.rng, &self.config));
            }

            let mut voltage = gaussian(&mut self.rng) * self.config.noise_rms;
            if let Some(onset) = schedule.active_onset {
                let offset = (tick - onset) as usize;
                match self.template.get(offset) {
                    Some(v) => voltage += v,
                    None => schedule.active_onset = None,
                }
            }

            *slot = if dropout { 0.0 } else { voltage };
        }

        self.tick += 1;
        true
    }
}

/// Biphasic spike: trough at 0.3 ms, rebound of 40% depth at 0.8 ms
fn spike_template(amplitude: f64, fs: f64) -> Vec<f64> {
    let len = (1.6e-3 * fs).ceil().max(1.0) as usize;
    (0..len)
        .map(|i| {
            let t = i as f64 / fs;
            let trough = (-(t - 0.3e-3).powi(2) / (2.0 * 0.15e-3_f64.powi(2))).exp();
            let rebound = (-(t - 0.8e-3).powi(2) / (2.0 * 0.3e-3_f64.powi(2))).exp();
            -amplitude * trough + 0.4 * amplitude * rebound
        })
        .collect()
}

fn next_interval_ticks(rng: &mut StdRng, config: &SyntheticConfig) -> u64 {
    let fs = config.sampling_frequency_hz;
    let gap = config.min_gap_ms * 1e-3;
    let exponential = if config.spike_rate_hz > 0.0 {
        let u: f64 = rng.gen();
        -(1.0 - u).ln() / config.spike_rate_hz
    } else {
        f64::INFINITY
    };
    let seconds = gap + exponential;
    if seconds.is_finite() {
        ((seconds * fs).round() as u64).max(1)
    } else {
        u64::MAX
    }
}

/// Unit-variance noise from the sum of 12 uniforms
fn gaussian(rng: &mut StdRng) -> f64 {
    (0..12).map(|_| rng.gen::<f64>()).sum::<f64>() - 6.0
}

/// Multichannel WAV replay, one frame per tick
pub struct WavSource {
    samples: Vec<f64>,
    channels: usize,
    sampling_frequency_hz: f64,
    position: usize,
}

impl WavSource {
    /// Open a WAV file; normalized samples are scaled by `volts_per_unit`
    pub fn open(path: &Path, volts_per_unit: f64) -> Result<Self, EngineError> {
        let (samples, channels, sample_rate) = read_wav(path)?;
        log::info!(
            "[WavSource] Loaded {:?}: {} channels, {} Hz, {} frames",
            path,
            channels,
            sample_rate,
            samples.len() / channels
        );
        Ok(Self {
            samples: samples
                .into_iter()
                .map(|s| s as f64 * volts_per_unit)
                .collect(),
            channels,
            sampling_frequency_hz: sample_rate as f64,
            position: 0,
        })
    }

    pub fn frame_count(&self) -> usize {
        self.samples.len() / self.channels
    }
}

impl AcquisitionSource for WavSource {
    fn channel_count(&self) -> usize {
        self.channels
    }

    fn sampling_frequency_hz(&self) -> f64 {
        self.sampling_frequency_hz
    }

    fn read_tick(&mut self, frame: &mut [f64]) -> bool {
        let start = self.position * self.channels;
        let end = start + self.channels;
        if end > self.samples.len() {
            return false;
        }
        let n = frame.len().min(self.channels);
        frame[..n].copy_from_slice(&self.samples[start..start + n]);
        self.position += 1;
        true
    }
}

fn source_failed(path: &Path, detail: impl std::fmt::Display) -> EngineError {
    EngineError::SourceFailed {
        reason: format!("{}: {detail}", path.display()),
    }
}

/// Read an interleaved WAV into normalized f32 samples
fn read_wav(path: &Path) -> Result<(Vec<f32>, usize, u32), EngineError> {
    let mut reader = hound::WavReader::open(path).map_err(|err| source_failed(path, err))?;
    let spec = reader.spec();
    if spec.channels == 0 {
        return Err(source_failed(path, "zero channels"));
    }

    let samples = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<Result<Vec<f32>, _>>()
            .map_err(|err| source_failed(path, err))?,
        hound::SampleFormat::Int => {
            let full_scale = match spec.bits_per_sample {
                16 => i16::MAX as f32,
                24 => 8_388_607.0,
                32 => i32::MAX as f32,
                bits => {
                    return Err(source_failed(
                        path,
                        format!("unsupported bits_per_sample={bits}"),
                    ))
                }
            };
            reader
                .samples::<i32>()
                .map(|sample| sample.map(|v| v as f32 / full_scale))
                .collect::<Result<Vec<f32>, _>>()
                .map_err(|err| source_failed(path, err))?
        }
    };

    Ok((samples, spec.channels as usize, spec.sample_rate))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quiet_config() -> SyntheticConfig {
        SyntheticConfig {
            num_channels: 2,
            duration_s: Some(0.5),
            ..SyntheticConfig::default()
        }
    }

    #[test]
    fn test_synthetic_is_deterministic_per_seed() {
        let mut a = SyntheticSource::new(quiet_config());
        let mut b = SyntheticSource::new(quiet_config());
        let mut fa = [0.0; 2];
        let mut fb = [0.0; 2];
        for _ in 0..1_000 {
            assert!(a.read_tick(&mut fa));
            assert!(b.read_tick(&mut fb));
            assert_eq!(fa, fb);
        }
    }

    #[test]
    fn test_synthetic_stops_after_duration() {
        let mut source = SyntheticSource::new(quiet_config());
        let mut frame = [0.0; 2];
        let mut ticks = 0;
        while source.read_tick(&mut frame) {
            ticks += 1;
        }
        assert_eq!(ticks, 10_000);
        assert!(!source.read_tick(&mut frame));
    }

    #[test]
    fn test_ground_truth_respects_refractory_gap() {
        let mut source = SyntheticSource::new(SyntheticConfig {
            spike_rate_hz: 50.0,
            ..quiet_config()
        });
        let mut frame = [0.0; 2];
        while source.read_tick(&mut frame) {}
        for truth in source.ground_truth() {
            assert!(!truth.is_empty());
            for pair in truth.windows(2) {
                assert!(pair[1] - pair[0] >= 100, "5 ms gap at 20 kHz");
            }
        }
    }

    #[test]
    fn test_template_shape() {
        let template = spike_template(60e-6, 20_000.0);
        let min = template.iter().cloned().fold(f64::INFINITY, f64::min);
        let max = template.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        assert!(min < -50e-6);
        assert!(max > 0.0 && max < 30e-6);
    }

    #[test]
    fn test_dropout_reads_exact_zero() {
        let mut source = SyntheticSource::new(SyntheticConfig {
            dropout: Some((0.1, 0.2)),
            ..quiet_config()
        });
        let mut frame = [0.0; 2];
        for tick in 0..4_000u64 {
            source.read_tick(&mut frame);
            if (2_000..4_000).contains(&tick) {
                assert_eq!(frame, [0.0, 0.0]);
            }
        }
    }

    #[test]
    fn test_wav_source_missing_file() {
        let err = WavSource::open(Path::new("/nonexistent/recording.wav"), 1.0)
            .err()
            .unwrap();
        assert!(matches!(err, EngineError::SourceFailed { .. }));
    }

    #[test]
    fn test_wav_source_replays_frames() {
        let path = std::env::temp_dir().join(format!("mea_wav_source_{}.wav", std::process::id()));
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 10_000,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        for v in [0.5f32, -0.25, 0.125, 1.0] {
            writer.write_sample(v).unwrap();
        }
        writer.finalize().unwrap();

        let mut source = WavSource::open(&path, 1e-3).unwrap();
        assert_eq!(source.channel_count(), 2);
        assert_eq!(source.sampling_frequency_hz(), 10_000.0);
        assert_eq!(source.frame_count(), 2);

        let mut frame = [0.0; 2];
        assert!(source.read_tick(&mut frame));
        assert!((frame[0] - 0.5e-3).abs() < 1e-12);
        assert!((frame[1] + 0.25e-3).abs() < 1e-12);
        assert!(source.read_tick(&mut frame));
        assert!(!source.read_tick(&mut frame));
        let _ = std::fs::remove_file(path);
    }
}
