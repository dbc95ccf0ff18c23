//! Configuration management for acquisition, detection, and raster display
//!
//! Parameters are loaded from JSON so detection settings can be tuned without
//! recompilation. Millisecond-based settings are resolved into sample counts
//! by [`DetectionParams::resolve`] once the sampling frequency is known.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::ConfigError;

/// Voltage below which a sample counts as blanked (0.1 uV)
pub const VOLTAGE_EPSILON: f64 = 0.1e-6;

/// Minimum run of blanked samples that rejects a waveform
pub const BLANKING_RUN_LENGTH: usize = 6;

/// Complete application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    #[serde(default)]
    pub acquisition: AcquisitionConfig,
    #[serde(default)]
    pub detection: DetectionConfig,
    #[serde(default)]
    pub raster: RasterConfig,
}

/// Real-time intake parameters
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AcquisitionConfig {
    /// Number of electrode channels read per tick
    pub num_channels: usize,
    /// Sampling frequency of the real-time loop in Hz
    pub sampling_frequency_hz: f64,
    /// Capacity of each per-channel voltage ring in samples
    pub voltage_buffer_capacity: usize,
    /// Capacity of the global spike event ring
    pub event_buffer_capacity: usize,
    /// Cadence of the detection cycle in milliseconds
    pub detection_window_ms: f64,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            num_channels: 60,
            sampling_frequency_hz: 20_000.0,
            voltage_buffer_capacity: 2_000,
            event_buffer_capacity: 10_000,
            detection_window_ms: 50.0,
        }
    }
}

/// Which side(s) of the baseline count as a threshold crossing
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdPolarity {
    #[default]
    Bipolar,
    NegativeOnly,
    PositiveOnly,
}

/// Spike detection parameters as entered by the operator
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DetectionConfig {
    pub threshold_polarity: ThresholdPolarity,
    /// Detection level as a multiple of the trained RMS estimate
    pub threshold_multiplier: f64,
    /// Samples kept before the peak in an extracted waveform
    pub num_pre: usize,
    /// Samples kept after the peak in an extracted waveform
    pub num_post: usize,
    pub max_spike_width_ms: f64,
    pub min_spike_width_ms: f64,
    /// Volts
    pub max_spike_amp: f64,
    /// Volts per sample
    pub min_spike_slope: f64,
    pub dead_time_ms: f64,
    /// Stride used when computing block RMS
    pub downsample: usize,
    /// Number of blocks folded into the threshold before it freezes
    pub num_updates_for_train: usize,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            threshold_polarity: ThresholdPolarity::Bipolar,
            threshold_multiplier: 5.0,
            num_pre: 10,
            num_post: 20,
            max_spike_width_ms: 0.75,
            min_spike_width_ms: 0.1,
            max_spike_amp: 200e-6,
            min_spike_slope: 0.0,
            dead_time_ms: 1.0,
            downsample: 2,
            num_updates_for_train: 200,
        }
    }
}

/// Raster aggregator parameters
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RasterConfig {
    /// Spikes older than this are evicted from the raster (seconds)
    pub display_time_s: f64,
    /// Cadence of aggregator refreshes in milliseconds
    pub refresh_ms: u64,
    /// Upper bound on events drained per refresh
    pub max_drain_per_refresh: usize,
}

impl Default for RasterConfig {
    fn default() -> Self {
        Self {
            display_time_s: 600.0,
            refresh_ms: 2_000,
            max_drain_per_refresh: 10_000,
        }
    }
}

impl AppConfig {
    /// Load configuration from JSON file
    ///
    /// # Returns
    /// The loaded configuration, or defaults if the file is missing or invalid
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Self {
        match Self::from_json_file(&path) {
            Ok(config) => {
                log::info!("[Config] Loaded configuration from {:?}", path.as_ref());
                config
            }
            Err(err) => {
                log::warn!(
                    "[Config] {} ({:?}). Using defaults.",
                    err,
                    path.as_ref()
                );
                Self::default()
            }
        }
    }

    /// Strict variant of [`AppConfig::load_from_file`]: read, parse, validate
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(&path).map_err(|err| ConfigError::ReadFailed {
            path: path.as_ref().display().to_string(),
            reason: err.to_string(),
        })?;
        let config: AppConfig = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.acquisition.validate()?;
        self.detection.validate()?;
        self.raster.validate()?;
        Ok(())
    }

    /// Number of samples each channel accumulates per detection cycle
    pub fn samples_per_cycle(&self) -> usize {
        let samples = self.acquisition.detection_window_ms * self.acquisition.sampling_frequency_hz
            / 1000.0;
        (samples.round() as usize).max(1)
    }

    pub fn detection_params(&self) -> Result<DetectionParams, ConfigError> {
        DetectionParams::resolve(&self.detection, self.acquisition.sampling_frequency_hz)
    }
}

impl AcquisitionConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.num_channels == 0 {
            return Err(out_of_range("num_channels", 0.0));
        }
        if !is_positive(self.sampling_frequency_hz) {
            return Err(out_of_range(
                "sampling_frequency_hz",
                self.sampling_frequency_hz,
            ));
        }
        if self.voltage_buffer_capacity == 0 {
            return Err(out_of_range("voltage_buffer_capacity", 0.0));
        }
        if self.event_buffer_capacity == 0 {
            return Err(out_of_range("event_buffer_capacity", 0.0));
        }
        if !is_positive(self.detection_window_ms) {
            return Err(out_of_range("detection_window_ms", self.detection_window_ms));
        }
        Ok(())
    }
}

impl DetectionConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !is_positive(self.threshold_multiplier) {
            return Err(out_of_range(
                "threshold_multiplier",
                self.threshold_multiplier,
            ));
        }
        if !is_positive(self.max_spike_width_ms) {
            return Err(out_of_range("max_spike_width_ms", self.max_spike_width_ms));
        }
        if self.min_spike_width_ms < 0.0 {
            return Err(out_of_range("min_spike_width_ms", self.min_spike_width_ms));
        }
        if self.min_spike_width_ms > self.max_spike_width_ms {
            return Err(ConfigError::WidthBoundsInverted {
                min_ms: self.min_spike_width_ms,
                max_ms: self.max_spike_width_ms,
            });
        }
        if !is_positive(self.max_spike_amp) {
            return Err(out_of_range("max_spike_amp", self.max_spike_amp));
        }
        if self.dead_time_ms < 0.0 {
            return Err(out_of_range("dead_time_ms", self.dead_time_ms));
        }
        if self.downsample == 0 {
            return Err(out_of_range("downsample", 0.0));
        }
        if self.num_updates_for_train == 0 {
            return Err(out_of_range("num_updates_for_train", 0.0));
        }
        Ok(())
    }
}

impl RasterConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !is_positive(self.display_time_s) {
            return Err(out_of_range("display_time_s", self.display_time_s));
        }
        if self.max_drain_per_refresh == 0 {
            return Err(out_of_range("max_drain_per_refresh", 0.0));
        }
        Ok(())
    }
}

/// NaN is not positive
fn is_positive(value: f64) -> bool {
    value > 0.0
}

fn out_of_range(field: &'static str, value: f64) -> ConfigError {
    ConfigError::OutOfRange { field, value }
}

/// Detection parameters resolved into the sample domain
///
/// This is what the detection cycle actually runs on. It is rebuilt whenever
/// a parameter patch is applied, and only between cycles.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionParams {
    pub polarity: ThresholdPolarity,
    pub threshold_multiplier: f64,
    pub num_pre: usize,
    pub num_post: usize,
    pub max_spike_width: usize,
    pub min_spike_width: usize,
    pub max_spike_amp: f64,
    pub min_spike_slope: f64,
    pub dead_time: usize,
    pub downsample: usize,
    pub num_updates_for_train: usize,
    pub sample_period_s: f64,
}

impl DetectionParams {
    pub fn resolve(
        config: &DetectionConfig,
        sampling_frequency_hz: f64,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        if !is_positive(sampling_frequency_hz) {
            return Err(out_of_range("sampling_frequency_hz", sampling_frequency_hz));
        }
        let to_samples = |ms: f64| (ms * sampling_frequency_hz / 1000.0).round() as usize;

        let max_spike_width = to_samples(config.max_spike_width_ms).max(1);
        let min_spike_width = to_samples(config.min_spike_width_ms).min(max_spike_width);

        Ok(Self {
            polarity: config.threshold_polarity,
            threshold_multiplier: config.threshold_multiplier,
            num_pre: config.num_pre,
            num_post: config.num_post,
            max_spike_width,
            min_spike_width,
            max_spike_amp: config.max_spike_amp,
            min_spike_slope: config.min_spike_slope,
            dead_time: to_samples(config.dead_time_ms),
            downsample: config.downsample,
            num_updates_for_train: config.num_updates_for_train,
            sample_period_s: 1.0 / sampling_frequency_hz,
        })
    }

    /// Samples retained from one block to prefix the next
    pub fn carry_over_length(&self) -> usize {
        self.num_pre + self.max_spike_width + self.num_post
    }

    /// Length of an extracted spike waveform
    pub fn waveform_len(&self) -> usize {
        self.num_pre + self.num_post + 1
    }
}
