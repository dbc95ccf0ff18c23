// Spike validator - five shape checks applied in order, first failure wins

use serde::{Deserialize, Serialize};

use crate::config::{DetectionParams, BLANKING_RUN_LENGTH, VOLTAGE_EPSILON};

/// Why a candidate waveform was not accepted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rejection {
    WidthOutOfBounds,
    TooLarge,
    TailEnd,
    ShallowSlope,
    Blanked,
}

impl Rejection {
    pub const ALL: [Rejection; 5] = [
        Rejection::WidthOutOfBounds,
        Rejection::TooLarge,
        Rejection::TailEnd,
        Rejection::ShallowSlope,
        Rejection::Blanked,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Rejection::WidthOutOfBounds => "width_out_of_bounds",
            Rejection::TooLarge => "too_large",
            Rejection::TailEnd => "tail_end",
            Rejection::ShallowSlope => "shallow_slope",
            Rejection::Blanked => "blanked",
        }
    }
}

/// Rejection tallies, indexed like [`Rejection::ALL`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectionCounts {
    pub width_out_of_bounds: u64,
    pub too_large: u64,
    pub tail_end: u64,
    pub shallow_slope: u64,
    pub blanked: u64,
}

impl RejectionCounts {
    pub fn record(&mut self, rejection: Rejection) {
        *self.slot(rejection) += 1;
    }

    pub fn get(&self, rejection: Rejection) -> u64 {
        match rejection {
            Rejection::WidthOutOfBounds => self.width_out_of_bounds,
            Rejection::TooLarge => self.too_large,
            Rejection::TailEnd => self.tail_end,
            Rejection::ShallowSlope => self.shallow_slope,
            Rejection::Blanked => self.blanked,
        }
    }

    pub fn total(&self) -> u64 {
        Rejection::ALL.iter().map(|r| self.get(*r)).sum()
    }

    pub fn merge(&mut self, other: &RejectionCounts) {
        for rejection in Rejection::ALL {
            *self.slot(rejection) += other.get(rejection);
        }
    }

    fn slot(&mut self, rejection: Rejection) -> &mut u64 {
        match rejection {
            Rejection::WidthOutOfBounds => &mut self.width_out_of_bounds,
            Rejection::TooLarge => &mut self.too_large,
            Rejection::TailEnd => &mut self.tail_end,
            Rejection::ShallowSlope => &mut self.shallow_slope,
            Rejection::Blanked => &mut self.blanked,
        }
    }
}

/// Validate a peak-centred waveform of `num_pre + num_post + 1` samples
pub fn validate(waveform: &[f64], width: usize, params: &DetectionParams) -> Result<(), Rejection> {
    debug_assert_eq!(waveform.len(), params.waveform_len());
    let pre = params.num_pre;

    if width < params.min_spike_width || width > params.max_spike_width {
        return Err(Rejection::WidthOutOfBounds);
    }

    let peak = waveform[pre].abs();
    if peak >= params.max_spike_amp {
        return Err(Rejection::TooLarge);
    }

    if waveform[0].abs() >= peak {
        return Err(Rejection::TailEnd);
    }

    if mean_abs_slope(waveform, width, pre) <= params.min_spike_slope {
        return Err(Rejection::ShallowSlope);
    }

    if has_blanking_run(waveform) {
        return Err(Rejection::Blanked);
    }

    Ok(())
}

/// Mean |first difference| over `min(width + 2, num_pre)` samples centred on `num_pre`
fn mean_abs_slope(waveform: &[f64], width: usize, pre: usize) -> f64 {
    let span = (width + 2).min(pre);
    let start = pre - span / 2;
    let end = (start + span).min(waveform.len());
    let window = &waveform[start..end];
    if window.len() < 2 {
        return 0.0;
    }
    let total: f64 = window.windows(2).map(|pair| (pair[1] - pair[0]).abs()).sum();
    total / (window.len() - 1) as f64
}

fn has_blanking_run(waveform: &[f64]) -> bool {
    let mut run = 0;
    for v in waveform {
        if v.abs() < VOLTAGE_EPSILON {
            run += 1;
            if run >= BLANKING_RUN_LENGTH {
                return true;
            }
        } else {
            run = 0;
        }
    }
    false
}
