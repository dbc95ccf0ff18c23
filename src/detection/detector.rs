// Spike detector - per-channel threshold-crossing state machine
//
// Scans one voltage block (carry-over tail + fresh samples) for excursions
// beyond the detection level, measures each excursion's width, locates its
// peak and hands a peak-centred waveform to a caller-supplied judge. Indices:
//
//   [0, num_pre)                    pre-peak context only, never scanned
//   [num_pre + skip, search_limit)  a crossing may begin here
//   [search_limit, scan_end)        an open crossing may still return here
//   [scan_end, len)                 post-peak context only
//
// with search_limit = len - max_spike_width - num_post and
// scan_end = len - num_post. The carry-over tail is exactly the samples from
// search_limit - num_pre onwards, so the next block resumes where this one
// stopped.

use crate::config::{DetectionParams, ThresholdPolarity};

/// State persisted between blocks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DetectorState {
    #[default]
    Idle,
    /// A crossing outlived its block; suppress detection until the level returns
    WaitToComeDown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scan {
    Idle,
    InSpike { enter: usize, positive: bool },
    WaitToComeDown,
}

/// A closed excursion ready for validation
#[derive(Debug, Clone, Copy)]
pub struct Candidate<'a> {
    /// Block-relative index of the largest deflection
    pub peak: usize,
    pub width: usize,
    pub positive: bool,
    /// `num_pre` samples, the peak, then `num_post` samples
    pub waveform: &'a [f64],
}

/// Result of scanning one block
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanOutcome {
    /// Block too short for the configured windows; nothing scanned
    pub skipped: bool,
    pub candidates: usize,
    pub accepted: usize,
    /// A crossing was still open when the block ran out
    pub unterminated: bool,
}

#[derive(Debug, Clone, Default)]
pub struct SpikeDetector {
    state: DetectorState,
    samples_to_skip: usize,
}

impl SpikeDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> DetectorState {
        self.state
    }

    /// Dead time still owed at the start of the next block
    pub fn samples_to_skip(&self) -> usize {
        self.samples_to_skip
    }

    pub fn reset(&mut self) {
        self.state = DetectorState::Idle;
        self.samples_to_skip = 0;
    }

    /// Minimum block length the scan can work with
    pub fn min_block_len(params: &DetectionParams) -> usize {
        params.carry_over_length() + 1
    }

    /// Scan `block` against `level` (already multiplied, volts)
    ///
    /// `judge` is called once per closed excursion and returns whether the
    /// candidate was accepted; acceptance arms the dead time.
    pub fn scan<F>(
        &mut self,
        block: &[f64],
        level: f64,
        params: &DetectionParams,
        mut judge: F,
    ) -> ScanOutcome
    where
        F: FnMut(Candidate<'_>) -> bool,
    {
        let mut outcome = ScanOutcome::default();
        let len = block.len();
        if len < Self::min_block_len(params) {
            outcome.skipped = true;
            return outcome;
        }

        let search_limit = len - params.max_spike_width - params.num_post;
        let scan_end = len - params.num_post;
        debug_assert!(params.num_pre < search_limit && search_limit <= scan_end);

        let mut i = params.num_pre + self.samples_to_skip;
        let mut scan = match self.state {
            DetectorState::Idle => Scan::Idle,
            DetectorState::WaitToComeDown => Scan::WaitToComeDown,
        };

        loop {
            match scan {
                Scan::Idle => {
                    if i >= search_limit {
                        break;
                    }
                    if let Some(positive) = crossing(block[i], level, params.polarity) {
                        scan = Scan::InSpike { enter: i, positive };
                    }
                    i += 1;
                }
                Scan::WaitToComeDown => {
                    if i >= search_limit {
                        break;
                    }
                    if crossing(block[i], level, params.polarity).is_none() {
                        scan = Scan::Idle;
                    }
                    i += 1;
                }
                Scan::InSpike { enter, positive } => {
                    if i >= scan_end {
                        scan = Scan::WaitToComeDown;
                        outcome.unterminated = true;
                        break;
                    }
                    let v = block[i];
                    let returned = if positive { v <= level } else { v >= -level };
                    if !returned {
                        i += 1;
                        continue;
                    }

                    let exit = i;
                    let peak = peak_index(block, enter, exit);
                    let waveform = &block[peak - params.num_pre..=peak + params.num_post];
                    outcome.candidates += 1;
                    let accepted = judge(Candidate {
                        peak,
                        width: exit - enter,
                        positive,
                        waveform,
                    });
                    if accepted {
                        outcome.accepted += 1;
                        i = exit + params.dead_time;
                    } else {
                        i = exit + 1;
                    }
                    scan = Scan::Idle;
                }
            }
        }

        match scan {
            Scan::Idle => {
                self.state = DetectorState::Idle;
                self.samples_to_skip = i.saturating_sub(search_limit);
            }
            Scan::WaitToComeDown | Scan::InSpike { .. } => {
                self.state = DetectorState::WaitToComeDown;
                self.samples_to_skip = 0;
            }
        }
        outcome
    }
}

/// Polarity-aware crossing test; `Some(true)` for an upward excursion
fn crossing(v: f64, level: f64, polarity: ThresholdPolarity) -> Option<bool> {
    match polarity {
        ThresholdPolarity::Bipolar if v > level => Some(true),
        ThresholdPolarity::Bipolar if v < -level => Some(false),
        ThresholdPolarity::PositiveOnly if v > level => Some(true),
        ThresholdPolarity::NegativeOnly if v < -level => Some(false),
        _ => None,
    }
}

/// First index of the largest |v| in `[enter, exit)`
fn peak_index(block: &[f64], enter: usize, exit: usize) -> usize {
    let mut best = enter;
    for j in enter + 1..exit {
        if block[j].abs() > block[best].abs() {
            best = j;
        }
    }
    best
}
