// Per-channel RMS threshold estimator
//
// Trains on the first `num_updates_for_train` non-silent blocks using a
// running mean of block RMS values, then replaces the running mean with the
// arithmetic mean of the training list and freezes.

/// What a call to [`ThresholdEstimator::update`] did
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ThresholdUpdate {
    /// Block summed to exactly zero (acquisition inactive) or had no usable samples
    Skipped,
    /// Block folded into the running mean; `count` blocks applied so far
    Training { count: usize },
    /// Training finished on this block; the threshold is now frozen
    Trained { threshold: f64 },
    /// Already frozen, block ignored
    Frozen,
}

#[derive(Debug, Clone)]
pub struct ThresholdEstimator {
    threshold: f64,
    num_updates: usize,
    training: Vec<f64>,
    trained: bool,
}

impl ThresholdEstimator {
    pub fn new(num_updates_for_train: usize) -> Self {
        Self {
            threshold: 0.0,
            num_updates: 0,
            training: Vec::with_capacity(num_updates_for_train),
            trained: false,
        }
    }

    /// Current RMS estimate (running mean while training)
    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn num_updates(&self) -> usize {
        self.num_updates
    }

    pub fn is_trained(&self) -> bool {
        self.trained
    }

    /// Forget everything and start training again
    pub fn reset(&mut self) {
        self.threshold = 0.0;
        self.num_updates = 0;
        self.training.clear();
        self.trained = false;
    }

    /// Fold one block of freshly acquired samples into the estimate
    pub fn update(
        &mut self,
        samples: &[f64],
        downsample: usize,
        num_updates_for_train: usize,
    ) -> ThresholdUpdate {
        if self.trained {
            return ThresholdUpdate::Frozen;
        }
        // Training count lowered by a reconfiguration below what we already have
        if self.num_updates > 0 && self.num_updates >= num_updates_for_train {
            return self.freeze();
        }
        if samples.iter().sum::<f64>() == 0.0 {
            return ThresholdUpdate::Skipped;
        }
        let Some(rms) = block_rms(samples, downsample) else {
            return ThresholdUpdate::Skipped;
        };

        let k = self.num_updates as f64;
        self.threshold = self.threshold * k / (k + 1.0) + rms / (k + 1.0);
        self.training.push(rms);
        self.num_updates += 1;

        if self.num_updates == num_updates_for_train {
            self.freeze()
        } else {
            ThresholdUpdate::Training {
                count: self.num_updates,
            }
        }
    }

    fn freeze(&mut self) -> ThresholdUpdate {
        self.threshold = self.training.iter().sum::<f64>() / self.training.len() as f64;
        self.trained = true;
        ThresholdUpdate::Trained {
            threshold: self.threshold,
        }
    }
}

/// RMS over every `downsample`-th sample, ignoring blanked (exactly zero) samples
///
/// Returns `None` when no sampled value is non-zero.
pub fn block_rms(samples: &[f64], downsample: usize) -> Option<f64> {
    let (sum_sq, count) = samples
        .iter()
        .step_by(downsample.max(1))
        .filter(|&&v| v != 0.0)
        .fold((0.0, 0usize), |(acc, n), &v| (acc + v * v, n + 1));
    (count > 0).then(|| (sum_sq / count as f64).sqrt())
}
