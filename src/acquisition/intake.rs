// Per-channel voltage intake
//
// The real-time thread owns `VoltageIntake` and pushes one sample per channel
// per tick. The detection cycle owns `VoltageTaps` and drains each channel's
// ring into that channel's pending block. Drop counters are plain atomics so
// the real-time side never locks, allocates, or logs.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::ring::{ring_channel, RingReceiver, RingSender};

/// Shared counters written by the producer and read anywhere
#[derive(Clone)]
pub struct IntakeCounters {
    ticks: Arc<AtomicU64>,
    dropped: Arc<[AtomicU64]>,
}

impl IntakeCounters {
    fn new(num_channels: usize) -> Self {
        let dropped: Vec<AtomicU64> = (0..num_channels).map(|_| AtomicU64::new(0)).collect();
        Self {
            ticks: Arc::new(AtomicU64::new(0)),
            dropped: dropped.into(),
        }
    }

    /// Ticks pushed by the producer so far
    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    /// Samples dropped on `channel` because its ring was full
    pub fn dropped(&self, channel: usize) -> u64 {
        self.dropped
            .get(channel)
            .map(|counter| counter.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    pub fn total_dropped(&self) -> u64 {
        self.dropped
            .iter()
            .map(|counter| counter.load(Ordering::Relaxed))
            .sum()
    }

    pub fn num_channels(&self) -> usize {
        self.dropped.len()
    }
}

/// Create the per-channel voltage rings
///
/// # Panics
/// Panics if `num_channels` or `capacity` is 0
pub fn voltage_channels(num_channels: usize, capacity: usize) -> (VoltageIntake, VoltageTaps) {
    assert!(num_channels > 0, "num_channels must be greater than 0");
    let counters = IntakeCounters::new(num_channels);
    let (senders, receivers): (Vec<_>, Vec<_>) =
        (0..num_channels).map(|_| ring_channel(capacity)).unzip();

    (
        VoltageIntake {
            senders,
            counters: counters.clone(),
        },
        VoltageTaps {
            receivers,
            counters,
        },
    )
}

/// Producer side, owned by the real-time loop
pub struct VoltageIntake {
    senders: Vec<RingSender<f64>>,
    counters: IntakeCounters,
}

impl VoltageIntake {
    /// Push one tick worth of voltages (one per channel)
    ///
    /// Real-time safe: O(channels), no allocation, no locks. Returns the number
    /// of samples dropped on this tick.
    pub fn push_tick(&mut self, voltages: &[f64]) -> usize {
        debug_assert_eq!(voltages.len(), self.senders.len());
        let mut dropped = 0;
        for (channel, (sender, &voltage)) in self.senders.iter_mut().zip(voltages).enumerate() {
            if !sender.push(voltage) {
                self.counters.dropped[channel].fetch_add(1, Ordering::Relaxed);
                dropped += 1;
            }
        }
        self.counters.ticks.fetch_add(1, Ordering::Relaxed);
        dropped
    }

    pub fn num_channels(&self) -> usize {
        self.senders.len()
    }

    pub fn counters(&self) -> &IntakeCounters {
        &self.counters
    }
}

/// Consumer side, owned by the detection cycle
pub struct VoltageTaps {
    receivers: Vec<RingReceiver<f64>>,
    counters: IntakeCounters,
}

impl VoltageTaps {
    /// Move the samples resident in `channel`'s ring onto the end of `block`
    ///
    /// Only what is buffered when the drain starts is taken. Drops counted
    /// right after the drain therefore lie after every drained sample.
    pub fn drain_channel(&mut self, channel: usize, block: &mut Vec<f64>) -> usize {
        match self.receivers.get_mut(channel) {
            Some(receiver) => {
                let resident = receiver.len();
                receiver.drain_into(block, resident)
            }
            None => 0,
        }
    }

    pub fn pending(&self, channel: usize) -> usize {
        self.receivers.get(channel).map(|r| r.len()).unwrap_or(0)
    }

    pub fn total_pending(&self) -> usize {
        self.receivers.iter().map(|r| r.len()).sum()
    }

    /// Highest occupancy across channels, in percent
    pub fn peak_occupancy_percent(&self) -> f32 {
        self.receivers
            .iter()
            .map(|r| r.occupancy_percent())
            .fold(0.0_f32, f32::max)
    }

    pub fn num_channels(&self) -> usize {
        self.receivers.len()
    }

    pub fn counters(&self) -> &IntakeCounters {
        &self.counters
    }
}
