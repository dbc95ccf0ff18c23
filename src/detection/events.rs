// Spike events and the global event channel
//
// The detection cycle is the only publisher and the raster aggregator the
// only reader. Events move through the ring by value; a full ring drops the
// new event and bumps the shared drop counter.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::acquisition::ring::{ring_channel, RingReceiver, RingSender};

/// One validated spike
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpikeEvent {
    pub channel: usize,
    /// Absolute index of the peak sample since acquisition start
    pub sample_index: u64,
    /// `sample_index * dt`, seconds
    pub timestamp_s: f64,
    /// Detection level in force when the spike was found, volts
    pub threshold: f64,
    /// `num_pre + num_post + 1` samples centred on the peak, volts
    pub waveform: Vec<f64>,
}

/// Publish/drop counters shared by both ends of the event channel
#[derive(Debug, Clone, Default)]
pub struct EventCounters {
    published: Arc<AtomicU64>,
    dropped: Arc<AtomicU64>,
}

impl EventCounters {
    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

pub fn spike_event_channel(capacity: usize) -> (EventPublisher, SpikeEventReceiver) {
    let (sender, receiver) = ring_channel(capacity);
    let counters = EventCounters::default();
    (
        EventPublisher {
            sender,
            counters: counters.clone(),
            cycle_published: 0,
        },
        SpikeEventReceiver { receiver, counters },
    )
}

#[derive(Debug)]
pub struct EventPublisher {
    sender: RingSender<SpikeEvent>,
    counters: EventCounters,
    cycle_published: usize,
}

impl EventPublisher {
    /// Push an accepted spike; `false` if the channel was full and it was dropped
    pub fn publish(&mut self, event: SpikeEvent) -> bool {
        if self.sender.push(event) {
            self.counters.published.fetch_add(1, Ordering::Relaxed);
            self.cycle_published += 1;
            true
        } else {
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            false
        }
    }

    /// Reset the per-cycle spike counter
    pub fn begin_cycle(&mut self) {
        self.cycle_published = 0;
    }

    /// Spikes published since the last [`EventPublisher::begin_cycle`]
    pub fn cycle_published(&self) -> usize {
        self.cycle_published
    }

    pub fn counters(&self) -> &EventCounters {
        &self.counters
    }

    pub fn free_slots(&self) -> usize {
        self.sender.free_slots()
    }
}

/// Pull side handed to the raster aggregator
#[derive(Debug)]
pub struct SpikeEventReceiver {
    receiver: RingReceiver<SpikeEvent>,
    counters: EventCounters,
}

impl SpikeEventReceiver {
    /// Take up to `max` buffered events in publish order
    pub fn drain(&mut self, max: usize) -> Vec<SpikeEvent> {
        let mut out = Vec::with_capacity(max.min(self.receiver.len()));
        self.receiver.drain_into(&mut out, max);
        out
    }

    pub fn pending(&self) -> usize {
        self.receiver.len()
    }

    pub fn occupancy_percent(&self) -> f32 {
        self.receiver.occupancy_percent()
    }

    /// True once the publisher has gone away
    pub fn is_closed(&self) -> bool {
        self.receiver.is_abandoned()
    }

    pub fn counters(&self) -> &EventCounters {
        &self.counters
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(channel: usize, sample_index: u64) -> SpikeEvent {
        SpikeEvent {
            channel,
            sample_index,
            timestamp_s: sample_index as f64 * 50e-6,
            threshold: 25e-6,
            waveform: vec![0.0; 31],
        }
    }

    #[test]
    fn test_publish_and_drain_in_order() {
        let (mut publisher, mut receiver) = spike_event_channel(8);
        publisher.begin_cycle();
        for i in 0..5 {
            assert!(publisher.publish(event(i % 2, i as u64 * 100)));
        }
        assert_eq!(publisher.cycle_published(), 5);

        let first = receiver.drain(3);
        assert_eq!(
            first.iter().map(|e| e.sample_index).collect::<Vec<_>>(),
            vec![0, 100, 200]
        );
        assert_eq!(receiver.pending(), 2);
        assert_eq!(receiver.drain(100).len(), 2);
        assert_eq!(receiver.counters().published(), 5);
    }

    #[test]
    fn test_full_channel_drops_newest() {
        let (mut publisher, mut receiver) = spike_event_channel(2);
        assert!(publisher.publish(event(0, 1)));
        assert!(publisher.publish(event(0, 2)));
        assert!(!publisher.publish(event(0, 3)));
        assert_eq!(publisher.counters().dropped(), 1);
        assert_eq!(publisher.cycle_published(), 2);

        let drained = receiver.drain(10);
        assert_eq!(drained[1].sample_index, 2);
        assert_eq!(receiver.counters().dropped(), 1);
    }

    #[test]
    fn test_receiver_debug_reports_counters() {
        let (mut publisher, receiver) = spike_event_channel(1);
        publisher.publish(event(0, 1));
        publisher.publish(event(0, 2));
        let printed = format!("{receiver:?}");
        assert!(printed.contains("SpikeEventReceiver"), "{printed}");
        assert!(printed.contains("len: 1"), "{printed}");
        assert!(printed.contains("dropped: 1"), "{printed}");
    }

    #[test]
    fn test_receiver_sees_closed_publisher() {
        let (publisher, receiver) = spike_event_channel(2);
        assert!(!receiver.is_closed());
        drop(publisher);
        assert!(receiver.is_closed());
    }
}
