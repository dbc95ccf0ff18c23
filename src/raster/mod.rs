//! Raster aggregator: the display-side consumer of the spike event channel.
//!
//! Sole reader of the event ring and sole writer of the raster history, so no
//! locking is involved. Each refresh drains a bounded number of events,
//! records a `(time, channel)` point per spike and ages out points older than
//! the display window.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::config::RasterConfig;
use crate::detection::{SpikeEvent, SpikeEventReceiver};

/// One dot on the raster plot
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RasterPoint {
    pub time_s: f64,
    pub channel: usize,
}

/// Outcome of one [`RasterAggregator::refresh`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshOutcome {
    pub drained: usize,
    pub evicted: usize,
}

/// Serializable view of the raster for reports
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RasterSnapshot {
    pub window_start_s: f64,
    pub window_end_s: f64,
    pub points: Vec<RasterPoint>,
    /// Spikes per channel since the last clear
    pub channel_counts: Vec<u64>,
    /// Spikes per second per channel over the visible window
    pub firing_rates_hz: Vec<f64>,
    pub total_drained: u64,
}

pub struct RasterAggregator {
    receiver: SpikeEventReceiver,
    config: RasterConfig,
    points: VecDeque<RasterPoint>,
    channel_counts: Vec<u64>,
    latest_spikes: Vec<Option<SpikeEvent>>,
    total_drained: u64,
    last_refresh_s: f64,
}

impl RasterAggregator {
    pub fn new(receiver: SpikeEventReceiver, num_channels: usize, config: RasterConfig) -> Self {
        Self {
            receiver,
            config,
            points: VecDeque::new(),
            channel_counts: vec![0; num_channels],
            latest_spikes: vec![None; num_channels],
            total_drained: 0,
            last_refresh_s: 0.0,
        }
    }

    /// Drain pending spikes and evict anything older than the display window
    pub fn refresh(&mut self, now_s: f64) -> RefreshOutcome {
        self.refresh_with(now_s, |_| {})
    }

    /// Like [`RasterAggregator::refresh`], showing each drained event to `observe` first
    pub fn refresh_with<F>(&mut self, now_s: f64, mut observe: F) -> RefreshOutcome
    where
        F: FnMut(&SpikeEvent),
    {
        let events = self.receiver.drain(self.config.max_drain_per_refresh);
        let drained = events.len();

        for event in events {
            observe(&event);
            self.points.push_back(RasterPoint {
                time_s: event.timestamp_s,
                channel: event.channel,
            });
            if let Some(count) = self.channel_counts.get_mut(event.channel) {
                *count += 1;
            }
            if let Some(slot) = self.latest_spikes.get_mut(event.channel) {
                *slot = Some(event);
            }
        }
        self.total_drained += drained as u64;
        self.last_refresh_s = self.last_refresh_s.max(now_s);

        let cutoff = now_s - self.config.display_time_s;
        let before = self.points.len();
        self.points.retain(|point| point.time_s >= cutoff);
        let evicted = before - self.points.len();

        if drained > 0 || evicted > 0 {
            tracing::debug!(
                "[Raster] t={:.3}s drained {} evicted {} ({} visible)",
                now_s,
                drained,
                evicted,
                self.points.len()
            );
        }

        RefreshOutcome { drained, evicted }
    }

    /// Forget all history; pending events stay in the channel
    pub fn clear(&mut self) {
        self.points.clear();
        self.channel_counts.iter_mut().for_each(|count| *count = 0);
        self.latest_spikes.iter_mut().for_each(|slot| *slot = None);
    }

    pub fn points(&self) -> impl Iterator<Item = &RasterPoint> {
        self.points.iter()
    }

    pub fn channel_count(&self, channel: usize) -> u64 {
        self.channel_counts.get(channel).copied().unwrap_or(0)
    }

    /// Most recent spike seen on `channel`, waveform included
    pub fn latest_spike(&self, channel: usize) -> Option<&SpikeEvent> {
        self.latest_spikes.get(channel).and_then(Option::as_ref)
    }

    pub fn total_drained(&self) -> u64 {
        self.total_drained
    }

    pub fn pending(&self) -> usize {
        self.receiver.pending()
    }

    pub fn is_source_closed(&self) -> bool {
        self.receiver.is_closed()
    }

    pub fn snapshot(&self) -> RasterSnapshot {
        let window_end_s = self.last_refresh_s;
        let window_start_s = (window_end_s - self.config.display_time_s).max(0.0);
        let span = (window_end_s - window_start_s).max(f64::EPSILON);

        let mut visible = vec![0u64; self.channel_counts.len()];
        for point in &self.points {
            if let Some(count) = visible.get_mut(point.channel) {
                *count += 1;
            }
        }

        RasterSnapshot {
            window_start_s,
            window_end_s,
            points: self.points.iter().copied().collect(),
            channel_counts: self.channel_counts.clone(),
            firing_rates_hz: visible.iter().map(|&n| n as f64 / span).collect(),
            total_drained: self.total_drained,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::spike_event_channel;

    fn spike(channel: usize, timestamp_s: f64) -> SpikeEvent {
        SpikeEvent {
            channel,
            sample_index: (timestamp_s * 20_000.0) as u64,
            timestamp_s,
            threshold: 25e-6,
            waveform: vec![-1e-6; 31],
        }
    }

    fn config(display_time_s: f64, max_drain: usize) -> RasterConfig {
        RasterConfig {
            display_time_s,
            refresh_ms: 100,
            max_drain_per_refresh: max_drain,
        }
    }

    #[test]
    fn test_refresh_drains_and_counts() {
        let (mut publisher, receiver) = spike_event_channel(16);
        let mut raster = RasterAggregator::new(receiver, 3, config(10.0, 100));
        publisher.publish(spike(0, 0.5));
        publisher.publish(spike(2, 0.6));
        publisher.publish(spike(2, 0.7));

        let outcome = raster.refresh(1.0);
        assert_eq!(outcome, RefreshOutcome { drained: 3, evicted: 0 });
        assert_eq!(raster.channel_count(2), 2);
        assert_eq!(raster.latest_spike(2).unwrap().timestamp_s, 0.7);
        assert!(raster.latest_spike(1).is_none());
    }

    #[test]
    fn test_refresh_respects_drain_limit() {
        let (mut publisher, receiver) = spike_event_channel(16);
        let mut raster = RasterAggregator::new(receiver, 1, config(10.0, 2));
        for i in 0..5 {
            publisher.publish(spike(0, i as f64 * 0.1));
        }
        assert_eq!(raster.refresh(1.0).drained, 2);
        assert_eq!(raster.pending(), 3);
        assert_eq!(raster.refresh(1.0).drained, 2);
        assert_eq!(raster.refresh(1.0).drained, 1);
        assert_eq!(raster.total_drained(), 5);
    }

    #[test]
    fn test_old_points_are_evicted() {
        let (mut publisher, receiver) = spike_event_channel(16);
        let mut raster = RasterAggregator::new(receiver, 2, config(2.0, 100));
        publisher.publish(spike(0, 0.5));
        publisher.publish(spike(1, 2.0));
        raster.refresh(2.4);
        assert_eq!(raster.points().count(), 2);

        let outcome = raster.refresh(3.6);
        assert_eq!(outcome.evicted, 1);
        let remaining: Vec<_> = raster.points().copied().collect();
        assert_eq!(remaining, vec![RasterPoint { time_s: 2.0, channel: 1 }]);
        // cumulative counts survive eviction
        assert_eq!(raster.channel_count(0), 1);
    }

    #[test]
    fn test_clear_and_snapshot() {
        let (mut publisher, receiver) = spike_event_channel(16);
        let mut raster = RasterAggregator::new(receiver, 2, config(4.0, 100));
        for i in 0..4 {
            publisher.publish(spike(1, 1.0 + i as f64 * 0.5));
        }
        raster.refresh(4.0);

        let snapshot = raster.snapshot();
        assert_eq!(snapshot.window_start_s, 0.0);
        assert_eq!(snapshot.window_end_s, 4.0);
        assert_eq!(snapshot.channel_counts, vec![0, 4]);
        assert!((snapshot.firing_rates_hz[1] - 1.0).abs() < 1e-12);
        let json = serde_json::to_string(&snapshot).unwrap();
        assert!(json.contains("firing_rates_hz"));

        raster.clear();
        assert_eq!(raster.points().count(), 0);
        assert_eq!(raster.channel_count(1), 0);
        assert!(raster.latest_spike(1).is_none());
        assert_eq!(raster.total_drained(), 4);
    }

    #[test]
    fn test_refresh_with_observes_in_order() {
        let (mut publisher, receiver) = spike_event_channel(8);
        let mut raster = RasterAggregator::new(receiver, 2, config(10.0, 10));
        publisher.publish(spike(1, 0.1));
        publisher.publish(spike(0, 0.2));
        let mut seen = Vec::new();
        raster.refresh_with(1.0, |event| seen.push(event.channel));
        assert_eq!(seen, vec![1, 0]);
    }

    #[test]
    fn test_unknown_channel_is_plotted_but_not_counted() {
        let (mut publisher, receiver) = spike_event_channel(4);
        let mut raster = RasterAggregator::new(receiver, 1, config(10.0, 10));
        publisher.publish(spike(7, 0.1));
        raster.refresh(0.2);
        assert_eq!(raster.points().count(), 1);
        assert_eq!(raster.channel_count(7), 0);
    }
}
