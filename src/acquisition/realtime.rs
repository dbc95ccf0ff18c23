// Real-time loop - the producer thread of the pipeline
//
// Pulls one frame per tick from an `AcquisitionSource` and pushes it into
// the per-channel voltage rings. Ticks are paced against the wall clock at
// the sampling frequency; when the thread falls behind it catches up in a
// burst rather than skipping samples.
//
// The per-tick path touches only the preallocated frame buffer and the
// rings: no allocation, no locks, no logging.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use super::intake::VoltageIntake;
use super::source::AcquisitionSource;
use crate::error::EngineError;

/// How the loop spaces its ticks
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Pacing {
    /// One tick per sample period of wall-clock time
    WallClock,
    /// As fast as the source produces frames
    Unpaced,
}

/// Outcome of a finished real-time loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RealtimeSummary {
    pub ticks: u64,
    pub dropped_samples: u64,
    /// True when the loop ended because the source ran dry
    pub source_exhausted: bool,
}

pub struct RealtimeLoop {
    source: Box<dyn AcquisitionSource>,
    intake: VoltageIntake,
    running: Arc<AtomicBool>,
    producer_done: Arc<AtomicBool>,
    pacing: Pacing,
}

impl RealtimeLoop {
    pub fn new(
        source: Box<dyn AcquisitionSource>,
        intake: VoltageIntake,
        running: Arc<AtomicBool>,
        producer_done: Arc<AtomicBool>,
        pacing: Pacing,
    ) -> Self {
        Self {
            source,
            intake,
            running,
            producer_done,
            pacing,
        }
    }

    pub fn run(mut self) -> RealtimeSummary {
        // Raised on every exit path, unwinding included, so detection can finish
        let _done = DoneOnDrop(Arc::clone(&self.producer_done));
        let channels = self.intake.num_channels();
        let fs = self.source.sampling_frequency_hz();
        let mut frame = vec![0.0_f64; channels];
        let mut summary = RealtimeSummary::default();
        let started = Instant::now();

        tracing::info!(
            "[RealtimeLoop] Starting: {} channels at {} Hz ({:?})",
            channels,
            fs,
            self.pacing
        );

        'outer: while self.running.load(Ordering::Acquire) {
            let due = match self.pacing {
                Pacing::WallClock => {
                    let target = (started.elapsed().as_secs_f64() * fs) as u64;
                    target.saturating_sub(summary.ticks)
                }
                Pacing::Unpaced => 1,
            };

            if due == 0 {
                thread::sleep(Duration::from_millis(1));
                continue;
            }

            for _ in 0..due {
                if !self.source.read_tick(&mut frame) {
                    summary.source_exhausted = true;
                    break 'outer;
                }
                summary.dropped_samples += self.intake.push_tick(&frame) as u64;
                summary.ticks += 1;
            }
        }

        tracing::info!(
            "[RealtimeLoop] Stopped after {} ticks ({} samples dropped, exhausted={})",
            summary.ticks,
            summary.dropped_samples,
            summary.source_exhausted
        );
        summary
    }
}

struct DoneOnDrop(Arc<AtomicBool>);

impl Drop for DoneOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::Release);
    }
}

/// Spawn the real-time loop on a named thread
pub fn spawn_realtime_thread(
    realtime: RealtimeLoop,
) -> Result<JoinHandle<RealtimeSummary>, EngineError> {
    thread::Builder::new()
        .name("mea-realtime".to_string())
        .spawn(move || realtime.run())
        .map_err(|err| EngineError::ThreadFailed {
            thread: "mea-realtime",
            reason: err.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquisition::intake::voltage_channels;

    struct Counting {
        next: u64,
        limit: u64,
    }

    impl AcquisitionSource for Counting {
        fn channel_count(&self) -> usize {
            2
        }

        fn sampling_frequency_hz(&self) -> f64 {
            1_000.0
        }

        fn read_tick(&mut self, frame: &mut [f64]) -> bool {
            if self.next >= self.limit {
                return false;
            }
            frame[0] = self.next as f64;
            frame[1] = -(self.next as f64);
            self.next += 1;
            true
        }
    }

    #[test]
    fn test_unpaced_loop_runs_source_dry() {
        let (intake, mut taps) = voltage_channels(2, 64);
        let running = Arc::new(AtomicBool::new(true));
        let done = Arc::new(AtomicBool::new(false));
        let realtime = RealtimeLoop::new(
            Box::new(Counting { next: 0, limit: 100 }),
            intake,
            running,
            Arc::clone(&done),
            Pacing::Unpaced,
        );

        let summary = spawn_realtime_thread(realtime).unwrap().join().unwrap();
        assert!(done.load(Ordering::Acquire));
        assert!(summary.source_exhausted);
        assert_eq!(summary.ticks, 100);
        assert_eq!(summary.dropped_samples, 2 * (100 - 64));

        let mut block = Vec::new();
        taps.drain_channel(0, &mut block);
        assert_eq!(block, (0..64).map(|v| v as f64).collect::<Vec<_>>());
        assert_eq!(taps.counters().dropped(1), 36);
    }

    struct Failing;

    impl AcquisitionSource for Failing {
        fn channel_count(&self) -> usize {
            2
        }

        fn sampling_frequency_hz(&self) -> f64 {
            1_000.0
        }

        fn read_tick(&mut self, _frame: &mut [f64]) -> bool {
            panic!("acquisition hardware fault");
        }
    }

    #[test]
    fn test_panicking_source_still_marks_producer_done() {
        let (intake, _taps) = voltage_channels(2, 8);
        let done = Arc::new(AtomicBool::new(false));
        let realtime = RealtimeLoop::new(
            Box::new(Failing),
            intake,
            Arc::new(AtomicBool::new(true)),
            Arc::clone(&done),
            Pacing::Unpaced,
        );
        let handle = spawn_realtime_thread(realtime).unwrap();
        assert!(handle.join().is_err());
        assert!(done.load(Ordering::Acquire));
    }

    #[test]
    fn test_wall_clock_loop_stops_on_flag() {
        let (intake, _taps) = voltage_channels(2, 10_000);
        let running = Arc::new(AtomicBool::new(true));
        let done = Arc::new(AtomicBool::new(false));
        let realtime = RealtimeLoop::new(
            Box::new(Counting {
                next: 0,
                limit: u64::MAX,
            }),
            intake,
            Arc::clone(&running),
            Arc::clone(&done),
            Pacing::WallClock,
        );
        let handle = spawn_realtime_thread(realtime).unwrap();
        thread::sleep(Duration::from_millis(50));
        running.store(false, Ordering::Release);
        let summary = handle.join().unwrap();

        assert!(done.load(Ordering::Acquire));
        assert!(!summary.source_exhausted);
        assert!(summary.ticks > 0);
        assert!(summary.ticks < 1_000, "paced at 1 kHz, got {}", summary.ticks);
    }
}
