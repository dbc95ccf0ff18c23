//! Integration tests for the threaded engine
//!
//! These run the real-time producer and the detection cycle on their own
//! threads against a wall-clock-paced synthetic source, then check lifecycle
//! errors, drain-on-stop behaviour and parameter patches.

use std::thread;
use std::time::{Duration, Instant};

use tokio::sync::broadcast::error::TryRecvError;

use mea_spikes::acquisition::{SyntheticConfig, SyntheticSource};
use mea_spikes::engine::{MeaEngine, ParamPatch};
use mea_spikes::telemetry::{self, LifecyclePhase, MetricEvent};
use mea_spikes::{AppConfig, EngineError, ThresholdPolarity};

fn config(channels: usize) -> AppConfig {
    let mut config = AppConfig::default();
    config.acquisition.num_channels = channels;
    config.acquisition.voltage_buffer_capacity = 20_000;
    config.detection.num_updates_for_train = 2;
    config
}

fn source(channels: usize, seconds: f64) -> Box<SyntheticSource> {
    Box::new(SyntheticSource::new(SyntheticConfig {
        num_channels: channels,
        duration_s: Some(seconds),
        spike_rate_hz: 20.0,
        seed: 11,
        ..SyntheticConfig::default()
    }))
}

fn wait_for_producer(engine: &MeaEngine) {
    while engine.stats().running {
        thread::sleep(Duration::from_millis(10));
    }
}

#[test]
fn test_engine_detects_and_drains_on_stop() {
    let mut engine = MeaEngine::new(config(4)).unwrap();
    let mut receiver = engine.start(source(4, 0.5)).unwrap();
    wait_for_producer(&engine);

    let summary = engine.stop().unwrap();
    assert_eq!(summary.producer.ticks, 10_000);
    assert_eq!(summary.producer.dropped_samples, 0);
    assert_eq!(summary.detection.samples, 4 * 10_000);
    assert_eq!(summary.per_channel.len(), 4);

    let events = receiver.drain(usize::MAX);
    assert!(!events.is_empty(), "20 Hz on 4 channels must yield spikes");
    assert_eq!(events.len(), summary.detection.spikes_published);
    assert!(events.iter().all(|e| e.channel < 4));
    assert!(receiver.is_closed());
}

#[test]
fn test_lifecycle_errors() {
    let mut engine = MeaEngine::new(config(2)).unwrap();
    assert_eq!(engine.stop().unwrap_err(), EngineError::NotRunning);

    let _receiver = engine.start(source(2, 10.0)).unwrap();
    assert!(engine.is_running());
    assert_eq!(
        engine.start(source(2, 1.0)).unwrap_err(),
        EngineError::AlreadyRunning
    );

    // Stopping early ends the producer mid-recording
    thread::sleep(Duration::from_millis(100));
    let summary = engine.stop().unwrap();
    assert!(!summary.producer.source_exhausted);
    assert!(summary.producer.ticks > 0);
    assert!(!engine.is_running());
    assert_eq!(engine.stop().unwrap_err(), EngineError::NotRunning);
}

#[test]
fn test_patch_applies_between_cycles() {
    let mut engine = MeaEngine::new(config(2)).unwrap();
    let mut rx = telemetry::hub().collector().subscribe();
    let mut receiver = engine.start(source(2, 0.6)).unwrap();

    engine
        .apply_patch(ParamPatch {
            threshold_polarity: Some(ThresholdPolarity::PositiveOnly),
            reset_thresholds: true,
            ..ParamPatch::default()
        })
        .unwrap();
    assert_eq!(
        engine.config().detection.threshold_polarity,
        ThresholdPolarity::PositiveOnly
    );

    let deadline = Instant::now() + Duration::from_secs(2);
    let mut applied = false;
    while !applied && Instant::now() < deadline {
        match rx.try_recv() {
            Ok(MetricEvent::Lifecycle {
                phase: LifecyclePhase::ParamsApplied,
                ..
            }) => applied = true,
            Ok(_) | Err(TryRecvError::Lagged(_)) => {}
            Err(_) => thread::sleep(Duration::from_millis(5)),
        }
    }
    assert!(applied, "ParamsApplied lifecycle event expected");

    wait_for_producer(&engine);
    engine.stop().unwrap();
    receiver.drain(usize::MAX);
}

#[test]
fn test_stats_track_progress() {
    let mut engine = MeaEngine::new(config(1)).unwrap();
    let _receiver = engine.start(source(1, 0.3)).unwrap();
    thread::sleep(Duration::from_millis(120));
    let mid = engine.stats();
    assert!(mid.ticks > 0);
    wait_for_producer(&engine);
    let summary = engine.stop().unwrap();
    assert!(summary.producer.ticks >= mid.ticks);
    assert_eq!(engine.stats().ticks, 0, "stats reset once stopped");
}
