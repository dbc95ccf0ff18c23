use super::*;
use crate::acquisition::{SyntheticConfig, SyntheticSource};

fn small_config(channels: usize) -> AppConfig {
    let mut config = AppConfig::default();
    config.acquisition.num_channels = channels;
    config.acquisition.voltage_buffer_capacity = 20_000;
    config.detection.num_updates_for_train = 2;
    config
}

fn source(channels: usize, seconds: f64) -> Box<dyn AcquisitionSource> {
    Box::new(SyntheticSource::new(SyntheticConfig {
        num_channels: channels,
        duration_s: Some(seconds),
        spike_rate_hz: 20.0,
        ..SyntheticConfig::default()
    }))
}

#[test]
fn patch_overrides_only_set_fields() {
    let base = DetectionConfig::default();
    let patch = ParamPatch {
        threshold_polarity: Some(ThresholdPolarity::NegativeOnly),
        dead_time_ms: Some(2.0),
        ..ParamPatch::default()
    };
    let patched = patch.apply_to(&base);
    assert_eq!(patched.threshold_polarity, ThresholdPolarity::NegativeOnly);
    assert_eq!(patched.dead_time_ms, 2.0);
    assert_eq!(patched.num_pre, base.num_pre);
    assert_eq!(ParamPatch::default().apply_to(&base), base);
}

#[test]
fn patch_deserializes_from_partial_json() {
    let patch: ParamPatch =
        serde_json::from_str(r#"{"threshold_multiplier": 4.5, "reset_thresholds": true}"#)
            .unwrap();
    assert_eq!(patch.threshold_multiplier, Some(4.5));
    assert!(patch.reset_thresholds);
    assert_eq!(patch.num_post, None);
}

#[test]
fn stop_without_start_is_not_running() {
    let mut engine = MeaEngine::new(small_config(2)).unwrap();
    assert_eq!(engine.stop().unwrap_err(), EngineError::NotRunning);
    assert_eq!(
        engine.apply_patch(ParamPatch::default()).unwrap_err(),
        EngineError::NotRunning
    );
    assert_eq!(engine.stats(), EngineStats::default());
}

#[test]
fn start_rejects_mismatched_source() {
    let mut engine = MeaEngine::new(small_config(2)).unwrap();
    let err = engine.start(source(3, 0.1)).unwrap_err();
    assert!(matches!(err, EngineError::InvalidConfig(_)));
    assert!(!engine.is_running());
}

#[test]
fn engine_runs_source_to_completion() {
    let mut engine = MeaEngine::new(small_config(2)).unwrap();
    let mut receiver = engine.start(source(2, 0.3)).unwrap();
    assert_eq!(
        engine.start(source(2, 0.3)).unwrap_err(),
        EngineError::AlreadyRunning
    );

    while engine.stats().running {
        thread::sleep(Duration::from_millis(10));
    }
    let summary = engine.stop().unwrap();
    assert!(summary.producer.source_exhausted);
    assert_eq!(summary.producer.ticks, 6_000);
    assert_eq!(summary.detection.samples, 2 * 6_000);
    assert_eq!(summary.detection.dropped_samples, 0);

    let events = receiver.drain(usize::MAX);
    assert_eq!(events.len() as u64, summary.detection.spikes_published as u64);
    assert!(!engine.is_running());
}

#[test]
fn invalid_patch_is_rejected_before_queueing() {
    let mut engine = MeaEngine::new(small_config(1)).unwrap();
    let _receiver = engine.start(source(1, 5.0)).unwrap();

    let bad = ParamPatch {
        downsample: Some(0),
        ..ParamPatch::default()
    };
    assert!(matches!(
        engine.apply_patch(bad),
        Err(EngineError::InvalidConfig(_))
    ));

    let good = ParamPatch {
        threshold_multiplier: Some(6.0),
        ..ParamPatch::default()
    };
    engine.apply_patch(good).unwrap();
    assert_eq!(engine.config().detection.threshold_multiplier, 6.0);
    engine.stop().unwrap();
}

struct FaultySource;

impl AcquisitionSource for FaultySource {
    fn channel_count(&self) -> usize {
        1
    }

    fn sampling_frequency_hz(&self) -> f64 {
        20_000.0
    }

    fn read_tick(&mut self, _frame: &mut [f64]) -> bool {
        panic!("acquisition hardware fault");
    }
}

#[test]
fn producer_panic_still_joins_detection_thread() {
    let mut engine = MeaEngine::new(small_config(1)).unwrap();
    let receiver = engine.start(Box::new(FaultySource)).unwrap();
    while engine.stats().running {
        thread::sleep(Duration::from_millis(5));
    }

    let err = engine.stop().unwrap_err();
    assert!(matches!(
        err,
        EngineError::ThreadFailed {
            thread: "mea-realtime",
            ..
        }
    ));
    assert!(!engine.is_running());
    // The publisher lives on the detection thread; closed means it was joined
    assert!(receiver.is_closed());
}
