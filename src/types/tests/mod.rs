use super::*;
use std::time::Duration;

// --- config.rs tests ---

#[test]
fn test_config_defaults() {
    let config = EngineConfig::default();

    assert_eq!(config.notification_segments, 2);
    assert!(config.poll_interval.is_none());
    assert_eq!(config.lock_retry, RetryPolicy::default());
    assert_eq!(config.drain_timeout, Duration::from_secs(5));
    assert!(config.looping);
}

#[test]
fn test_config_builder() {
    let config = EngineConfig::builder()
        .notification_segments(4)
        .poll_interval(Duration::from_millis(3))
        .lock_retry(RetryPolicy::NONE)
        .drain_timeout(Duration::from_millis(750))
        .looping(false)
        .build();

    assert_eq!(config.notification_segments, 4);
    assert_eq!(config.poll_interval, Some(Duration::from_millis(3)));
    assert_eq!(config.lock_retry.attempts, 1);
    assert_eq!(config.drain_timeout, Duration::from_millis(750));
    assert!(!config.looping);
}

#[test]
fn test_config_partial_json() {
    let config: EngineConfig =
        serde_json::from_str(r#"{"notification_segments": 8, "looping": false}"#).unwrap();

    assert_eq!(config.notification_segments, 8);
    assert!(!config.looping);
    assert_eq!(config.drain_timeout, Duration::from_secs(5));
}

#[test]
fn test_config_json_round_trip() {
    let config = EngineConfig::builder()
        .poll_interval(Duration::from_millis(10))
        .build();
    let json = serde_json::to_string(&config).unwrap();
    let back: EngineConfig = serde_json::from_str(&json).unwrap();
    assert_eq!(back, config);
}

// --- state.rs tests ---

#[test]
fn test_buffer_status() {
    assert_eq!(BufferStatus::default(), BufferStatus::Stopped);
    assert_eq!(BufferStatus::for_play(true), BufferStatus::Looping);
    assert_eq!(BufferStatus::for_play(false), BufferStatus::Playing);
    assert!(BufferStatus::Looping.is_playing());
    assert!(!BufferStatus::Stopped.is_playing());
}

#[test]
fn test_engine_state_display() {
    assert_eq!(EngineState::default(), EngineState::Idle);
    assert_eq!(EngineState::Draining.to_string(), "draining");
    assert_eq!(
        EngineState::Stopped(StopReason::BufferLost).to_string(),
        "stopped (BufferLost)"
    );
    assert!(EngineState::Stopped(StopReason::Completed).is_stopped());
    assert!(!EngineState::Streaming.is_stopped());
}
