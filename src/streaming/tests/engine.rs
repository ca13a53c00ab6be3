use std::io;
use std::sync::Arc;
use std::time::Duration;

use crate::audio::{FormatDescriptor, RingBuffer};
use crate::error::StreamError;
use crate::streaming::engine::fill_region;
use crate::streaming::{CallbackProducer, SilenceProducer, SliceProducer, StreamEngine};
use crate::testing::SimulatedBuffer;
use crate::types::{EngineConfig, EngineState, RetryPolicy, StopReason};

fn engine(sim: &Arc<SimulatedBuffer>, config: EngineConfig) -> StreamEngine {
    let ring = RingBuffer::new(FormatDescriptor::CD_QUALITY, 4096, sim.clone()).unwrap();
    StreamEngine::new(ring, config).unwrap()
}

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8 + 1).collect()
}

/// Render `step` bytes per millisecond until the engine stops, recording
/// every distinct state seen
async fn pump(engine: &StreamEngine, sim: &SimulatedBuffer, step: u32) -> Vec<EngineState> {
    let mut seen = Vec::new();
    for _ in 0..10_000 {
        let state = engine.state();
        if seen.last() != Some(&state) {
            seen.push(state);
        }
        if state.is_stopped() {
            return seen;
        }
        sim.advance(step);
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    panic!("engine never stopped, last state {}", engine.state());
}

#[tokio::test(start_paused = true)]
async fn test_streams_payload_in_order() {
    let sim = Arc::new(SimulatedBuffer::new(4096, 256));
    let engine = engine(&sim, EngineConfig::default());
    let data = pattern(20_001);

    let (result, seen) = tokio::join!(
        engine.run(SliceProducer::new(data.clone())),
        pump(&engine, &sim, 512)
    );
    result.unwrap();

    assert_eq!(engine.state(), EngineState::Stopped(StopReason::Completed));
    assert!(seen.contains(&EngineState::Streaming));
    assert!(seen.contains(&EngineState::Draining));

    let rendered = sim.rendered();
    assert!(rendered.len() >= data.len());
    assert_eq!(&rendered[..data.len()], &data[..]);
    // Partial trailing frame is padded with silence.
    assert_eq!(&rendered[20_001..20_004], &[0, 0, 0]);

    let stats = engine.stats().await;
    assert_eq!(stats.payload_bytes, 20_001);
    assert!(stats.wakes > 0);
    assert_eq!(stats.lock_calls as usize, sim.lock_calls());
    assert!(!engine.buffer().is_locked());
    assert!(!sim.current_status().is_playing());
}

#[tokio::test(start_paused = true)]
async fn test_streams_with_polling() {
    let sim = Arc::new(SimulatedBuffer::new(4096, 256).with_max_notifications(0));
    let config = EngineConfig::builder()
        .poll_interval(Duration::from_millis(1))
        .build();
    let engine = engine(&sim, config);
    let data = pattern(12_288);

    let (result, _) = tokio::join!(
        engine.run(SliceProducer::new(data.clone())),
        pump(&engine, &sim, 256)
    );
    result.unwrap();

    assert_eq!(engine.state(), EngineState::Stopped(StopReason::Completed));
    assert_eq!(&sim.rendered()[..data.len()], &data[..]);
    assert_eq!(engine.stats().await.wakes, 0);
}

#[tokio::test(start_paused = true)]
async fn test_producer_exhausted_on_first_refill() {
    let sim = Arc::new(SimulatedBuffer::new(4096, 256));
    let engine = engine(&sim, EngineConfig::default());

    let mut calls = 0;
    let producer = CallbackProducer::new(move |buf: &mut [u8]| {
        calls += 1;
        if calls > 1 {
            return Ok(0);
        }
        buf.fill(0x55);
        Ok(buf.len())
    });

    let (result, seen) = tokio::join!(engine.run(producer), pump(&engine, &sim, 512));
    result.unwrap();

    assert!(seen.contains(&EngineState::Draining));
    assert_eq!(engine.state(), EngineState::Stopped(StopReason::Completed));
    // Priming plus the refill that came back empty.
    assert_eq!(sim.lock_calls(), 2);
    assert!(sim.rendered()[..4096].iter().all(|&b| b == 0x55));
}

#[tokio::test(start_paused = true)]
async fn test_empty_producer_completes_immediately() {
    let sim = Arc::new(SimulatedBuffer::new(4096, 256));
    let engine = engine(&sim, EngineConfig::default());

    engine.run(SliceProducer::new(Vec::new())).await.unwrap();

    assert_eq!(engine.state(), EngineState::Stopped(StopReason::Completed));
    assert_eq!(sim.lock_calls(), 1);
    assert!(sim.memory().iter().all(|&b| b == 0));
}

#[tokio::test(start_paused = true)]
async fn test_drain_timeout() {
    let sim = Arc::new(SimulatedBuffer::new(4096, 256));
    let config = EngineConfig::builder()
        .drain_timeout(Duration::from_millis(50))
        .build();
    let engine = engine(&sim, config);

    // Nothing renders, so the tail never plays.
    engine.run(SliceProducer::new(pattern(1000))).await.unwrap();
    assert_eq!(engine.state(), EngineState::Stopped(StopReason::Completed));
    assert_eq!(sim.armed_offsets(), vec![1000]);
}

#[tokio::test(start_paused = true)]
async fn test_stop_request() {
    let sim = Arc::new(SimulatedBuffer::new(4096, 256));
    let engine = engine(&sim, EngineConfig::default());

    let stopper = async {
        for _ in 0..20 {
            sim.advance(512);
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        engine.stop().unwrap();
    };

    let (result, ()) = tokio::join!(engine.run(SilenceProducer::new()), stopper);
    result.unwrap();

    assert_eq!(engine.state(), EngineState::Stopped(StopReason::Requested));
    assert!(!engine.buffer().is_locked());
    assert!(!sim.current_status().is_playing());
    assert!(engine.stats().await.cycles > 0);

    // Stopping again is a no-op.
    engine.stop().unwrap();
}

#[tokio::test]
async fn test_stop_before_run() {
    let sim = Arc::new(SimulatedBuffer::new(4096, 256));
    let engine = engine(&sim, EngineConfig::default());

    engine.stop().unwrap();
    assert_eq!(engine.state(), EngineState::Stopped(StopReason::Requested));
    assert!(matches!(
        engine.run(SilenceProducer::new()).await,
        Err(StreamError::InvalidState { .. })
    ));
    assert_eq!(sim.lock_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_run_twice() {
    let sim = Arc::new(SimulatedBuffer::new(4096, 256));
    let engine = engine(&sim, EngineConfig::default());

    engine.run(SliceProducer::new(Vec::new())).await.unwrap();
    assert!(matches!(
        engine.run(SliceProducer::new(Vec::new())).await,
        Err(StreamError::InvalidState { .. })
    ));
}

#[tokio::test(start_paused = true)]
async fn test_buffer_lost_halts_engine() {
    let sim = Arc::new(SimulatedBuffer::new(4096, 256).with_max_notifications(0));
    let config = EngineConfig::builder()
        .poll_interval(Duration::from_millis(1))
        .build();
    let engine = engine(&sim, config);

    let saboteur = async {
        for _ in 0..10 {
            sim.advance(512);
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        sim.lose();
    };

    let (result, ()) = tokio::join!(engine.run(SilenceProducer::new()), saboteur);

    assert!(matches!(result, Err(StreamError::BufferUnavailable)));
    assert_eq!(engine.state(), EngineState::Stopped(StopReason::BufferLost));
    assert!(!engine.buffer().is_locked());
}

#[tokio::test(start_paused = true)]
async fn test_producer_error_fails_stream() {
    let sim = Arc::new(SimulatedBuffer::new(4096, 256));
    let engine = engine(&sim, EngineConfig::default());

    let mut calls = 0;
    let producer = CallbackProducer::new(move |buf: &mut [u8]| {
        calls += 1;
        if calls > 1 {
            return Err(io::Error::other("decoder stalled"));
        }
        Ok(buf.len())
    });

    let (result, _) = tokio::join!(engine.run(producer), pump(&engine, &sim, 512));

    assert!(matches!(result, Err(StreamError::Producer { .. })));
    assert_eq!(engine.state(), EngineState::Stopped(StopReason::Failed));
    assert!(!engine.buffer().is_locked());
}

#[tokio::test(start_paused = true)]
async fn test_segments_clamped_to_device() {
    let sim = Arc::new(SimulatedBuffer::new(4096, 256).with_max_notifications(2));
    let config = EngineConfig::builder().notification_segments(4).build();
    let engine = engine(&sim, config);

    let observer = async {
        for _ in 0..4 {
            sim.advance(512);
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        let armed = sim.armed_offsets();
        engine.stop().unwrap();
        armed
    };

    let (result, armed) = tokio::join!(engine.run(SilenceProducer::new()), observer);
    result.unwrap();
    assert_eq!(armed, vec![0, 2048]);
}

#[tokio::test(start_paused = true)]
async fn test_state_subscription() {
    let sim = Arc::new(SimulatedBuffer::new(4096, 256));
    let engine = engine(&sim, EngineConfig::default());
    let mut rx = engine.subscribe();

    engine.run(SliceProducer::new(Vec::new())).await.unwrap();

    assert!(rx.has_changed().unwrap());
    assert_eq!(
        *rx.borrow_and_update(),
        EngineState::Stopped(StopReason::Completed)
    );
}

#[test]
fn test_new_rejects_zero_segments() {
    let sim = Arc::new(SimulatedBuffer::new(4096, 256));
    let ring = RingBuffer::new(FormatDescriptor::CD_QUALITY, 4096, sim).unwrap();
    let config = EngineConfig::builder().notification_segments(0).build();

    assert!(matches!(
        StreamEngine::new(ring, config),
        Err(StreamError::InvalidParameter { .. })
    ));
}

#[test]
fn test_new_applies_retry_policy() {
    let sim = Arc::new(SimulatedBuffer::new(4096, 256));
    let ring = RingBuffer::new(FormatDescriptor::CD_QUALITY, 4096, sim.clone()).unwrap();
    let config = EngineConfig::builder()
        .lock_retry(RetryPolicy::NONE)
        .build();
    let engine = StreamEngine::new(ring, config).unwrap();

    sim.set_busy(1);
    assert!(matches!(
        engine.buffer().lock(0, 64),
        Err(StreamError::DeviceBusy)
    ));

    let ring = engine.into_buffer();
    assert_eq!(ring.capacity(), 4096);
}

#[tokio::test(start_paused = true)]
async fn test_busy_device_is_retried_without_blocking() {
    let sim = Arc::new(SimulatedBuffer::new(4096, 256));
    let config = EngineConfig::builder()
        .lock_retry(RetryPolicy {
            attempts: 4,
            backoff: Duration::from_millis(2),
        })
        .build();
    let engine = engine(&sim, config);
    let data = pattern(8_000);

    sim.set_busy(3);
    let (result, _) = tokio::join!(
        engine.run(SliceProducer::new(data.clone())),
        pump(&engine, &sim, 512)
    );
    result.unwrap();

    assert_eq!(engine.state(), EngineState::Stopped(StopReason::Completed));
    assert_eq!(&sim.rendered()[..data.len()], &data[..]);
}

#[test]
fn test_producer_error_silences_wrap_segment() {
    let sim = Arc::new(SimulatedBuffer::new(4096, 256));
    let ring = RingBuffer::new(FormatDescriptor::CD_QUALITY, 4096, sim.clone()).unwrap();

    let mut region = ring.lock(4000, 296).unwrap();
    region.fill(0xAB);
    ring.unlock(region).unwrap();

    let mut producer =
        CallbackProducer::new(|_: &mut [u8]| Err(io::Error::other("decoder gave up")));
    let mut region = ring.lock(4000, 296).unwrap();
    assert!(region.is_wrapped());
    let result = fill_region(&mut producer, &mut region, 0);
    ring.unlock(region).unwrap();

    assert!(matches!(result, Err(StreamError::Producer { .. })));
    let memory = sim.memory();
    assert!(memory[4000..].iter().all(|&b| b == 0));
    assert!(memory[..200].iter().all(|&b| b == 0));
}
