//! # ringstream
//!
//! Streaming audio through a fixed-size, hardware-backed ring buffer.
//!
//! ## Features
//!
//! - Dual-segment lock/unlock over a circular device buffer
//! - Play/write cursor tracking and free-space computation
//! - Position notifications with a polling fallback
//! - An async engine that primes, refills and drains the ring from a producer
//!
//! ## Example
//!
//! ```rust,no_run
//! use ringstream::audio::AudioDevice;
//! use ringstream::testing::SimulatedDevice;
//! use ringstream::{EngineConfig, FormatDescriptor, SliceProducer, StreamEngine};
//!
//! # async fn example() -> Result<(), ringstream::StreamError> {
//! let device = SimulatedDevice::new();
//! let format = FormatDescriptor::CD_QUALITY;
//! let buffer = device.create_buffer(&format, 4096, false)?;
//!
//! let engine = StreamEngine::new(buffer, EngineConfig::default())?;
//! engine.run(SliceProducer::new(vec![0u8; 65_536])).await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Architecture
//!
//! - **Engine**: `StreamEngine` - priming, refill loop, drain
//! - **Buffer**: `RingBuffer`, `CursorTracker`, `NotificationSchedule`
//! - **Device**: `AudioDevice` / `BufferDevice` - the platform seam

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Public modules
/// Error types
pub mod error;
/// Core types
pub mod types;

/// Testing utilities
pub mod testing;

/// Ring buffer and device abstraction
pub mod audio;
/// Streaming support
pub mod streaming;

// Re-exports
pub use audio::{
    AudioDevice, CursorSnapshot, CursorTracker, DeviceHandle, FormatDescriptor, LockRegion,
    RingBuffer,
};
pub use error::StreamError;
pub use streaming::{
    CallbackProducer, EventSignal, NotificationEntry, NotificationSchedule, Producer,
    SilenceProducer, SliceProducer, StreamEngine, WakeSignal,
};
pub use types::{EngineConfig, EngineState, EngineStats, RetryPolicy, StopReason};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude for common imports
///
/// Convenient re-exports
pub mod prelude {
    pub use crate::{
        AudioDevice, EngineConfig, EngineState, FormatDescriptor, Producer, RingBuffer,
        SliceProducer, StreamEngine, StreamError,
    };
}
