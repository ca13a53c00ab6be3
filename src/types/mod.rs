//! Core types module

mod config;
mod state;

#[cfg(test)]
mod tests;

pub use config::{EngineConfig, EngineConfigBuilder, RetryPolicy};
pub use state::{BufferStatus, EngineState, EngineStats, StopReason};
