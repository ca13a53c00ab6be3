use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Bounded retry for transient device-busy conditions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first (default: 3)
    pub attempts: u32,

    /// Pause between attempts (default: 200µs)
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff: Duration::from_micros(200),
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no retry
    pub const NONE: Self = Self {
        attempts: 1,
        backoff: Duration::ZERO,
    };
}

/// Configuration for [`StreamEngine`](crate::streaming::StreamEngine) behavior
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Number of evenly spaced wake points around the ring (default: 2)
    pub notification_segments: u32,

    /// Polling interval used when the device has no position notifications
    /// (default: derived from the segment play time)
    pub poll_interval: Option<Duration>,

    /// Retry policy for busy lock/unlock calls
    pub lock_retry: RetryPolicy,

    /// Upper bound on draining before the engine stops anyway (default: 5 seconds)
    pub drain_timeout: Duration,

    /// Start the ring in looping mode (default: true)
    pub looping: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            notification_segments: 2,
            poll_interval: None,
            lock_retry: RetryPolicy::default(),
            drain_timeout: Duration::from_secs(5),
            looping: true,
        }
    }
}

impl EngineConfig {
    /// Create a new config builder
    #[must_use]
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::default()
    }
}

/// Builder for `EngineConfig`
#[derive(Debug, Clone, Default)]
pub struct EngineConfigBuilder {
    config: EngineConfig,
}

impl EngineConfigBuilder {
    /// Set number of wake points per ring pass
    #[must_use]
    pub fn notification_segments(mut self, segments: u32) -> Self {
        self.config.notification_segments = segments;
        self
    }

    /// Force a polling interval instead of the derived one
    #[must_use]
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval = Some(interval);
        self
    }

    /// Set retry policy for busy lock/unlock calls
    #[must_use]
    pub fn lock_retry(mut self, policy: RetryPolicy) -> Self {
        self.config.lock_retry = policy;
        self
    }

    /// Set maximum drain wait
    #[must_use]
    pub fn drain_timeout(mut self, timeout: Duration) -> Self {
        self.config.drain_timeout = timeout;
        self
    }

    /// Choose looping or one-shot playback
    #[must_use]
    pub fn looping(mut self, looping: bool) -> Self {
        self.config.looping = looping;
        self
    }

    /// Build the configuration
    #[must_use]
    pub fn build(self) -> EngineConfig {
        self.config
    }
}
