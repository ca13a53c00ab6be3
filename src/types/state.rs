use std::fmt;

/// Playback status reported by a ring buffer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BufferStatus {
    /// Not playing
    #[default]
    Stopped,
    /// Playing to the end of the ring once
    Playing,
    /// Playing and wrapping around continuously
    Looping,
}

impl BufferStatus {
    /// Status that a `play(looping)` call moves to
    #[must_use]
    pub fn for_play(looping: bool) -> Self {
        if looping { Self::Looping } else { Self::Playing }
    }

    /// Whether the hardware is consuming the ring
    #[must_use]
    pub fn is_playing(self) -> bool {
        !matches!(self, Self::Stopped)
    }
}

/// Why a stream engine reached `Stopped`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Producer ended and everything committed was played
    Completed,
    /// `stop()` was requested
    Requested,
    /// Device invalidated the buffer
    BufferLost,
    /// Any other error halted streaming
    Failed,
}

/// Stream engine lifecycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EngineState {
    /// Buffer created, not yet playing
    #[default]
    Idle,
    /// Initial full-ring fill
    Priming,
    /// Refill loop running
    Streaming,
    /// Producer exhausted, playing out committed bytes
    Draining,
    /// Finished
    Stopped(StopReason),
}

impl EngineState {
    /// Whether the engine reached its terminal state
    #[must_use]
    pub fn is_stopped(self) -> bool {
        matches!(self, Self::Stopped(_))
    }
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => f.write_str("idle"),
            Self::Priming => f.write_str("priming"),
            Self::Streaming => f.write_str("streaming"),
            Self::Draining => f.write_str("draining"),
            Self::Stopped(reason) => write!(f, "stopped ({reason:?})"),
        }
    }
}

/// Stream engine counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineStats {
    /// Refill cycles run (including empty ones)
    pub cycles: u64,
    /// Wake signals observed
    pub wakes: u64,
    /// Cycles that found no free space
    pub empty_cycles: u64,
    /// Lock calls issued, priming included
    pub lock_calls: u64,
    /// Bytes committed to the ring, silence padding included
    pub bytes_committed: u64,
    /// Producer payload bytes committed
    pub payload_bytes: u64,
}
