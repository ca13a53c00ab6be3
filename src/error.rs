use std::io;
use thiserror::Error;

use crate::audio::device::DeviceError;

/// Errors that can occur while driving a streaming ring buffer
#[derive(Debug, Error)]
pub enum StreamError {
    // ===== Contract Violations =====
    /// Lock offset or length is not a multiple of the frame size
    #[error("misaligned region: offset {offset}, length {length} (block align {block_align})")]
    MisalignedRegion {
        /// Requested offset in bytes
        offset: u32,
        /// Requested length in bytes
        length: u32,
        /// Frame size in bytes
        block_align: u16,
    },

    /// Lock region does not fit the ring
    #[error("region out of bounds: offset {offset}, length {length} (capacity {capacity})")]
    OutOfBounds {
        /// Requested offset in bytes
        offset: u32,
        /// Requested length in bytes
        length: u32,
        /// Ring capacity in bytes
        capacity: u32,
    },

    /// A lock is already outstanding on this buffer
    #[error("lock conflict: a lock is already outstanding on this buffer")]
    LockConflict,

    // ===== Device Errors =====
    /// Buffer memory was invalidated by the host; the buffer must be recreated
    #[error("buffer unavailable: device state was invalidated")]
    BufferUnavailable,

    /// Device stayed busy after all retries
    #[error("device busy")]
    DeviceBusy,

    /// Device primitive failed
    #[error("device failure: {message}")]
    DeviceFailure {
        /// Description of the failure
        message: String,
    },

    /// Feature not provided by the device
    #[error("not supported: {feature}")]
    Unsupported {
        /// The missing feature
        feature: String,
    },

    // ===== Notification Errors =====
    /// More notification entries than the device accepts
    #[error("too many notification entries: {count} (max {max})")]
    TooManyEntries {
        /// Number of entries requested
        count: usize,
        /// Device bound
        max: usize,
    },

    /// Notification offset is not frame-aligned
    #[error("misaligned notification offset {offset} (block align {block_align})")]
    MisalignedOffset {
        /// Offending offset
        offset: u32,
        /// Frame size in bytes
        block_align: u16,
    },

    // ===== Configuration Errors =====
    /// Format descriptor is unusable
    #[error("invalid format: {message}")]
    InvalidFormat {
        /// Description of the problem
        message: String,
    },

    /// Invalid parameter provided
    #[error("invalid parameter: {name} - {message}")]
    InvalidParameter {
        /// The name of the parameter
        name: String,
        /// Description of the error
        message: String,
    },

    // ===== Engine Errors =====
    /// Operation not valid in current state
    #[error("invalid state: {message}")]
    InvalidState {
        /// Description of why the state is invalid
        message: String,
        /// The current state
        current_state: String,
    },

    /// Producer failed to supply payload
    #[error("producer error: {message}")]
    Producer {
        /// Description of the error
        message: String,
        /// The underlying source of the error
        #[source]
        source: io::Error,
    },
}

impl StreamError {
    /// Check if the buffer is gone and must be recreated by the caller
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::BufferUnavailable)
    }

    /// Check if this error is a programming error in the caller
    #[must_use]
    pub fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            Self::MisalignedRegion { .. } | Self::OutOfBounds { .. } | Self::LockConflict
        )
    }

    /// Check if the caller can fix its request and retry
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::TooManyEntries { .. }
                | Self::MisalignedOffset { .. }
                | Self::DeviceBusy
        )
    }
}

impl From<DeviceError> for StreamError {
    fn from(err: DeviceError) -> Self {
        match err {
            DeviceError::Lost => Self::BufferUnavailable,
            DeviceError::Busy => Self::DeviceBusy,
            DeviceError::Unsupported(feature) => Self::Unsupported { feature },
            DeviceError::Failed(message) => Self::DeviceFailure { message },
        }
    }
}

/// Result type alias for ring buffer operations
pub type Result<T> = std::result::Result<T, StreamError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = StreamError::MisalignedRegion {
            offset: 6,
            length: 8,
            block_align: 4,
        };
        assert_eq!(
            err.to_string(),
            "misaligned region: offset 6, length 8 (block align 4)"
        );

        let err = StreamError::TooManyEntries { count: 9, max: 8 };
        assert_eq!(err.to_string(), "too many notification entries: 9 (max 8)");
    }

    #[test]
    fn test_error_classification() {
        assert!(StreamError::BufferUnavailable.is_fatal());
        assert!(!StreamError::LockConflict.is_fatal());

        assert!(StreamError::LockConflict.is_contract_violation());
        assert!(!StreamError::DeviceBusy.is_contract_violation());

        let err = StreamError::MisalignedOffset {
            offset: 3,
            block_align: 4,
        };
        assert!(err.is_recoverable());
        assert!(!StreamError::BufferUnavailable.is_recoverable());
        assert!(StreamError::DeviceBusy.is_recoverable());
    }

    #[test]
    fn test_error_from_device() {
        assert!(matches!(
            StreamError::from(DeviceError::Lost),
            StreamError::BufferUnavailable
        ));
        assert!(matches!(
            StreamError::from(DeviceError::Busy),
            StreamError::DeviceBusy
        ));
        assert!(matches!(
            StreamError::from(DeviceError::Failed("boom".into())),
            StreamError::DeviceFailure { message } if message == "boom"
        ));
    }

    #[test]
    fn test_producer_error_source() {
        use std::error::Error as _;

        let err = StreamError::Producer {
            message: "decoder stalled".to_string(),
            source: io::Error::new(io::ErrorKind::UnexpectedEof, "truncated"),
        };
        assert!(err.source().is_some());
    }

    #[test]
    fn test_error_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<StreamError>();
    }
}
