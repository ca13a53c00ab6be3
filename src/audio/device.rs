//! Audio device abstraction
//!
//! Platform-agnostic traits for the host audio subsystem. An [`AudioDevice`]
//! hands out ring buffers; each buffer is backed by a [`BufferDevice`] that
//! exposes the raw hardware primitives (lock/unlock, play/stop, cursor and
//! notification registers).

use bytes::BytesMut;
use std::ops::Deref;
use std::sync::Arc;

use crate::audio::buffer::RingBuffer;
use crate::audio::format::FormatDescriptor;
use crate::error::{Result, StreamError};
use crate::streaming::WakeSignal;
use crate::types::BufferStatus;

/// Errors from device primitives
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeviceError {
    /// Buffer memory was reclaimed by the host (focus loss, device reset)
    #[error("Buffer lost")]
    Lost,

    /// Device is temporarily busy
    #[error("Device busy")]
    Busy,

    /// Primitive not provided by this device
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// Generic device error
    #[error("Device error: {0}")]
    Failed(String),
}

/// One contiguous span of the ring
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Span {
    /// Start offset in bytes
    pub offset: u32,
    /// Length in bytes
    pub len: u32,
}

impl Span {
    /// Check if span covers no bytes
    #[must_use]
    pub fn is_empty(self) -> bool {
        self.len == 0
    }
}

/// The (primary, wrap) pair a lock decomposes into
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SegmentSpans {
    /// Span starting at the requested offset
    pub primary: Span,
    /// Span starting at offset zero; empty unless the region wraps
    pub wrap: Span,
}

impl SegmentSpans {
    /// Split `length` bytes starting at `offset` over a ring of `capacity` bytes
    ///
    /// Caller guarantees `offset < capacity` and `length <= capacity`.
    #[must_use]
    pub fn split(offset: u32, length: u32, capacity: u32) -> Self {
        let to_end = capacity - offset;
        if length > to_end {
            Self {
                primary: Span {
                    offset,
                    len: to_end,
                },
                wrap: Span {
                    offset: 0,
                    len: length - to_end,
                },
            }
        } else {
            Self {
                primary: Span {
                    offset,
                    len: length,
                },
                wrap: Span::default(),
            }
        }
    }

    /// Total bytes covered
    #[must_use]
    pub fn total_len(self) -> u32 {
        self.primary.len + self.wrap.len
    }
}

/// Position notification register entry
#[derive(Clone)]
pub struct PositionNotify {
    /// Ring offset the play cursor must cross
    pub offset: u32,
    /// Signal to raise on each crossing
    pub signal: Arc<dyn WakeSignal>,
}

impl std::fmt::Debug for PositionNotify {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PositionNotify")
            .field("offset", &self.offset)
            .finish_non_exhaustive()
    }
}

/// Hardware primitives of one device buffer
///
/// Implementations own the ring memory. The play and write cursors advance on
/// the hardware clock, independently of any call made here.
pub trait BufferDevice: Send + Sync {
    /// Map `spans` for writing and return their current contents
    ///
    /// The returned segments must match the span lengths exactly.
    ///
    /// # Errors
    ///
    /// `Lost` if the buffer memory is gone, `Busy` for transient contention.
    fn lock(&self, spans: SegmentSpans) -> std::result::Result<(BytesMut, BytesMut), DeviceError>;

    /// Commit previously locked spans
    ///
    /// # Errors
    ///
    /// `Lost` if the buffer memory is gone, `Busy` for transient contention.
    fn unlock(
        &self,
        spans: SegmentSpans,
        primary: &[u8],
        wrap: &[u8],
    ) -> std::result::Result<(), DeviceError>;

    /// Start consuming the ring
    ///
    /// # Errors
    ///
    /// Returns an error if the device rejects the command.
    fn play(&self, looping: bool) -> std::result::Result<(), DeviceError>;

    /// Stop consuming the ring
    ///
    /// # Errors
    ///
    /// Returns an error if the device rejects the command.
    fn stop(&self) -> std::result::Result<(), DeviceError>;

    /// Current playback status
    ///
    /// # Errors
    ///
    /// Returns an error if the status register cannot be read.
    fn status(&self) -> std::result::Result<BufferStatus, DeviceError>;

    /// Current `(play, write)` cursor offsets
    ///
    /// # Errors
    ///
    /// Returns an error if the cursor registers cannot be read.
    fn current_position(&self) -> std::result::Result<(u32, u32), DeviceError>;

    /// Maximum number of position notifications, zero when unsupported
    fn max_notifications(&self) -> usize {
        0
    }

    /// Replace the position notification registers
    ///
    /// # Errors
    ///
    /// `Unsupported` by default.
    fn set_notification_positions(
        &self,
        _positions: &[PositionNotify],
    ) -> std::result::Result<(), DeviceError> {
        Err(DeviceError::Unsupported("position notifications".into()))
    }

    /// Apply a format to the buffer (primary buffers only)
    ///
    /// # Errors
    ///
    /// Returns an error if the device cannot render the format.
    fn set_format(&self, _format: &FormatDescriptor) -> std::result::Result<(), DeviceError> {
        Ok(())
    }

    /// Give the buffer back to the device
    fn release(&self) {}
}

/// Opaque host window handle used for cooperative-level negotiation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct WindowHandle(pub usize);

/// Cooperative level requested from the host audio subsystem
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CooperativeLevel {
    /// Share the device, primary format fixed by the host
    Normal,
    /// Share the device, allowed to set the primary format
    #[default]
    Priority,
    /// Exclusive use while focused
    Exclusive,
    /// Direct writes to the primary buffer
    WritePrimary,
}

/// Host audio device that creates ring buffers
pub trait AudioDevice: Send + Sync {
    /// Create the raw buffer backing a ring
    ///
    /// # Errors
    ///
    /// Returns an error if the device cannot allocate the buffer.
    fn create_buffer_device(
        &self,
        format: &FormatDescriptor,
        size_bytes: u32,
        is_primary: bool,
    ) -> std::result::Result<Arc<dyn BufferDevice>, DeviceError>;

    /// Negotiate priority with the host audio subsystem
    ///
    /// # Errors
    ///
    /// Returns an error if the host refuses the level.
    fn set_cooperative_level(
        &self,
        window: WindowHandle,
        level: CooperativeLevel,
    ) -> std::result::Result<(), DeviceError>;

    /// Close the device
    ///
    /// # Errors
    ///
    /// Returns an error if the device fails to shut down.
    fn close(&self) -> std::result::Result<(), DeviceError>;

    /// Create a ring buffer of `size_bytes` in `format`
    ///
    /// Primary buffers get the format applied to them after creation.
    ///
    /// # Errors
    ///
    /// Returns `InvalidFormat` / `InvalidParameter` for unusable arguments, or
    /// the mapped device error if creation fails.
    fn create_buffer(
        &self,
        format: &FormatDescriptor,
        size_bytes: u32,
        is_primary: bool,
    ) -> Result<RingBuffer> {
        format.validate()?;
        if size_bytes == 0 || !format.is_aligned(size_bytes) {
            return Err(StreamError::InvalidParameter {
                name: "size_bytes".to_string(),
                message: format!(
                    "{size_bytes} is not a non-zero multiple of block align {}",
                    format.block_align
                ),
            });
        }

        let device = self.create_buffer_device(format, size_bytes, is_primary)?;
        if is_primary {
            if let Err(e) = device.set_format(format) {
                device.release();
                return Err(e.into());
            }
        }

        tracing::debug!(
            "Created {} buffer: {} bytes, {} Hz x {} ch x {} bit",
            if is_primary { "primary" } else { "secondary" },
            size_bytes,
            format.sample_rate,
            format.channel_count,
            format.bits_per_sample
        );
        RingBuffer::from_parts(*format, size_bytes, device, is_primary)
    }
}

/// Scoped ownership of an audio device; closes it on drop
pub struct DeviceHandle<D: AudioDevice> {
    device: D,
}

impl<D: AudioDevice> DeviceHandle<D> {
    /// Take ownership of an opened device
    pub fn new(device: D) -> Self {
        Self { device }
    }

    /// Open a device and negotiate its cooperative level
    ///
    /// The device is closed again if negotiation fails.
    ///
    /// # Errors
    ///
    /// Returns the mapped device error from `set_cooperative_level`.
    pub fn open(device: D, window: WindowHandle, level: CooperativeLevel) -> Result<Self> {
        let handle = Self::new(device);
        handle.device.set_cooperative_level(window, level)?;
        Ok(handle)
    }
}

impl<D: AudioDevice> Deref for DeviceHandle<D> {
    type Target = D;

    fn deref(&self) -> &D {
        &self.device
    }
}

impl<D: AudioDevice> Drop for DeviceHandle<D> {
    fn drop(&mut self) {
        if let Err(e) = self.device.close() {
            tracing::warn!("Failed to close audio device: {}", e);
        }
    }
}
