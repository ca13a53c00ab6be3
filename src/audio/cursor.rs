//! Hardware cursor observation

use std::sync::Arc;

use crate::audio::device::{BufferDevice, DeviceError};
use crate::audio::format::FormatDescriptor;
use crate::error::{Result, StreamError};

/// Instantaneous cursor reading
///
/// The hardware keeps moving after the read, so a snapshot is stale as soon as
/// it is taken. Re-read every cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CursorSnapshot {
    /// Offset currently being rendered
    pub play: u32,
    /// Read-ahead boundary; bytes before it may be overwritten
    pub write: u32,
}

/// Reads play/write cursors of one ring buffer
#[derive(Clone)]
pub struct CursorTracker {
    device: Arc<dyn BufferDevice>,
    capacity: u32,
    format: FormatDescriptor,
}

impl CursorTracker {
    pub(crate) fn new(device: Arc<dyn BufferDevice>, capacity: u32, format: FormatDescriptor) -> Self {
        Self {
            device,
            capacity,
            format,
        }
    }

    /// Ring capacity in bytes
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Read both cursors
    ///
    /// # Errors
    ///
    /// Returns the mapped device error, or `DeviceFailure` if the device
    /// reports a cursor outside the ring.
    pub fn positions(&self) -> Result<CursorSnapshot> {
        let (play, write) = self.device.current_position()?;
        if play >= self.capacity || write >= self.capacity {
            return Err(DeviceError::Failed(format!(
                "cursor out of range: play={play}, write={write}, capacity={}",
                self.capacity
            ))
            .into());
        }
        Ok(CursorSnapshot { play, write })
    }

    /// Bytes the producer may claim starting at `last_committed`, from a fresh read
    ///
    /// # Errors
    ///
    /// Returns `OutOfBounds` if `last_committed` is not a ring offset, or the
    /// error from [`positions`](Self::positions).
    pub fn free_bytes(&self, last_committed: u32) -> Result<u32> {
        if last_committed >= self.capacity {
            return Err(StreamError::OutOfBounds {
                offset: last_committed,
                length: 0,
                capacity: self.capacity,
            });
        }
        let snapshot = self.positions()?;
        Ok(self.free_bytes_at(snapshot, last_committed))
    }

    /// Bytes the producer may claim starting at `last_committed`, from a snapshot
    ///
    /// This is the modular distance from `last_committed` to the write cursor,
    /// rounded down to whole frames. Equal positions mean a full lap: the whole
    /// ring is free. Offsets past the end are taken modulo the capacity.
    pub fn free_bytes_at(&self, snapshot: CursorSnapshot, last_committed: u32) -> u32 {
        let distance = ring_distance(last_committed, snapshot.write, self.capacity);
        if distance == 0 {
            self.capacity
        } else {
            self.format.align_down(distance)
        }
    }

    /// Bytes the play cursor moved from `previous` to `current`
    ///
    /// A full lap between readings cannot be told apart from no movement.
    /// Offsets past the end are taken modulo the capacity.
    pub fn play_distance(&self, previous: u32, current: u32) -> u32 {
        ring_distance(previous, current, self.capacity)
    }
}

impl std::fmt::Debug for CursorTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CursorTracker")
            .field("capacity", &self.capacity)
            .finish_non_exhaustive()
    }
}

/// Forward distance from `from` to `to` on a ring of `capacity` bytes
pub(crate) fn ring_distance(from: u32, to: u32, capacity: u32) -> u32 {
    let (from, to) = (from % capacity, to % capacity);
    if to >= from {
        to - from
    } else {
        capacity - from + to
    }
}
