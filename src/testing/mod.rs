//! Simulated audio device for tests and benchmarks
//!
//! [`SimulatedBuffer`] models a hardware ring: the write cursor is the fetch
//! boundary and runs `read_ahead` bytes in front of the play cursor. Nothing
//! moves on its own; call [`SimulatedBuffer::advance`] to render bytes.

use bytes::BytesMut;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::audio::device::{
    AudioDevice, BufferDevice, CooperativeLevel, DeviceError, PositionNotify, SegmentSpans,
    WindowHandle,
};
use crate::audio::format::FormatDescriptor;
use crate::types::BufferStatus;

/// Default number of position notification registers
pub const DEFAULT_MAX_NOTIFICATIONS: usize = 8;

struct SimState {
    memory: Vec<u8>,
    read_ahead: u32,
    /// Absolute bytes fetched; write cursor is this modulo capacity
    fetched: u64,
    /// Absolute bytes rendered; play cursor is this modulo capacity
    played: u64,
    /// Fetched but not yet rendered
    in_flight: VecDeque<u8>,
    rendered: Vec<u8>,
    status: BufferStatus,
    notifications: Vec<PositionNotify>,
    lost: bool,
    busy_remaining: u32,
    lock_calls: usize,
    unlock_calls: usize,
    format: Option<FormatDescriptor>,
}

/// In-memory device buffer with manually driven cursors
pub struct SimulatedBuffer {
    capacity: u32,
    max_notifications: usize,
    released: AtomicBool,
    state: Mutex<SimState>,
}

impl SimulatedBuffer {
    /// Create a stopped buffer of `capacity` bytes filled with zeroes
    #[must_use]
    pub fn new(capacity: u32, read_ahead: u32) -> Self {
        Self {
            capacity,
            max_notifications: DEFAULT_MAX_NOTIFICATIONS,
            released: AtomicBool::new(false),
            state: Mutex::new(SimState {
                memory: vec![0; capacity as usize],
                read_ahead: read_ahead.min(capacity.saturating_sub(1)),
                fetched: 0,
                played: 0,
                in_flight: VecDeque::new(),
                rendered: Vec::new(),
                status: BufferStatus::Stopped,
                notifications: Vec::new(),
                lost: false,
                busy_remaining: 0,
                lock_calls: 0,
                unlock_calls: 0,
                format: None,
            }),
        }
    }

    /// Set the number of notification registers; zero disables them
    #[must_use]
    pub fn with_max_notifications(mut self, max: usize) -> Self {
        self.max_notifications = max;
        self
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Render `bytes` bytes if playing
    ///
    /// Fetches the same amount at the write cursor and raises every
    /// notification whose offset the play cursor crosses. A non-looping
    /// buffer stops at the end of the ring.
    pub fn advance(&self, bytes: u32) {
        let capacity = u64::from(self.capacity);
        let mut to_raise = Vec::new();
        {
            let mut state = self.state();
            if state.lost || !state.status.is_playing() {
                return;
            }

            let old_played = state.played;
            let mut new_played = old_played + u64::from(bytes);
            if state.status == BufferStatus::Playing {
                new_played = new_played.min(capacity);
            }
            let mut new_fetched = new_played + u64::from(state.read_ahead);
            if state.status == BufferStatus::Playing {
                new_fetched = new_fetched.min(capacity);
            }

            fetch(&mut state, new_fetched, capacity);
            for _ in old_played..new_played {
                let byte = state.in_flight.pop_front().unwrap_or(0);
                state.rendered.push(byte);
            }
            state.played = new_played;

            for entry in &state.notifications {
                let offset = u64::from(entry.offset);
                for _ in 0..crossings(offset, old_played, new_played, capacity) {
                    to_raise.push(Arc::clone(&entry.signal));
                }
            }

            if state.status == BufferStatus::Playing && new_played >= capacity {
                state.status = BufferStatus::Stopped;
            }
        }

        for signal in to_raise {
            signal.signal();
        }
    }

    /// Reclaim the buffer memory; every later primitive fails with `Lost`
    pub fn lose(&self) {
        self.state().lost = true;
    }

    /// Fail the next `count` lock/unlock calls with `Busy`
    pub fn set_busy(&self, count: u32) {
        self.state().busy_remaining = count;
    }

    /// Current `(play, write)` cursors, regardless of loss
    pub fn positions(&self) -> (u32, u32) {
        let state = self.state();
        cursors(&state, self.capacity)
    }

    /// Successful device lock calls
    pub fn lock_calls(&self) -> usize {
        self.state().lock_calls
    }

    /// Successful device unlock calls
    pub fn unlock_calls(&self) -> usize {
        self.state().unlock_calls
    }

    /// Every byte rendered so far, in play order
    pub fn rendered(&self) -> Vec<u8> {
        self.state().rendered.clone()
    }

    /// Copy of the ring memory
    pub fn memory(&self) -> Vec<u8> {
        self.state().memory.clone()
    }

    /// Offsets currently in the notification registers
    pub fn armed_offsets(&self) -> Vec<u32> {
        self.state().notifications.iter().map(|n| n.offset).collect()
    }

    /// Format applied through `set_format`
    pub fn applied_format(&self) -> Option<FormatDescriptor> {
        self.state().format
    }

    /// Status register, regardless of loss
    pub fn current_status(&self) -> BufferStatus {
        self.state().status
    }

    /// Whether the buffer was handed back
    pub fn was_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    fn check(state: &mut SimState) -> Result<(), DeviceError> {
        if state.lost {
            return Err(DeviceError::Lost);
        }
        if state.busy_remaining > 0 {
            state.busy_remaining -= 1;
            return Err(DeviceError::Busy);
        }
        Ok(())
    }
}

fn fetch(state: &mut SimState, target: u64, capacity: u64) {
    while state.fetched < target {
        #[allow(clippy::cast_possible_truncation)]
        let index = (state.fetched % capacity) as usize;
        let byte = state.memory[index];
        state.in_flight.push_back(byte);
        state.fetched += 1;
    }
}

fn cursors(state: &SimState, capacity: u32) -> (u32, u32) {
    let capacity = u64::from(capacity);
    #[allow(clippy::cast_possible_truncation)]
    let position = |absolute: u64| (absolute % capacity) as u32;
    (position(state.played), position(state.fetched))
}

/// Positions `offset + k * capacity` in `(from, to]`
fn crossings(offset: u64, from: u64, to: u64, capacity: u64) -> u64 {
    let count_upto = |n: u64| {
        if n < offset {
            0
        } else {
            (n - offset) / capacity + 1
        }
    };
    count_upto(to) - count_upto(from)
}

impl BufferDevice for SimulatedBuffer {
    fn lock(&self, spans: SegmentSpans) -> Result<(BytesMut, BytesMut), DeviceError> {
        let mut state = self.state();
        Self::check(&mut state)?;
        state.lock_calls += 1;

        let copy = |offset: u32, len: u32| {
            let start = offset as usize;
            BytesMut::from(&state.memory[start..start + len as usize])
        };
        Ok((
            copy(spans.primary.offset, spans.primary.len),
            copy(spans.wrap.offset, spans.wrap.len),
        ))
    }

    fn unlock(&self, spans: SegmentSpans, primary: &[u8], wrap: &[u8]) -> Result<(), DeviceError> {
        let mut state = self.state();
        Self::check(&mut state)?;
        state.unlock_calls += 1;

        for (span, data) in [(spans.primary, primary), (spans.wrap, wrap)] {
            let start = span.offset as usize;
            let len = (span.len as usize).min(data.len());
            state.memory[start..start + len].copy_from_slice(&data[..len]);
        }
        Ok(())
    }

    fn play(&self, looping: bool) -> Result<(), DeviceError> {
        let mut state = self.state();
        if state.lost {
            return Err(DeviceError::Lost);
        }
        if !looping && state.played >= u64::from(self.capacity) {
            // A finished one-shot buffer restarts from the top.
            state.played = 0;
            state.fetched = 0;
            state.in_flight.clear();
        }
        state.status = BufferStatus::for_play(looping);
        let target = state.played + u64::from(state.read_ahead);
        fetch(&mut state, target, u64::from(self.capacity));
        Ok(())
    }

    fn stop(&self) -> Result<(), DeviceError> {
        let mut state = self.state();
        if state.lost {
            return Err(DeviceError::Lost);
        }
        state.status = BufferStatus::Stopped;
        Ok(())
    }

    fn status(&self) -> Result<BufferStatus, DeviceError> {
        let state = self.state();
        if state.lost {
            return Err(DeviceError::Lost);
        }
        Ok(state.status)
    }

    fn current_position(&self) -> Result<(u32, u32), DeviceError> {
        let state = self.state();
        if state.lost {
            return Err(DeviceError::Lost);
        }
        Ok(cursors(&state, self.capacity))
    }

    fn max_notifications(&self) -> usize {
        self.max_notifications
    }

    fn set_notification_positions(&self, positions: &[PositionNotify]) -> Result<(), DeviceError> {
        if self.max_notifications == 0 {
            return Err(DeviceError::Unsupported("position notifications".into()));
        }
        let mut state = self.state();
        if state.lost {
            return Err(DeviceError::Lost);
        }
        if positions.len() > self.max_notifications {
            return Err(DeviceError::Failed(format!(
                "{} notifications exceed {} registers",
                positions.len(),
                self.max_notifications
            )));
        }
        state.notifications = positions.to_vec();
        Ok(())
    }

    fn set_format(&self, format: &FormatDescriptor) -> Result<(), DeviceError> {
        self.state().format = Some(*format);
        Ok(())
    }

    fn release(&self) {
        self.released.store(true, Ordering::Release);
    }
}

impl std::fmt::Debug for SimulatedBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (play, write) = self.positions();
        f.debug_struct("SimulatedBuffer")
            .field("capacity", &self.capacity)
            .field("play", &play)
            .field("write", &write)
            .finish_non_exhaustive()
    }
}

#[derive(Default)]
struct DeviceState {
    buffers: Mutex<Vec<Arc<SimulatedBuffer>>>,
    level: Mutex<Option<(WindowHandle, CooperativeLevel)>>,
    closed: AtomicBool,
}

/// Simulated host device handing out [`SimulatedBuffer`]s
///
/// Clones share state, so a test can keep one clone to inspect what another
/// (e.g. one owned by a [`DeviceHandle`](crate::audio::DeviceHandle)) did.
#[derive(Clone)]
pub struct SimulatedDevice {
    read_ahead_frames: u32,
    max_notifications: usize,
    state: Arc<DeviceState>,
}

impl SimulatedDevice {
    /// Device with 64 frames of read-ahead and notification support
    #[must_use]
    pub fn new() -> Self {
        Self {
            read_ahead_frames: 64,
            max_notifications: DEFAULT_MAX_NOTIFICATIONS,
            state: Arc::new(DeviceState::default()),
        }
    }

    /// Set the read-ahead distance in frames
    #[must_use]
    pub fn with_read_ahead_frames(mut self, frames: u32) -> Self {
        self.read_ahead_frames = frames;
        self
    }

    /// Set notification registers per buffer; zero disables notifications
    #[must_use]
    pub fn with_max_notifications(mut self, max: usize) -> Self {
        self.max_notifications = max;
        self
    }

    /// Buffers created so far
    pub fn buffers(&self) -> Vec<Arc<SimulatedBuffer>> {
        self.state
            .buffers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Most recently created buffer
    pub fn last_buffer(&self) -> Option<Arc<SimulatedBuffer>> {
        self.buffers().pop()
    }

    /// Negotiated cooperative level
    pub fn cooperative_level(&self) -> Option<(WindowHandle, CooperativeLevel)> {
        *self
            .state
            .level
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether `close` was called
    pub fn is_closed(&self) -> bool {
        self.state.closed.load(Ordering::Acquire)
    }

    /// Create a bare simulated buffer sized for `format`
    #[must_use]
    pub fn buffer_for(&self, format: &FormatDescriptor, size_bytes: u32) -> SimulatedBuffer {
        let read_ahead = self
            .read_ahead_frames
            .saturating_mul(u32::from(format.block_align));
        SimulatedBuffer::new(size_bytes, format.align_down(read_ahead))
            .with_max_notifications(self.max_notifications)
    }
}

impl Default for SimulatedDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioDevice for SimulatedDevice {
    fn create_buffer_device(
        &self,
        format: &FormatDescriptor,
        size_bytes: u32,
        _is_primary: bool,
    ) -> Result<Arc<dyn BufferDevice>, DeviceError> {
        if self.is_closed() {
            return Err(DeviceError::Failed("device closed".into()));
        }
        let buffer = Arc::new(self.buffer_for(format, size_bytes));
        self.state
            .buffers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::clone(&buffer));
        Ok(buffer)
    }

    fn set_cooperative_level(
        &self,
        window: WindowHandle,
        level: CooperativeLevel,
    ) -> Result<(), DeviceError> {
        *self
            .state
            .level
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some((window, level));
        Ok(())
    }

    fn close(&self) -> Result<(), DeviceError> {
        self.state.closed.store(true, Ordering::Release);
        Ok(())
    }
}

impl std::fmt::Debug for SimulatedDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulatedDevice")
            .field("read_ahead_frames", &self.read_ahead_frames)
            .field("max_notifications", &self.max_notifications)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crossings_counts_each_lap() {
        assert_eq!(crossings(0, 0, 4096, 4096), 1);
        assert_eq!(crossings(2048, 0, 2048, 4096), 1);
        assert_eq!(crossings(2048, 2048, 4000, 4096), 0);
        assert_eq!(crossings(100, 0, 3 * 4096, 4096), 3);
    }

    #[test]
    fn test_play_prefetches_read_ahead() {
        let buffer = SimulatedBuffer::new(4096, 256);
        buffer.play(true).unwrap();
        assert_eq!(buffer.positions(), (0, 256));

        buffer.advance(1000);
        assert_eq!(buffer.positions(), (1000, 1256));
        assert_eq!(buffer.rendered().len(), 1000);
    }

    #[test]
    fn test_one_shot_stops_at_end() {
        let buffer = SimulatedBuffer::new(1024, 64);
        buffer.play(false).unwrap();
        buffer.advance(5000);
        assert_eq!(buffer.current_status(), BufferStatus::Stopped);
        assert_eq!(buffer.rendered().len(), 1024);
    }
}
