//! Streaming ring buffer with a dual-segment lock/unlock protocol

use bytes::BytesMut;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::audio::cursor::CursorTracker;
use crate::audio::device::{BufferDevice, DeviceError, SegmentSpans};
use crate::audio::format::FormatDescriptor;
use crate::error::{Result, StreamError};
use crate::streaming::NotificationSchedule;
use crate::types::{BufferStatus, RetryPolicy};

/// State shared between a ring buffer and its outstanding lock region
struct Shared {
    device: Arc<dyn BufferDevice>,
    format: FormatDescriptor,
    capacity: u32,
    is_primary: bool,
    /// Single-writer flag, set while a lock region is outstanding
    locked: AtomicBool,
}

impl Drop for Shared {
    fn drop(&mut self) {
        if matches!(self.device.status(), Ok(status) if status.is_playing()) {
            if let Err(e) = self.device.stop() {
                tracing::warn!("Failed to stop buffer on release: {}", e);
            }
        }
        self.device.release();
        tracing::debug!("Released {} byte ring buffer", self.capacity);
    }
}

/// Fixed-capacity circular byte buffer backed by device memory
///
/// The only way to write into the ring is to [`lock`](Self::lock) a region,
/// fill the returned segments and hand the region back to
/// [`unlock`](Self::unlock). Cursor positions belong to the hardware and are
/// read through a [`CursorTracker`].
pub struct RingBuffer {
    shared: Arc<Shared>,
    retry: RetryPolicy,
}

impl RingBuffer {
    /// Wrap a secondary (streaming) device buffer
    ///
    /// # Errors
    ///
    /// Returns `InvalidFormat` or `InvalidParameter` if the format or capacity
    /// is unusable.
    pub fn new(
        format: FormatDescriptor,
        capacity: u32,
        device: Arc<dyn BufferDevice>,
    ) -> Result<Self> {
        Self::from_parts(format, capacity, device, false)
    }

    pub(crate) fn from_parts(
        format: FormatDescriptor,
        capacity: u32,
        device: Arc<dyn BufferDevice>,
        is_primary: bool,
    ) -> Result<Self> {
        format.validate()?;
        if capacity == 0 || !format.is_aligned(capacity) {
            return Err(StreamError::InvalidParameter {
                name: "capacity".to_string(),
                message: format!(
                    "{capacity} is not a non-zero multiple of block align {}",
                    format.block_align
                ),
            });
        }

        Ok(Self {
            shared: Arc::new(Shared {
                device,
                format,
                capacity,
                is_primary,
                locked: AtomicBool::new(false),
            }),
            retry: RetryPolicy::default(),
        })
    }

    /// Replace the busy-retry policy used by lock and unlock
    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Set the busy-retry policy used by lock and unlock
    pub fn set_retry_policy(&mut self, retry: RetryPolicy) {
        self.retry = retry;
    }

    /// Get buffer capacity in bytes
    pub fn capacity(&self) -> u32 {
        self.shared.capacity
    }

    /// Get the sample format
    pub fn format(&self) -> &FormatDescriptor {
        &self.shared.format
    }

    /// Whether this is the device's primary buffer
    pub fn is_primary(&self) -> bool {
        self.shared.is_primary
    }

    /// Whether a lock region is currently outstanding
    pub fn is_locked(&self) -> bool {
        self.shared.locked.load(Ordering::Acquire)
    }

    /// Tracker reading this buffer's hardware cursors
    pub fn cursor_tracker(&self) -> CursorTracker {
        CursorTracker::new(
            Arc::clone(&self.shared.device),
            self.shared.capacity,
            self.shared.format,
        )
    }

    /// Notification schedule for this buffer, `None` when the device has no
    /// position notifications
    pub fn notification_schedule(&self) -> Option<NotificationSchedule> {
        let max_entries = self.shared.device.max_notifications();
        if max_entries == 0 {
            return None;
        }
        Some(NotificationSchedule::new(
            Arc::clone(&self.shared.device),
            self.shared.capacity,
            self.shared.format,
            max_entries,
        ))
    }

    /// Lock `length` bytes starting at `offset` for writing
    ///
    /// A region running past the end of the ring is split into a primary
    /// segment `[offset, capacity)` and a wrap segment `[0, remainder)`.
    ///
    /// # Errors
    ///
    /// - `MisalignedRegion` if offset or length is not frame-aligned
    /// - `OutOfBounds` if `offset >= capacity` or `length > capacity`
    /// - `LockConflict` if another region is still outstanding
    /// - `BufferUnavailable` if the device lost the buffer memory
    /// - `DeviceBusy` once the retry policy is exhausted
    ///
    /// Busy retries sleep the calling thread between attempts. Async callers
    /// should use [`lock_async`](Self::lock_async) instead.
    pub fn lock(&self, offset: u32, length: u32) -> Result<LockRegion> {
        self.lock_with(offset, length, self.retry)
    }

    /// Async variant of [`lock`](Self::lock)
    ///
    /// Busy retries wait on [`tokio::time::sleep`] rather than blocking the
    /// runtime thread.
    ///
    /// # Errors
    ///
    /// Same as [`lock`](Self::lock).
    pub async fn lock_async(&self, offset: u32, length: u32) -> Result<LockRegion> {
        let attempts = self.retry.attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.lock_with(offset, length, RetryPolicy::NONE) {
                Err(StreamError::DeviceBusy) if attempt < attempts => {
                    busy_backoff(self.retry, "lock", attempt).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    fn lock_with(&self, offset: u32, length: u32, retry: RetryPolicy) -> Result<LockRegion> {
        let capacity = self.shared.capacity;
        let format = &self.shared.format;

        if !format.is_aligned(offset) || !format.is_aligned(length) {
            return Err(StreamError::MisalignedRegion {
                offset,
                length,
                block_align: format.block_align,
            });
        }
        if offset >= capacity || length > capacity {
            return Err(StreamError::OutOfBounds {
                offset,
                length,
                capacity,
            });
        }

        if self
            .shared
            .locked
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::error!(
                "Lock conflict: lock({}, {}) while a region is outstanding",
                offset,
                length
            );
            return Err(StreamError::LockConflict);
        }

        let spans = SegmentSpans::split(offset, length, capacity);
        let device = &self.shared.device;
        let (primary, wrap) = match with_retry(retry, "lock", || device.lock(spans)) {
            Ok(segments) => segments,
            Err(e) => {
                self.shared.locked.store(false, Ordering::Release);
                if e == DeviceError::Lost {
                    tracing::error!("Buffer lost during lock({}, {})", offset, length);
                }
                return Err(e.into());
            }
        };

        if primary.len() != spans.primary.len as usize || wrap.len() != spans.wrap.len as usize {
            // Hand the mapping straight back; a device that splits differently is broken.
            if let Err(e) = device.unlock(spans, &primary, &wrap) {
                tracing::warn!("Failed to unlock mis-sized region: {}", e);
            }
            self.shared.locked.store(false, Ordering::Release);
            return Err(StreamError::DeviceFailure {
                message: format!(
                    "device returned segments of {} + {} bytes for {:?}",
                    primary.len(),
                    wrap.len(),
                    spans
                ),
            });
        }

        tracing::trace!(
            "Locked {} bytes at {} (primary={}, wrap={})",
            length,
            offset,
            spans.primary.len,
            spans.wrap.len
        );

        Ok(LockRegion {
            shared: Arc::clone(&self.shared),
            retry: self.retry,
            spans,
            primary,
            wrap,
            committed: false,
        })
    }

    /// Commit a region obtained from [`lock`](Self::lock)
    ///
    /// The lock is released even when the device reports a failure.
    ///
    /// # Errors
    ///
    /// - `InvalidParameter` if the region was locked on a different buffer
    /// - `BufferUnavailable` if the device lost the buffer memory
    /// - `DeviceBusy` once the retry policy is exhausted
    ///
    /// Busy retries sleep the calling thread between attempts. Async callers
    /// should use [`unlock_async`](Self::unlock_async) instead.
    pub fn unlock(&self, mut region: LockRegion) -> Result<()> {
        self.check_owner(&region)?;
        region.commit()
    }

    /// Async variant of [`unlock`](Self::unlock)
    ///
    /// The region stays locked while a busy device is retried; the last
    /// attempt releases the lock whatever the outcome. Dropping the future
    /// early commits the region synchronously.
    ///
    /// # Errors
    ///
    /// Same as [`unlock`](Self::unlock).
    pub async fn unlock_async(&self, mut region: LockRegion) -> Result<()> {
        self.check_owner(&region)?;

        let attempts = self.retry.attempts.max(1);
        let mut attempt = 1;
        loop {
            match region.try_commit(attempt >= attempts) {
                Err(StreamError::DeviceBusy) if attempt < attempts => {
                    busy_backoff(self.retry, "unlock", attempt).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    fn check_owner(&self, region: &LockRegion) -> Result<()> {
        if !Arc::ptr_eq(&region.shared, &self.shared) {
            return Err(StreamError::InvalidParameter {
                name: "region".to_string(),
                message: "region was not locked from this buffer".to_string(),
            });
        }

        tracing::trace!(
            "Unlocking {} bytes at {}",
            region.spans.total_len(),
            region.spans.primary.offset
        );
        Ok(())
    }

    /// Start playback; no-op if already in the requested mode
    ///
    /// # Errors
    ///
    /// Returns the mapped device error.
    pub fn play(&self, looping: bool) -> Result<()> {
        let target = BufferStatus::for_play(looping);
        if self.status()? == target {
            return Ok(());
        }
        self.shared.device.play(looping)?;
        tracing::debug!("Buffer playing (looping={})", looping);
        Ok(())
    }

    /// Stop playback; no-op if already stopped
    ///
    /// # Errors
    ///
    /// Returns the mapped device error.
    pub fn stop(&self) -> Result<()> {
        if self.status()? == BufferStatus::Stopped {
            return Ok(());
        }
        if self.is_locked() {
            tracing::warn!("Stopping buffer with a lock outstanding");
        }
        self.shared.device.stop()?;
        tracing::debug!("Buffer stopped");
        Ok(())
    }

    /// Get current playback status
    ///
    /// # Errors
    ///
    /// Returns the mapped device error.
    pub fn status(&self) -> Result<BufferStatus> {
        Ok(self.shared.device.status()?)
    }
}

impl std::fmt::Debug for RingBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RingBuffer")
            .field("capacity", &self.shared.capacity)
            .field("format", &self.shared.format)
            .field("is_primary", &self.shared.is_primary)
            .field("locked", &self.is_locked())
            .finish_non_exhaustive()
    }
}

/// Writable view of a locked ring region
///
/// Owned exclusively by the caller between `lock` and `unlock`. Dropping a
/// region without unlocking commits it, so the buffer never stays locked.
pub struct LockRegion {
    shared: Arc<Shared>,
    retry: RetryPolicy,
    spans: SegmentSpans,
    primary: BytesMut,
    wrap: BytesMut,
    committed: bool,
}

impl LockRegion {
    /// Ring offset of the first byte
    pub fn offset(&self) -> u32 {
        self.spans.primary.offset
    }

    /// Total locked bytes across both segments
    pub fn len(&self) -> u32 {
        self.spans.total_len()
    }

    /// Check if the region covers no bytes
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the region crosses the end of the ring
    pub fn is_wrapped(&self) -> bool {
        !self.spans.wrap.is_empty()
    }

    /// Ring spans covered by the two segments
    pub fn spans(&self) -> SegmentSpans {
        self.spans
    }

    /// Segment from `offset` towards the end of the ring
    pub fn primary(&self) -> &[u8] {
        &self.primary
    }

    /// Segment from the start of the ring; empty unless wrapped
    pub fn wrap(&self) -> &[u8] {
        &self.wrap
    }

    /// Mutable primary segment
    pub fn primary_mut(&mut self) -> &mut [u8] {
        &mut self.primary
    }

    /// Mutable wrap segment
    pub fn wrap_mut(&mut self) -> &mut [u8] {
        &mut self.wrap
    }

    /// Both segments at once, in ring order
    pub fn segments_mut(&mut self) -> (&mut [u8], &mut [u8]) {
        (&mut self.primary, &mut self.wrap)
    }

    /// Copy `data` into the region, primary first
    ///
    /// Returns number of bytes written
    pub fn write(&mut self, data: &[u8]) -> usize {
        let first = data.len().min(self.primary.len());
        self.primary[..first].copy_from_slice(&data[..first]);

        let second = (data.len() - first).min(self.wrap.len());
        self.wrap[..second].copy_from_slice(&data[first..first + second]);

        first + second
    }

    /// Fill every byte of the region
    pub fn fill(&mut self, byte: u8) {
        self.primary.fill(byte);
        self.wrap.fill(byte);
    }

    fn commit(&mut self) -> Result<()> {
        if self.committed {
            return Ok(());
        }

        let device = &self.shared.device;
        let result = with_retry(self.retry, "unlock", || {
            device.unlock(self.spans, &self.primary, &self.wrap)
        });
        self.finish_commit(result)
    }

    /// Single unlock attempt; a busy device leaves the region locked unless
    /// this is the last attempt
    fn try_commit(&mut self, last_attempt: bool) -> Result<()> {
        if self.committed {
            return Ok(());
        }

        let result = self
            .shared
            .device
            .unlock(self.spans, &self.primary, &self.wrap);
        if result == Err(DeviceError::Busy) && !last_attempt {
            return Err(StreamError::DeviceBusy);
        }
        self.finish_commit(result)
    }

    fn finish_commit(&mut self, result: std::result::Result<(), DeviceError>) -> Result<()> {
        self.committed = true;
        self.shared.locked.store(false, Ordering::Release);

        if result == Err(DeviceError::Lost) {
            tracing::error!("Buffer lost during unlock at {}", self.spans.primary.offset);
        }
        result.map_err(Into::into)
    }
}

impl std::fmt::Debug for LockRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockRegion")
            .field("spans", &self.spans)
            .field("committed", &self.committed)
            .finish_non_exhaustive()
    }
}

impl Drop for LockRegion {
    fn drop(&mut self) {
        if !self.committed {
            tracing::debug!(
                "Lock region at {} dropped without unlock, committing",
                self.spans.primary.offset
            );
            if let Err(e) = self.commit() {
                tracing::warn!("Failed to commit dropped lock region: {}", e);
            }
        }
    }
}

/// Run a device primitive, retrying `Busy` with bounded backoff
///
/// The backoff blocks the calling thread; it is only taken on the synchronous
/// paths and from `Drop`.
fn with_retry<T>(
    policy: RetryPolicy,
    operation: &str,
    mut f: impl FnMut() -> std::result::Result<T, DeviceError>,
) -> std::result::Result<T, DeviceError> {
    let attempts = policy.attempts.max(1);
    let mut attempt = 1;
    loop {
        match f() {
            Err(DeviceError::Busy) if attempt < attempts => {
                tracing::warn!("Device busy on {}, retrying ({}/{})", operation, attempt, attempts);
                if !policy.backoff.is_zero() {
                    std::thread::sleep(policy.backoff);
                }
                attempt += 1;
            }
            other => return other,
        }
    }
}

async fn busy_backoff(policy: RetryPolicy, operation: &str, attempt: u32) {
    tracing::warn!(
        "Device busy on {}, retrying ({}/{})",
        operation,
        attempt,
        policy.attempts.max(1)
    );
    if !policy.backoff.is_zero() {
        tokio::time::sleep(policy.backoff).await;
    }
}
