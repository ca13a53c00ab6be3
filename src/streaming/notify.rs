//! Play-cursor position notifications

use async_trait::async_trait;
use futures::future::{FutureExt, select_all};
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Notify;

use crate::audio::device::{BufferDevice, PositionNotify};
use crate::audio::format::FormatDescriptor;
use crate::error::{Result, StreamError};

/// Waitable handle the platform raises and the engine waits on
///
/// Nothing is assumed about how a signal is represented; a platform binding
/// can wrap an OS event object behind this trait.
#[async_trait]
pub trait WakeSignal: Send + Sync {
    /// Raise the signal, waking one pending or future waiter
    fn signal(&self);

    /// Wait until the signal is raised
    async fn wait(&self);
}

/// Auto-reset event built on [`tokio::sync::Notify`]
///
/// A raise with nobody waiting is remembered, so a wake that lands between two
/// `wait` calls is not lost. Several raises before a wait collapse into one.
#[derive(Debug, Default)]
pub struct EventSignal {
    notify: Notify,
    raised: AtomicU64,
}

impl EventSignal {
    /// Create a new signal
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of times the signal was raised
    pub fn fire_count(&self) -> u64 {
        self.raised.load(Ordering::Acquire)
    }
}

#[async_trait]
impl WakeSignal for EventSignal {
    fn signal(&self) {
        self.raised.fetch_add(1, Ordering::AcqRel);
        self.notify.notify_one();
    }

    async fn wait(&self) {
        self.notify.notified().await;
    }
}

/// One registration: wake `signal` when the play cursor crosses `offset`
#[derive(Clone)]
pub struct NotificationEntry {
    /// Frame-aligned ring offset
    pub offset: u32,
    /// Signal raised on each crossing
    pub signal: Arc<dyn WakeSignal>,
}

impl NotificationEntry {
    /// Create an entry
    pub fn new(offset: u32, signal: Arc<dyn WakeSignal>) -> Self {
        Self { offset, signal }
    }
}

impl std::fmt::Debug for NotificationEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationEntry")
            .field("offset", &self.offset)
            .finish_non_exhaustive()
    }
}

/// Active set of position notifications for one ring buffer
pub struct NotificationSchedule {
    device: Arc<dyn BufferDevice>,
    capacity: u32,
    format: FormatDescriptor,
    max_entries: usize,
    entries: Vec<NotificationEntry>,
}

impl NotificationSchedule {
    pub(crate) fn new(
        device: Arc<dyn BufferDevice>,
        capacity: u32,
        format: FormatDescriptor,
        max_entries: usize,
    ) -> Self {
        Self {
            device,
            capacity,
            format,
            max_entries,
            entries: Vec::new(),
        }
    }

    /// Device bound on simultaneously armed entries
    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    /// Currently armed entries, in registration order
    pub fn entries(&self) -> &[NotificationEntry] {
        &self.entries
    }

    /// Replace the armed set with `entries`
    ///
    /// # Errors
    ///
    /// - `TooManyEntries` if `entries` exceeds the device bound
    /// - `MisalignedOffset` if an offset is not frame-aligned
    /// - `InvalidParameter` if an offset lies outside the ring or repeats
    /// - mapped device error if the registers cannot be written
    pub fn arm(&mut self, entries: Vec<NotificationEntry>) -> Result<()> {
        if entries.len() > self.max_entries {
            return Err(StreamError::TooManyEntries {
                count: entries.len(),
                max: self.max_entries,
            });
        }

        let mut seen = HashSet::with_capacity(entries.len());
        for entry in &entries {
            if !self.format.is_aligned(entry.offset) {
                return Err(StreamError::MisalignedOffset {
                    offset: entry.offset,
                    block_align: self.format.block_align,
                });
            }
            if entry.offset >= self.capacity {
                return Err(StreamError::InvalidParameter {
                    name: "offset".to_string(),
                    message: format!(
                        "notification offset {} outside {} byte ring",
                        entry.offset, self.capacity
                    ),
                });
            }
            if !seen.insert(entry.offset) {
                return Err(StreamError::InvalidParameter {
                    name: "offset".to_string(),
                    message: format!("duplicate notification offset {}", entry.offset),
                });
            }
        }

        let positions: Vec<PositionNotify> = entries
            .iter()
            .map(|e| PositionNotify {
                offset: e.offset,
                signal: Arc::clone(&e.signal),
            })
            .collect();
        self.device.set_notification_positions(&positions)?;

        tracing::debug!(
            "Armed {} notification(s) at {:?}",
            entries.len(),
            entries.iter().map(|e| e.offset).collect::<Vec<_>>()
        );
        self.entries = entries;
        Ok(())
    }

    /// Disarm every entry
    ///
    /// # Errors
    ///
    /// Returns the mapped device error.
    pub fn clear(&mut self) -> Result<()> {
        self.device.set_notification_positions(&[])?;
        self.entries.clear();
        Ok(())
    }

    /// Wait for any armed signal, returning the offset of the one that fired
    ///
    /// When several fired since the last wait only one is consumed here; the
    /// others stay raised and complete the following waits. Returns `None`
    /// immediately if nothing is armed.
    pub async fn wait_any(&self) -> Option<u32> {
        if self.entries.is_empty() {
            return None;
        }

        let waits = self.entries.iter().map(|entry| {
            let offset = entry.offset;
            entry.signal.wait().map(move |()| offset).boxed()
        });
        let (offset, _, _) = select_all(waits).await;
        Some(offset)
    }

    /// Build one entry per signal, evenly spaced from offset zero
    ///
    /// Two signals give the double-buffer layout: one wake per half ring.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameter` if `signals` is empty or the segments would
    /// be smaller than one frame.
    pub fn evenly_spaced(
        capacity: u32,
        format: &FormatDescriptor,
        signals: &[Arc<dyn WakeSignal>],
    ) -> Result<Vec<NotificationEntry>> {
        let segments = u32::try_from(signals.len()).unwrap_or(u32::MAX);
        if segments == 0 {
            return Err(StreamError::InvalidParameter {
                name: "segments".to_string(),
                message: "at least one segment is required".to_string(),
            });
        }

        let segment_len = format.align_down(capacity / segments);
        if segment_len == 0 {
            return Err(StreamError::InvalidParameter {
                name: "segments".to_string(),
                message: format!("{segments} segments leave less than one frame each"),
            });
        }

        Ok(signals
            .iter()
            .zip(0u32..)
            .map(|(signal, i)| NotificationEntry::new(i * segment_len, Arc::clone(signal)))
            .collect())
    }
}

impl std::fmt::Debug for NotificationSchedule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationSchedule")
            .field("capacity", &self.capacity)
            .field("max_entries", &self.max_entries)
            .field("entries", &self.entries)
            .finish_non_exhaustive()
    }
}
