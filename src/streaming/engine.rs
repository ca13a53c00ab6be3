//! Producer refill loop driving a streaming ring buffer

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock, mpsc, watch};
use tokio::time::Instant;

use super::notify::{EventSignal, NotificationEntry, NotificationSchedule, WakeSignal};
use super::source::Producer;
use crate::audio::{LockRegion, RingBuffer};
use crate::error::{Result, StreamError};
use crate::types::{EngineConfig, EngineState, EngineStats, StopReason};

/// Commands for the engine loop
#[derive(Debug)]
enum EngineCommand {
    /// Stop streaming
    Stop,
}

/// How the refill loop gets woken
enum WakeSource {
    /// Position notifications armed on the device
    Notify {
        schedule: NotificationSchedule,
        regular: Vec<NotificationEntry>,
    },
    /// Device has no notifications; poll the cursors
    Poll(Duration),
}

impl WakeSource {
    /// Returns true if a notification fired, false on a poll tick
    async fn wait(&self) -> bool {
        match self {
            Self::Notify { schedule, .. } => match schedule.wait_any().await {
                Some(offset) => {
                    tracing::trace!("Woken by notification at {}", offset);
                    true
                }
                None => std::future::pending().await,
            },
            Self::Poll(interval) => {
                tokio::time::sleep(*interval).await;
                false
            }
        }
    }
}

/// Ring position bookkeeping for one run
#[derive(Debug, Default)]
struct Progress {
    /// Ring offset the next lock starts at
    last_committed: u32,
    /// Write cursor seen on the previous cycle
    last_write: u32,
    /// Play cursor seen on the previous cycle
    last_play: u32,
    /// Bytes the play cursor advanced since playback started
    played: u64,
    /// Producer bytes committed since priming, in stream order
    payload_end: u64,
}

/// Streaming engine
///
/// Primes the ring, starts playback and then refills whatever the hardware
/// has consumed each time a wake point is crossed, until the producer runs
/// dry and the tail has been played.
pub struct StreamEngine {
    /// Ring being streamed into
    buffer: RingBuffer,
    /// Engine configuration
    config: EngineConfig,
    /// Current state
    state_tx: watch::Sender<EngineState>,
    /// Counters
    stats: RwLock<EngineStats>,
    /// Command sender
    cmd_tx: mpsc::Sender<EngineCommand>,
    /// Command receiver
    cmd_rx: Mutex<mpsc::Receiver<EngineCommand>>,
}

impl StreamEngine {
    /// Create an idle engine owning `buffer`
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameter` if the configuration is unusable.
    pub fn new(mut buffer: RingBuffer, config: EngineConfig) -> Result<Self> {
        if config.notification_segments == 0 {
            return Err(StreamError::InvalidParameter {
                name: "notification_segments".to_string(),
                message: "at least one segment is required".to_string(),
            });
        }
        if config.poll_interval.is_some_and(|interval| interval.is_zero()) {
            return Err(StreamError::InvalidParameter {
                name: "poll_interval".to_string(),
                message: "must be non-zero".to_string(),
            });
        }

        buffer.set_retry_policy(config.lock_retry);
        let (cmd_tx, cmd_rx) = mpsc::channel(4);
        let (state_tx, _) = watch::channel(EngineState::Idle);

        Ok(Self {
            buffer,
            config,
            state_tx,
            stats: RwLock::new(EngineStats::default()),
            cmd_tx,
            cmd_rx: Mutex::new(cmd_rx),
        })
    }

    /// Get current state
    pub fn state(&self) -> EngineState {
        *self.state_tx.borrow()
    }

    /// Subscribe to state changes
    pub fn subscribe(&self) -> watch::Receiver<EngineState> {
        self.state_tx.subscribe()
    }

    /// Snapshot of the engine counters
    pub async fn stats(&self) -> EngineStats {
        self.stats.read().await.clone()
    }

    /// Ring being streamed into
    pub fn buffer(&self) -> &RingBuffer {
        &self.buffer
    }

    /// Engine configuration
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Take the ring back, e.g. to release it after a stop
    pub fn into_buffer(self) -> RingBuffer {
        self.buffer
    }

    /// Request the engine to stop
    ///
    /// An idle engine stops immediately; a running one stops at its next
    /// suspension point, never with a lock outstanding.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` if the command channel is gone, or the mapped
    /// device error when stopping an idle buffer.
    pub fn stop(&self) -> Result<()> {
        let was_idle = self.state_tx.send_if_modified(|state| {
            if *state == EngineState::Idle {
                *state = EngineState::Stopped(StopReason::Requested);
                true
            } else {
                false
            }
        });
        if was_idle {
            tracing::debug!("Engine stopped before start");
            return self.buffer.stop();
        }
        if self.state().is_stopped() {
            return Ok(());
        }

        match self.cmd_tx.try_send(EngineCommand::Stop) {
            // A full queue already holds a stop.
            Ok(()) | Err(mpsc::error::TrySendError::Full(_)) => Ok(()),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(StreamError::InvalidState {
                message: "Engine not running".to_string(),
                current_state: self.state().to_string(),
            }),
        }
    }

    /// Stream `producer` through the ring until it ends, `stop()` is called,
    /// or the device fails
    ///
    /// The buffer is stopped on every exit path and the engine ends in
    /// `Stopped`. The engine never recreates a lost buffer.
    ///
    /// # Errors
    ///
    /// - `InvalidState` if the engine was already started
    /// - `BufferUnavailable` if the device lost the buffer (fatal)
    /// - any other lock, notification or producer error that halted streaming
    pub async fn run<P: Producer>(&self, mut producer: P) -> Result<()> {
        let claimed = self.state_tx.send_if_modified(|state| {
            if *state == EngineState::Idle {
                *state = EngineState::Priming;
                true
            } else {
                false
            }
        });
        if !claimed {
            return Err(StreamError::InvalidState {
                message: "Engine already started".to_string(),
                current_state: self.state().to_string(),
            });
        }

        let mut cmd_rx = self.cmd_rx.lock().await;
        let outcome = self.drive(&mut producer, &mut cmd_rx).await;

        if let Err(e) = self.buffer.stop() {
            tracing::debug!("Stopping buffer after run failed: {}", e);
        }

        match outcome {
            Ok(reason) => {
                let stats = self.stats().await;
                tracing::info!(
                    "Streaming finished ({:?}): {} payload bytes in {} cycles",
                    reason,
                    stats.payload_bytes,
                    stats.cycles
                );
                self.set_state(EngineState::Stopped(reason));
                Ok(())
            }
            Err(e) => {
                let reason = if e.is_fatal() {
                    tracing::error!("Buffer lost, streaming halted; recreate the buffer to continue");
                    StopReason::BufferLost
                } else {
                    tracing::error!("Streaming halted: {}", e);
                    StopReason::Failed
                };
                self.set_state(EngineState::Stopped(reason));
                Err(e)
            }
        }
    }

    async fn drive<P: Producer>(
        &self,
        producer: &mut P,
        cmd_rx: &mut mpsc::Receiver<EngineCommand>,
    ) -> Result<StopReason> {
        let capacity = self.buffer.capacity();
        let tracker = self.buffer.cursor_tracker();

        let primed = self.refill(producer, 0, capacity).await?;
        let mut progress = Progress {
            payload_end: primed as u64,
            ..Progress::default()
        };

        let mut waker = self.wake_source()?;
        self.buffer.play(self.config.looping)?;

        let snapshot = tracker.positions()?;
        progress.last_write = snapshot.write;
        progress.last_play = snapshot.play;

        tracing::info!(
            "Streaming started: {} of {} bytes primed, {}",
            primed,
            capacity,
            match &waker {
                WakeSource::Notify { regular, .. } => format!("{} notification(s)", regular.len()),
                WakeSource::Poll(interval) => format!("polling every {interval:?}"),
            }
        );

        let mut drain_deadline = if primed < capacity as usize {
            Some(self.enter_draining(&mut waker, &progress)?)
        } else {
            self.set_state(EngineState::Streaming);
            None
        };
        let far_future = Instant::now() + Duration::from_secs(86_400 * 365);

        loop {
            if drain_deadline.is_some() && progress.played >= progress.payload_end {
                tracing::debug!("Drain complete: {} bytes played", progress.played);
                return Ok(StopReason::Completed);
            }

            tokio::select! {
                biased;
                cmd = cmd_rx.recv() => {
                    match cmd {
                        Some(EngineCommand::Stop) | None => {
                            tracing::debug!("Stop requested");
                            return Ok(StopReason::Requested);
                        }
                    }
                }
                () = tokio::time::sleep_until(drain_deadline.unwrap_or(far_future)), if drain_deadline.is_some() => {
                    tracing::warn!(
                        "Drain timed out after {:?} ({} of {} bytes played)",
                        self.config.drain_timeout,
                        progress.played,
                        progress.payload_end
                    );
                    return Ok(StopReason::Completed);
                }
                woke = waker.wait() => {
                    if woke {
                        self.stats.write().await.wakes += 1;
                    }
                }
            }

            self.stats.write().await.cycles += 1;
            let snapshot = tracker.positions()?;
            progress.played += u64::from(tracker.play_distance(progress.last_play, snapshot.play));
            progress.last_play = snapshot.play;
            tracing::trace!(
                "Cursors: play={}, write={}, played={}",
                snapshot.play,
                snapshot.write,
                progress.played
            );

            if drain_deadline.is_some() {
                continue;
            }

            // Equal write cursors mean the hardware has not moved, not a full lap.
            if snapshot.write == progress.last_write {
                self.stats.write().await.empty_cycles += 1;
                continue;
            }
            progress.last_write = snapshot.write;

            let free = tracker.free_bytes_at(snapshot, progress.last_committed);
            if free == 0 {
                self.stats.write().await.empty_cycles += 1;
                continue;
            }

            let produced = self.refill(producer, progress.last_committed, free).await?;
            progress.last_committed = (progress.last_committed + free) % capacity;
            progress.payload_end += produced as u64;

            if produced < free as usize {
                drain_deadline = Some(self.enter_draining(&mut waker, &progress)?);
            } else if let WakeSource::Notify { schedule, regular } = &mut waker {
                schedule.arm(regular.clone())?;
            }
        }
    }

    /// Lock `length` bytes at `offset`, fill them from the producer, commit
    ///
    /// Returns the producer byte count; the rest of the region is silence.
    async fn refill<P: Producer>(&self, producer: &mut P, offset: u32, length: u32) -> Result<usize> {
        let silence = self.buffer.format().silence_byte();

        let mut region = self.buffer.lock_async(offset, length).await?;
        let filled = fill_region(producer, &mut region, silence);
        // Unlock even when the producer failed; the region then holds silence.
        let committed = self.buffer.unlock_async(region).await;
        let produced = filled?;
        committed?;

        tracing::trace!("Committed {} bytes at {} ({} payload)", length, offset, produced);

        let mut stats = self.stats.write().await;
        stats.lock_calls += 1;
        stats.bytes_committed += u64::from(length);
        stats.payload_bytes += produced as u64;
        Ok(produced)
    }

    /// Arm evenly spaced notifications, or pick a polling interval
    fn wake_source(&self) -> Result<WakeSource> {
        let capacity = self.buffer.capacity();
        let format = *self.buffer.format();

        let Some(mut schedule) = self.buffer.notification_schedule() else {
            let segment = capacity / self.config.notification_segments;
            // A quarter of a segment keeps polling under half its fill time.
            let interval = self.config.poll_interval.unwrap_or_else(|| {
                (format.bytes_to_duration(segment) / 4).max(Duration::from_millis(1))
            });
            tracing::debug!("No position notifications, polling every {:?}", interval);
            return Ok(WakeSource::Poll(interval));
        };

        let mut segments = self.config.notification_segments as usize;
        if segments > schedule.max_entries() {
            tracing::warn!(
                "Device accepts {} notifications, reducing from {}",
                schedule.max_entries(),
                segments
            );
            segments = schedule.max_entries();
        }

        let signals: Vec<Arc<dyn WakeSignal>> = (0..segments)
            .map(|_| Arc::new(EventSignal::new()) as Arc<dyn WakeSignal>)
            .collect();
        let regular = NotificationSchedule::evenly_spaced(capacity, &format, &signals)?;
        schedule.arm(regular.clone())?;

        Ok(WakeSource::Notify { schedule, regular })
    }

    /// Switch to draining and arm a wake at the end of the payload
    fn enter_draining(&self, waker: &mut WakeSource, progress: &Progress) -> Result<Instant> {
        self.set_state(EngineState::Draining);

        if let WakeSource::Notify { schedule, regular } = waker {
            let capacity = u64::from(self.buffer.capacity());
            let block_align = u64::from(self.buffer.format().block_align);
            let end = progress.payload_end.div_ceil(block_align) * block_align % capacity;
            // Reuse one of the existing signals for the single end-of-payload wake.
            if let Some(first) = regular.first() {
                #[allow(clippy::cast_possible_truncation)]
                let entry = NotificationEntry::new(end as u32, Arc::clone(&first.signal));
                schedule.arm(vec![entry])?;
            }
        }

        tracing::debug!(
            "Producer exhausted after {} bytes, draining",
            progress.payload_end
        );
        Ok(Instant::now() + self.config.drain_timeout)
    }

    fn set_state(&self, state: EngineState) {
        let old = self.state_tx.send_replace(state);
        if old != state {
            tracing::debug!("Engine state: {} -> {}", old, state);
        }
    }
}

/// Fill both segments of `region` in ring order
///
/// Once the producer comes up short everything after its data is set to
/// `silence`. A producer error silences the failing segment and every one
/// after it. Returns the producer byte count.
pub(super) fn fill_region<P: Producer + ?Sized>(
    producer: &mut P,
    region: &mut LockRegion,
    silence: u8,
) -> Result<usize> {
    let (primary, wrap) = region.segments_mut();
    let mut produced = 0;
    let mut ended = false;
    let mut failure = None;

    for segment in [primary, wrap] {
        if ended {
            segment.fill(silence);
            continue;
        }
        if segment.is_empty() {
            continue;
        }

        let n = match producer.fill_next(segment) {
            Ok(n) => n.min(segment.len()),
            Err(e) => {
                segment.fill(silence);
                failure = Some(e);
                ended = true;
                continue;
            }
        };
        produced += n;

        if n < segment.len() {
            segment[n..].fill(silence);
            ended = true;
        }
    }

    match failure {
        Some(source) => Err(StreamError::Producer {
            message: "Failed to fill ring segment".to_string(),
            source,
        }),
        None => Ok(produced),
    }
}

impl std::fmt::Debug for StreamEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamEngine")
            .field("buffer", &self.buffer)
            .field("config", &self.config)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
