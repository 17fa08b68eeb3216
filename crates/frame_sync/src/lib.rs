//! CPU/GPU frame pacing.
//!
//! The pacer bounds how many frames the CPU may record ahead of the GPU. Each begun frame holds one
//! token of an in-flight semaphore; the token is returned by a [`FrameCompletion`] that the caller
//! fires from the GPU's "work done" callback. The ring index selects which triple-buffered resource
//! set the CPU writes this frame.

use crossbeam_channel::{Receiver, Sender, TryRecvError};
use thiserror::Error;

pub const MAX_FRAMES_IN_FLIGHT: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FramePacerConfig {
    pub max_frames_in_flight: usize,
}

impl Default for FramePacerConfig {
    fn default() -> Self {
        Self {
            max_frames_in_flight: MAX_FRAMES_IN_FLIGHT,
        }
    }
}

/// Ring-buffer slot selecting the per-frame resource copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferSyncState {
    index: usize,
    slots: usize,
}

impl BufferSyncState {
    pub fn new(slots: usize) -> Self {
        assert!(slots > 0, "buffer sync ring needs at least one slot");
        Self { index: 0, slots }
    }

    pub fn index(self) -> usize {
        self.index
    }

    pub fn slots(self) -> usize {
        self.slots
    }

    #[must_use]
    pub fn advance(self) -> Self {
        Self {
            index: (self.index + 1) % self.slots,
            slots: self.slots,
        }
    }
}

/// Counting semaphore built on a bounded channel: a send takes a token, a receive returns one.
#[derive(Debug, Clone)]
pub struct InFlightSemaphore {
    sender: Sender<()>,
    receiver: Receiver<()>,
    capacity: usize,
}

impl InFlightSemaphore {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "in-flight semaphore capacity must be positive");
        let (sender, receiver) = crossbeam_channel::bounded(capacity);
        Self {
            sender,
            receiver,
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn in_flight(&self) -> usize {
        self.sender.len()
    }

    pub fn would_block(&self) -> bool {
        self.sender.is_full()
    }

    /// Blocks until a token is free.
    pub fn acquire(&self) -> FrameCompletion {
        self.sender
            .send(())
            .unwrap_or_else(|_| panic!("in-flight semaphore receiver dropped while acquiring"));
        FrameCompletion {
            receiver: Some(self.receiver.clone()),
        }
    }

    pub fn try_acquire(&self) -> Option<FrameCompletion> {
        self.sender.try_send(()).ok()?;
        Some(FrameCompletion {
            receiver: Some(self.receiver.clone()),
        })
    }
}

/// Returns one in-flight token when signalled or dropped.
#[derive(Debug)]
#[must_use = "dropping a completion releases its in-flight token immediately"]
pub struct FrameCompletion {
    receiver: Option<Receiver<()>>,
}

impl FrameCompletion {
    pub fn signal(mut self) {
        self.release();
    }

    fn release(&mut self) {
        let Some(receiver) = self.receiver.take() else {
            return;
        };
        match receiver.try_recv() {
            Ok(()) => {}
            Err(TryRecvError::Empty) => {
                panic!("frame completion released a token that was never acquired")
            }
            Err(TryRecvError::Disconnected) => {}
        }
    }
}

impl Drop for FrameCompletion {
    fn drop(&mut self) {
        self.release();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramePhase {
    Idle,
    Begun,
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum BeginFrameError<E> {
    #[error("drawable unavailable, frame skipped")]
    DrawableUnavailable(#[source] E),
}

#[derive(Debug)]
pub struct BegunFrame<D> {
    pub drawable: D,
    pub sync_state: BufferSyncState,
    pub completion: FrameCompletion,
}

#[derive(Debug)]
pub struct FramePacer {
    config: FramePacerConfig,
    semaphore: InFlightSemaphore,
    sync_state: BufferSyncState,
    phase: FramePhase,
    frames_begun: u64,
    frames_skipped: u64,
}

impl FramePacer {
    pub fn new(config: FramePacerConfig) -> Self {
        Self {
            config,
            semaphore: InFlightSemaphore::new(config.max_frames_in_flight),
            sync_state: BufferSyncState::new(config.max_frames_in_flight),
            phase: FramePhase::Idle,
            frames_begun: 0,
            frames_skipped: 0,
        }
    }

    pub fn config(&self) -> FramePacerConfig {
        self.config
    }

    pub fn phase(&self) -> FramePhase {
        self.phase
    }

    pub fn sync_state(&self) -> BufferSyncState {
        self.sync_state
    }

    pub fn in_flight(&self) -> usize {
        self.semaphore.in_flight()
    }

    pub fn would_block(&self) -> bool {
        self.semaphore.would_block()
    }

    pub fn frames_begun(&self) -> u64 {
        self.frames_begun
    }

    pub fn frames_skipped(&self) -> u64 {
        self.frames_skipped
    }

    /// Waits for an in-flight slot, then asks `acquire` for a drawable.
    ///
    /// When no drawable is available the token goes straight back and the caller must skip this
    /// tick.
    pub fn begin_frame<D, E>(
        &mut self,
        acquire: impl FnOnce() -> Result<D, E>,
    ) -> Result<BegunFrame<D>, BeginFrameError<E>> {
        if self.phase == FramePhase::Begun {
            panic!("frame pacer begin_frame called while a frame is already begun");
        }
        let completion = self.semaphore.acquire();
        match acquire() {
            Ok(drawable) => {
                self.phase = FramePhase::Begun;
                self.frames_begun += 1;
                Ok(BegunFrame {
                    drawable,
                    sync_state: self.sync_state,
                    completion,
                })
            }
            Err(error) => {
                completion.signal();
                self.frames_skipped += 1;
                tracing::debug!(
                    skipped = self.frames_skipped,
                    "no drawable available, skipping frame"
                );
                Err(BeginFrameError::DrawableUnavailable(error))
            }
        }
    }

    pub fn end_frame(&mut self) -> BufferSyncState {
        if self.phase != FramePhase::Begun {
            panic!(
                "frame pacer end_frame called in phase {:?}, expected Begun",
                self.phase
            );
        }
        self.phase = FramePhase::Idle;
        self.sync_state = self.sync_state.advance();
        self.sync_state
    }
}

impl Default for FramePacer {
    fn default() -> Self {
        Self::new(FramePacerConfig::default())
    }
}
