//! Shared frame slot
//!
//! One writer, many readers. Both sides hold the lock only long enough to
//! swap or clone the stored `Frame`; encoding and I/O happen after the lock
//! is released.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::types::Frame;

/// A reader's private copy of the current frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameSnapshot {
    /// Generation at which this frame was published (starts at 1)
    pub generation: u64,
    /// The frame itself
    pub frame: Frame,
}

/// Single-slot "latest frame" buffer
#[derive(Debug, Default)]
pub struct FrameSlot {
    current: Mutex<Option<FrameSnapshot>>,
    generation: AtomicU64,
}

impl FrameSlot {
    /// Create an empty slot
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the stored frame
    ///
    /// Empty or malformed frames are discarded silently. Returns the new
    /// generation, or `None` if the frame was discarded.
    pub fn publish(&self, frame: Frame) -> Option<u64> {
        if frame.is_empty() {
            tracing::trace!(
                format = frame.format.name(),
                len = frame.size(),
                "Discarding empty frame"
            );
            return None;
        }

        let mut current = self.lock();
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        *current = Some(FrameSnapshot { generation, frame });

        Some(generation)
    }

    /// Copy out the current frame, if one has been published
    pub fn snapshot(&self) -> Option<FrameSnapshot> {
        self.lock().clone()
    }

    /// Number of frames accepted so far
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Whether a frame has ever been published
    pub fn has_frame(&self) -> bool {
        self.generation() > 0
    }

    // A panic while holding this lock can only happen between two plain
    // assignments, so the stored value is still whole.
    fn lock(&self) -> MutexGuard<'_, Option<FrameSnapshot>> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
