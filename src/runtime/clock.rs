//! Process-local monotonic millisecond clock.

use minstant::Instant;

/// Monotonic clock anchored at construction. Every engine instant is a
/// millisecond count on this epoch; wall-clock differences between devices
/// are absorbed by the synchronization offset, never read directly.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    anchor: Instant,
}

impl MonotonicClock {
    /// Starts a new epoch at the current instant.
    #[must_use]
    pub fn new() -> Self {
        Self {
            anchor: Instant::now(),
        }
    }

    /// Milliseconds elapsed since the epoch began.
    #[must_use]
    pub fn now_ms(&self) -> u64 {
        self.anchor.elapsed().as_millis() as u64
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}
