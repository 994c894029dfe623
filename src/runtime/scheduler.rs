//! Timed-action engine: arms opaque payloads against a monotonic
//! millisecond clock and releases them once due.
//!
//! Entries live in a slot arena with an intrusive free list; a handle is a
//! slot index plus a generation counter, so a handle freed by firing or
//! cancellation can never reach a successor occupying the same slot.
//! Cancellation is synchronous: once [`ActionScheduler::cancel_all`]
//! returns, no previously armed payload will ever be released.
//!
//! The engine knows nothing about beats or sessions; payloads are opaque.

use thiserror::Error;

/// Grace window for arming slightly-late actions, ms. Targets behind `now`
/// by more than this are rejected rather than fired immediately; callers
/// are expected to have clamped their targets already.
pub const LATE_ARM_TOLERANCE_MS: u64 = 10;

/// Arming failures.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum ArmError {
    /// The requested fire instant already elapsed.
    #[error("fire time {fire_at} ms is in the past (now {now} ms)")]
    InThePast {
        /// Requested fire instant.
        fire_at: u64,
        /// Clock value at the arm call.
        now: u64,
    },
}

/// Handle to a live scheduled action; carries the generation to detect
/// stale use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ActionHandle {
    slot: u32,
    generation: u32,
}

/// An armed entry occupying a slot.
#[derive(Debug)]
struct Armed<T> {
    payload: T,
    fire_at: u64,
    /// Arm-order sequence; breaks ties between equal fire times.
    seq: u64,
    generation: u32,
}

#[derive(Debug)]
enum Slot<T> {
    Occupied(Armed<T>),
    Free {
        next_free: Option<u32>,
        generation: u32,
    },
}

/// Generic timer engine with generational handles.
#[derive(Debug)]
pub struct ActionScheduler<T> {
    slots: Vec<Slot<T>>,
    free_head: Option<u32>,
    next_seq: u64,
    live: usize,
}

impl<T> ActionScheduler<T> {
    /// Creates an empty scheduler.
    #[must_use]
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free_head: None,
            next_seq: 0,
            live: 0,
        }
    }

    /// Arms `payload` to be released at `fire_at`.
    ///
    /// # Panics
    ///
    /// Panics if the arena outgrows `u32::MAX` slots.
    pub fn arm(&mut self, fire_at: u64, payload: T, now: u64) -> Result<ActionHandle, ArmError> {
        if fire_at + LATE_ARM_TOLERANCE_MS < now {
            return Err(ArmError::InThePast { fire_at, now });
        }
        let seq = self.next_seq;
        self.next_seq += 1;

        let (slot, generation) = match self.free_head {
            Some(idx) => {
                let (next_free, generation) = match &self.slots[idx as usize] {
                    Slot::Free {
                        next_free,
                        generation,
                    } => (*next_free, *generation),
                    Slot::Occupied(_) => unreachable!("free list points at occupied slot"),
                };
                self.free_head = next_free;
                self.slots[idx as usize] = Slot::Occupied(Armed {
                    payload,
                    fire_at,
                    seq,
                    generation,
                });
                (idx, generation)
            }
            None => {
                let idx =
                    u32::try_from(self.slots.len()).expect("slot arena exceeds u32::MAX entries");
                self.slots.push(Slot::Occupied(Armed {
                    payload,
                    fire_at,
                    seq,
                    generation: 0,
                }));
                (idx, 0)
            }
        };
        self.live += 1;
        Ok(ActionHandle { slot, generation })
    }

    /// Cancels a live action.
    ///
    /// Returns true when an entry was found and removed before release;
    /// false for an already-released or stale handle. Idempotent.
    pub fn cancel(&mut self, handle: ActionHandle) -> bool {
        match self.slots.get(handle.slot as usize) {
            Some(Slot::Occupied(armed)) if armed.generation == handle.generation => {
                self.release(handle.slot);
                true
            }
            _ => false,
        }
    }

    /// Cancels every live action. Removal happens inside this call; nothing
    /// armed earlier can be released afterwards.
    pub fn cancel_all(&mut self) {
        for idx in 0..self.slots.len() {
            if matches!(self.slots[idx], Slot::Occupied(_)) {
                self.release(idx as u32);
            }
        }
    }

    /// Removes and returns every action due at `now`, ordered by fire time
    /// and, for equal fire times, by arm order.
    pub fn drain_due(&mut self, now: u64) -> Vec<T> {
        let mut due: Vec<(u64, u64, u32)> = self
            .slots
            .iter()
            .enumerate()
            .filter_map(|(idx, slot)| match slot {
                Slot::Occupied(armed) if armed.fire_at <= now => {
                    Some((armed.fire_at, armed.seq, idx as u32))
                }
                _ => None,
            })
            .collect();
        due.sort_unstable_by_key(|&(fire_at, seq, _)| (fire_at, seq));
        due.into_iter()
            .filter_map(|(_, _, idx)| self.release(idx))
            .collect()
    }

    /// Number of live entries.
    #[must_use]
    pub fn live(&self) -> usize {
        self.live
    }

    /// Frees a slot, bumping its generation, and returns the payload if the
    /// slot was occupied.
    fn release(&mut self, idx: u32) -> Option<T> {
        let slot = &mut self.slots[idx as usize];
        let armed = match std::mem::replace(
            slot,
            Slot::Free {
                next_free: None,
                generation: 0,
            },
        ) {
            Slot::Occupied(armed) => armed,
            free @ Slot::Free { .. } => {
                *slot = free;
                return None;
            }
        };
        *slot = Slot::Free {
            next_free: self.free_head,
            generation: armed.generation.wrapping_add(1),
        };
        self.free_head = Some(idx);
        self.live -= 1;
        Some(armed.payload)
    }
}

impl<T> Default for ActionScheduler<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fires_due_actions_in_time_order() {
        let mut sched = ActionScheduler::new();
        sched.arm(300, "late", 0).unwrap();
        sched.arm(100, "early", 0).unwrap();
        sched.arm(200, "middle", 0).unwrap();

        assert_eq!(sched.drain_due(50), Vec::<&str>::new());
        assert_eq!(sched.drain_due(250), vec!["early", "middle"]);
        assert_eq!(sched.drain_due(300), vec!["late"]);
        assert_eq!(sched.live(), 0);
    }

    #[test]
    fn equal_fire_times_release_in_arm_order() {
        let mut sched = ActionScheduler::new();
        sched.arm(100, "first", 0).unwrap();
        sched.arm(100, "second", 0).unwrap();
        sched.arm(100, "third", 0).unwrap();
        assert_eq!(sched.drain_due(100), vec!["first", "second", "third"]);
    }

    #[test]
    fn cancel_prevents_release() {
        let mut sched = ActionScheduler::new();
        let keep = sched.arm(100, "keep", 0).unwrap();
        let drop = sched.arm(100, "drop", 0).unwrap();
        assert!(sched.cancel(drop));
        assert_eq!(sched.drain_due(100), vec!["keep"]);
        let _ = keep;
    }

    #[test]
    fn double_cancel_is_safe() {
        let mut sched = ActionScheduler::new();
        let handle = sched.arm(100, (), 0).unwrap();
        assert!(sched.cancel(handle));
        assert!(!sched.cancel(handle));
    }

    #[test]
    fn stale_handle_rejected_after_slot_reuse() {
        let mut sched = ActionScheduler::new();
        let first = sched.arm(100, "a", 0).unwrap();
        assert_eq!(sched.drain_due(100), vec!["a"]);

        // The freed slot is recycled with a bumped generation.
        let second = sched.arm(200, "b", 0).unwrap();
        assert_ne!(first, second);
        assert!(!sched.cancel(first));
        assert!(sched.cancel(second));
    }

    #[test]
    fn cancel_all_silences_everything() {
        let mut sched = ActionScheduler::new();
        for at in [100u64, 200, 300] {
            sched.arm(at, at, 0).unwrap();
        }
        sched.cancel_all();
        assert_eq!(sched.live(), 0);
        assert_eq!(sched.drain_due(u64::MAX), Vec::<u64>::new());
    }

    #[test]
    fn late_arm_rejected_beyond_tolerance() {
        let mut sched = ActionScheduler::new();
        let now = 1000;
        assert_eq!(
            sched.arm(now - LATE_ARM_TOLERANCE_MS - 1, (), now),
            Err(ArmError::InThePast {
                fire_at: now - LATE_ARM_TOLERANCE_MS - 1,
                now,
            })
        );
        // Inside the tolerance window the action still arms and is due
        // immediately.
        assert!(sched.arm(now - LATE_ARM_TOLERANCE_MS, (), now).is_ok());
        assert_eq!(sched.drain_due(now).len(), 1);
    }

    #[test]
    fn handles_are_unique_across_reuse() {
        let mut sched = ActionScheduler::new();
        let mut seen = std::collections::HashSet::new();
        for round in 0..5u64 {
            let handle = sched.arm(round * 10, round, round * 10).unwrap();
            assert!(seen.insert(handle), "handle reused: {handle:?}");
            let _ = sched.drain_due(round * 10 + 5);
        }
    }
}
