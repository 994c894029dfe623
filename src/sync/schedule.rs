//! Beat schedule generation.
//!
//! A schedule is the fully-expanded plan for one session: every beat, its
//! due instant on the reference clock, and whether the planning device fires
//! it itself or hands it to the peer role. Generation is pure; the
//! coordinator decides when (and whether) the plan becomes timers.

use thiserror::Error;

/// Milliseconds per beat at `tempo_bpm`. Meaningful only for nonzero tempo.
#[must_use]
pub fn beat_interval_ms(tempo_bpm: u32) -> f64 {
    60_000.0 / f64::from(tempo_bpm)
}

/// Schedule generation failures.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum ScheduleError {
    /// A zero tempo has no beat interval; refused explicitly instead of
    /// silently producing an empty schedule.
    #[error("tempo {0} bpm cannot produce a beat interval")]
    InvalidTempo(u32),
}

/// One scheduled pulse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BeatDescriptor {
    /// Sequential position in the full schedule, starting at 0.
    pub beat_index: u32,
    /// Due instant on the reference clock, ms.
    pub reference_timestamp: u64,
    /// Whether the device holding this schedule fires the beat itself.
    pub fires_on_this_device: bool,
}

/// Ordered, immutable beat sequence for one session.
///
/// Indices are contiguous from 0 and timestamps strictly increasing when
/// produced by [`generate`]; client-side subsets keep the original indices.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Schedule {
    beats: Vec<BeatDescriptor>,
}

impl Schedule {
    /// Wraps an externally-supplied beat list (e.g. one received over the
    /// wire). Callers validate ordering before trusting it.
    #[must_use]
    pub fn from_beats(beats: Vec<BeatDescriptor>) -> Self {
        Self { beats }
    }

    /// All beats in order.
    #[must_use]
    pub fn beats(&self) -> &[BeatDescriptor] {
        &self.beats
    }

    /// Number of beats.
    #[must_use]
    pub fn len(&self) -> usize {
        self.beats.len()
    }

    /// Whether the schedule holds no beats.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.beats.is_empty()
    }

    /// The final beat, if any.
    #[must_use]
    pub fn last(&self) -> Option<&BeatDescriptor> {
        self.beats.last()
    }

    /// Beats this device fires itself.
    pub fn assigned(&self) -> impl Iterator<Item = &BeatDescriptor> {
        self.beats.iter().filter(|b| b.fires_on_this_device)
    }

    /// Beats delegated to the peer role, original indices preserved.
    pub fn complement(&self) -> impl Iterator<Item = &BeatDescriptor> {
        self.beats.iter().filter(|b| !b.fires_on_this_device)
    }
}

/// Expands a tempo/duration pair into the concrete beat plan.
///
/// Beats start at `reference_start` and repeat every `60000 / tempo_bpm` ms
/// for as many whole intervals as fit in the duration. With `alternate` the
/// planner keeps even-indexed beats and delegates odd ones; otherwise it
/// fires everything. Per-beat timestamps are rounded from the exact
/// fractional interval, so uneven tempos accumulate no drift.
///
/// A zero duration fits no whole beat and yields an empty schedule; range
/// policy beyond that belongs to the session validator.
pub fn generate(
    reference_start: u64,
    tempo_bpm: u32,
    duration_secs: u32,
    alternate: bool,
) -> Result<Schedule, ScheduleError> {
    if tempo_bpm == 0 {
        return Err(ScheduleError::InvalidTempo(tempo_bpm));
    }
    let interval = beat_interval_ms(tempo_bpm);
    // floor(duration_ms / interval) == duration * tempo / 60, exactly.
    let total_beats = u64::from(duration_secs) * u64::from(tempo_bpm) / 60;

    let beats = (0..total_beats)
        .map(|i| BeatDescriptor {
            beat_index: i as u32,
            reference_timestamp: reference_start + (i as f64 * interval).round() as u64,
            fires_on_this_device: if alternate { i % 2 == 0 } else { true },
        })
        .collect();
    Ok(Schedule { beats })
}

/// First beat instant strictly after `current_time` for a session started
/// at `reference_start`. Before the start, that is the start itself.
#[must_use]
pub fn next_beat_after(current_time: u64, tempo_bpm: u32, reference_start: u64) -> u64 {
    if current_time < reference_start || tempo_bpm == 0 {
        return reference_start;
    }
    let interval = beat_interval_ms(tempo_bpm);
    let elapsed = (current_time - reference_start) as f64;
    let next_index = (elapsed / interval).floor() + 1.0;
    reference_start + (next_index * interval).round() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sixty_bpm_ten_seconds_alternating() {
        let schedule = generate(5000, 60, 10, true).expect("valid tempo");
        assert_eq!(schedule.len(), 10);
        for (i, beat) in schedule.beats().iter().enumerate() {
            assert_eq!(beat.beat_index, i as u32);
            assert_eq!(beat.reference_timestamp, 5000 + i as u64 * 1000);
            assert_eq!(beat.fires_on_this_device, i % 2 == 0);
        }
    }

    #[test]
    fn hundred_twenty_bpm_five_seconds() {
        let schedule = generate(0, 120, 5, true).expect("valid tempo");
        assert_eq!(schedule.len(), 10);
        let spacing: Vec<u64> = schedule
            .beats()
            .windows(2)
            .map(|w| w[1].reference_timestamp - w[0].reference_timestamp)
            .collect();
        assert!(spacing.iter().all(|&gap| gap == 500));
    }

    #[test]
    fn uneven_tempo_accumulates_no_drift() {
        // 90 bpm: 666.67ms interval; beat 9 lands at exactly 6000.
        let schedule = generate(0, 90, 60, false).expect("valid tempo");
        assert_eq!(schedule.beats()[9].reference_timestamp, 6000);
        assert_eq!(schedule.beats()[3].reference_timestamp, 2000);
    }

    #[test]
    fn non_alternating_fires_everything() {
        let schedule = generate(0, 60, 5, false).expect("valid tempo");
        assert_eq!(schedule.assigned().count(), 5);
        assert_eq!(schedule.complement().count(), 0);
    }

    #[test]
    fn complement_preserves_indices() {
        let schedule = generate(1000, 60, 5, true).expect("valid tempo");
        let delegated: Vec<u32> = schedule.complement().map(|b| b.beat_index).collect();
        assert_eq!(delegated, vec![1, 3]);
        let timestamps: Vec<u64> = schedule
            .complement()
            .map(|b| b.reference_timestamp)
            .collect();
        assert_eq!(timestamps, vec![2000, 4000]);
    }

    #[test]
    fn zero_tempo_is_an_error() {
        assert_eq!(generate(0, 0, 30, true), Err(ScheduleError::InvalidTempo(0)));
    }

    #[test]
    fn zero_duration_is_empty() {
        let schedule = generate(0, 60, 0, true).expect("valid tempo");
        assert!(schedule.is_empty());
        assert!(schedule.last().is_none());
    }

    #[test]
    fn timestamps_strictly_increase() {
        let schedule = generate(42, 187, 300, true).expect("valid tempo");
        assert!(schedule
            .beats()
            .windows(2)
            .all(|w| w[0].reference_timestamp < w[1].reference_timestamp));
    }

    #[test]
    fn next_beat_walks_the_grid() {
        // 60 bpm from 1000: beats at 1000, 2000, 3000, ...
        assert_eq!(next_beat_after(500, 60, 1000), 1000);
        assert_eq!(next_beat_after(1000, 60, 1000), 2000);
        assert_eq!(next_beat_after(1500, 60, 1000), 2000);
        assert_eq!(next_beat_after(2999, 60, 1000), 3000);
    }
}
