//! Session model: roles, lifecycle phases, and start-parameter validation.

use std::fmt;
use std::ops::RangeInclusive;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::sync::schedule::Schedule;

/// Tempo bounds accepted for a session, in beats per minute.
pub const TEMPO_RANGE: RangeInclusive<u32> = 30..=200;

/// Duration bounds accepted for a session, in seconds.
pub const DURATION_RANGE: RangeInclusive<u32> = 5..=300;

/// Device role in a pulse session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Authoritative timing source and beat planner.
    Master,
    /// Passive follower; fires only the beats it is handed.
    Client,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Master => f.write_str("master"),
            Self::Client => f.write_str("client"),
        }
    }
}

/// Coordinator lifecycle phase.
///
/// `Ended` is transient: teardown actions run on entry and the coordinator
/// immediately settles back in `Ready` (transport still up) or `Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// No transport; all state cleared.
    Idle,
    /// Probe burst against the reference clock in progress.
    Calibrating,
    /// Calibration finished (suitable or not); a session may start.
    Ready,
    /// Beat timers are armed and firing.
    Active,
    /// Session teardown in progress.
    Ended,
}

/// Session start validation failures. Violations are reported, never
/// silently clamped.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum SessionError {
    /// Tempo outside the accepted 30..=200 bpm range.
    #[error("tempo {tempo} bpm is outside 30..=200")]
    InvalidTempo {
        /// The rejected tempo.
        tempo: u32,
    },

    /// Duration outside the accepted 5..=300 second range.
    #[error("duration {duration} s is outside 5..=300")]
    InvalidDuration {
        /// The rejected duration.
        duration: u32,
    },

    /// Start instant not strictly in the reference future.
    #[error("start time {start_time} is not after reference now {reference_now}")]
    InvalidStartTime {
        /// The rejected start instant (reference clock, ms).
        start_time: u64,
        /// The device's reference time at validation.
        reference_now: u64,
    },
}

/// User-chosen shape of a session: how fast and for how long.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionParams {
    /// Beats per minute.
    pub tempo_bpm: u32,
    /// Total session length in seconds.
    pub duration_secs: u32,
}

impl SessionParams {
    /// Creates parameters without validating them; see [`Self::validate`].
    #[must_use]
    pub const fn new(tempo_bpm: u32, duration_secs: u32) -> Self {
        Self {
            tempo_bpm,
            duration_secs,
        }
    }

    /// Checks both values against the accepted ranges.
    pub fn validate(&self) -> Result<(), SessionError> {
        if !TEMPO_RANGE.contains(&self.tempo_bpm) {
            return Err(SessionError::InvalidTempo {
                tempo: self.tempo_bpm,
            });
        }
        if !DURATION_RANGE.contains(&self.duration_secs) {
            return Err(SessionError::InvalidDuration {
                duration: self.duration_secs,
            });
        }
        Ok(())
    }
}

/// Generates a `role-pid-nonce` device id, unique across reconnects even
/// if the process id is reused.
#[must_use]
pub fn generate_device_id(role: Role) -> String {
    format!("{role}-{}-{:04x}", std::process::id(), rand::random::<u16>())
}

/// Checks that a session start instant lies strictly in the reference
/// future at the validating device.
pub fn validate_start_time(start_time: u64, reference_now: u64) -> Result<(), SessionError> {
    if start_time <= reference_now {
        return Err(SessionError::InvalidStartTime {
            start_time,
            reference_now,
        });
    }
    Ok(())
}

/// One active pulse session. Created at session start, dropped at teardown;
/// a coordinator holds at most one.
#[derive(Debug, Clone)]
pub struct Session {
    /// Role this device plays in the session.
    pub role: Role,
    /// Tempo and duration the session was started with.
    pub params: SessionParams,
    /// First-beat instant on the reference clock, ms.
    pub reference_start: u64,
    /// Beats this device knows about: the full schedule on the master, the
    /// assigned subset on a client (original beat indices preserved).
    pub schedule: Schedule,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_range_boundaries() {
        assert_eq!(SessionParams::new(30, 5).validate(), Ok(()));
        assert_eq!(SessionParams::new(200, 300).validate(), Ok(()));
    }

    #[test]
    fn rejects_out_of_range_tempo() {
        assert_eq!(
            SessionParams::new(29, 30).validate(),
            Err(SessionError::InvalidTempo { tempo: 29 })
        );
        assert_eq!(
            SessionParams::new(201, 30).validate(),
            Err(SessionError::InvalidTempo { tempo: 201 })
        );
    }

    #[test]
    fn rejects_out_of_range_duration() {
        assert_eq!(
            SessionParams::new(60, 4).validate(),
            Err(SessionError::InvalidDuration { duration: 4 })
        );
        assert_eq!(
            SessionParams::new(60, 301).validate(),
            Err(SessionError::InvalidDuration { duration: 301 })
        );
    }

    #[test]
    fn start_time_must_be_strictly_future() {
        assert!(validate_start_time(1001, 1000).is_ok());
        assert_eq!(
            validate_start_time(1000, 1000),
            Err(SessionError::InvalidStartTime {
                start_time: 1000,
                reference_now: 1000
            })
        );
        assert!(validate_start_time(999, 1000).is_err());
    }

    #[test]
    fn role_display_matches_wire_spelling() {
        assert_eq!(Role::Master.to_string(), "master");
        assert_eq!(Role::Client.to_string(), "client");
    }

    #[test]
    fn device_ids_carry_the_role() {
        assert!(generate_device_id(Role::Master).starts_with("master-"));
        assert!(generate_device_id(Role::Client).starts_with("client-"));
    }
}
