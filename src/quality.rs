//! Link-quality assessment and post-session timing statistics.
//!
//! Advisory layers over the raw estimates: [`assess_link`] answers "can
//! this link hold that tempo" before a session, [`TimingAccuracy`] grades
//! how close fired pulses landed to their plan after one.

use std::fmt;

use thiserror::Error;

use crate::sync::schedule::beat_interval_ms;

/// One-way latency above which no tempo is considered tightly
/// synchronizable, ms.
pub const MAX_LINK_LATENCY_MS: f64 = 200.0;

/// Latency spread above which pulse spacing becomes perceptibly uneven, ms.
pub const MAX_LINK_JITTER_MS: f64 = 50.0;

/// Fraction of the beat interval tolerated as scheduling error.
pub const TIMING_TOLERANCE_RATIO: f64 = 0.1;

/// Outcome of a link assessment, ordered by blame precedence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkVerdict {
    /// Fit for tight synchronization at the assessed tempo.
    Suitable,
    /// One-way latency exceeds [`MAX_LINK_LATENCY_MS`].
    HighLatency,
    /// Latency spread exceeds [`MAX_LINK_JITTER_MS`].
    HighJitter,
    /// Latency eats more than a tenth of the beat interval at this tempo.
    ToleranceExceeded,
}

impl fmt::Display for LinkVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Suitable => "network conditions are suitable for precise synchronization",
            Self::HighLatency => "high latency; consider the immediate-trigger fallback",
            Self::HighJitter => "high jitter; pulse timing may be inconsistent",
            Self::ToleranceExceeded => "timing tolerance exceeded for this tempo",
        };
        f.write_str(text)
    }
}

/// Full result of a link assessment.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinkAssessment {
    /// The verdict, with [`fmt::Display`] giving a recommendation line.
    pub verdict: LinkVerdict,
    /// Assessed one-way latency, ms.
    pub latency_ms: f64,
    /// Assessed jitter, ms.
    pub jitter_ms: f64,
    /// Beat interval at the assessed tempo, ms.
    pub beat_interval_ms: f64,
    /// Largest scheduling error the tempo tolerates, ms.
    pub tolerance_ms: f64,
}

impl LinkAssessment {
    /// Whether the link passed every gate.
    #[must_use]
    pub fn is_suitable(&self) -> bool {
        self.verdict == LinkVerdict::Suitable
    }
}

/// Judges whether a link can hold a tempo. Latency gates come before the
/// tempo-relative tolerance so the blame in the verdict stays actionable.
#[must_use]
pub fn assess_link(latency_ms: f64, jitter_ms: f64, tempo_bpm: u32) -> LinkAssessment {
    let interval = beat_interval_ms(tempo_bpm);
    let tolerance = interval * TIMING_TOLERANCE_RATIO;
    let verdict = if latency_ms >= MAX_LINK_LATENCY_MS {
        LinkVerdict::HighLatency
    } else if jitter_ms >= MAX_LINK_JITTER_MS {
        LinkVerdict::HighJitter
    } else if latency_ms >= tolerance {
        LinkVerdict::ToleranceExceeded
    } else {
        LinkVerdict::Suitable
    };
    LinkAssessment {
        verdict,
        latency_ms,
        jitter_ms,
        beat_interval_ms: interval,
        tolerance_ms: tolerance,
    }
}

/// Planned-versus-observed comparison failures.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum AccuracyError {
    /// The two series must pair up one-to-one.
    #[error("planned {planned} and observed {observed} beat counts differ")]
    CountMismatch {
        /// Planned fire count.
        planned: usize,
        /// Observed fire count.
        observed: usize,
    },
    /// Statistics over nothing are meaningless.
    #[error("no observations to evaluate")]
    Empty,
}

/// Offset statistics between planned and observed fire instants.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimingAccuracy {
    /// Signed mean of observed minus planned, ms.
    pub mean_offset_ms: f64,
    /// Mean absolute error, ms.
    pub mean_abs_error_ms: f64,
    /// Worst single error, ms.
    pub max_abs_error_ms: f64,
    /// Best single error, ms.
    pub min_abs_error_ms: f64,
    /// Population standard deviation of the signed offsets, ms.
    pub std_dev_ms: f64,
}

impl TimingAccuracy {
    /// Compares planned and observed fire instants pairwise.
    pub fn from_observed(planned: &[u64], observed: &[u64]) -> Result<Self, AccuracyError> {
        if planned.len() != observed.len() {
            return Err(AccuracyError::CountMismatch {
                planned: planned.len(),
                observed: observed.len(),
            });
        }
        if planned.is_empty() {
            return Err(AccuracyError::Empty);
        }

        let offsets: Vec<f64> = planned
            .iter()
            .zip(observed)
            .map(|(&p, &o)| o as f64 - p as f64)
            .collect();
        let count = offsets.len() as f64;
        let mean_offset_ms = offsets.iter().sum::<f64>() / count;
        let abs: Vec<f64> = offsets.iter().map(|d| d.abs()).collect();
        let mean_abs_error_ms = abs.iter().sum::<f64>() / count;
        let max_abs_error_ms = abs.iter().copied().fold(f64::MIN, f64::max);
        let min_abs_error_ms = abs.iter().copied().fold(f64::MAX, f64::min);

        Ok(Self {
            mean_offset_ms,
            mean_abs_error_ms,
            max_abs_error_ms,
            min_abs_error_ms,
            std_dev_ms: std_deviation(&offsets),
        })
    }
}

/// Population standard deviation; 0.0 for fewer than two values.
#[must_use]
pub fn std_deviation(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let count = values.len() as f64;
    let mean = values.iter().sum::<f64>() / count;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / count;
    variance.sqrt()
}
