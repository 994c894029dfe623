//! Timing configuration for calibration and session scheduling.
//!
//! These parameters control how aggressively a device probes the reference
//! clock and how much lead time a session is given before its first beat.
//!
//! # Tuning Guidelines
//!
//! - **Same-LAN devices (< 10ms RTT)**: probes settle fast; shorter pacing
//!   and timeouts tighten startup without hurting the estimate.
//! - **Internet paths (50-200ms RTT)**: keep the defaults; the suitability
//!   gate and start lead already absorb typical jitter.
//! - **Beyond ~200ms one-way** the engine still runs but flags the link as
//!   unsuitable; callers decide whether to proceed anyway.

use std::time::Duration;

/// Timing configuration for a coordinator instance.
///
/// All intervals are specified as [`Duration`]; the coordinator converts to
/// its millisecond epoch at the point of use.
#[derive(Debug, Clone)]
pub struct TimingConfig {
    /// Number of sequential round-trip probes in one calibration burst.
    ///
    /// Probes run strictly one at a time so a response can never be
    /// attributed to the wrong request on a single logical channel.
    ///
    /// **Default**: 5
    pub probe_count: u32,

    /// Pause between one probe resolving (response or timeout) and the next
    /// probe leaving.
    ///
    /// **Default**: 500ms
    pub probe_interval: Duration,

    /// How long a probe waits for its response before it is abandoned.
    ///
    /// An abandoned probe contributes no sample; calibration simply moves on.
    ///
    /// **Default**: 5s
    pub probe_timeout: Duration,

    /// One-way latency above which the link is flagged unsuitable for tight
    /// synchronization. Advisory: callers may override at session start.
    ///
    /// **Default**: 200ms
    pub max_suitable_latency: Duration,

    /// Lead time between a confirmed session start and the first beat, so
    /// the start command reaches every client before beat zero is due.
    ///
    /// **Default**: 3s
    pub start_lead: Duration,

    /// Grace period after the final beat before the session end fires.
    ///
    /// **Default**: 1s
    pub end_grace: Duration,

    /// Length of one scheduled beat pulse.
    ///
    /// **Default**: 100ms
    pub pulse_duration: Duration,
}

impl TimingConfig {
    /// Creates a new timing configuration with validation.
    ///
    /// # Panics
    ///
    /// Panics if `probe_count == 0` or if `probe_timeout` does not exceed
    /// `probe_interval`.
    #[must_use]
    fn new_validated(
        probe_count: u32,
        probe_interval: Duration,
        probe_timeout: Duration,
        max_suitable_latency: Duration,
        start_lead: Duration,
        end_grace: Duration,
        pulse_duration: Duration,
    ) -> Self {
        assert!(probe_count > 0, "probe_count must be > 0");
        assert!(
            probe_timeout > probe_interval,
            "probe_timeout must exceed probe_interval"
        );

        Self {
            probe_count,
            probe_interval,
            probe_timeout,
            max_suitable_latency,
            start_lead,
            end_grace,
            pulse_duration,
        }
    }

    /// Creates a configuration for same-LAN device pairs.
    ///
    /// Faster probe pacing for near-instant calibration.
    #[must_use]
    pub fn local() -> Self {
        Self::new_validated(
            5,
            Duration::from_millis(150),
            Duration::from_millis(1500),
            Duration::from_millis(200),
            Duration::from_secs(2),
            Duration::from_secs(1),
            Duration::from_millis(100),
        )
    }

    /// Creates a configuration for high-latency internet paths.
    ///
    /// Extra probes and slower pacing to steady the estimate.
    #[must_use]
    pub fn wan() -> Self {
        Self::new_validated(
            8,
            Duration::from_millis(750),
            Duration::from_secs(8),
            Duration::from_millis(200),
            Duration::from_secs(5),
            Duration::from_secs(1),
            Duration::from_millis(100),
        )
    }

    /// Builder-style setter for the probe count.
    #[must_use]
    pub const fn with_probe_count(mut self, count: u32) -> Self {
        self.probe_count = count;
        self
    }

    /// Builder-style setter for the inter-probe pause.
    #[must_use]
    pub const fn with_probe_interval(mut self, interval: Duration) -> Self {
        self.probe_interval = interval;
        self
    }

    /// Builder-style setter for the probe response timeout.
    #[must_use]
    pub const fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    /// Builder-style setter for the session start lead.
    #[must_use]
    pub const fn with_start_lead(mut self, lead: Duration) -> Self {
        self.start_lead = lead;
        self
    }

    /// Builder-style setter for the beat pulse length.
    #[must_use]
    pub const fn with_pulse_duration(mut self, duration: Duration) -> Self {
        self.pulse_duration = duration;
        self
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self::new_validated(
            5,
            Duration::from_millis(500),
            Duration::from_secs(5),
            Duration::from_millis(200),
            Duration::from_secs(3),
            Duration::from_secs(1),
            Duration::from_millis(100),
        )
    }
}
