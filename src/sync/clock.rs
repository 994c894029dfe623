//! Local-versus-reference clock estimation from round-trip probes.
//!
//! A device stamps a `ping` with its local send instant; the reference
//! echoes its receive and send instants back in the `pong`. Each completed
//! round trip yields one [`ClockSample`]; a bounded history of samples feeds
//! a recency-weighted estimate of the one-way latency and the clock offset.
//! The estimate then converts reference-clock schedule instants into local
//! fire times.
//!
//! In-flight probes live in an explicit pending table keyed by [`ProbeId`]
//! and are resolved exactly once, by whichever of the response or the
//! caller-driven timeout arrives first. Pacing and timeouts are the
//! coordinator's job; nothing here blocks.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::protocol::message::Message;

/// Maximum retained probe samples; the oldest is evicted beyond this.
pub const MAX_SAMPLES: usize = 10;

/// One-way latencies at or outside these bounds (ms, exclusive) are
/// discarded as measurement noise, not merely down-weighted.
pub const VALID_LATENCY_MS: (f64, f64) = (0.0, 1000.0);

/// Identifies one in-flight probe in the pending table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProbeId(u64);

impl fmt::Display for ProbeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "probe#{}", self.0)
    }
}

/// One completed round-trip probe. Immutable once computed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClockSample {
    /// Local instant the ping left (t0).
    pub client_send_time: u64,
    /// Reference instant the ping arrived (t1).
    pub reference_receive_time: u64,
    /// Reference instant the pong left (t2).
    pub reference_send_time: u64,
    /// Local instant the pong arrived (t3).
    pub client_receive_time: u64,
    /// Full round trip (t3 − t0), ms.
    pub round_trip_time: f64,
    /// Estimated one-way network latency, ms.
    pub one_way_latency: f64,
    /// Reference-minus-local clock offset, ms.
    pub offset: f64,
}

impl ClockSample {
    /// Derives a sample from the four probe instants.
    fn from_instants(t0: u64, t1: u64, t2: u64, t3: u64) -> Self {
        let round_trip_time = t3.saturating_sub(t0) as f64;
        let remote_processing = t2.saturating_sub(t1) as f64;
        let one_way_latency = (round_trip_time - remote_processing) / 2.0;
        // Subtracting the latency-adjusted local instant from the
        // latency-adjusted reference instant reduces to t1 - t0: the latency
        // terms cancel, unlike NTP's four-timestamp offset which also uses
        // the return leg. Kept as-is for compatibility with deployed peers.
        // TODO: reconcile with the NTP form ((t1-t0)+(t2-t3))/2 and migrate
        // both ends together.
        let offset = t1 as f64 - t0 as f64;
        Self {
            client_send_time: t0,
            reference_receive_time: t1,
            reference_send_time: t2,
            client_receive_time: t3,
            round_trip_time,
            one_way_latency,
            offset,
        }
    }

    fn is_valid(&self) -> bool {
        self.one_way_latency > VALID_LATENCY_MS.0 && self.one_way_latency < VALID_LATENCY_MS.1
    }
}

/// Aggregate estimate over the sample history.
///
/// `latency_estimate` and `offset_estimate` are meaningful only while
/// `calibrated` is true; callers gate scheduling decisions on it.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ClockState {
    /// Recency-weighted one-way latency, ms.
    pub latency_estimate: f64,
    /// Recency-weighted reference-minus-local offset, ms.
    pub offset_estimate: f64,
    /// True once at least one sample survived validity filtering. Sticky:
    /// only [`ClockSync::reset`] clears it.
    pub calibrated: bool,
}

/// Snapshot of synchronization quality for display and logging.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SyncStats {
    /// Whether any valid sample has been observed.
    pub calibrated: bool,
    /// Current one-way latency estimate, ms.
    pub latency_ms: f64,
    /// Current clock offset estimate, ms.
    pub offset_ms: f64,
    /// Spread of the filtered latency samples, ms.
    pub jitter_ms: f64,
    /// Samples currently retained (valid or not).
    pub sample_count: usize,
    /// Whether the link clears the suitability threshold.
    pub suitable: bool,
}

/// Probe resolution failures.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum ProbeError {
    /// No response arrived inside the caller's timeout window.
    #[error("probe timed out before a response arrived")]
    Timeout,
    /// A response arrived that matches no pending probe (late, duplicated,
    /// or not ours).
    #[error("response does not match any pending probe")]
    UnmatchedResponse,
}

/// A probe that has been sent but not yet resolved.
#[derive(Debug, Clone, Copy)]
struct PendingProbe {
    sent_at: u64,
}

/// Offset and latency estimator for one device.
///
/// Owned by a single coordinator; all mutation flows through probe
/// completion and [`reset`](Self::reset).
#[derive(Debug)]
pub struct ClockSync {
    samples: VecDeque<ClockSample>,
    state: ClockState,
    pending: HashMap<ProbeId, PendingProbe>,
    next_probe_id: u64,
    suitable_latency_ms: f64,
}

impl ClockSync {
    /// Creates an uncalibrated estimator with the given suitability
    /// threshold.
    #[must_use]
    pub fn new(max_suitable_latency: Duration) -> Self {
        Self {
            samples: VecDeque::with_capacity(MAX_SAMPLES),
            state: ClockState::default(),
            pending: HashMap::new(),
            next_probe_id: 0,
            suitable_latency_ms: max_suitable_latency.as_millis() as f64,
        }
    }

    /// Registers a new in-flight probe and returns the ping to transmit.
    ///
    /// The caller is responsible for timing the probe out via
    /// [`abandon_probe`](Self::abandon_probe).
    pub fn begin_probe(&mut self, now: u64) -> (ProbeId, Message) {
        let id = ProbeId(self.next_probe_id);
        self.next_probe_id += 1;
        self.pending.insert(id, PendingProbe { sent_at: now });
        (id, Message::Ping { client_time: now })
    }

    /// Resolves the pending probe whose send instant the pong echoes.
    ///
    /// On success the sample is appended, estimates refresh, and the probe's
    /// id is returned so the caller can cancel its timeout timer.
    pub fn complete_probe(
        &mut self,
        client_time: u64,
        server_receive_time: u64,
        server_send_time: u64,
        now: u64,
    ) -> Result<(ProbeId, ClockSample), ProbeError> {
        let id = self
            .pending
            .iter()
            .find(|(_, probe)| probe.sent_at == client_time)
            .map(|(id, _)| *id)
            .ok_or(ProbeError::UnmatchedResponse)?;
        self.pending.remove(&id);

        let sample =
            ClockSample::from_instants(client_time, server_receive_time, server_send_time, now);
        self.push_sample(sample);
        Ok((id, sample))
    }

    /// Resolves a pending probe as timed out.
    ///
    /// Returns false when the probe was already resolved — the response won
    /// the race and this call is a no-op.
    pub fn abandon_probe(&mut self, id: ProbeId) -> bool {
        self.pending.remove(&id).is_some()
    }

    /// Number of probes awaiting resolution.
    #[must_use]
    pub fn pending_probes(&self) -> usize {
        self.pending.len()
    }

    fn push_sample(&mut self, sample: ClockSample) {
        if self.samples.len() == MAX_SAMPLES {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
        self.recompute();
    }

    /// Recomputes the estimates as a linearly-weighted mean over the
    /// filtered, time-ordered samples: the k-th oldest valid sample weighs
    /// k, so the newest dominates.
    fn recompute(&mut self) {
        let mut total_weight = 0.0;
        let mut weighted_latency = 0.0;
        let mut weighted_offset = 0.0;
        for (k, sample) in self.samples.iter().filter(|s| s.is_valid()).enumerate() {
            let weight = (k + 1) as f64;
            total_weight += weight;
            weighted_latency += sample.one_way_latency * weight;
            weighted_offset += sample.offset * weight;
        }
        if total_weight == 0.0 {
            // No valid sample in the window: estimates hold their last
            // value and calibration never regresses.
            return;
        }
        self.state.latency_estimate = weighted_latency / total_weight;
        self.state.offset_estimate = weighted_offset / total_weight;
        self.state.calibrated = true;
    }

    /// Current aggregate state.
    #[must_use]
    pub fn state(&self) -> ClockState {
        self.state
    }

    /// Whether at least one valid sample has been observed.
    #[must_use]
    pub fn is_calibrated(&self) -> bool {
        self.state.calibrated
    }

    /// The offset applied as a whole millisecond, so that local→reference→
    /// local round trips reproduce their input exactly.
    fn offset_ms(&self) -> i64 {
        self.state.offset_estimate.round() as i64
    }

    /// Local now projected onto the reference clock.
    #[must_use]
    pub fn reference_time(&self, now: u64) -> u64 {
        now.saturating_add_signed(self.offset_ms())
    }

    /// Converts a reference-clock instant to the local clock.
    #[must_use]
    pub fn to_local(&self, reference_timestamp: u64) -> u64 {
        reference_timestamp.saturating_add_signed(-self.offset_ms())
    }

    /// Converts a local-clock instant to the reference clock.
    #[must_use]
    pub fn to_reference(&self, local_timestamp: u64) -> u64 {
        local_timestamp.saturating_add_signed(self.offset_ms())
    }

    /// Local instant at which to arm an action targeting a reference
    /// instant: the local conversion pulled earlier by the one-way latency a
    /// control message would incur, clamped so it is never in the past.
    #[must_use]
    pub fn schedule_time_for(&self, reference_target: u64, now: u64) -> u64 {
        let local_target = self.to_local(reference_target);
        let compensated = local_target.saturating_sub(self.state.latency_estimate.round() as u64);
        compensated.max(now)
    }

    /// Whether the link is fit for tight synchronization. Advisory; callers
    /// decide whether to proceed anyway.
    #[must_use]
    pub fn is_suitable(&self) -> bool {
        self.state.calibrated && self.state.latency_estimate < self.suitable_latency_ms
    }

    /// Population standard deviation of the filtered one-way latencies, ms.
    #[must_use]
    pub fn jitter(&self) -> f64 {
        let latencies: Vec<f64> = self
            .samples
            .iter()
            .filter(|s| s.is_valid())
            .map(|s| s.one_way_latency)
            .collect();
        crate::quality::std_deviation(&latencies)
    }

    /// Snapshot of the synchronization quality counters.
    #[must_use]
    pub fn stats(&self) -> SyncStats {
        SyncStats {
            calibrated: self.state.calibrated,
            latency_ms: self.state.latency_estimate,
            offset_ms: self.state.offset_estimate,
            jitter_ms: self.jitter(),
            sample_count: self.samples.len(),
            suitable: self.is_suitable(),
        }
    }

    /// Discards all samples, estimates, and in-flight probes. Used on
    /// disconnect; the next connection calibrates from scratch.
    pub fn reset(&mut self) {
        self.samples.clear();
        self.pending.clear();
        self.state = ClockState::default();
    }
}
