//! Session coordination: the single logical thread binding clock sync,
//! schedule generation, and the action scheduler.
//!
//! # Lifecycle
//!
//! | Phase       | Entry action                        | Leaves on                     |
//! |-------------|-------------------------------------|-------------------------------|
//! | Idle        | everything cleared, clock reset     | transport connected           |
//! | Calibrating | register sent, probe burst running  | burst exhausted → Ready       |
//! | Ready       | —                                   | session start; disconnect     |
//! | Active      | beat + end timers armed             | end/stop/disconnect           |
//! | Ended       | cancel all timers, drop session     | settles in Ready or Idle      |
//!
//! A disconnect from any phase forces `Idle`: timers are removed
//! synchronously, in-flight probes are abandoned, and no session state
//! survives. That closes the race between a dying transport and a beat
//! timer about to fire.
//!
//! The coordinator owns its collaborators and never blocks: probe timeouts
//! and calibration pacing are timers on the same scheduler that fires
//! beats, so an embedding loop drives everything with
//! [`SessionCoordinator::poll`].

use std::collections::HashMap;

use thiserror::Error;

use crate::actuate::Actuator;
use crate::config::TimingConfig;
use crate::protocol::message::{ClientInfo, Message, WireBeat};
use crate::runtime::events::{EventQueue, TransportEvent};
use crate::runtime::scheduler::{ActionHandle, ActionScheduler};
use crate::session::{self, Phase, Role, Session, SessionError, SessionParams};
use crate::sync::clock::{ClockSync, ProbeId};
use crate::sync::schedule::{self, BeatDescriptor, Schedule};
use crate::trace::{debug, info, warn};
use crate::transport::Transport;

/// Timer payloads the coordinator arms against its scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimerAction {
    /// Fire one scheduled beat pulse.
    Pulse { beat: u32 },
    /// The session's final beat plus grace has passed (master only).
    SessionEnd,
    /// An in-flight probe ran out its response window.
    ProbeTimeout(ProbeId),
    /// The pause between calibration probes elapsed.
    NextProbe,
}

/// Session start failures, surfaced synchronously to the initiator.
#[derive(Debug, Error, PartialEq)]
pub enum StartError {
    /// Only the master plans sessions.
    #[error("only the master may start a session")]
    NotMaster,
    /// The coordinator is not in a startable phase.
    #[error("coordinator is {phase:?}, not ready to start")]
    NotReady {
        /// Phase at the time of the call.
        phase: Phase,
    },
    /// A master needs at least one client to alternate with.
    #[error("no clients are connected")]
    NoClients,
    /// The clock has no valid sample; reference times cannot be trusted.
    #[error("clock is not calibrated")]
    NotCalibrated,
    /// Advisory latency gate; pass `force` to override.
    #[error("estimated one-way latency {latency_ms:.0} ms is too high for tight sync")]
    LatencyTooHigh {
        /// The estimate that tripped the gate.
        latency_ms: f64,
    },
    /// Parameter or start-time validation failed.
    #[error(transparent)]
    Invalid(#[from] SessionError),
    /// An inbound schedule's timestamps were not strictly increasing.
    #[error("schedule timestamps are not strictly increasing")]
    MalformedSchedule,
    /// The transport refused the start message.
    #[error("transport refused the session start message")]
    TransportUnavailable,
}

/// The per-device session engine.
///
/// One instance per transport connection; collaborators are owned, so
/// teardown is a method call away and tests construct the whole engine
/// in-process.
pub struct SessionCoordinator<T, A> {
    role: Role,
    device_id: String,
    config: TimingConfig,
    transport: T,
    actuator: A,
    clock: ClockSync,
    scheduler: ActionScheduler<TimerAction>,
    events: EventQueue,
    phase: Phase,
    session: Option<Session>,
    clients: Vec<ClientInfo>,
    probes_launched: u32,
    probe_timeouts: HashMap<ProbeId, ActionHandle>,
    last_fired_beat: Option<u32>,
    last_transport_error: Option<String>,
}

impl<T: Transport, A: Actuator> SessionCoordinator<T, A> {
    /// Creates an idle coordinator around its collaborators.
    pub fn new(
        role: Role,
        device_id: String,
        config: TimingConfig,
        transport: T,
        actuator: A,
    ) -> Self {
        let clock = ClockSync::new(config.max_suitable_latency);
        Self {
            role,
            device_id,
            config,
            transport,
            actuator,
            clock,
            scheduler: ActionScheduler::new(),
            events: EventQueue::new(),
            phase: Phase::Idle,
            session: None,
            clients: Vec::new(),
            probes_launched: 0,
            probe_timeouts: HashMap::new(),
            last_fired_beat: None,
            last_transport_error: None,
        }
    }

    /// Current lifecycle phase.
    #[must_use]
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Role this device plays.
    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }

    /// This device's wire identity.
    #[must_use]
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// The clock estimator, for suitability queries and stats display.
    #[must_use]
    pub fn clock(&self) -> &ClockSync {
        &self.clock
    }

    /// The active session, if any.
    #[must_use]
    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    /// Connected clients as last reported by the peer (master view).
    #[must_use]
    pub fn clients(&self) -> &[ClientInfo] {
        &self.clients
    }

    /// Index of the most recently fired beat, for progress display.
    #[must_use]
    pub fn last_fired_beat(&self) -> Option<u32> {
        self.last_fired_beat
    }

    /// Most recent fault reported by the transport, if any.
    #[must_use]
    pub fn last_transport_error(&self) -> Option<&str> {
        self.last_transport_error.as_deref()
    }

    /// Enqueues a transport event; false when the queue was full and the
    /// event was dropped.
    pub fn push_event(&mut self, event: TransportEvent) -> bool {
        let accepted = self.events.push(event);
        if !accepted {
            warn!(capacity = crate::runtime::events::EVENT_QUEUE_CAPACITY, "event dropped: queue full");
        }
        accepted
    }

    /// Drains pending transport events in arrival order, then releases due
    /// timers. The embedding loop calls this with the current monotonic
    /// time; nothing else advances the engine.
    pub fn poll(&mut self, now: u64) {
        while let Some(event) = self.events.pop() {
            self.handle_event(event, now);
        }
        for action in self.scheduler.drain_due(now) {
            self.handle_timer(action, now);
        }
    }

    fn handle_event(&mut self, event: TransportEvent, now: u64) {
        match event {
            TransportEvent::Connected => self.on_connected(now),
            TransportEvent::Message(message) => self.on_message(message, now),
            TransportEvent::Disconnected => self.on_disconnected(),
            TransportEvent::TransportError(reason) => {
                warn!(reason = %reason, "transport reported a fault");
                self.last_transport_error = Some(reason);
            }
        }
    }

    fn handle_timer(&mut self, action: TimerAction, now: u64) {
        match action {
            TimerAction::Pulse { beat } => self.fire_beat(beat),
            TimerAction::SessionEnd => self.on_session_complete(),
            TimerAction::ProbeTimeout(id) => {
                self.probe_timeouts.remove(&id);
                if self.clock.abandon_probe(id) {
                    warn!(probe = %id, error = %crate::sync::clock::ProbeError::Timeout, "probe abandoned");
                    self.after_probe_resolved(now);
                }
            }
            TimerAction::NextProbe => self.launch_probe(now),
        }
    }

    fn on_connected(&mut self, now: u64) {
        if self.phase != Phase::Idle {
            warn!(phase = ?self.phase, "connected while not idle; resetting first");
            self.teardown_to_idle();
        }
        info!(role = %self.role, device_id = %self.device_id, "transport connected");
        let registration = Message::Register {
            role: self.role,
            device_id: self.device_id.clone(),
        };
        if !self.transport.send(&registration) {
            warn!("registration send failed");
        }
        self.phase = Phase::Calibrating;
        self.probes_launched = 0;
        self.launch_probe(now);
    }

    /// Sends one probe and arms its timeout. Probes are strictly
    /// sequential; the next launches only after this one resolves.
    fn launch_probe(&mut self, now: u64) {
        let (id, ping) = self.clock.begin_probe(now);
        self.probes_launched += 1;
        if !self.transport.send(&ping) {
            warn!(probe = %id, "probe send failed");
        }
        let due = now + self.config.probe_timeout.as_millis() as u64;
        if let Ok(handle) = self.scheduler.arm(due, TimerAction::ProbeTimeout(id), now) {
            self.probe_timeouts.insert(id, handle);
        }
        debug!(probe = %id, attempt = self.probes_launched, "probe sent");
    }

    /// Continues or finishes the calibration burst after a probe resolved
    /// (sample recorded or timed out).
    fn after_probe_resolved(&mut self, now: u64) {
        if self.phase != Phase::Calibrating {
            return;
        }
        if self.probes_launched < self.config.probe_count {
            let due = now + self.config.probe_interval.as_millis() as u64;
            self.arm_at(due, TimerAction::NextProbe, now);
        } else {
            info!(
                calibrated = self.clock.is_calibrated(),
                latency_ms = self.clock.state().latency_estimate,
                offset_ms = self.clock.state().offset_estimate,
                suitable = self.clock.is_suitable(),
                "calibration burst complete"
            );
            self.phase = Phase::Ready;
        }
    }

    fn on_message(&mut self, message: Message, now: u64) {
        match message {
            Message::Pong {
                client_time,
                server_receive_time,
                server_send_time,
            } => self.on_pong(client_time, server_receive_time, server_send_time, now),
            Message::Ping { client_time } => {
                // Answer from the local clock; receive and send coincide
                // within one event turn, so this device can serve as the
                // reference for whoever probes it.
                let pong = Message::Pong {
                    client_time,
                    server_receive_time: now,
                    server_send_time: now,
                };
                if !self.transport.send(&pong) {
                    warn!("pong send failed");
                }
            }
            Message::StartSession {
                tempo,
                duration,
                start_time,
                schedule,
            } => self.on_start_command(tempo, duration, start_time, schedule, now),
            Message::EndSession => self.on_end_command(),
            Message::ClientList { clients } => {
                if self.role == Role::Master {
                    debug!(count = clients.len(), "roster replaced");
                    self.clients = clients;
                }
            }
            Message::ClientConnected { client } => {
                if self.role == Role::Master && !self.clients.iter().any(|c| c.id == client.id) {
                    info!(client = %client.id, "client joined");
                    self.clients.push(client);
                }
            }
            Message::ClientDisconnected { client_id } => {
                if self.role == Role::Master {
                    info!(client = %client_id, "client left");
                    self.clients.retain(|c| c.id != client_id);
                }
            }
            Message::Heartbeat { .. } => {
                let response = Message::HeartbeatResponse {
                    client_id: self.device_id.clone(),
                    timestamp: now,
                };
                if !self.transport.send(&response) {
                    warn!("heartbeat response send failed");
                }
            }
            Message::HeartbeatResponse { .. } => {
                debug!("heartbeat acknowledged");
            }
            Message::VibrateNow { duration, pattern } => {
                let delivered = match &pattern {
                    Some(steps) => self.actuator.pulse_pattern(steps),
                    None => self.actuator.pulse(duration),
                };
                if !delivered {
                    warn!("immediate pulse failed");
                }
            }
            Message::Register { .. } => {
                debug!("ignoring register echo from peer");
            }
        }
    }

    fn on_pong(
        &mut self,
        client_time: u64,
        server_receive_time: u64,
        server_send_time: u64,
        now: u64,
    ) {
        match self
            .clock
            .complete_probe(client_time, server_receive_time, server_send_time, now)
        {
            Ok((id, _sample)) => {
                // The response won the race; disarm its timeout.
                if let Some(handle) = self.probe_timeouts.remove(&id) {
                    self.scheduler.cancel(handle);
                }
                debug!(
                    probe = %id,
                    latency_ms = self.clock.state().latency_estimate,
                    offset_ms = self.clock.state().offset_estimate,
                    "probe completed"
                );
                self.after_probe_resolved(now);
            }
            Err(_) => {
                warn!(
                    pending = self.clock.pending_probes(),
                    "pong matched no pending probe"
                );
            }
        }
    }

    /// Starts a session (master only).
    ///
    /// `force` overrides the advisory latency gate: when the link is
    /// flagged unsuitable this returns [`StartError::LatencyTooHigh`] so
    /// the caller can put the decision to the user, then retry with
    /// `force = true`.
    pub fn start_session(
        &mut self,
        params: SessionParams,
        force: bool,
        now: u64,
    ) -> Result<(), StartError> {
        if self.role != Role::Master {
            return Err(StartError::NotMaster);
        }
        if self.phase != Phase::Ready {
            return Err(StartError::NotReady { phase: self.phase });
        }
        params.validate()?;
        if self.clients.is_empty() {
            return Err(StartError::NoClients);
        }
        if !self.clock.is_calibrated() {
            return Err(StartError::NotCalibrated);
        }
        if !self.clock.is_suitable() && !force {
            return Err(StartError::LatencyTooHigh {
                latency_ms: self.clock.state().latency_estimate,
            });
        }

        let start = self.clock.reference_time(now) + self.config.start_lead.as_millis() as u64;
        let plan = schedule::generate(start, params.tempo_bpm, params.duration_secs, true)
            .map_err(|_| SessionError::InvalidTempo {
                tempo: params.tempo_bpm,
            })?;

        // Clients get the complementary half, original indices preserved.
        let delegated: Vec<WireBeat> = plan
            .complement()
            .map(|beat| WireBeat {
                beat_number: beat.beat_index,
                server_time: beat.reference_timestamp,
                should_vibrate: true,
            })
            .collect();
        let command = Message::StartSession {
            tempo: params.tempo_bpm,
            duration: params.duration_secs,
            start_time: start,
            schedule: delegated,
        };
        if !self.transport.send(&command) {
            return Err(StartError::TransportUnavailable);
        }

        self.arm_schedule(&plan, now);
        if let Some(last) = plan.last() {
            let end_ref = last.reference_timestamp + self.config.end_grace.as_millis() as u64;
            let due = self.clock.schedule_time_for(end_ref, now);
            self.arm_at(due, TimerAction::SessionEnd, now);
        }

        info!(
            tempo = params.tempo_bpm,
            duration_s = params.duration_secs,
            start_ref = start,
            beats = plan.len(),
            "session started"
        );
        self.session = Some(Session {
            role: self.role,
            params,
            reference_start: start,
            schedule: plan,
        });
        self.phase = Phase::Active;
        self.last_fired_beat = None;
        Ok(())
    }

    /// Master-initiated early stop. True when an active session was ended.
    pub fn stop_session(&mut self) -> bool {
        if self.role != Role::Master || self.phase != Phase::Active {
            return false;
        }
        info!("session stopped by operator");
        if !self.transport.send(&Message::EndSession) {
            warn!("end_session send failed");
        }
        self.finish_session();
        true
    }

    /// Sends an immediate, unscheduled pulse command to the peer devices.
    /// Fallback for links too slow for scheduled synchronization.
    pub fn trigger_remote_pulse(&mut self, duration: u64, pattern: Option<Vec<u64>>) -> bool {
        self.transport.send(&Message::VibrateNow { duration, pattern })
    }

    fn on_start_command(
        &mut self,
        tempo: u32,
        duration: u32,
        start_time: u64,
        beats: Vec<WireBeat>,
        now: u64,
    ) {
        if self.role != Role::Client {
            warn!("ignoring start_session addressed to a master");
            return;
        }
        match self.adopt_session(tempo, duration, start_time, beats, now) {
            Ok(_count) => info!(beats = _count, start_ref = start_time, "session adopted"),
            Err(_err) => warn!(error = %_err, "start_session rejected"),
        }
    }

    /// Validates an inbound start command in full, then adopts it. Any
    /// violation rejects the whole command; no half-valid session state is
    /// ever kept.
    fn adopt_session(
        &mut self,
        tempo: u32,
        duration: u32,
        start_time: u64,
        beats: Vec<WireBeat>,
        now: u64,
    ) -> Result<usize, StartError> {
        if self.phase != Phase::Ready {
            return Err(StartError::NotReady { phase: self.phase });
        }
        if !self.clock.is_calibrated() {
            return Err(StartError::NotCalibrated);
        }
        let params = SessionParams::new(tempo, duration);
        params.validate()?;
        session::validate_start_time(start_time, self.clock.reference_time(now))?;
        if !beats
            .windows(2)
            .all(|pair| pair[0].server_time < pair[1].server_time)
        {
            return Err(StartError::MalformedSchedule);
        }

        let assigned: Vec<BeatDescriptor> = beats
            .iter()
            .map(|beat| BeatDescriptor {
                beat_index: beat.beat_number,
                reference_timestamp: beat.server_time,
                fires_on_this_device: true,
            })
            .collect();
        let plan = Schedule::from_beats(assigned);
        self.arm_schedule(&plan, now);

        let count = plan.len();
        self.session = Some(Session {
            role: self.role,
            params,
            reference_start: start_time,
            schedule: plan,
        });
        self.phase = Phase::Active;
        self.last_fired_beat = None;
        Ok(count)
    }

    fn on_end_command(&mut self) {
        if self.phase != Phase::Active {
            debug!(phase = ?self.phase, "end_session outside an active session");
            return;
        }
        info!("session ended by peer");
        self.finish_session();
    }

    /// The session-end timer fired: the final beat plus grace has passed.
    fn on_session_complete(&mut self) {
        info!("session ran to completion");
        if !self.transport.send(&Message::EndSession) {
            warn!("end_session send failed");
        }
        self.finish_session();
    }

    /// Arms every beat this device fires, converting reference due times to
    /// clamped local fire times.
    fn arm_schedule(&mut self, plan: &Schedule, now: u64) {
        for beat in plan.assigned() {
            let due = self.clock.schedule_time_for(beat.reference_timestamp, now);
            self.arm_at(due, TimerAction::Pulse { beat: beat.beat_index }, now);
        }
    }

    fn fire_beat(&mut self, beat: u32) {
        let duration = self.config.pulse_duration.as_millis() as u64;
        if !self.actuator.pulse(duration) {
            warn!(beat, "pulse actuation failed");
        }
        self.last_fired_beat = Some(beat);
        debug!(beat, "beat fired");
    }

    /// `Ended` entry actions: timers removed synchronously, session
    /// dropped. The calibrated clock survives, so the coordinator settles
    /// back in `Ready` and another session can start on this connection.
    fn finish_session(&mut self) {
        self.phase = Phase::Ended;
        self.scheduler.cancel_all();
        self.session = None;
        self.phase = Phase::Ready;
    }

    fn on_disconnected(&mut self) {
        info!(phase = ?self.phase, "transport disconnected");
        self.teardown_to_idle();
    }

    /// Unconditional return to `Idle`: no session, probe, timer, or roster
    /// entry survives. In-flight probe awaits resolve as abandoned rather
    /// than leaking.
    fn teardown_to_idle(&mut self) {
        self.phase = Phase::Ended;
        self.scheduler.cancel_all();
        self.clock.reset();
        self.probe_timeouts.clear();
        self.session = None;
        self.clients.clear();
        self.probes_launched = 0;
        self.phase = Phase::Idle;
    }

    /// Arms a timer whose loss is tolerable; a rejected (already-past)
    /// target is logged and dropped.
    fn arm_at(&mut self, due: u64, action: TimerAction, now: u64) {
        if self.scheduler.arm(due, action, now).is_err() {
            warn!(due, now, "timer target already passed; action dropped");
        }
    }
}
