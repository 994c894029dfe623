//! End-to-end tests for a master/client session over the memory transport.
//!
//! These tests verify the complete flow:
//! 1. Both devices calibrate against a common reference clock
//! 2. The master plans an alternating schedule and sends the client half
//! 3. The client converts reference due times into local fire times
//! 4. A mid-session disconnect silences every remaining beat
//!
//! The test process plays the relay: it answers probes with scripted pongs
//! and carries session commands between the two coordinators. Time never
//! passes for real; each device's local clock is stepped explicitly.

use std::cell::RefCell;
use std::rc::Rc;

use tactus::actuate::Actuator;
use tactus::protocol::message::{ClientInfo, Message};
use tactus::runtime::coordinator::SessionCoordinator;
use tactus::runtime::events::TransportEvent;
use tactus::session::{Phase, Role, SessionParams};
use tactus::transport::memory::MemoryTransport;
use tactus::TimingConfig;

/// Actuator that counts every pulse it is asked for.
#[derive(Clone, Default)]
struct RecordingActuator {
    pulses: Rc<RefCell<Vec<u64>>>,
}

impl RecordingActuator {
    fn pulse_count(&self) -> usize {
        self.pulses.borrow().len()
    }
}

impl Actuator for RecordingActuator {
    fn pulse(&mut self, duration_ms: u64) -> bool {
        self.pulses.borrow_mut().push(duration_ms);
        true
    }

    fn pulse_pattern(&mut self, pattern: &[u64]) -> bool {
        self.pulses.borrow_mut().push(pattern.iter().sum());
        true
    }
}

type Device = SessionCoordinator<MemoryTransport, RecordingActuator>;

fn device(role: Role, id: &str) -> (Device, MemoryTransport, RecordingActuator) {
    let wire = MemoryTransport::new();
    let actuator = RecordingActuator::default();
    let coordinator = SessionCoordinator::new(
        role,
        id.into(),
        TimingConfig::default(),
        wire.clone(),
        actuator.clone(),
    );
    (coordinator, wire, actuator)
}

/// Pulls the most recent outbound ping's send instant.
fn last_ping(wire: &MemoryTransport) -> u64 {
    wire.drain_sent()
        .into_iter()
        .rev()
        .find_map(|message| match message {
            Message::Ping { client_time } => Some(client_time),
            _ => None,
        })
        .expect("a ping should have been sent")
}

/// Connects a device and answers its full probe burst as a reference whose
/// clock reads `device_local + clock_lead` when a probe arrives, with
/// `latency` ms on each leg. Returns the device-local time afterwards.
fn calibrate(device: &mut Device, wire: &MemoryTransport, clock_lead: i64, latency: u64) -> u64 {
    device.push_event(TransportEvent::Connected);
    device.poll(0);
    let mut now = 0;
    for round in 0..5 {
        let ping_time = last_ping(wire);
        let arrival = ping_time
            .checked_add_signed(clock_lead + latency as i64)
            .expect("test instants stay positive");
        now = ping_time + 2 * latency;
        device.push_event(TransportEvent::Message(Message::Pong {
            client_time: ping_time,
            server_receive_time: arrival,
            server_send_time: arrival,
        }));
        device.poll(now);
        if round < 4 {
            now += 500;
            device.poll(now);
        }
    }
    assert_eq!(device.phase(), Phase::Ready);
    now
}

#[test]
fn alternating_session_flows_master_to_client() {
    let (mut master, master_wire, master_actuator) = device(Role::Master, "master-1");
    let (mut client, client_wire, client_actuator) = device(Role::Client, "client-1");

    // The shared reference runs 500ms ahead of the master's clock and a
    // full second ahead of the client's; each device sees 10ms per leg.
    let master_now = calibrate(&mut master, &master_wire, 500, 10);
    let client_now = calibrate(&mut client, &client_wire, 1000, 10);

    // The measured offset includes the forward leg: lead + latency.
    assert_eq!(master.clock().state().offset_estimate, 510.0);
    assert_eq!(client.clock().state().offset_estimate, 1010.0);

    // The relay reports the client to the master.
    master.push_event(TransportEvent::Message(Message::ClientConnected {
        client: ClientInfo { id: "client-1".into() },
    }));
    master.poll(master_now);

    // Master plans 5 beats at 60 bpm starting 3s out on the reference
    // clock.
    master
        .start_session(SessionParams::new(60, 5), false, master_now)
        .expect("link is suitable");
    let start_ref = master_now + 510 + 3000;

    // The wire carries exactly the odd beats, indices preserved.
    let sent = master_wire.drain_sent();
    let start_command = sent
        .iter()
        .find(|m| matches!(m, Message::StartSession { .. }))
        .expect("start command sent");
    match start_command {
        Message::StartSession {
            tempo,
            duration,
            start_time,
            schedule,
        } => {
            assert_eq!((*tempo, *duration), (60, 5));
            assert_eq!(*start_time, start_ref);
            let delegated: Vec<(u32, u64)> = schedule
                .iter()
                .map(|b| (b.beat_number, b.server_time))
                .collect();
            assert_eq!(delegated, vec![(1, start_ref + 1000), (3, start_ref + 3000)]);
        }
        other => panic!("expected start_session, got {other:?}"),
    }

    // Relay the command to the client. Its reference clock agrees with the
    // master's, so the start instant is still ~3s in its future.
    client.push_event(TransportEvent::Message(start_command.clone()));
    client.poll(client_now);
    assert_eq!(client.phase(), Phase::Active);

    // Client-local fire times: reference minus its offset (1010) minus the
    // latency compensation (10).
    let client_local = |reference: u64| reference - 1010 - 10;
    client.poll(client_local(start_ref + 1000) - 1);
    assert_eq!(client_actuator.pulse_count(), 0);
    client.poll(client_local(start_ref + 1000));
    assert_eq!(client_actuator.pulse_count(), 1);
    assert_eq!(client.last_fired_beat(), Some(1));

    // Master-local fire times mirror that with its own offset (510).
    let master_local = |reference: u64| reference - 510 - 10;
    master.poll(master_local(start_ref));
    assert_eq!(master_actuator.pulse_count(), 1);
    assert_eq!(master.last_fired_beat(), Some(0));

    // Both devices fire the same reference instants 0 and 1000 apart: the
    // alternation is exact on the shared clock.
    assert_eq!(
        master_local(start_ref) + 510,
        client_local(start_ref + 1000) + 1010 - 1000
    );

    // The link dies at reference T+1500: beat 1 has fired, beat 3 never
    // will.
    client.push_event(TransportEvent::Disconnected);
    client.poll(client_local(start_ref + 1500));
    assert_eq!(client.phase(), Phase::Idle);
    assert!(!client.clock().is_calibrated());

    client.poll(client_local(start_ref + 60_000));
    assert_eq!(client_actuator.pulse_count(), 1);

    // The master, still connected, plays out its own half and ends the
    // session.
    master.poll(master_local(start_ref + 4000));
    assert_eq!(master_actuator.pulse_count(), 3);
    master.poll(master_local(start_ref + 5000));
    assert_eq!(master.phase(), Phase::Ready);
    assert!(
        master_wire
            .drain_sent()
            .iter()
            .any(|m| matches!(m, Message::EndSession)),
        "master announces the session end"
    );
}

#[test]
fn consecutive_probe_timeouts_leave_clock_uncalibrated() {
    let (mut device, _wire, _) = device(Role::Client, "client-2");
    device.push_event(TransportEvent::Connected);
    device.poll(0);

    // Two full timeout windows pass with no pong: 5s timeout + 500ms pause,
    // twice.
    let mut now = 0;
    while now < 11_500 {
        now += 250;
        device.poll(now);
    }
    assert_eq!(device.phase(), Phase::Calibrating);
    assert!(!device.clock().is_calibrated());
    assert!(!device.clock().is_suitable());

    // The rest of the burst fails the same way; the device still reaches
    // Ready so the operator can see the failed calibration and retry.
    while now < 40_000 {
        now += 250;
        device.poll(now);
    }
    assert_eq!(device.phase(), Phase::Ready);
    assert!(!device.clock().is_calibrated());
}

#[test]
fn second_session_reuses_the_calibration() {
    let (mut master, wire, actuator) = device(Role::Master, "master-3");
    let now = calibrate(&mut master, &wire, 0, 25);
    master.push_event(TransportEvent::Message(Message::ClientConnected {
        client: ClientInfo { id: "c".into() },
    }));
    master.poll(now);

    master
        .start_session(SessionParams::new(120, 5), false, now)
        .expect("first session starts");
    assert!(master.stop_session());
    assert_eq!(master.phase(), Phase::Ready);

    // No recalibration needed; the next session starts immediately.
    master
        .start_session(SessionParams::new(60, 5), false, now + 10)
        .expect("second session starts on the same calibration");
    assert_eq!(master.phase(), Phase::Active);
    assert_eq!(actuator.pulse_count(), 0);
}
