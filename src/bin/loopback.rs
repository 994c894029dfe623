//! Loopback demonstration: one master and one client coordinator
//! synchronized through an in-process relay whose reference clock is
//! deliberately skewed.
//!
//! Both devices calibrate against the relay, the master plans an
//! alternating session, and the fired pulses are printed with their local
//! times so the alternation is visible despite the skew.
//!
//! # Usage
//!
//! ```sh
//! tactus-loopback --tempo 60 --duration 6 --skew-ms 120000
//! ```

use std::time::Duration;

use tactus::actuate::Actuator;
use tactus::protocol::message::{ClientInfo, Message};
use tactus::runtime::clock::MonotonicClock;
use tactus::runtime::coordinator::SessionCoordinator;
use tactus::runtime::events::TransportEvent;
use tactus::session::{self, Phase, Role, SessionParams};
use tactus::transport::memory::MemoryTransport;
use tactus::TimingConfig;

/// Default session tempo.
const DEFAULT_TEMPO: u32 = 60;

/// Default session length in seconds.
const DEFAULT_DURATION: u32 = 6;

/// Default relay clock skew: two minutes ahead of both devices.
const DEFAULT_SKEW_MS: i64 = 120_000;

struct Options {
    tempo: u32,
    duration: u32,
    skew_ms: i64,
}

/// Actuator that prints each pulse with the device's local time.
struct PrintActuator {
    label: &'static str,
    clock: MonotonicClock,
}

impl Actuator for PrintActuator {
    fn pulse(&mut self, duration_ms: u64) -> bool {
        eprintln!(
            "[{:>6} ms] {} pulse {} ms",
            self.clock.now_ms(),
            self.label,
            duration_ms
        );
        true
    }

    fn pulse_pattern(&mut self, pattern: &[u64]) -> bool {
        eprintln!(
            "[{:>6} ms] {} pattern {:?}",
            self.clock.now_ms(),
            self.label,
            pattern
        );
        true
    }
}

type Device = SessionCoordinator<MemoryTransport, PrintActuator>;

fn main() {
    if let Err(e) = run() {
        eprintln!("tactus-loopback: {e}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), String> {
    let args: Vec<String> = std::env::args().collect();
    let options = parse_args(&args)?;
    tactus::init_tracing();

    let clock = MonotonicClock::new();
    let master_wire = MemoryTransport::new();
    let client_wire = MemoryTransport::new();

    // A short probe burst keeps the demo snappy; the wire is loopback-fast.
    let config = TimingConfig::local();
    let mut master = SessionCoordinator::new(
        Role::Master,
        session::generate_device_id(Role::Master),
        config.clone(),
        master_wire.clone(),
        PrintActuator {
            label: "master",
            clock,
        },
    );
    let mut client = SessionCoordinator::new(
        Role::Client,
        session::generate_device_id(Role::Client),
        config,
        client_wire.clone(),
        PrintActuator {
            label: "client",
            clock,
        },
    );

    eprintln!(
        "tactus-loopback: relay clock skewed {} ms; {} bpm for {} s",
        options.skew_ms, options.tempo, options.duration
    );

    master.push_event(TransportEvent::Connected);
    client.push_event(TransportEvent::Connected);

    let mut started = false;
    loop {
        let now = clock.now_ms();
        relay(
            now,
            options.skew_ms,
            &master_wire,
            &client_wire,
            &mut master,
            &mut client,
        );
        master.poll(now);
        client.poll(now);

        if !started
            && master.phase() == Phase::Ready
            && client.phase() == Phase::Ready
            && !master.clients().is_empty()
        {
            let stats = master.clock().stats();
            eprintln!(
                "tactus-loopback: calibrated (offset {:.1} ms, latency {:.1} ms)",
                stats.offset_ms, stats.latency_ms
            );
            master
                .start_session(
                    SessionParams::new(options.tempo, options.duration),
                    false,
                    now,
                )
                .map_err(|e| format!("session start failed: {e}"))?;
            started = true;
        }

        if started
            && master.phase() == Phase::Ready
            && client.phase() == Phase::Ready
            && master.session().is_none()
        {
            break;
        }

        std::thread::sleep(Duration::from_millis(1));
    }

    eprintln!("tactus-loopback: session complete");
    Ok(())
}

/// Plays the relay: answers probes from a skewed reference clock, routes
/// session commands to the client, and reports the client's arrival to the
/// master.
fn relay(
    now: u64,
    skew_ms: i64,
    master_wire: &MemoryTransport,
    client_wire: &MemoryTransport,
    master: &mut Device,
    client: &mut Device,
) {
    let reference_now = now.saturating_add_signed(skew_ms);

    for message in master_wire.drain_sent() {
        match message {
            Message::Ping { client_time } => {
                master.push_event(TransportEvent::Message(Message::Pong {
                    client_time,
                    server_receive_time: reference_now,
                    server_send_time: reference_now,
                }));
            }
            Message::StartSession { .. } | Message::EndSession | Message::VibrateNow { .. } => {
                client.push_event(TransportEvent::Message(message));
            }
            _ => {}
        }
    }

    for message in client_wire.drain_sent() {
        match message {
            Message::Ping { client_time } => {
                client.push_event(TransportEvent::Message(Message::Pong {
                    client_time,
                    server_receive_time: reference_now,
                    server_send_time: reference_now,
                }));
            }
            Message::Register { device_id, .. } => {
                master.push_event(TransportEvent::Message(Message::ClientConnected {
                    client: ClientInfo { id: device_id },
                }));
            }
            _ => {}
        }
    }
}

fn parse_args(args: &[String]) -> Result<Options, String> {
    let mut options = Options {
        tempo: DEFAULT_TEMPO,
        duration: DEFAULT_DURATION,
        skew_ms: DEFAULT_SKEW_MS,
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--tempo" | "-t" => {
                i += 1;
                let value = args.get(i).ok_or("missing value for --tempo")?;
                options.tempo = value
                    .parse()
                    .map_err(|e| format!("invalid --tempo: {e}"))?;
            }
            "--duration" | "-d" => {
                i += 1;
                let value = args.get(i).ok_or("missing value for --duration")?;
                options.duration = value
                    .parse()
                    .map_err(|e| format!("invalid --duration: {e}"))?;
            }
            "--skew-ms" | "-s" => {
                i += 1;
                let value = args.get(i).ok_or("missing value for --skew-ms")?;
                options.skew_ms = value
                    .parse()
                    .map_err(|e| format!("invalid --skew-ms: {e}"))?;
            }
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            arg => return Err(format!("unknown argument: {arg}")),
        }
        i += 1;
    }

    Ok(options)
}

fn print_usage() {
    eprintln!(
        r#"tactus-loopback - in-process master/client synchronization demo

USAGE:
    tactus-loopback [OPTIONS]

OPTIONS:
    -t, --tempo <BPM>       Session tempo, 30-200 (default: 60)
    -d, --duration <SECS>   Session length, 5-300 (default: 6)
    -s, --skew-ms <MS>      Relay reference clock skew (default: 120000)
    -h, --help              Print this help message

EXAMPLE:
    tactus-loopback --tempo 120 --duration 10 --skew-ms 90000
"#
    );
}
