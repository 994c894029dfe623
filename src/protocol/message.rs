//! JSON message schema shared by every device and relay.

use serde::{Deserialize, Serialize};

use crate::session::Role;

/// Roster entry for one connected client device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientInfo {
    /// The client's self-chosen device id.
    pub id: String,
}

/// One distributed beat as it rides the wire.
///
/// `should_vibrate` is written from the receiver's perspective: every beat a
/// device is handed is a beat it fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireBeat {
    /// Position in the full session schedule (not renumbered for subsets).
    pub beat_number: u32,
    /// Due instant on the reference clock, ms.
    pub server_time: u64,
    /// Whether the receiving device fires this beat.
    pub should_vibrate: bool,
}

/// Every message the engine sends or understands.
///
/// Unknown `type` tags fail to parse; the coordinator drops them with a
/// warning rather than guessing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum Message {
    /// Announces this device and its role after the transport connects.
    Register {
        /// Declared role.
        role: Role,
        /// Self-chosen device id, unique per connection.
        device_id: String,
    },

    /// Clock probe; `client_time` doubles as the correlation key for the
    /// matching pong.
    Ping {
        /// Local send instant at the probing device.
        client_time: u64,
    },

    /// Probe response from the timing reference.
    Pong {
        /// Echo of the probe's send instant.
        client_time: u64,
        /// Reference instant the ping arrived.
        server_receive_time: u64,
        /// Reference instant this pong left.
        server_send_time: u64,
    },

    /// Master hands a client its share of the beat schedule.
    StartSession {
        /// Beats per minute.
        tempo: u32,
        /// Session length in seconds.
        duration: u32,
        /// First-beat instant on the reference clock.
        start_time: u64,
        /// The receiving device's beats, indices preserved.
        schedule: Vec<WireBeat>,
    },

    /// Master ends the session for everyone.
    EndSession,

    /// Full roster snapshot for the master.
    ClientList {
        /// Currently connected clients.
        clients: Vec<ClientInfo>,
    },

    /// A client joined.
    ClientConnected {
        /// The new roster entry.
        client: ClientInfo,
    },

    /// A client left.
    ClientDisconnected {
        /// Id of the departed client.
        client_id: String,
    },

    /// Liveness check; answered immediately, never touches scheduling.
    Heartbeat {
        /// Sender id (may be absent from relay-originated heartbeats).
        #[serde(default)]
        client_id: String,
        /// Sender's local time at transmission.
        #[serde(default)]
        timestamp: u64,
    },

    /// Echo answering a heartbeat.
    HeartbeatResponse {
        /// Responder's device id.
        client_id: String,
        /// Responder's local time at transmission.
        timestamp: u64,
    },

    /// Immediate unscheduled pulse, bypassing the beat schedule. Fallback
    /// for links too slow for scheduled synchronization.
    VibrateNow {
        /// Pulse length in ms (ignored when a pattern is present).
        duration: u64,
        /// Optional on/off pattern in ms.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pattern: Option<Vec<u64>>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn json(message: &Message) -> String {
        serde_json::to_string(message).expect("serialize")
    }

    #[test]
    fn register_wire_shape() {
        let msg = Message::Register {
            role: Role::Master,
            device_id: "master-7".into(),
        };
        assert_eq!(
            json(&msg),
            r#"{"type":"register","role":"master","deviceId":"master-7"}"#
        );
    }

    #[test]
    fn probe_wire_shapes() {
        assert_eq!(
            json(&Message::Ping { client_time: 41 }),
            r#"{"type":"ping","clientTime":41}"#
        );
        assert_eq!(
            json(&Message::Pong {
                client_time: 41,
                server_receive_time: 90,
                server_send_time: 91,
            }),
            r#"{"type":"pong","clientTime":41,"serverReceiveTime":90,"serverSendTime":91}"#
        );
    }

    #[test]
    fn start_session_wire_shape() {
        let msg = Message::StartSession {
            tempo: 60,
            duration: 30,
            start_time: 5000,
            schedule: vec![WireBeat {
                beat_number: 1,
                server_time: 6000,
                should_vibrate: true,
            }],
        };
        assert_eq!(
            json(&msg),
            concat!(
                r#"{"type":"start_session","tempo":60,"duration":30,"startTime":5000,"#,
                r#""schedule":[{"beatNumber":1,"serverTime":6000,"shouldVibrate":true}]}"#
            )
        );
    }

    #[test]
    fn end_session_is_bare() {
        assert_eq!(json(&Message::EndSession), r#"{"type":"end_session"}"#);
    }

    #[test]
    fn heartbeat_response_wire_shape() {
        let msg = Message::HeartbeatResponse {
            client_id: "client-3".into(),
            timestamp: 77,
        };
        assert_eq!(
            json(&msg),
            r#"{"type":"heartbeat_response","clientId":"client-3","timestamp":77}"#
        );
    }

    #[test]
    fn vibrate_now_omits_missing_pattern() {
        assert_eq!(
            json(&Message::VibrateNow {
                duration: 200,
                pattern: None,
            }),
            r#"{"type":"vibrate_now","duration":200}"#
        );
    }

    #[test]
    fn parses_roster_messages() {
        let list: Message =
            serde_json::from_str(r#"{"type":"client_list","clients":[{"id":"c1"},{"id":"c2"}]}"#)
                .expect("parse");
        assert_eq!(
            list,
            Message::ClientList {
                clients: vec![ClientInfo { id: "c1".into() }, ClientInfo { id: "c2".into() }],
            }
        );

        let gone: Message =
            serde_json::from_str(r#"{"type":"client_disconnected","clientId":"c1"}"#)
                .expect("parse");
        assert_eq!(gone, Message::ClientDisconnected { client_id: "c1".into() });
    }

    #[test]
    fn heartbeat_fields_default_when_absent() {
        let beat: Message = serde_json::from_str(r#"{"type":"heartbeat"}"#).expect("parse");
        assert_eq!(
            beat,
            Message::Heartbeat {
                client_id: String::new(),
                timestamp: 0,
            }
        );
    }

    #[test]
    fn unknown_type_is_rejected() {
        assert!(serde_json::from_str::<Message>(r#"{"type":"status_update"}"#).is_err());
    }

    #[test]
    fn roundtrip_preserves_start_session() {
        let msg = Message::StartSession {
            tempo: 120,
            duration: 60,
            start_time: 123_456,
            schedule: vec![
                WireBeat {
                    beat_number: 1,
                    server_time: 123_956,
                    should_vibrate: true,
                },
                WireBeat {
                    beat_number: 3,
                    server_time: 124_956,
                    should_vibrate: true,
                },
            ],
        };
        let back: Message = serde_json::from_str(&json(&msg)).expect("parse");
        assert_eq!(back, msg);
    }
}
