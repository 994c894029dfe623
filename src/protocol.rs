//! Device-to-peer wire contract.
//!
//! Every payload on the transport is a JSON object tagged by a `type`
//! field. The transport itself (framing, reconnection, delivery) is an
//! external collaborator; this module only fixes the message vocabulary.
//!
//! # Message Flow
//!
//! ```text
//! Device                                  Peer / relay
//!   │                                          │
//!   │  register(role, deviceId)                │
//!   │─────────────────────────────────────────>│
//!   │                                          │
//!   │  ping(clientTime)              ×N        │
//!   │─────────────────────────────────────────>│
//!   │  pong(clientTime, serverReceiveTime,     │
//!   │       serverSendTime)                    │
//!   │<─────────────────────────────────────────│
//!   │                                          │
//!   │  client_connected / client_list          │   (master only)
//!   │<─────────────────────────────────────────│
//!   │                                          │
//!   │  start_session(tempo, duration,          │   (master → clients)
//!   │     startTime, schedule[])               │
//!   │─────────────────────────────────────────>│
//!   │            ...beats fire locally...      │
//!   │  end_session                             │
//!   │─────────────────────────────────────────>│
//!   │                                          │
//!   │  heartbeat ⇄ heartbeat_response          │   (liveness only)
//! ```
//!
//! Field names are part of the contract and pinned by tests in
//! [`message`]; changing them strands deployed peers.

pub mod message;
