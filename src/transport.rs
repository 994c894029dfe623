//! Outbound transport seam.
//!
//! The engine never owns a socket. An external transport collaborator
//! delivers inbound traffic as [`crate::runtime::events::TransportEvent`]s
//! and accepts outbound messages through this trait. Framing, reconnection,
//! and delivery guarantees are its problem; the engine only assumes the
//! message vocabulary of [`crate::protocol::message`].

use crate::protocol::message::Message;

/// Outbound half of the bidirectional message transport.
pub trait Transport {
    /// Attempts to send one message.
    ///
    /// Returns false when the transport is not currently connected; the
    /// caller decides whether that is worth retrying.
    fn send(&mut self, message: &Message) -> bool;
}

pub mod memory;
