//! In-process transport for tests and the loopback demo.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use crate::protocol::message::Message;

use super::Transport;

#[derive(Debug, Default)]
struct Inner {
    sent: VecDeque<Message>,
    connected: bool,
}

/// Transport whose wire is a shared in-memory queue.
///
/// Cloning yields another handle onto the same wire: hand one clone to a
/// coordinator and keep another as the harness side, which observes traffic
/// with [`drain_sent`](Self::drain_sent) and simulates link loss with
/// [`set_connected`](Self::set_connected). Single-threaded by design, like
/// the engine it serves.
#[derive(Debug, Clone)]
pub struct MemoryTransport {
    inner: Rc<RefCell<Inner>>,
}

impl MemoryTransport {
    /// Creates a connected transport.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Rc::new(RefCell::new(Inner {
                sent: VecDeque::new(),
                connected: true,
            })),
        }
    }

    /// Flips the simulated link state. A disconnected transport refuses
    /// sends until reconnected.
    pub fn set_connected(&self, connected: bool) {
        self.inner.borrow_mut().connected = connected;
    }

    /// Whether the simulated link is up.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.inner.borrow().connected
    }

    /// Removes and returns everything sent since the last drain.
    pub fn drain_sent(&self) -> Vec<Message> {
        self.inner.borrow_mut().sent.drain(..).collect()
    }
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for MemoryTransport {
    fn send(&mut self, message: &Message) -> bool {
        let mut inner = self.inner.borrow_mut();
        if !inner.connected {
            return false;
        }
        inner.sent.push_back(message.clone());
        true
    }
}
