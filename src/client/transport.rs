//! Transport seam between the relay store and a streaming connection.

use std::sync::Weak;

use super::store::Shared;

/// Opens streaming connections. The transport owns reconnection; the store
/// only observes open/closed signals through the listener.
pub trait Transport: Send + Sync + 'static {
    fn open(&self, url: &str, listener: TransportListener) -> Box<dyn Connection>;
}

/// A live (or reconnecting) streaming connection.
pub trait Connection: Send + Sync {
    /// Whether the stream is currently open.
    fn is_open(&self) -> bool;
    /// Stop the stream. No listener callbacks follow once this returns.
    fn close(&self);
}

/// Callbacks from a connection into the store that opened it.
///
/// Bound to one connection generation: once the store has replaced or
/// closed that connection, every callback is ignored.
#[derive(Clone)]
pub struct TransportListener {
    store: Weak<Shared>,
    generation: u64,
}

impl TransportListener {
    pub(crate) fn new(store: Weak<Shared>, generation: u64) -> Self {
        Self { store, generation }
    }

    /// The stream is open (first time or after a reconnect).
    pub fn on_open(&self) {
        if let Some(shared) = self.store.upgrade() {
            shared.handle_open(self.generation);
        }
    }

    /// One message's `data` payload.
    pub fn on_message(&self, data: &str) {
        if let Some(shared) = self.store.upgrade() {
            shared.handle_message(self.generation, data);
        }
    }

    /// The stream dropped; the transport may reopen it.
    pub fn on_error(&self, reason: &str) {
        if let Some(shared) = self.store.upgrade() {
            shared.handle_error(self.generation, reason);
        }
    }

    /// Whether the owning store still uses this connection.
    pub fn is_current(&self) -> bool {
        self.store
            .upgrade()
            .is_some_and(|shared| shared.is_current(self.generation))
    }
}
