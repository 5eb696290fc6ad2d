//! Client side: the event relay store and its transports.

pub mod handler;
pub mod sse;
pub mod store;
pub mod transport;

pub use handler::{ConnectionStateHandler, EventHandler, HandlerId, HandlerRegistration};
pub use sse::SseTransport;
pub use store::{ConnectionState, EventRelayStore};
pub use transport::{Connection, Transport, TransportListener};
