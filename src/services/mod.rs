//! Server-side services.

pub mod channel;

pub use channel::ChannelService;
