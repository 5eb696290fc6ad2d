//! Data models for channels and events.

pub mod channel;
pub mod event;

pub use channel::*;
pub use event::*;
