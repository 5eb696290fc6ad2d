//! Subscriber callbacks and their registrations.
//!
//! Handlers are compared by identity: a handle and its clones are the same
//! handler, two handles built from the same closure are not.

use chrono::{DateTime, Utc};
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use uuid::Uuid;

use crate::models::event::RelayEvent;

/// Unique identity of a handler handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(Uuid);

impl HandlerId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for HandlerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.as_simple())
    }
}

/// Callback invoked with every event routed to its subject.
#[derive(Clone)]
pub struct EventHandler {
    id: HandlerId,
    callback: Arc<dyn Fn(&RelayEvent) + Send + Sync>,
}

impl EventHandler {
    pub fn new<F>(callback: F) -> Self
    where
        F: Fn(&RelayEvent) + Send + Sync + 'static,
    {
        Self {
            id: HandlerId::new(),
            callback: Arc::new(callback),
        }
    }

    pub fn id(&self) -> HandlerId {
        self.id
    }

    /// Invoke the callback; a panic is contained and reported as `Err`.
    pub(crate) fn call(&self, event: &RelayEvent) -> Result<(), String> {
        catch_unwind(AssertUnwindSafe(|| (self.callback)(event))).map_err(panic_message)
    }
}

impl PartialEq for EventHandler {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for EventHandler {}

impl fmt::Debug for EventHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventHandler").field("id", &self.id).finish()
    }
}

/// Observer of connection open (`true`) / closed (`false`) transitions.
#[derive(Clone)]
pub struct ConnectionStateHandler {
    id: HandlerId,
    callback: Arc<dyn Fn(bool) + Send + Sync>,
}

impl ConnectionStateHandler {
    pub fn new<F>(callback: F) -> Self
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        Self {
            id: HandlerId::new(),
            callback: Arc::new(callback),
        }
    }

    pub fn id(&self) -> HandlerId {
        self.id
    }

    pub(crate) fn call(&self, connected: bool) -> Result<(), String> {
        catch_unwind(AssertUnwindSafe(|| (self.callback)(connected))).map_err(panic_message)
    }
}

impl PartialEq for ConnectionStateHandler {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ConnectionStateHandler {}

impl fmt::Debug for ConnectionStateHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionStateHandler")
            .field("id", &self.id)
            .finish()
    }
}

/// One handler registered under a subject.
#[derive(Debug, Clone)]
pub struct HandlerRegistration {
    pub subject: String,
    pub handler: EventHandler,
    pub correlation_id: Option<String>,
    pub registered_at: DateTime<Utc>,
}

impl HandlerRegistration {
    pub fn new(subject: &str, handler: EventHandler, correlation_id: Option<String>) -> Self {
        Self {
            subject: subject.to_string(),
            handler,
            correlation_id,
            registered_at: Utc::now(),
        }
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked".to_string()
    }
}
