//! Event relay store: one shared SSE connection, fanned out by subject.
//!
//! The store owns a single streaming connection, a registry of handlers per
//! subject, and a small list of connection-state observers. Incoming events
//! carrying a `projectId` go to that subject's handlers only; events without
//! one are broadcast to every handler. When the last handler leaves, the
//! connection is closed after a grace period unless someone registers again.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use url::Url;

use super::handler::{ConnectionStateHandler, EventHandler, HandlerRegistration};
use super::transport::{Connection, Transport, TransportListener};
use crate::config::RelayConfig;
use crate::error::RelayError;
use crate::models::channel::Channel;
use crate::models::event::RelayEvent;

/// Coarse connection state as seen by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    /// Opened, waiting for the transport to report the stream is live.
    Connecting,
    Connected,
}

/// Client-side event relay. Clones share the same connection and registries.
#[derive(Clone)]
pub struct EventRelayStore {
    shared: Arc<Shared>,
}

pub(crate) struct Shared {
    transport: Arc<dyn Transport>,
    config: RelayConfig,
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    handlers: HashMap<String, Vec<HandlerRegistration>>,
    state_handlers: Vec<ConnectionStateHandler>,
    connection: Option<ActiveConnection>,
    /// Bumped whenever the connection is replaced or dropped; stale
    /// transport callbacks carry an older value.
    generation: u64,
    /// Transport reported the current generation open.
    open: bool,
    pending_disconnect: Option<PendingDisconnect>,
    timer_seq: u64,
}

struct ActiveConnection {
    channel: Channel,
    url: String,
    conn: Box<dyn Connection>,
}

struct PendingDisconnect {
    seq: u64,
    task: JoinHandle<()>,
}

impl State {
    fn total_handlers(&self) -> usize {
        self.handlers.values().map(Vec::len).sum()
    }

    fn cancel_pending_disconnect(&mut self) {
        if let Some(pending) = self.pending_disconnect.take() {
            pending.task.abort();
            debug!("pending disconnect cancelled");
        }
    }

    /// Detach the current connection. The caller closes it outside the lock.
    fn detach(&mut self) -> Option<ActiveConnection> {
        self.cancel_pending_disconnect();
        self.generation += 1;
        self.open = false;
        self.connection.take()
    }
}

impl EventRelayStore {
    pub fn new(transport: Arc<dyn Transport>, config: RelayConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                transport,
                config,
                state: Mutex::new(State::default()),
            }),
        }
    }

    pub fn config(&self) -> &RelayConfig {
        &self.shared.config
    }

    /// Register handlers for `subject`. Already-registered handlers are kept
    /// once; beyond the per-subject cap the oldest registration is evicted.
    /// Cancels a pending disconnect.
    pub fn register_handlers(
        &self,
        subject: &str,
        handlers: &[EventHandler],
        correlation_id: Option<&str>,
    ) {
        self.shared
            .register_handlers(subject, handlers, correlation_id);
    }

    /// Remove handlers from `subject` by identity. When no handlers remain
    /// anywhere, the connection is closed after the disconnect delay.
    pub fn unregister_handlers(&self, subject: &str, handlers: &[EventHandler]) {
        let mut state = self.shared.lock();
        if let Some(list) = state.handlers.get_mut(subject) {
            let before = list.len();
            list.retain(|reg| !handlers.contains(&reg.handler));
            let removed = before - list.len();
            if list.is_empty() {
                state.handlers.remove(subject);
            }
            debug!(subject = %subject, removed, "handlers unregistered");
        }

        if state.total_handlers() == 0 && state.connection.is_some() {
            if let Some(detached) = self.shared.schedule_disconnect(&mut state) {
                drop(state);
                self.shared.finish_disconnect(detached);
            }
        }
    }

    /// Connect to the channel named by `url` and register `handlers` for its
    /// subject. The existing connection is reused when the channel matches;
    /// otherwise it is closed and a new one opened.
    pub fn connect(&self, url: &str, handlers: &[EventHandler], correlation_id: Option<&str>) {
        let Some(channel) = Channel::from_url(url) else {
            error!(error = %RelayError::UnrecognizedUrl(url.to_string()), "connect ignored");
            return;
        };
        let endpoint = match self.shared.endpoint_url(url, &channel) {
            Ok(endpoint) => endpoint,
            Err(e) => {
                error!(error = %e, "connect ignored");
                return;
            }
        };

        let reuse = {
            let state = self.shared.lock();
            state
                .connection
                .as_ref()
                .is_some_and(|active| active.channel == channel)
        };

        if reuse {
            debug!(channel = %channel, "reusing connection");
        } else {
            self.shared.open_channel(channel.clone(), endpoint);
        }

        self.shared
            .register_handlers(channel.subject(), handlers, correlation_id);
    }

    /// Close the connection now. Idempotent; cancels a pending disconnect.
    pub fn disconnect(&self) {
        let detached = self.shared.lock().detach();
        self.shared.finish_disconnect(detached);
    }

    /// Disconnect and drop every registration and observer.
    pub fn shutdown(&self) {
        self.disconnect();
        let mut state = self.shared.lock();
        state.handlers.clear();
        state.state_handlers.clear();
        info!("relay store shut down");
    }

    /// Whether the underlying stream is open.
    pub fn is_connected(&self) -> bool {
        let state = self.shared.lock();
        state
            .connection
            .as_ref()
            .is_some_and(|active| active.conn.is_open())
    }

    pub fn connection_state(&self) -> ConnectionState {
        let state = self.shared.lock();
        match (&state.connection, state.open) {
            (None, _) => ConnectionState::Disconnected,
            (Some(_), false) => ConnectionState::Connecting,
            (Some(_), true) => ConnectionState::Connected,
        }
    }

    /// Observe open/closed transitions. Bounded; the oldest observer is evicted.
    pub fn add_connection_state_handler(&self, handler: ConnectionStateHandler) {
        let max = self.shared.config.max_connection_state_handlers.max(1);
        let mut state = self.shared.lock();
        if state.state_handlers.contains(&handler) {
            return;
        }
        state.state_handlers.push(handler);
        while state.state_handlers.len() > max {
            let evicted = state.state_handlers.remove(0);
            warn!(handler = %evicted.id(), max, "connection state handler limit reached, evicting oldest");
        }
    }

    pub fn remove_connection_state_handler(&self, handler: &ConnectionStateHandler) {
        self.shared
            .lock()
            .state_handlers
            .retain(|h| h != handler);
    }

    pub fn connection_state_handler_count(&self) -> usize {
        self.shared.lock().state_handlers.len()
    }

    /// Subjects with at least one handler.
    pub fn subjects(&self) -> Vec<String> {
        self.shared.lock().handlers.keys().cloned().collect()
    }

    pub fn handler_count(&self, subject: &str) -> usize {
        self.shared
            .lock()
            .handlers
            .get(subject)
            .map_or(0, Vec::len)
    }

    pub fn total_handler_count(&self) -> usize {
        self.shared.lock().total_handlers()
    }

    pub fn registrations(&self, subject: &str) -> Vec<HandlerRegistration> {
        self.shared
            .lock()
            .handlers
            .get(subject)
            .cloned()
            .unwrap_or_default()
    }

    /// Channel of the current connection, if any.
    pub fn active_channel(&self) -> Option<Channel> {
        self.shared
            .lock()
            .connection
            .as_ref()
            .map(|active| active.channel.clone())
    }

    /// Endpoint URL of the current connection, if any.
    pub fn active_url(&self) -> Option<String> {
        self.shared
            .lock()
            .connection
            .as_ref()
            .map(|active| active.url.clone())
    }

    pub fn has_pending_disconnect(&self) -> bool {
        self.shared.lock().pending_disconnect.is_some()
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn register_handlers(
        &self,
        subject: &str,
        handlers: &[EventHandler],
        correlation_id: Option<&str>,
    ) {
        if subject.is_empty() {
            error!(error = %RelayError::EmptySubject, "register_handlers ignored");
            return;
        }
        let max = self.config.max_handlers_per_subject.max(1);
        let mut state = self.lock();
        if !handlers.is_empty() {
            state.cancel_pending_disconnect();
        }

        let list = state.handlers.entry(subject.to_string()).or_default();
        for handler in handlers {
            if let Some(existing) = list.iter_mut().find(|reg| &reg.handler == handler) {
                if let Some(cid) = correlation_id {
                    existing.correlation_id = Some(cid.to_string());
                }
                continue;
            }
            list.push(HandlerRegistration::new(
                subject,
                handler.clone(),
                correlation_id.map(str::to_string),
            ));
            if list.len() > max {
                let evicted = list.remove(0);
                warn!(
                    subject = %subject,
                    handler = %evicted.handler.id(),
                    max,
                    "handler limit reached, evicting oldest"
                );
            }
        }
        let count = list.len();
        if count == 0 {
            state.handlers.remove(subject);
        }
        debug!(subject = %subject, count, "handlers registered");
    }

    /// Start the debounce timer. Returns the detached connection when no
    /// runtime is available and the disconnect must happen right away.
    fn schedule_disconnect(
        self: &Arc<Self>,
        state: &mut State,
    ) -> Option<Option<ActiveConnection>> {
        state.cancel_pending_disconnect();
        let delay = self.config.disconnect_delay;
        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                warn!("no async runtime for delayed disconnect, disconnecting now");
                return Some(state.detach());
            }
        };

        state.timer_seq += 1;
        let seq = state.timer_seq;
        let weak = Arc::downgrade(self);
        let task = handle.spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(shared) = weak.upgrade() {
                shared.disconnect_if_idle(seq);
            }
        });
        state.pending_disconnect = Some(PendingDisconnect { seq, task });
        debug!(delay_ms = delay.as_millis() as u64, "disconnect scheduled");
        None
    }

    fn disconnect_if_idle(&self, seq: u64) {
        let detached = {
            let mut state = self.lock();
            match &state.pending_disconnect {
                Some(pending) if pending.seq == seq => {}
                _ => return,
            }
            state.pending_disconnect = None;
            if state.total_handlers() > 0 {
                return;
            }
            state.detach()
        };
        if detached.is_some() {
            info!("no handlers left, closing connection");
        }
        self.finish_disconnect(detached);
    }

    /// Close a detached connection and tell observers.
    fn finish_disconnect(&self, detached: Option<ActiveConnection>) {
        let Some(active) = detached else {
            return;
        };
        active.conn.close();
        info!(channel = %active.channel, "disconnected");
        self.notify_state(false);
    }

    fn open_channel(self: &Arc<Self>, channel: Channel, url: String) {
        let (old, generation) = {
            let mut state = self.lock();
            let old = state.detach();
            (old, state.generation)
        };
        if let Some(old) = old {
            debug!(from = %old.channel, to = %channel, "switching channel");
            self.finish_disconnect(Some(old));
        }

        info!(channel = %channel, url = %url, "opening connection");
        let listener = TransportListener::new(Arc::downgrade(self), generation);
        let conn = self.transport.open(&url, listener);

        let mut state = self.lock();
        if state.generation != generation || state.connection.is_some() {
            drop(state);
            debug!(channel = %channel, "connection superseded before it was stored");
            conn.close();
            return;
        }
        state.connection = Some(ActiveConnection { channel, url, conn });
    }

    fn endpoint_url(&self, url: &str, channel: &Channel) -> Result<String, RelayError> {
        let base = match Url::parse(url) {
            Ok(absolute) => absolute,
            Err(url::ParseError::RelativeUrlWithoutBase) => Url::parse(&self.config.base_url)
                .map_err(|source| RelayError::InvalidUrl {
                    url: self.config.base_url.clone(),
                    source,
                })?,
            Err(source) => {
                return Err(RelayError::InvalidUrl {
                    url: url.to_string(),
                    source,
                })
            }
        };
        base.join(&channel.path())
            .map(String::from)
            .map_err(|source| RelayError::InvalidUrl {
                url: url.to_string(),
                source,
            })
    }

    pub(crate) fn is_current(&self, generation: u64) -> bool {
        self.lock().generation == generation
    }

    pub(crate) fn handle_open(&self, generation: u64) {
        {
            let mut state = self.lock();
            if state.generation != generation || state.open {
                return;
            }
            state.open = true;
        }
        info!("event stream open");
        self.notify_state(true);
    }

    pub(crate) fn handle_error(&self, generation: u64, reason: &str) {
        let was_open = {
            let mut state = self.lock();
            if state.generation != generation {
                return;
            }
            std::mem::replace(&mut state.open, false)
        };
        warn!(error = %reason, "event stream error");
        if was_open {
            self.notify_state(false);
        }
    }

    pub(crate) fn handle_message(&self, generation: u64, data: &str) {
        let event = match RelayEvent::from_json(data) {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %RelayError::MalformedEvent(e), "dropping event");
                return;
            }
        };

        let targets: Vec<HandlerRegistration> = {
            let state = self.lock();
            if state.generation != generation {
                return;
            }
            match event.subject() {
                Some(subject) => match state.handlers.get(subject) {
                    Some(list) => list.clone(),
                    None => {
                        debug!(subject = %subject, event_type = event.type_name(), "no handlers for subject");
                        return;
                    }
                },
                None => {
                    warn!(
                        event_type = event.type_name(),
                        subjects = state.handlers.len(),
                        "event has no projectId, broadcasting to all handlers"
                    );
                    state.handlers.values().flatten().cloned().collect()
                }
            }
        };

        for reg in &targets {
            if let Err(panic) = reg.handler.call(&event) {
                error!(
                    subject = %reg.subject,
                    handler = %reg.handler.id(),
                    error = %panic,
                    "event handler failed"
                );
            }
        }
    }

    fn notify_state(&self, connected: bool) {
        let observers = self.lock().state_handlers.clone();
        for observer in &observers {
            if let Err(panic) = observer.call(connected) {
                error!(handler = %observer.id(), error = %panic, "connection state handler failed");
            }
        }
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        state.cancel_pending_disconnect();
        if let Some(active) = state.connection.take() {
            active.conn.close();
        }
    }
}
