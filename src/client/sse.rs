//! SSE transport over HTTP (reqwest + eventsource-stream).
//!
//! Behaves like a browser `EventSource`: network failures and a clean end of
//! stream are retried after a fixed delay (or the server's `retry:` value),
//! `Last-Event-ID` is resent on reconnect, and a non-success HTTP status is
//! terminal. Only unnamed (`message`) events are delivered.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use eventsource_stream::Eventsource;
use futures::StreamExt;
use reqwest::header::{ACCEPT, CACHE_CONTROL};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use super::transport::{Connection, Transport, TransportListener};
use crate::config::RelayConfig;
use crate::error::RelayError;

const LAST_EVENT_ID: &str = "last-event-id";

/// Opens SSE streams with `reqwest`.
#[derive(Clone)]
pub struct SseTransport {
    client: reqwest::Client,
    reconnect_delay: Duration,
}

impl SseTransport {
    pub fn new(reconnect_delay: Duration) -> Self {
        Self::with_client(reqwest::Client::new(), reconnect_delay)
    }

    /// Uses the reconnect delay from the store's configuration.
    pub fn from_config(config: &RelayConfig) -> Self {
        Self::new(config.reconnect_delay)
    }

    pub fn with_client(client: reqwest::Client, reconnect_delay: Duration) -> Self {
        Self {
            client,
            reconnect_delay,
        }
    }
}

impl Transport for SseTransport {
    fn open(&self, url: &str, listener: TransportListener) -> Box<dyn Connection> {
        let open = Arc::new(AtomicBool::new(false));
        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                error!(url = %url, "no async runtime, event stream not started");
                return Box::new(SseConnection { open, task: None });
            }
        };

        let stream = StreamLoop {
            client: self.client.clone(),
            url: url.to_string(),
            listener,
            open: open.clone(),
            delay: self.reconnect_delay,
            last_event_id: None,
        };
        let task = handle.spawn(stream.run());
        Box::new(SseConnection {
            open,
            task: Some(task),
        })
    }
}

/// Handle to a running stream task.
pub struct SseConnection {
    open: Arc<AtomicBool>,
    task: Option<JoinHandle<()>>,
}

impl Connection for SseConnection {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
        if let Some(task) = &self.task {
            task.abort();
        }
    }
}

impl Drop for SseConnection {
    fn drop(&mut self) {
        self.close();
    }
}

struct StreamLoop {
    client: reqwest::Client,
    url: String,
    listener: TransportListener,
    open: Arc<AtomicBool>,
    delay: Duration,
    last_event_id: Option<String>,
}

impl StreamLoop {
    async fn run(mut self) {
        loop {
            let result = self.stream_once().await;
            self.open.store(false, Ordering::SeqCst);

            let terminal = matches!(result, Err(RelayError::UnexpectedStatus(_)));
            let reason = match result {
                Ok(()) => "stream ended".to_string(),
                Err(e) => e.to_string(),
            };
            self.listener.on_error(&reason);

            if terminal {
                error!(url = %self.url, error = %reason, "event stream failed, not reconnecting");
                return;
            }
            if !self.listener.is_current() {
                return;
            }
            debug!(url = %self.url, delay_ms = self.delay.as_millis() as u64, "reconnecting event stream");
            tokio::time::sleep(self.delay).await;
        }
    }

    async fn stream_once(&mut self) -> Result<(), RelayError> {
        let mut request = self
            .client
            .get(&self.url)
            .header(ACCEPT, "text/event-stream")
            .header(CACHE_CONTROL, "no-cache");
        if let Some(id) = &self.last_event_id {
            request = request.header(LAST_EVENT_ID, id.as_str());
        }

        let response = request
            .send()
            .await
            .map_err(|e| RelayError::Transport(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(RelayError::UnexpectedStatus(status.as_u16()));
        }

        self.open.store(true, Ordering::SeqCst);
        self.listener.on_open();

        let mut events = Box::pin(response.bytes_stream().eventsource());
        while let Some(item) = events.next().await {
            let event = item.map_err(|e| RelayError::Transport(e.to_string()))?;
            if let Some(retry) = event.retry {
                self.delay = retry;
            }
            if !event.id.is_empty() {
                self.last_event_id = Some(event.id.clone());
            }
            if !event.event.is_empty() && event.event != "message" {
                debug!(event = %event.event, "ignoring named event");
                continue;
            }
            if event.data.is_empty() {
                continue;
            }
            self.listener.on_message(&event.data);
        }
        warn!(url = %self.url, "event stream closed by server");
        Ok(())
    }
}
