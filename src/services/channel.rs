//! Channel fan-out: one broadcast sender per channel, optionally fed by Redis.

use crate::error::AppResult;
use crate::models::channel::Channel;
use crate::models::event::RelayEvent;
use crate::repositories::RedisRepository;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

struct ChannelEntry {
    tx: broadcast::Sender<String>,
    /// Redis → local forwarder, present only with a Redis backend.
    forwarder: Option<JoinHandle<()>>,
}

/// Manages channel subscriptions for the SSE endpoint.
///
/// Without Redis, publishing sends straight to local subscribers. With Redis,
/// publishing goes through Redis and each channel holds one Redis
/// subscription that feeds its local subscribers, so every server instance
/// sees every event.
#[derive(Clone)]
pub struct ChannelService {
    repo: Option<Arc<RedisRepository>>,
    capacity: usize,
    channels: Arc<RwLock<HashMap<String, ChannelEntry>>>,
}

impl ChannelService {
    pub fn new(repo: Option<Arc<RedisRepository>>, capacity: usize) -> Self {
        Self {
            repo,
            capacity: capacity.max(1),
            channels: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// In-process only.
    pub fn local(capacity: usize) -> Self {
        Self::new(None, capacity)
    }

    /// Get a receiver for the channel, creating the channel on first use.
    pub async fn subscribe(&self, channel: &Channel) -> AppResult<broadcast::Receiver<String>> {
        let name = channel.to_string();
        if let Some(entry) = self.channels.read().await.get(&name) {
            return Ok(entry.tx.subscribe());
        }

        // Subscribe upstream without holding the map lock.
        let feed = match &self.repo {
            Some(repo) => Some(repo.subscribe_to_channel(&name).await?),
            None => None,
        };
        Ok(self.attach(name, feed).await)
    }

    /// Insert the channel unless a concurrent subscriber got there first, in
    /// which case its entry wins and `feed` is dropped.
    async fn attach(
        &self,
        name: String,
        feed: Option<mpsc::UnboundedReceiver<String>>,
    ) -> broadcast::Receiver<String> {
        let mut channels = self.channels.write().await;
        if let Some(entry) = channels.get(&name) {
            return entry.tx.subscribe();
        }

        let (tx, rx) = broadcast::channel(self.capacity);
        let forwarder = feed.map(|feed| self.spawn_forwarder(name.clone(), tx.clone(), feed));
        channels.insert(name.clone(), ChannelEntry { tx, forwarder });
        debug!(channel = %name, "channel created");
        rx
    }

    /// Copy upstream messages to local subscribers. When the upstream feed
    /// ends the channel is dropped, which closes every local stream on it.
    fn spawn_forwarder(
        &self,
        name: String,
        tx: broadcast::Sender<String>,
        mut feed: mpsc::UnboundedReceiver<String>,
    ) -> JoinHandle<()> {
        let channels = self.channels.clone();
        tokio::spawn(async move {
            while let Some(msg) = feed.recv().await {
                let _ = tx.send(msg);
            }

            let mut channels = channels.write().await;
            if channels
                .get(&name)
                .is_some_and(|entry| entry.tx.same_channel(&tx))
            {
                channels.remove(&name);
                warn!(channel = %name, "upstream subscription ended, channel dropped");
            }
        })
    }

    /// Publish an event to a channel. Returns the number of local subscribers
    /// reached, or with Redis the number of server instances reached.
    pub async fn publish(&self, channel: &Channel, event: &RelayEvent) -> AppResult<u64> {
        let name = channel.to_string();
        let payload = serde_json::to_string(event)?;
        let count = match &self.repo {
            Some(repo) => repo.publish(&name, &payload).await?,
            None => {
                let channels = self.channels.read().await;
                channels
                    .get(&name)
                    .and_then(|entry| entry.tx.send(payload).ok())
                    .unwrap_or(0) as u64
            }
        };
        info!(channel = %name, event_type = event.type_name(), count, "published");
        Ok(count)
    }

    /// Drop the channel if nobody is listening any more.
    pub async fn release(&self, channel: &Channel) {
        let name = channel.to_string();
        let mut channels = self.channels.write().await;
        let idle = channels
            .get(&name)
            .is_some_and(|entry| entry.tx.receiver_count() == 0);
        if idle {
            if let Some(entry) = channels.remove(&name) {
                if let Some(forwarder) = entry.forwarder {
                    forwarder.abort();
                }
            }
            debug!(channel = %name, "channel released");
        }
    }

    /// Local subscribers currently attached to the channel.
    pub async fn subscriber_count(&self, channel: &Channel) -> usize {
        self.channels
            .read()
            .await
            .get(&channel.to_string())
            .map_or(0, |entry| entry.tx.receiver_count())
    }

    pub async fn channel_count(&self) -> usize {
        self.channels.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::channel::ChannelKind;
    use crate::models::event::EventKind;

    #[tokio::test]
    async fn publish_reaches_local_subscribers() {
        let svc = ChannelService::local(8);
        let ch = Channel::new(ChannelKind::Project, "p1");
        let mut a = svc.subscribe(&ch).await.unwrap();
        let mut b = svc.subscribe(&ch).await.unwrap();
        assert_eq!(svc.channel_count().await, 1);

        let ev = RelayEvent::for_subject("p1", EventKind::Heartbeat);
        assert_eq!(svc.publish(&ch, &ev).await.unwrap(), 2);

        let got: RelayEvent = serde_json::from_str(&a.recv().await.unwrap()).unwrap();
        assert_eq!(got, ev);
        assert!(b.recv().await.is_ok());
    }

    #[tokio::test]
    async fn publish_without_subscribers_reaches_nobody() {
        let svc = ChannelService::local(8);
        let ch = Channel::new(ChannelKind::File, "f1");
        let ev = RelayEvent::new(EventKind::Heartbeat);
        assert_eq!(svc.publish(&ch, &ev).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn release_only_when_idle() {
        let svc = ChannelService::local(8);
        let ch = Channel::new(ChannelKind::Project, "p1");
        let rx = svc.subscribe(&ch).await.unwrap();
        svc.release(&ch).await;
        assert_eq!(svc.subscriber_count(&ch).await, 1);

        drop(rx);
        svc.release(&ch).await;
        assert_eq!(svc.channel_count().await, 0);
    }

    #[tokio::test]
    async fn concurrent_create_keeps_first_entry() {
        let svc = ChannelService::local(8);
        let ch = Channel::new(ChannelKind::Project, "p1");
        let mut first = svc.attach(ch.to_string(), None).await;

        let (late_tx, late_feed) = mpsc::unbounded_channel();
        let mut second = svc.attach(ch.to_string(), Some(late_feed)).await;
        assert_eq!(svc.channel_count().await, 1);
        assert!(late_tx.is_closed());

        let ev = RelayEvent::for_subject("p1", EventKind::Heartbeat);
        assert_eq!(svc.publish(&ch, &ev).await.unwrap(), 2);
        assert!(first.recv().await.is_ok());
        assert!(second.recv().await.is_ok());
    }

    #[tokio::test]
    async fn ended_upstream_drops_channel() {
        let svc = ChannelService::local(8);
        let ch = Channel::new(ChannelKind::File, "f1");
        let (upstream, feed) = mpsc::unbounded_channel();
        let mut rx = svc.attach(ch.to_string(), Some(feed)).await;

        upstream.send("hello".to_string()).unwrap();
        assert_eq!(rx.recv().await.unwrap(), "hello");

        drop(upstream);
        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Closed)
        ));
        assert_eq!(svc.channel_count().await, 0);

        // The next subscriber starts a fresh channel.
        let _again = svc.subscribe(&ch).await.unwrap();
        assert_eq!(svc.subscriber_count(&ch).await, 1);
    }
}
