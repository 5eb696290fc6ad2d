//! Redis pub/sub for relaying channel events between server instances.

use crate::error::AppError;
use redis::AsyncCommands;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use futures::StreamExt;

const CHANNEL_PREFIX: &str = "relay:events:";

fn channel_key(channel: &str) -> String {
    format!("{}{}", CHANNEL_PREFIX, channel)
}

/// Redis-backed event bus: `PUBLISH` to fan out, one subscription per channel.
#[derive(Clone)]
pub struct RedisRepository {
    client: Arc<redis::Client>,
}

impl RedisRepository {
    /// Create repository from Redis URL. No connection is made until first use.
    pub fn new(redis_url: &str) -> Result<Self, AppError> {
        let client = redis::Client::open(redis_url)?;
        Ok(Self {
            client: Arc::new(client),
        })
    }

    /// Get a multiplexed connection for commands.
    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection, AppError> {
        let conn = self.client.get_multiplexed_async_connection().await?;
        Ok(conn)
    }

    /// Publish a serialized event to a channel. Returns the number of Redis
    /// subscribers (server instances) that received it.
    pub async fn publish(&self, channel: &str, message: &str) -> Result<u64, AppError> {
        let mut conn = self.connection().await?;
        let key = channel_key(channel);
        let count: u64 = conn.publish(&key, message).await?;
        debug!(channel = %channel, count, "published");
        Ok(count)
    }

    /// Subscribe to a channel. Messages arrive on the returned receiver until
    /// it is dropped, which also ends the Redis subscription.
    pub async fn subscribe_to_channel(
        &self,
        channel: &str,
    ) -> Result<mpsc::UnboundedReceiver<String>, AppError> {
        let conn = self.client.get_async_connection().await?;
        let mut pubsub = conn.into_pubsub();
        let key = channel_key(channel);
        pubsub.subscribe(&key).await?;
        info!(channel = %channel, "subscribed to redis channel");

        let (tx, rx) = mpsc::unbounded_channel();
        let channel = channel.to_string();

        tokio::spawn(async move {
            let mut stream = pubsub.into_on_message();
            while let Some(msg) = stream.next().await {
                match msg.get_payload::<String>() {
                    Ok(payload) => {
                        if tx.send(payload).is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!(channel = %channel, error = %e, "bad redis payload"),
                }
            }
            debug!(channel = %channel, "redis subscription ended");
        });

        Ok(rx)
    }
}
