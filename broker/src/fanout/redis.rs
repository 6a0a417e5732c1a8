//! Redis pub/sub fan-out exchange.
//!
//! A Redis channel behaves like a fanout exchange: every subscribed connection
//! receives every message, and a subscription lives exactly as long as the
//! connection that holds it, the same lifetime as an exclusive auto-delete
//! queue bound for the life of the process.
//!
//! A half-open connection never ends a pub/sub stream on its own, so each
//! subscription also listens on a private heartbeat channel and publishes to
//! it periodically. When nothing at all arrives for several heartbeat
//! intervals the subscription is treated as lost.

use super::{FanoutBackend, Subscription};
use crate::error::{Error, Result};
use async_stream::stream;
use async_trait::async_trait;
use futures::{Future, Stream, StreamExt};
use log::*;
use redis::aio::ConnectionManager;
use redis::Client;
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Heartbeat intervals without any message before a subscription is dropped.
const MISSED_HEARTBEATS: u32 = 3;

#[derive(Clone)]
pub struct RedisFanout {
    client: Client,
    // Multiplexed and safe to clone per publish; reconnects on its own.
    publisher: ConnectionManager,
    channel: String,
    heartbeat_interval: Duration,
}

impl RedisFanout {
    pub fn new(client: Client, publisher: ConnectionManager, channel: impl Into<String>) -> Self {
        Self {
            client,
            publisher,
            channel: channel.into(),
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
        }
    }
}

#[async_trait]
impl FanoutBackend for RedisFanout {
    async fn publish(&self, payload: Vec<u8>) -> Result<()> {
        let mut conn = self.publisher.clone();
        redis::cmd("PUBLISH")
            .arg(&self.channel)
            .arg(payload)
            .query_async::<_, i64>(&mut conn)
            .await
            .map_err(Error::fanout_unavailable)?;
        Ok(())
    }

    async fn subscribe(&self) -> Result<Subscription> {
        let heartbeat_channel = format!("{}.heartbeat.{}", self.channel, Uuid::new_v4());

        // Pub/sub needs a dedicated connection; it cannot share the multiplexed one.
        let connection = self
            .client
            .get_async_connection()
            .await
            .map_err(Error::fanout_unavailable)?;
        let mut pubsub = connection.into_pubsub();
        pubsub
            .subscribe(&self.channel)
            .await
            .map_err(Error::fanout_unavailable)?;
        pubsub
            .subscribe(&heartbeat_channel)
            .await
            .map_err(Error::fanout_unavailable)?;

        let messages = pubsub
            .into_on_message()
            .map(|msg| (msg.get_channel_name().to_string(), msg.get_payload_bytes().to_vec()));

        let publisher = self.publisher.clone();
        let beat = move || {
            let mut conn = publisher.clone();
            let channel = heartbeat_channel.clone();
            async move {
                if let Err(e) = redis::cmd("PUBLISH")
                    .arg(&channel)
                    .arg("ping")
                    .query_async::<_, i64>(&mut conn)
                    .await
                {
                    warn!("Failed to publish fan-out heartbeat: {e}");
                }
            }
        };

        Ok(Box::pin(watch_liveness(
            messages,
            self.channel.clone(),
            self.heartbeat_interval,
            beat,
        )))
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}

/// Yields payloads published on `channel` and calls `beat` every `interval`.
/// `beat` is expected to cause a message on the same connection. The stream
/// ends when the connection closes or goes silent for `MISSED_HEARTBEATS`
/// intervals.
fn watch_liveness<S, B, F>(
    messages: S,
    channel: String,
    interval: Duration,
    mut beat: B,
) -> impl Stream<Item = Vec<u8>> + Send
where
    S: Stream<Item = (String, Vec<u8>)> + Send + 'static,
    B: FnMut() -> F + Send + 'static,
    F: Future<Output = ()> + Send,
{
    stream! {
        let mut messages = Box::pin(messages);
        let mut ticker = tokio::time::interval(interval);
        let mut last_seen = Instant::now();

        loop {
            let next = tokio::select! {
                message = messages.next() => Some(message),
                _ = ticker.tick() => None,
            };

            match next {
                Some(Some((from, payload))) => {
                    last_seen = Instant::now();
                    if from == channel {
                        yield payload;
                    }
                }
                Some(None) => break,
                None => {
                    if last_seen.elapsed() > interval * MISSED_HEARTBEATS {
                        warn!(
                            "No fan-out traffic or heartbeat for {:?}; dropping subscription",
                            last_seen.elapsed()
                        );
                        break;
                    }
                    beat().await;
                }
            }
        }
    }
}
