//! In-process fan-out exchange.
//!
//! Every subscriber gets its own receiver on a shared broadcast channel, which
//! mirrors one exclusive queue per instance bound to a fanout exchange. Cloning
//! the exchange and handing it to several managers simulates several instances.

use super::{FanoutBackend, Subscription};
use crate::error::Result;
use async_stream::stream;
use async_trait::async_trait;
use log::*;
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};

#[derive(Clone)]
pub struct InMemoryFanout {
    exchange: broadcast::Sender<Arc<[u8]>>,
}

impl InMemoryFanout {
    /// `capacity` bounds how far a slow subscriber can lag before it starts
    /// losing messages.
    pub fn new(capacity: usize) -> Self {
        let (exchange, _) = broadcast::channel(capacity.max(1));
        Self { exchange }
    }
}

impl Default for InMemoryFanout {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[async_trait]
impl FanoutBackend for InMemoryFanout {
    async fn publish(&self, payload: Vec<u8>) -> Result<()> {
        // No subscribers is not an error: the exchange simply has no bound queues.
        let _ = self.exchange.send(Arc::from(payload));
        Ok(())
    }

    async fn subscribe(&self) -> Result<Subscription> {
        let mut receiver = self.exchange.subscribe();
        Ok(Box::pin(stream! {
            loop {
                match receiver.recv().await {
                    Ok(payload) => yield payload.to_vec(),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("In-memory fan-out subscriber lagged; {skipped} message(s) lost");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }))
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

/// A backend that is never reachable. Used to exercise reconnect handling.
#[cfg(test)]
pub(crate) struct UnreachableFanout;

#[cfg(test)]
#[async_trait]
impl FanoutBackend for UnreachableFanout {
    async fn publish(&self, _payload: Vec<u8>) -> Result<()> {
        Err(crate::error::Error::fanout_unavailable("exchange unreachable"))
    }

    async fn subscribe(&self) -> Result<Subscription> {
        Err(crate::error::Error::fanout_unavailable("exchange unreachable"))
    }

    fn name(&self) -> &'static str {
        "unreachable"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn test_every_subscriber_receives_every_message() {
        let exchange = InMemoryFanout::new(8);
        let mut a = exchange.subscribe().await.unwrap();
        let mut b = exchange.subscribe().await.unwrap();

        exchange.publish(b"one".to_vec()).await.unwrap();

        assert_eq!(a.next().await.unwrap(), b"one".to_vec());
        assert_eq!(b.next().await.unwrap(), b"one".to_vec());
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_succeeds() {
        let exchange = InMemoryFanout::new(8);
        assert!(exchange.publish(b"nobody".to_vec()).await.is_ok());
    }
}
