//! Fan-out transport: replicates published events to every instance.
//!
//! Publishing only ever goes to the external exchange. Each instance runs one
//! supervised consumer that reads every message back from its own subscription
//! and dispatches it to the local registry, so local and remote events share a
//! single delivery path.

pub mod backoff;
pub mod memory;
pub mod redis;

use crate::error::Result;
use crate::message::Event;
use crate::registry::RegistryHandle;
use async_trait::async_trait;
use backoff::Backoff;
use futures::{Stream, StreamExt};
use log::*;
use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Stream of raw messages read from this instance's subscription. It ends when
/// the subscription is lost.
pub type Subscription = Pin<Box<dyn Stream<Item = Vec<u8>> + Send>>;

/// An external publish/subscribe exchange where every subscriber receives
/// every message.
#[async_trait]
pub trait FanoutBackend: Send + Sync {
    /// Publishes one serialized event. Must be safe to call concurrently.
    async fn publish(&self, payload: Vec<u8>) -> Result<()>;

    /// Opens a new exclusive subscription bound to the shared exchange.
    async fn subscribe(&self) -> Result<Subscription>;

    fn name(&self) -> &'static str;
}

/// Connection state of this instance's fan-out consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Connected,
    Reconnecting { attempt: u32 },
    /// The configured attempt limit was exhausted. Never reached with the
    /// default unbounded retry.
    Failed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Reconnecting { attempt } => write!(f, "reconnecting (attempt {attempt})"),
            ConnectionState::Failed => write!(f, "failed"),
        }
    }
}

/// Supervised consumer loop: subscribe, dispatch every message to the local
/// registry, and re-subscribe with backoff whenever the subscription is lost.
pub struct Consumer {
    backend: Arc<dyn FanoutBackend>,
    registry: RegistryHandle,
    backoff: Backoff,
    state: watch::Sender<ConnectionState>,
}

impl Consumer {
    pub fn spawn(
        backend: Arc<dyn FanoutBackend>,
        registry: RegistryHandle,
        backoff: Backoff,
    ) -> (watch::Receiver<ConnectionState>, JoinHandle<()>) {
        let (state, state_rx) = watch::channel(ConnectionState::Connecting);
        let consumer = Consumer {
            backend,
            registry,
            backoff,
            state,
        };
        (state_rx, tokio::spawn(consumer.run()))
    }

    async fn run(self) {
        let name = self.backend.name();
        let mut attempt = 0u32;
        loop {
            match self.backend.subscribe().await {
                Ok(subscription) => {
                    attempt = 0;
                    self.state.send_replace(ConnectionState::Connected);
                    info!("Subscribed to {name} fan-out exchange");
                    self.consume(subscription).await;
                    error!(
                        "Lost {name} fan-out subscription; events will not reach local sessions until it is re-established"
                    );
                }
                Err(e) => error!("Could not subscribe to {name} fan-out exchange: {e}"),
            }

            attempt += 1;
            if self.backoff.exhausted(attempt) {
                self.state.send_replace(ConnectionState::Failed);
                error!("Giving up on {name} fan-out exchange after {attempt} attempt(s)");
                return;
            }
            self.state
                .send_replace(ConnectionState::Reconnecting { attempt });
            let delay = self.backoff.delay(attempt);
            warn!("Retrying {name} fan-out subscription in {delay:?} (attempt {attempt})");
            tokio::time::sleep(delay).await;
        }
    }

    async fn consume(&self, mut subscription: Subscription) {
        while let Some(payload) = subscription.next().await {
            match Event::from_slice(&payload) {
                Ok(event) => self.registry.dispatch(event),
                Err(e) => warn!("Skipping malformed fan-out message: {e}"),
            }
        }
    }
}
