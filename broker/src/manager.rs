use crate::error::{Error, ErrorKind, Result};
use crate::fanout::backoff::Backoff;
use crate::fanout::{ConnectionState, Consumer, FanoutBackend};
use crate::message::{Event, SessionContext, UserId};
use crate::registry::{BackpressurePolicy, Registry, RegistryHandle};
use crate::session::{Outbound, Session, SessionId};
use log::*;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

pub const DEFAULT_SESSION_QUEUE_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub struct BrokerSettings {
    /// Bound on each session's outbound queue.
    pub session_queue_capacity: usize,
    pub backpressure: BackpressurePolicy,
    /// Retry schedule for the fan-out subscription.
    pub backoff: Backoff,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            session_queue_capacity: DEFAULT_SESSION_QUEUE_CAPACITY,
            backpressure: BackpressurePolicy::default(),
            backoff: Backoff::default(),
        }
    }
}

/// The local broker: entry point for publishing events and for sessions to
/// join and leave. Events are only ever published to the fan-out exchange;
/// this instance's consumer feeds them back into the local registry.
pub struct Manager {
    registry: RegistryHandle,
    fanout: Arc<dyn FanoutBackend>,
    fanout_state: watch::Receiver<ConnectionState>,
    session_queue_capacity: usize,
    registry_task: JoinHandle<()>,
    consumer_task: JoinHandle<()>,
}

impl Manager {
    /// Spawns the registry and the fan-out consumer. Must be called from within
    /// a tokio runtime.
    pub fn start(fanout: Arc<dyn FanoutBackend>, settings: BrokerSettings) -> Self {
        let (registry, registry_task) = Registry::spawn(settings.backpressure);
        let (fanout_state, consumer_task) =
            Consumer::spawn(fanout.clone(), registry.clone(), settings.backoff);
        info!(
            "Started broker with {} fan-out, queue capacity {}, {} backpressure policy",
            fanout.name(),
            settings.session_queue_capacity,
            settings.backpressure
        );

        Self {
            registry,
            fanout,
            fanout_state,
            session_queue_capacity: settings.session_queue_capacity,
            registry_task,
            consumer_task,
        }
    }

    /// Builds a session with this broker's queue capacity. The session is not
    /// registered until it is passed to [`Manager::join`].
    pub fn new_session(&self, user_id: UserId, context: SessionContext) -> (Session, Outbound) {
        Session::new(user_id, context, self.session_queue_capacity)
    }

    /// Register a session
    pub fn join(&self, session: Session) {
        self.registry.join(session);
    }

    /// Register a session and wait until the registry has accepted it. A
    /// connection must not take ownership of a session id the registry
    /// rejected, or tearing it down would unregister the session holding it.
    pub async fn register(&self, session: Session) -> Result<()> {
        let session_id = session.id().clone();
        if self.registry.register(session).await {
            Ok(())
        } else {
            Err(Error::with_source(
                ErrorKind::Transport,
                format!("session {session_id} was not registered"),
            ))
        }
    }

    /// Unregister a session by ID
    pub fn leave(&self, session_id: &SessionId) {
        self.registry.leave(session_id);
    }

    /// Publish an event to every matching session on every instance.
    ///
    /// Only failure to reach the fan-out exchange is reported. While this
    /// instance's own subscription is down the event still reaches other
    /// instances, but not sessions connected here.
    pub async fn publish(&self, event: Event) -> Result<()> {
        let state = *self.fanout_state.borrow();
        if state != ConnectionState::Connected {
            warn!(
                "Fan-out consumer is {state}; {} event will not reach sessions on this instance",
                event.event_type
            );
        }

        let payload = event.to_bytes().map_err(|e| {
            error!("Failed to serialize {} event: {e}", event.event_type);
            e
        })?;

        self.fanout.publish(payload).await.map_err(|e| {
            if e.error_kind == ErrorKind::FanoutUnavailable {
                error!(
                    "Failed to publish {} event to {} fan-out exchange: {e}",
                    event.event_type,
                    self.fanout.name()
                );
            }
            e
        })
    }

    pub fn fanout_state(&self) -> ConnectionState {
        *self.fanout_state.borrow()
    }

    /// Watch channel that changes whenever the fan-out connection state does.
    pub fn fanout_state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.fanout_state.clone()
    }

    pub async fn session_count(&self) -> usize {
        self.registry.session_count().await
    }

    pub fn registry(&self) -> RegistryHandle {
        self.registry.clone()
    }

    /// Closes every session and stops consuming from the fan-out exchange.
    pub fn shutdown(&self) {
        info!("Shutting down broker");
        self.consumer_task.abort();
        self.registry.shutdown();
    }

    pub fn is_finished(&self) -> bool {
        self.registry_task.is_finished() && self.consumer_task.is_finished()
    }
}
