//! Single-task session registry.
//!
//! One tokio task owns the session map and processes commands from a single
//! channel, so joins, leaves and dispatches are strictly ordered and the map is
//! never touched concurrently. Callers only ever hold a [`RegistryHandle`].

use crate::message::Event;
use crate::session::{Frame, Session, SessionId};
use log::*;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// What the registry does when a matching session's outbound queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackpressurePolicy {
    /// Skip this frame for the saturated session and keep dispatching.
    Drop,
    /// Unregister the saturated session, closing its queue.
    Close,
}

impl Default for BackpressurePolicy {
    fn default() -> Self {
        BackpressurePolicy::Drop
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct BackpressurePolicyParseError;

impl FromStr for BackpressurePolicy {
    type Err = BackpressurePolicyParseError;
    fn from_str(policy: &str) -> Result<BackpressurePolicy, Self::Err> {
        match policy.to_lowercase().as_str() {
            "drop" => Ok(BackpressurePolicy::Drop),
            "close" => Ok(BackpressurePolicy::Close),
            _ => Err(BackpressurePolicyParseError),
        }
    }
}

impl fmt::Display for BackpressurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            BackpressurePolicy::Drop => write!(f, "drop"),
            BackpressurePolicy::Close => write!(f, "close"),
        }
    }
}

enum Command {
    Join(Session, Option<oneshot::Sender<bool>>),
    Leave(SessionId),
    Dispatch(Arc<Event>),
    Count(oneshot::Sender<usize>),
    Shutdown,
}

/// Cloneable handle used to talk to the registry task. Every method only
/// enqueues a command and never blocks.
#[derive(Clone)]
pub struct RegistryHandle {
    commands: UnboundedSender<Command>,
}

impl RegistryHandle {
    /// Registers a session. It becomes visible to every dispatch enqueued after
    /// this call.
    pub fn join(&self, session: Session) {
        self.send(Command::Join(session, None));
    }

    /// Like [`RegistryHandle::join`], but waits for the registry to accept the
    /// session. Returns false when the id is already taken or the registry has
    /// stopped; the rejected session is dropped, closing its queue.
    pub async fn register(&self, session: Session) -> bool {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Join(session, Some(tx)));
        rx.await.unwrap_or(false)
    }

    /// Unregisters a session and closes its outbound queue. Leaving a session
    /// that is not registered is a no-op.
    pub fn leave(&self, session_id: &SessionId) {
        self.send(Command::Leave(session_id.clone()));
    }

    /// Delivers `event` to every matching session registered on this instance.
    pub fn dispatch(&self, event: Event) {
        self.send(Command::Dispatch(Arc::new(event)));
    }

    /// Number of registered sessions once every previously enqueued command has
    /// been processed. Returns 0 if the registry has stopped.
    pub async fn session_count(&self) -> usize {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Count(tx));
        rx.await.unwrap_or(0)
    }

    /// Closes every session and stops the registry task.
    pub fn shutdown(&self) {
        self.send(Command::Shutdown);
    }

    fn send(&self, command: Command) {
        if self.commands.send(command).is_err() {
            warn!("Session registry has stopped; command ignored");
        }
    }
}

/// Owns the live sessions. Only ever accessed from its own task.
pub struct Registry {
    sessions: HashMap<SessionId, Session>,
    policy: BackpressurePolicy,
}

impl Registry {
    /// Spawns the registry task and returns a handle to it.
    pub fn spawn(policy: BackpressurePolicy) -> (RegistryHandle, JoinHandle<()>) {
        let (commands, receiver) = mpsc::unbounded_channel();
        let registry = Registry {
            sessions: HashMap::new(),
            policy,
        };
        let task = tokio::spawn(registry.run(receiver));
        (RegistryHandle { commands }, task)
    }

    async fn run(mut self, mut commands: UnboundedReceiver<Command>) {
        debug!("Session registry started with {} backpressure policy", self.policy);
        while let Some(command) = commands.recv().await {
            match command {
                Command::Join(session, ack) => {
                    let accepted = self.join(session);
                    if let Some(ack) = ack {
                        let _ = ack.send(accepted);
                    }
                }
                Command::Leave(session_id) => self.leave(&session_id),
                Command::Dispatch(event) => self.dispatch(&event),
                Command::Count(reply) => {
                    let _ = reply.send(self.sessions.len());
                }
                Command::Shutdown => break,
            }
        }
        info!(
            "Session registry stopping, closing {} session(s)",
            self.sessions.len()
        );
        self.sessions.clear();
    }

    fn join(&mut self, session: Session) -> bool {
        if self.sessions.contains_key(session.id()) {
            warn!(
                "Rejecting session {}: a session with that id is already registered",
                session.id()
            );
            return false;
        }
        debug!(
            "Session {} joined for user {}",
            session.id(),
            session.user_id()
        );
        self.sessions.insert(session.id().clone(), session);
        info!("Session added. {} registered session(s)", self.sessions.len());
        true
    }

    fn leave(&mut self, session_id: &SessionId) {
        if self.sessions.remove(session_id).is_some() {
            info!(
                "Session {} removed. {} registered session(s)",
                session_id,
                self.sessions.len()
            );
        }
    }

    fn dispatch(&mut self, event: &Event) {
        let frame: Frame = match event.client_frame() {
            Ok(frame) => Arc::from(frame),
            Err(e) => {
                error!("Failed to serialize {} event: {e}", event.event_type);
                return;
            }
        };

        let mut delivered = 0usize;
        let mut evicted = Vec::new();
        for (session_id, session) in self.sessions.iter() {
            if !event.target.matches(session.user_id(), session.context()) {
                continue;
            }
            match session.sender().try_send(frame.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => match self.policy {
                    BackpressurePolicy::Drop => warn!(
                        "Outbound queue full for session {session_id}; dropping {} event",
                        event.event_type
                    ),
                    BackpressurePolicy::Close => {
                        warn!("Outbound queue full for session {session_id}; closing session");
                        evicted.push(session_id.clone());
                    }
                },
                Err(TrySendError::Closed(_)) => {
                    debug!("Session {session_id} writer is gone; unregistering");
                    evicted.push(session_id.clone());
                }
            }
        }

        for session_id in evicted {
            self.leave(&session_id);
        }
        trace!(
            "Dispatched {} event to {delivered} session(s)",
            event.event_type
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{EventType, SessionContext, Target};
    use crate::session::Outbound;
    use serde_json::json;

    fn session(user_id: &str, list_id: &str, capacity: usize) -> (Session, Outbound) {
        let mut context = SessionContext::new();
        context.insert("listId".to_string(), json!(list_id));
        Session::new(user_id.to_string(), context, capacity)
    }

    fn list_event(list_id: &str) -> Event {
        Event::new(
            EventType::LIST_ITEMS_ADDED,
            &json!({"listId": list_id}),
            Target::context("listId", list_id),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_dispatch_delivers_exactly_one_copy_to_matching_sessions() {
        let (registry, _task) = Registry::spawn(BackpressurePolicy::Drop);
        let (s1, mut o1) = session("u1", "L1", 8);
        let (s2, mut o2) = session("u2", "L2", 8);
        registry.join(s1);
        registry.join(s2);

        registry.dispatch(list_event("L1"));
        assert_eq!(registry.session_count().await, 2);

        let frame = o1.recv().await.unwrap();
        assert!(frame.contains("LIST_ITEMS_ADDED"));
        assert!(o1.try_recv().is_err());
        assert!(o2.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_leave_closes_queue_and_stops_delivery() {
        let (registry, _task) = Registry::spawn(BackpressurePolicy::Drop);
        let (s1, mut o1) = session("u1", "L1", 8);
        let id = s1.id().clone();
        registry.join(s1);
        registry.leave(&id);
        registry.dispatch(list_event("L1"));

        assert_eq!(registry.session_count().await, 0);
        assert!(o1.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_leave_is_idempotent() {
        let (registry, _task) = Registry::spawn(BackpressurePolicy::Drop);
        let (s1, _o1) = session("u1", "L1", 8);
        let id = s1.id().clone();
        registry.join(s1);
        registry.leave(&id);
        registry.leave(&id);
        registry.leave(&SessionId::new());

        assert_eq!(registry.session_count().await, 0);
    }

    #[tokio::test]
    async fn test_duplicate_session_id_is_rejected() {
        let (registry, _task) = Registry::spawn(BackpressurePolicy::Drop);
        let id = SessionId::new();
        let (first, mut first_out) =
            Session::with_id(id.clone(), "u1".to_string(), SessionContext::new(), 4);
        let (second, mut second_out) =
            Session::with_id(id.clone(), "u2".to_string(), SessionContext::new(), 4);
        registry.join(first);
        registry.join(second);
        registry.dispatch(
            Event::new(EventType::LIST_UPDATED, &json!({}), Target::Broadcast).unwrap(),
        );

        assert_eq!(registry.session_count().await, 1);
        assert!(first_out.recv().await.is_some());
        assert!(second_out.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_register_reports_rejected_duplicate() {
        let (registry, _task) = Registry::spawn(BackpressurePolicy::Drop);
        let id = SessionId::new();
        let (first, mut first_out) =
            Session::with_id(id.clone(), "u1".to_string(), SessionContext::new(), 4);
        let (second, mut second_out) =
            Session::with_id(id.clone(), "u2".to_string(), SessionContext::new(), 4);

        assert!(registry.register(first).await);
        assert!(!registry.register(second).await);
        assert!(second_out.recv().await.is_none());

        // The original session stays registered and keeps receiving events.
        registry.dispatch(
            Event::new(EventType::LIST_UPDATED, &json!({}), Target::Broadcast).unwrap(),
        );
        assert_eq!(registry.session_count().await, 1);
        assert!(first_out.recv().await.is_some());
    }

    #[tokio::test]
    async fn test_register_fails_once_registry_has_stopped() {
        let (registry, task) = Registry::spawn(BackpressurePolicy::Drop);
        registry.shutdown();
        task.await.unwrap();

        let (s1, _o1) = session("u1", "L1", 8);
        assert!(!registry.register(s1).await);
    }

    #[tokio::test]
    async fn test_drop_policy_skips_only_the_saturated_session() {
        let (registry, _task) = Registry::spawn(BackpressurePolicy::Drop);
        let (slow, mut slow_out) = session("slow", "L1", 1);
        let (fast, mut fast_out) = session("fast", "L1", 8);
        registry.join(slow);
        registry.join(fast);

        registry.dispatch(list_event("L1"));
        registry.dispatch(list_event("L1"));
        assert_eq!(registry.session_count().await, 2);

        assert!(fast_out.recv().await.is_some());
        assert!(fast_out.recv().await.is_some());
        assert!(slow_out.recv().await.is_some());
        assert!(slow_out.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_close_policy_unregisters_the_saturated_session() {
        let (registry, _task) = Registry::spawn(BackpressurePolicy::Close);
        let (slow, mut slow_out) = session("slow", "L1", 1);
        let (fast, mut fast_out) = session("fast", "L1", 8);
        registry.join(slow);
        registry.join(fast);

        registry.dispatch(list_event("L1"));
        registry.dispatch(list_event("L1"));
        assert_eq!(registry.session_count().await, 1);

        assert!(slow_out.recv().await.is_some());
        assert!(slow_out.recv().await.is_none());
        assert!(fast_out.recv().await.is_some());
        assert!(fast_out.recv().await.is_some());
    }

    #[tokio::test]
    async fn test_closed_writer_is_unregistered_on_dispatch() {
        let (registry, _task) = Registry::spawn(BackpressurePolicy::Drop);
        let (s1, o1) = session("u1", "L1", 8);
        registry.join(s1);
        drop(o1);

        registry.dispatch(list_event("L1"));
        assert_eq!(registry.session_count().await, 0);
    }

    #[tokio::test]
    async fn test_shutdown_closes_every_session() {
        let (registry, task) = Registry::spawn(BackpressurePolicy::Drop);
        let (s1, mut o1) = session("u1", "L1", 8);
        let (s2, mut o2) = session("u2", "L2", 8);
        registry.join(s1);
        registry.join(s2);
        registry.shutdown();
        task.await.unwrap();

        assert!(o1.recv().await.is_none());
        assert!(o2.recv().await.is_none());
        assert_eq!(registry.session_count().await, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_join_dispatch_leave_stress() {
        let (registry, _task) = Registry::spawn(BackpressurePolicy::Drop);

        let mut workers = Vec::new();
        for n in 0..200 {
            let registry = registry.clone();
            workers.push(tokio::spawn(async move {
                let list_id = format!("L{n}");
                let (s, mut outbound) = session(&format!("u{n}"), &list_id, 4);
                let id = s.id().clone();
                registry.join(s);
                registry.dispatch(list_event(&list_id));
                registry.leave(&id);

                let mut received = 0;
                while let Some(frame) = outbound.recv().await {
                    assert!(frame.contains(&list_id));
                    received += 1;
                }
                received
            }));
        }

        for worker in workers {
            // Commands from one task are processed in order, so each session sees
            // its own event exactly once before its queue closes.
            assert_eq!(worker.await.unwrap(), 1);
        }
        assert_eq!(registry.session_count().await, 0);
    }

    #[test]
    fn test_backpressure_policy_parsing() {
        assert_eq!("DROP".parse(), Ok(BackpressurePolicy::Drop));
        assert_eq!("close".parse(), Ok(BackpressurePolicy::Close));
        assert_eq!(
            "block".parse::<BackpressurePolicy>(),
            Err(BackpressurePolicyParseError)
        );
        assert_eq!(BackpressurePolicy::default(), BackpressurePolicy::Drop);
    }
}
