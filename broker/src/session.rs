use crate::message::{SessionContext, UserId};
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc::{self, Receiver, Sender};

/// A serialized client frame. Shared between every session an event is
/// delivered to.
pub type Frame = Arc<str>;

/// Receiving half of a session's outbound queue, owned by the session's writer.
pub type Outbound = Receiver<Frame>;

/// Unique identifier for a session (server-generated)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionId(String);

impl SessionId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Registration record for one live connection.
///
/// The registry holds the only sending half of the outbound queue, so removing
/// the session from the registry is what closes the queue and stops the writer.
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    user_id: UserId,
    context: SessionContext,
    sender: Sender<Frame>,
}

impl Session {
    /// Creates a session with a bounded outbound queue of `capacity` frames and
    /// returns the queue's receiving half for the session's writer.
    pub fn new(user_id: UserId, context: SessionContext, capacity: usize) -> (Self, Outbound) {
        Self::with_id(SessionId::new(), user_id, context, capacity)
    }

    pub fn with_id(
        id: SessionId,
        user_id: UserId,
        context: SessionContext,
        capacity: usize,
    ) -> (Self, Outbound) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (
            Self {
                id,
                user_id,
                context,
                sender,
            },
            receiver,
        )
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    pub fn context(&self) -> &SessionContext {
        &self.context
    }

    pub(crate) fn sender(&self) -> &Sender<Frame> {
        &self.sender
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_ids_are_unique() {
        assert_ne!(SessionId::new(), SessionId::new());
    }

    #[tokio::test]
    async fn test_dropping_session_closes_outbound_queue() {
        let (session, mut outbound) = Session::new("u1".to_string(), SessionContext::new(), 4);
        session.sender().try_send(Arc::from("hello")).unwrap();
        drop(session);

        assert_eq!(outbound.recv().await.as_deref(), Some("hello"));
        assert!(outbound.recv().await.is_none());
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let (session, _outbound) = Session::new("u1".to_string(), SessionContext::new(), 0);
        assert_eq!(session.sender().max_capacity(), 1);
    }
}
