use super::LeaveOnDrop;
use crate::registry::RegistryHandle;
use crate::session::{Outbound, SessionId};
use async_stream::stream;
use axum::response::sse::{Event, KeepAlive};
use futures::Stream;
use std::convert::Infallible;
use std::time::Duration;

pub const DEFAULT_KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// Turns a session's outbound queue into an SSE body. Each frame becomes one
/// `data:` event.
///
/// The stream ends when the registry closes the queue. When the client goes
/// away axum drops the stream instead, and the drop guard unregisters the
/// session.
pub fn event_stream(
    registry: RegistryHandle,
    session_id: SessionId,
    mut outbound: Outbound,
) -> impl Stream<Item = Result<Event, Infallible>> {
    let guard = LeaveOnDrop::new(registry, session_id);
    stream! {
        let _guard = guard;
        while let Some(frame) = outbound.recv().await {
            yield Ok(Event::default().data(&*frame));
        }
    }
}

/// SSE has no transport-level ping, so liveness is a periodic comment line.
pub fn keep_alive(interval: Duration) -> KeepAlive {
    KeepAlive::new().interval(interval).text("ping")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Event as BrokerEvent, EventType, SessionContext, Target};
    use crate::registry::{BackpressurePolicy, Registry};
    use crate::session::Session;
    use futures::StreamExt;
    use serde_json::json;

    #[tokio::test]
    async fn test_stream_yields_frames_and_ends_on_leave() {
        let (registry, _task) = Registry::spawn(BackpressurePolicy::Drop);
        let (session, outbound) = Session::new("u1".to_string(), SessionContext::new(), 8);
        let id = session.id().clone();
        registry.join(session);

        let stream = event_stream(registry.clone(), id.clone(), outbound);
        futures::pin_mut!(stream);

        registry.dispatch(
            BrokerEvent::new(EventType::LIST_UPDATED, &json!({}), Target::Broadcast).unwrap(),
        );
        assert!(stream.next().await.is_some());

        registry.leave(&id);
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_dropping_stream_unregisters_session() {
        let (registry, _task) = Registry::spawn(BackpressurePolicy::Drop);
        let (session, outbound) = Session::new("u1".to_string(), SessionContext::new(), 8);
        let id = session.id().clone();
        registry.join(session);
        assert_eq!(registry.session_count().await, 1);

        let stream = event_stream(registry.clone(), id, outbound);
        drop(stream);

        assert_eq!(registry.session_count().await, 0);
    }
}
