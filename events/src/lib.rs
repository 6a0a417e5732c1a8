//! Event system infrastructure for the shopping list backend.
//!
//! This crate provides the event system that decouples list/item operations
//! from the real-time delivery layer.
//!
//! # Architecture
//!
//! - **DomainEvent**: Enum representing all business events in the system
//! - **EventHandler**: Trait for implementing event handlers
//! - **EventPublisher**: Publishes events to registered handlers
//!
//! This crate has no dependencies on internal crates, avoiding circular
//! dependencies. Entity data is carried as serialized JSON values.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

/// A type alias that represents any Entity's internal id field data type.
pub type Id = Uuid;

/// Domain events that represent business-level changes to lists and their items.
/// These events are emitted when a list operation completes successfully.
///
/// Entity data is carried as `serde_json::Value` so this crate stays free of
/// entity definitions.
#[derive(Debug, Clone)]
pub enum DomainEvent {
    /// Emitted when a list's own attributes (name, sharing, etc.) change.
    ListUpdated {
        list_id: Id,
        /// Complete serialized list.
        list: Value,
        /// Members of the list who should hear about the change, whether or not
        /// they are currently viewing it.
        notify_user_ids: Vec<Id>,
    },
    /// Emitted when one or more items are added to a list.
    ListItemsAdded { list_id: Id, items: Value },
    /// Emitted when one or more items on a list are modified.
    ListItemsUpdated { list_id: Id, items: Value },
    /// Emitted when items are removed from a list. Only ids are carried since the
    /// items no longer exist.
    ListItemsRemoved { list_id: Id, item_ids: Vec<Id> },
}

impl DomainEvent {
    /// The list this event belongs to.
    pub fn list_id(&self) -> Id {
        match self {
            DomainEvent::ListUpdated { list_id, .. }
            | DomainEvent::ListItemsAdded { list_id, .. }
            | DomainEvent::ListItemsUpdated { list_id, .. }
            | DomainEvent::ListItemsRemoved { list_id, .. } => *list_id,
        }
    }
}

/// Trait for handling domain events.
/// Implementations can perform side effects like pushing real-time
/// notifications, updating caches, logging, etc.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &DomainEvent);
}

/// Publishes domain events to registered handlers.
/// Handlers are called sequentially in registration order.
#[derive(Clone)]
pub struct EventPublisher {
    handlers: Arc<Vec<Arc<dyn EventHandler>>>,
}

impl EventPublisher {
    pub fn new() -> Self {
        Self {
            handlers: Arc::new(Vec::new()),
        }
    }

    /// Register a new event handler.
    /// Note: This creates a new publisher instance with the additional handler.
    /// Store the returned publisher in your application state.
    pub fn with_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        let mut handlers = (*self.handlers).clone();
        handlers.push(handler);
        self.handlers = Arc::new(handlers);
        self
    }

    /// Publish an event to all registered handlers.
    /// Handlers are called sequentially and are responsible for logging their
    /// own failures.
    pub async fn publish(&self, event: DomainEvent) {
        for handler in self.handlers.iter() {
            handler.handle(&event).await;
        }
    }
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct RecordingHandler {
        seen: Mutex<Vec<Id>>,
    }

    #[async_trait]
    impl EventHandler for RecordingHandler {
        async fn handle(&self, event: &DomainEvent) {
            self.seen.lock().await.push(event.list_id());
        }
    }

    #[tokio::test]
    async fn test_publish_reaches_every_registered_handler() {
        let first = Arc::new(RecordingHandler::default());
        let second = Arc::new(RecordingHandler::default());
        let publisher = EventPublisher::new()
            .with_handler(first.clone())
            .with_handler(second.clone());

        let list_id = Id::new_v4();
        publisher
            .publish(DomainEvent::ListItemsRemoved {
                list_id,
                item_ids: vec![Id::new_v4()],
            })
            .await;

        assert_eq!(*first.seen.lock().await, vec![list_id]);
        assert_eq!(*second.seen.lock().await, vec![list_id]);
    }

    #[tokio::test]
    async fn test_with_handler_leaves_original_publisher_untouched() {
        let recorder = Arc::new(RecordingHandler::default());
        let original = EventPublisher::new();
        let extended = original.clone().with_handler(recorder.clone());

        let removed = |list_id| DomainEvent::ListItemsRemoved {
            list_id,
            item_ids: Vec::new(),
        };
        let (first, second) = (Id::new_v4(), Id::new_v4());
        original.publish(removed(first)).await;
        extended.publish(removed(second)).await;

        assert_eq!(*recorder.seen.lock().await, vec![second]);
    }
}
