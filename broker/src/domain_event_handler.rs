use crate::message::{Event, EventType, Target};
use crate::Manager;
use async_trait::async_trait;
use events::{DomainEvent, EventHandler};
use log::*;
use serde_json::{json, Value};
use std::sync::Arc;

/// Context key clients set to the list they are viewing.
pub const LIST_CONTEXT_KEY: &str = "listId";

/// Handles domain events by converting them to broker events and publishing
/// them through the fan-out exchange.
///
/// List-level changes go to the users named in the event. Item changes go to
/// every session currently viewing the list, whoever owns it.
pub struct StreamEventHandler {
    manager: Arc<Manager>,
}

impl StreamEventHandler {
    pub fn new(manager: Arc<Manager>) -> Self {
        Self { manager }
    }

    fn to_event(event: &DomainEvent) -> crate::error::Result<Event> {
        let list_id = event.list_id().to_string();
        let viewers = || Target::context(LIST_CONTEXT_KEY, list_id.clone());

        match event {
            DomainEvent::ListUpdated {
                list,
                notify_user_ids,
                ..
            } => Event::new(
                EventType::LIST_UPDATED,
                &json!({ "listId": list_id, "list": list }),
                Target::users(notify_user_ids.iter().map(|id| id.to_string())),
            ),
            DomainEvent::ListItemsAdded { items, .. } => Event::new(
                EventType::LIST_ITEMS_ADDED,
                &items_payload(&list_id, items),
                viewers(),
            ),
            DomainEvent::ListItemsUpdated { items, .. } => Event::new(
                EventType::LIST_ITEMS_UPDATED,
                &items_payload(&list_id, items),
                viewers(),
            ),
            DomainEvent::ListItemsRemoved { item_ids, .. } => Event::new(
                EventType::LIST_ITEMS_REMOVED,
                &json!({ "listId": list_id, "itemIds": item_ids }),
                viewers(),
            ),
        }
    }
}

fn items_payload(list_id: &str, items: &Value) -> Value {
    json!({ "listId": list_id, "items": items })
}

#[async_trait]
impl EventHandler for StreamEventHandler {
    async fn handle(&self, event: &DomainEvent) {
        let event = match Self::to_event(event) {
            Ok(event) => event,
            Err(e) => {
                error!("Failed to build stream event for list {}: {e}", event.list_id());
                return;
            }
        };

        debug!("Publishing {} event", event.event_type);
        if let Err(e) = self.manager.publish(event).await {
            warn!("Stream event was not published: {e}");
        }
    }
}
