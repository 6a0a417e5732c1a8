use crate::error::Result;
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use serde_json::Value;
use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap};
use std::fmt;

// Type alias for user IDs (web layer converts domain ids to String)
pub type UserId = String;

/// Arbitrary key/value context attached to a session when it connects, used to
/// scope delivery (e.g. `{"listId": "..."}` for the list a client is viewing).
pub type SessionContext = HashMap<String, Value>;

/// Event type tag carried alongside every payload. Consumers decide how to
/// decode the payload from this tag alone.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventType(Cow<'static, str>);

impl EventType {
    pub const LIST_UPDATED: EventType = EventType(Cow::Borrowed("LIST_UPDATED"));
    pub const LIST_ITEMS_ADDED: EventType = EventType(Cow::Borrowed("LIST_ITEMS_ADDED"));
    pub const LIST_ITEMS_UPDATED: EventType = EventType(Cow::Borrowed("LIST_ITEMS_UPDATED"));
    pub const LIST_ITEMS_REMOVED: EventType = EventType(Cow::Borrowed("LIST_ITEMS_REMOVED"));

    pub fn new(name: impl Into<String>) -> Self {
        Self(Cow::Owned(name.into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Which sessions an event is delivered to. Targets are plain data so they
/// survive the trip through the fan-out exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Target {
    /// Every session owned by one of these users.
    Users { user_ids: Vec<UserId> },
    /// Every session whose context contains all of these key/value pairs.
    Context { matches: BTreeMap<String, Value> },
    /// Every connected session.
    Broadcast,
}

impl Target {
    pub fn users<I, U>(user_ids: I) -> Self
    where
        I: IntoIterator<Item = U>,
        U: Into<UserId>,
    {
        Target::Users {
            user_ids: user_ids.into_iter().map(Into::into).collect(),
        }
    }

    /// Sessions whose context has `key` equal to `value`.
    pub fn context(key: impl Into<String>, value: impl Into<Value>) -> Self {
        let mut matches = BTreeMap::new();
        matches.insert(key.into(), value.into());
        Target::Context { matches }
    }

    pub fn matches(&self, user_id: &str, context: &SessionContext) -> bool {
        match self {
            Target::Users { user_ids } => user_ids.iter().any(|id| id == user_id),
            Target::Context { matches } => matches
                .iter()
                .all(|(key, expected)| context.get(key) == Some(expected)),
            Target::Broadcast => true,
        }
    }
}

/// A published unit of interest: a type tag, an opaque JSON payload and a
/// delivery target. This is also the wire format on the fan-out exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub event_type: EventType,
    pub data: Box<RawValue>,
    pub target: Target,
}

/// What a connected client receives for each event.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ClientFrame<'a> {
    event_type: &'a EventType,
    event_data: &'a RawValue,
}

impl Event {
    pub fn new<T: Serialize>(event_type: EventType, payload: &T, target: Target) -> Result<Self> {
        Ok(Self {
            event_type,
            data: serde_json::value::to_raw_value(payload)?,
            target,
        })
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Serializes the client-facing frame, without the target.
    pub fn client_frame(&self) -> Result<String> {
        Ok(serde_json::to_string(&ClientFrame {
            event_type: &self.event_type,
            event_data: &self.data,
        })?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn context(pairs: &[(&str, Value)]) -> SessionContext {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_users_target_matches_only_listed_users() {
        let target = Target::users(["alice", "bob"]);
        assert!(target.matches("alice", &SessionContext::new()));
        assert!(target.matches("bob", &SessionContext::new()));
        assert!(!target.matches("carol", &SessionContext::new()));
    }

    #[test]
    fn test_context_target_requires_every_pair() {
        let mut matches = BTreeMap::new();
        matches.insert("listId".to_string(), json!("L1"));
        matches.insert("mode".to_string(), json!("edit"));
        let target = Target::Context { matches };

        let full = context(&[("listId", json!("L1")), ("mode", json!("edit"))]);
        let partial = context(&[("listId", json!("L1"))]);
        let other = context(&[("listId", json!("L2")), ("mode", json!("edit"))]);

        assert!(target.matches("anyone", &full));
        assert!(!target.matches("anyone", &partial));
        assert!(!target.matches("anyone", &other));
    }

    #[test]
    fn test_broadcast_matches_everyone() {
        assert!(Target::Broadcast.matches("anyone", &SessionContext::new()));
    }

    #[test]
    fn test_client_frame_shape() {
        let event = Event::new(
            EventType::LIST_ITEMS_ADDED,
            &json!({"items": [{"name": "milk"}]}),
            Target::context("listId", "L1"),
        )
        .unwrap();

        let frame: Value = serde_json::from_str(&event.client_frame().unwrap()).unwrap();
        assert_eq!(
            frame,
            json!({"eventType": "LIST_ITEMS_ADDED", "eventData": {"items": [{"name": "milk"}]}})
        );
    }

    #[test]
    fn test_wire_format_keeps_target_and_payload_opaque() {
        let event = Event::new(
            EventType::new("CUSTOM"),
            &json!([1, 2, 3]),
            Target::users(["u1"]),
        )
        .unwrap();

        let wire: Value = serde_json::from_slice(&event.to_bytes().unwrap()).unwrap();
        assert_eq!(wire["event_type"], json!("CUSTOM"));
        assert_eq!(wire["data"], json!([1, 2, 3]));
        assert_eq!(wire["target"], json!({"kind": "users", "user_ids": ["u1"]}));

        let decoded = Event::from_slice(&event.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded.event_type.as_str(), "CUSTOM");
        assert_eq!(decoded.data.get(), "[1,2,3]");
    }

    #[test]
    fn test_malformed_wire_bytes_are_rejected() {
        assert!(Event::from_slice(b"{\"event_type\": 1}").is_err());
    }
}
