//! SSE HTTP handler for the web layer.
//!
//! This module contains only the Axum handler for the SSE endpoint. Session
//! bookkeeping and the response stream live in the `broker` crate.

pub mod handler;

use broker::message::SessionContext;
use serde_json::Value;
use std::collections::HashMap;

/// Every query parameter not consumed by the handler becomes session context,
/// e.g. `?listId=...` scopes delivery to that list.
pub(crate) fn session_context(params: HashMap<String, String>) -> SessionContext {
    params
        .into_iter()
        .map(|(key, value)| (key, Value::String(value)))
        .collect()
}
