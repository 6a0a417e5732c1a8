use crate::sse::session_context;
use crate::Result;
use axum::extract::{Query, State};
use axum::response::sse::Sse;
use axum::response::IntoResponse;
use broker::connection::sse::{event_stream, keep_alive};
use log::*;
use service::AppState;
use std::collections::HashMap;

/// SSE handler that establishes a long-lived connection for real-time updates.
///
/// `EventSource` cannot send an `Authorization` header, so the caller proves
/// its identity with a ticket from `POST /sse/ticket`. The remaining query
/// parameters become the session context.
pub(crate) async fn sse_handler(
    State(app_state): State<AppState>,
    Query(mut params): Query<HashMap<String, String>>,
) -> Result<impl IntoResponse> {
    let ticket = params.remove("ticket").unwrap_or_default();
    let user_id = app_state.tickets.redeem(&ticket).await?;

    let (session, outbound) = app_state
        .broker
        .new_session(user_id, session_context(params));
    let session_id = session.id().clone();
    debug!(
        "Establishing SSE session {session_id} for user {}",
        session.user_id()
    );
    app_state.broker.register(session).await?;

    let stream = event_stream(app_state.broker.registry(), session_id, outbound);

    // Sse sets `Content-Type: text/event-stream` and `Cache-Control: no-cache`.
    Ok(Sse::new(stream).keep_alive(keep_alive(app_state.config.sse_keepalive())))
}
