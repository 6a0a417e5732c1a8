use crate::extractors::authenticated_user::AuthenticatedUser;
use crate::sse::session_context;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Query, State};
use axum::response::Response;
use broker::connection::ws;
use log::*;
use service::AppState;
use std::collections::HashMap;

/// Upgrades to a WebSocket that streams events to the authenticated user.
/// Query parameters become the session context.
pub(crate) async fn ws_handler(
    AuthenticatedUser(user_id): AuthenticatedUser,
    State(app_state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
    upgrade: WebSocketUpgrade,
) -> Response {
    let settings = app_state.config.ws_settings();
    let (session, outbound) = app_state
        .broker
        .new_session(user_id, session_context(params));

    upgrade
        .max_message_size(settings.max_message_size)
        .on_upgrade(move |socket| async move {
            let session_id = session.id().clone();
            debug!(
                "Establishing WebSocket session {session_id} for user {}",
                session.user_id()
            );
            if let Err(e) = app_state.broker.register(session).await {
                warn!("Closing WebSocket session {session_id}: {e}");
                return;
            }
            ws::serve(
                socket,
                app_state.broker.registry(),
                session_id,
                outbound,
                settings,
            )
            .await;
        })
}
