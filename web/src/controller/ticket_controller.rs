use crate::controller::ApiResponse;
use crate::extractors::authenticated_user::AuthenticatedUser;
use crate::Result;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use log::*;
use service::AppState;

/// POST issue a short-lived ticket for opening an SSE stream.
///
/// Browsers cannot attach an `Authorization` header to an `EventSource`, so
/// the client trades its identity for a ticket here and passes it as the
/// `ticket` query parameter on `/sse`.
pub async fn create(
    AuthenticatedUser(user_id): AuthenticatedUser,
    State(app_state): State<AppState>,
) -> Result<impl IntoResponse> {
    debug!("POST stream ticket for user {user_id}");

    let ticket = app_state.tickets.issue(&user_id).await?;

    Ok(Json(ApiResponse::new(StatusCode::OK.into(), ticket)))
}
