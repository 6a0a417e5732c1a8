use crate::controller::ApiResponse;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use broker::fanout::ConnectionState;
use serde::Serialize;
use service::AppState;

#[derive(Debug, Serialize)]
pub(crate) struct Health {
    fanout: String,
    sessions: usize,
}

/// GET health of this instance: the fan-out connection state and how many
/// sessions are connected here. Responds 503 while the fan-out consumer is
/// not connected.
pub async fn health_check(State(app_state): State<AppState>) -> impl IntoResponse {
    let fanout = app_state.broker.fanout_state();
    let health = Health {
        fanout: fanout.to_string(),
        sessions: app_state.broker.session_count().await,
    };

    let status_code = if fanout == ConnectionState::Connected {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status_code,
        Json(ApiResponse::new(status_code.into(), health)),
    )
}
