use crate::{
    controller::{health_check_controller, ticket_controller},
    middleware::identity::lift_identity,
    sse, ws,
};
use axum::{
    middleware::from_fn_with_state,
    routing::{get, post},
    Router,
};
use service::AppState;

pub fn define_routes(app_state: AppState) -> Router {
    Router::new()
        .merge(health_routes(app_state.clone()))
        .merge(ticket_routes(app_state.clone()))
        .merge(sse_routes(app_state.clone()))
        .merge(ws_routes(app_state.clone()))
        .layer(from_fn_with_state(app_state, lift_identity))
}

fn health_routes(app_state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check_controller::health_check))
        .with_state(app_state)
}

fn ticket_routes(app_state: AppState) -> Router {
    Router::new()
        .route("/sse/ticket", post(ticket_controller::create))
        .with_state(app_state)
}

fn sse_routes(app_state: AppState) -> Router {
    Router::new()
        .route("/sse", get(sse::handler::sse_handler))
        .with_state(app_state)
}

fn ws_routes(app_state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws::handler::ws_handler))
        .with_state(app_state)
}
