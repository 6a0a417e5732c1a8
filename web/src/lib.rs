use axum::http::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use axum::http::{HeaderValue, Method};
use broker::Manager;
use log::*;
use service::AppState;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;

mod controller;
mod error;
mod extractors;
mod middleware;
pub mod router;
mod sse;
mod ws;

pub use error::{Error, Result};

pub async fn init_server(app_state: AppState) -> std::io::Result<()> {
    let interface = app_state
        .config
        .interface
        .clone()
        .unwrap_or_else(|| "127.0.0.1".to_string());
    let host = format!("{interface}:{}", app_state.config.port);

    info!(
        "Server starting... listening for connections on http://{host} ({} environment)",
        app_state.config.runtime_env()
    );

    let cors_layer = cors_layer(&app_state.config.allowed_origins);
    let broker = Arc::clone(&app_state.broker);
    let router = router::define_routes(app_state).layer(cors_layer);

    let listener = TcpListener::bind(&host).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal(broker))
        .await
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("Ignoring invalid CORS origin {origin:?}");
                None
            }
        })
        .collect();
    debug!("CORS allowed origins: {origins:?}");

    CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_credentials(true)
        .allow_headers([AUTHORIZATION, ACCEPT, CONTENT_TYPE])
        .allow_origin(origins)
}

/// Resolves on Ctrl-C after closing every session, so open streams end and
/// the server can drain.
async fn shutdown_signal(broker: Arc<Manager>) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {e}");
    }
    info!("Shutdown signal received, closing streaming sessions");
    broker.shutdown();
}
