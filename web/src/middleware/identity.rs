use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use broker::message::UserId;
use log::*;
use service::AppState;

/// Identity of the caller as verified by the upstream gateway.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Identity(pub UserId);

/// Lifts the configured identity header into the request extensions.
///
/// This service trusts the gateway in front of it to authenticate callers and
/// set the header. Requests without it continue unauthenticated; handlers that
/// need an identity use the `AuthenticatedUser` extractor to reject them.
pub(crate) async fn lift_identity(
    State(app_state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let identity = request
        .headers()
        .get(app_state.config.identity_header.as_str())
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(|value| Identity(value.to_string()));

    match identity {
        Some(identity) => {
            trace!("Request identified as user {}", identity.0);
            request.extensions_mut().insert(identity);
        }
        None => trace!("Request carries no identity"),
    }

    next.run(request).await
}
