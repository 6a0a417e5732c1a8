use crate::extractors::RejectionType;
use crate::middleware::identity::Identity;
use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
};
use broker::message::UserId;

pub(crate) struct AuthenticatedUser(pub UserId);

#[async_trait]
impl<S> FromRequestParts<S> for AuthenticatedUser
where
    S: Send + Sync,
{
    type Rejection = RejectionType;

    // Reads the identity the identity middleware lifted out of the request
    // headers. Requests that arrive without one are rejected as Unauthorized.
    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        match parts.extensions.get::<Identity>() {
            Some(Identity(user_id)) => Ok(AuthenticatedUser(user_id.clone())),
            None => Err((StatusCode::UNAUTHORIZED, "Unauthorized".to_string())),
        }
    }
}
