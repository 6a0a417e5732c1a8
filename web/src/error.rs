use std::error::Error as StdError;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use broker::error::{AuthenticationErrorKind, Error as BrokerError, ErrorKind};
use log::*;

pub type Result<T> = core::result::Result<T, Error>;

#[derive(Debug)]
pub struct Error(BrokerError);

impl StdError for Error {}

impl std::fmt::Display for Error {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> core::result::Result<(), std::fmt::Error> {
        write!(fmt, "{}", self.0)
    }
}

// List of possible StatusCode variants https://docs.rs/http/latest/http/status/struct.StatusCode.html
impl IntoResponse for Error {
    fn into_response(self) -> Response {
        match self.0.error_kind {
            ErrorKind::Authentication(authentication_error_kind) => {
                match authentication_error_kind {
                    AuthenticationErrorKind::MissingTicket => {
                        (StatusCode::BAD_REQUEST, "BAD REQUEST").into_response()
                    }
                    AuthenticationErrorKind::NotFound => {
                        (StatusCode::UNAUTHORIZED, "UNAUTHORIZED").into_response()
                    }
                }
            }
            ErrorKind::FanoutUnavailable => {
                warn!("Responding 503: {}", self.0);
                (StatusCode::SERVICE_UNAVAILABLE, "SERVICE UNAVAILABLE").into_response()
            }
            ErrorKind::Store
            | ErrorKind::Transport
            | ErrorKind::Backpressure
            | ErrorKind::Serialization => {
                error!("Responding 500: {}", self.0);
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL SERVER ERROR").into_response()
            }
        }
    }
}

impl<E> From<E> for Error
where
    E: Into<BrokerError>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}
