//! Error types for the `broker` crate.
//!
//! Follows the same shape as the other layers: a root `Error` struct holding an
//! error kind tree and an optional source for error chaining.

use std::error::Error as StdError;
use std::fmt;

pub type Result<T> = core::result::Result<T, Error>;

/// Top-level error type for the broker crate.
#[derive(Debug)]
pub struct Error {
    pub source: Option<Box<dyn StdError + Send + Sync>>,
    pub error_kind: ErrorKind,
}

/// Major categories of errors in the broker.
#[derive(Debug, PartialEq)]
pub enum ErrorKind {
    /// Read, write or upgrade failure on a single session's transport.
    Transport,
    /// The streaming client could not prove its identity.
    Authentication(AuthenticationErrorKind),
    /// The external fan-out exchange could not be reached.
    FanoutUnavailable,
    /// A session's outbound queue was full.
    Backpressure,
    /// The ephemeral ticket store could not be reached.
    Store,
    /// An event could not be encoded or decoded.
    Serialization,
}

#[derive(Debug, PartialEq)]
pub enum AuthenticationErrorKind {
    MissingTicket,
    NotFound,
}

impl Error {
    pub fn new(error_kind: ErrorKind) -> Self {
        Self {
            source: None,
            error_kind,
        }
    }

    pub fn with_source<E>(error_kind: ErrorKind, source: E) -> Self
    where
        E: Into<Box<dyn StdError + Send + Sync>>,
    {
        Self {
            source: Some(source.into()),
            error_kind,
        }
    }

    pub fn fanout_unavailable<E>(source: E) -> Self
    where
        E: Into<Box<dyn StdError + Send + Sync>>,
    {
        Self::with_source(ErrorKind::FanoutUnavailable, source)
    }

    pub fn is_not_found(&self) -> bool {
        self.error_kind == ErrorKind::Authentication(AuthenticationErrorKind::NotFound)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.error_kind {
            ErrorKind::Transport => write!(f, "Transport error")?,
            ErrorKind::Authentication(kind) => write!(f, "Authentication error: {kind:?}")?,
            ErrorKind::FanoutUnavailable => write!(f, "Fan-out exchange unavailable")?,
            ErrorKind::Backpressure => write!(f, "Outbound queue full")?,
            ErrorKind::Store => write!(f, "Ticket store error")?,
            ErrorKind::Serialization => write!(f, "Serialization error")?,
        }
        if let Some(source) = &self.source {
            write!(f, ": {source}")?;
        }
        Ok(())
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn StdError + 'static))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::with_source(ErrorKind::Serialization, err)
    }
}

// Redis errors surface from the ticket store. The fan-out backend maps its own
// failures to `FanoutUnavailable` explicitly.
impl From<redis::RedisError> for Error {
    fn from(err: redis::RedisError) -> Self {
        Error::with_source(ErrorKind::Store, err)
    }
}
