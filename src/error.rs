//! Error types.
//!
//! Two families live here. [`Error`] covers infrastructure failures: binding a
//! socket, compiling an invalid route tree, asking a response writer for a
//! capability it does not have. [`HttpError`] is the failure value a handler
//! returns; it carries the status code the boundary should answer with.

use std::error::Error as StdError;

use http::StatusCode;

use crate::context::Cancelled;

/// The error type returned by canopy's fallible operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("hyper: {0}")]
    Hyper(#[from] hyper::Error),

    #[error("invalid socket address `{0}`")]
    InvalidAddress(String),

    #[error("invalid method `{0}`")]
    InvalidMethod(String),

    #[error("invalid route pattern `{pattern}`: {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("invalid route `{key}`: {source}")]
    InvalidRoute {
        key: String,
        #[source]
        source: matchit::InsertError,
    },

    #[error("invalid header `{name}: {value}`")]
    InvalidHeader { name: String, value: String },

    /// The response writer does not support the requested capability
    /// (`flush`, `push` or `hijack`).
    #[error("{0} is not supported by this response writer")]
    Unsupported(&'static str),

    #[error("connection already hijacked")]
    AlreadyHijacked,

    #[error("config: {0}")]
    Config(#[from] toml::de::Error),

    #[error("config: invalid value for {key}: `{value}`")]
    InvalidEnv { key: &'static str, value: String },
}

type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// A handler failure: a human-readable message plus the HTTP status to
/// answer with.
///
/// Failures travel back up the middleware chain unchanged until a layer
/// translates them (see [`middleware::errors`](crate::middleware::errors)) or
/// they reach the server, which writes `status` and `message` if nothing has
/// been written yet.
#[derive(Debug, thiserror::Error)]
#[error("error {}: {message}", .status.as_u16())]
pub struct HttpError {
    status: StatusCode,
    message: String,
    #[source]
    source: Option<BoxError>,
}

impl HttpError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self { status, message: message.into(), source: None }
    }

    /// Wraps an arbitrary error as a `500 Internal Server Error`.
    pub fn internal(err: impl StdError + Send + Sync + 'static) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: err.to_string(),
            source: Some(Box::new(err)),
        }
    }

    /// `503 Service Unavailable` produced when a guarded handler's context
    /// ends before it completes.
    pub(crate) fn unavailable(message: impl Into<String>, cause: Cancelled) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, message).with_source(cause)
    }

    pub fn with_source(mut self, source: impl StdError + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// The cancellation that produced this failure, if it came from the
    /// timeout executor.
    pub fn cancellation(&self) -> Option<&Cancelled> {
        self.source.as_deref().and_then(|s| s.downcast_ref::<Cancelled>())
    }

    /// True when the failure is a deadline expiry.
    pub fn is_timeout(&self) -> bool {
        matches!(self.cancellation(), Some(Cancelled::DeadlineExceeded))
    }
}

impl From<Error> for HttpError {
    fn from(e: Error) -> Self {
        Self::internal(e)
    }
}

impl From<std::io::Error> for HttpError {
    fn from(e: std::io::Error) -> Self {
        Self::internal(e)
    }
}
