//! Request timeouts.
//!
//! # The race
//!
//! [`run_with_timeout`] gives a handler a deadline without ever letting a
//! half-finished response escape:
//!
//! 1. Derive a child [`Context`](crate::Context) from the request's, ending
//!    `timeout.duration()` from now.
//! 2. Spawn the handler on its own task, writing into a fresh
//!    [`CaptureBuffer`] instead of the real writer.
//! 3. Wait for whichever happens first:
//!    - the task panicked → re-raise the panic here;
//!    - the task finished → persist the buffer into the real writer and
//!      return the handler's result (a failure that wrote nothing forwards
//!      only its headers, leaving the status to whoever handles it);
//!    - the context ended → discard the buffer, write `503` and the message
//!      straight to the real writer, and return a `503` failure.
//!
//! Only the completion arm persists and only the cancellation arm writes to
//! the real writer directly; `select!` runs exactly one of them.
//!
//! A handler that ignores its context keeps running after the deadline. Tokio
//! cannot stop it; it simply writes into a buffer nobody will read.

use std::time::Duration;

use http::StatusCode;
use http::header::{CONTENT_TYPE, HeaderValue, X_CONTENT_TYPE_OPTIONS};
use tracing::{debug, error, warn};

use crate::capture::CaptureBuffer;
use crate::context::Cancelled;
use crate::error::HttpError;
use crate::handler::{BoxedHandler, HandlerResult};
use crate::request::Request;
use crate::response::ResponseWriter;

/// How long a handler may run and what to answer when it runs out of time.
///
/// The default value is disabled.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Timeout {
    duration: Duration,
    message: String,
    enabled: bool,
}

impl Timeout {
    /// An enabled timeout.
    pub fn new(duration: Duration, message: impl Into<String>) -> Self {
        Self { duration, message: message.into(), enabled: true }
    }

    pub fn duration(&self) -> Duration { self.duration }
    pub fn message(&self) -> &str { &self.message }
    pub fn is_enabled(&self) -> bool { self.enabled }
}

/// Runs `handler` against `timeout`, committing its response to `w` only if
/// it finishes in time.
///
/// # Panics
///
/// Re-raises any panic from `handler` on the calling task.
pub async fn run_with_timeout(
    timeout: &Timeout,
    handler: BoxedHandler,
    w: ResponseWriter,
    req: Request,
) -> HandlerResult {
    let ctx = req.context().with_timeout(timeout.duration());
    let capture = CaptureBuffer::new(&w);

    let mut task = tokio::spawn(handler.call(capture.writer(), req.with_context(ctx.clone())));

    tokio::select! {
        biased;

        joined = &mut task => match joined {
            Ok(result) => {
                capture.settle(result.is_err());
                result
            }
            Err(e) if e.is_panic() => {
                capture.discard();
                error!("handler panicked under timeout guard, re-raising");
                std::panic::resume_unwind(e.into_panic())
            }
            Err(e) => {
                // Only reachable while the runtime shuts down.
                capture.discard();
                let cause = Cancelled::Canceled(e.to_string());
                Err(unavailable(&w, cause.to_string(), cause))
            }
        },

        cause = ctx.done() => {
            capture.discard();
            let message = match &cause {
                Cancelled::DeadlineExceeded => timeout.message().to_owned(),
                Cancelled::Canceled(reason) => reason.clone(),
            };
            warn!(
                timeout_ms = timeout.duration().as_millis() as u64,
                %cause,
                "request did not complete before its context ended",
            );
            debug!("detaching guarded handler task");
            Err(unavailable(&w, message, cause))
        }
    }
}

fn unavailable(w: &ResponseWriter, message: String, cause: Cancelled) -> HttpError {
    {
        let mut headers = w.headers();
        headers.entry(CONTENT_TYPE)
            .or_insert(HeaderValue::from_static("text/plain; charset=utf-8"));
        headers.insert(X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff"));
    }
    w.write_header(StatusCode::SERVICE_UNAVAILABLE);
    w.write(message.as_bytes());
    HttpError::unavailable(message, cause)
}
