//! Handler trait and type erasure.
//!
//! # How async handlers are stored
//!
//! The multiplexer, the middleware chain and the error-handler map all hold
//! handlers of *different* concrete types. We hide each one behind a trait
//! object and pass around a [`BoxedHandler`]:
//!
//! ```text
//! async fn hello(w: ResponseWriter, req: Request) { … }   ← user writes this
//!        ↓ app.get("/", hello)
//! hello.into_boxed_handler()                             ← Handler blanket impl
//!        ↓
//! BoxedHandler(Arc::new(FnHandler(hello)))               ← shared, type-erased
//!        ↓
//! handler.call(w, req) at request time                   ← one vtable dispatch
//!        ↓
//! Box::pin(async { hello(w, req).await.into_result() })  ← BoxFuture
//! ```
//!
//! Two handler shapes are accepted: ones that cannot fail (return `()`) and
//! ones that can (return `Result<(), E>` with `E: Into<HttpError>`).
//! Internally everything runs in the failure-returning form.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::error::HttpError;
use crate::request::Request;
use crate::response::ResponseWriter;

/// What every handler resolves to once erased.
pub type HandlerResult = Result<(), HttpError>;

/// A heap-allocated, type-erased handler future.
///
/// `Send + 'static` so the timeout executor can move it onto its own task.
pub type BoxFuture = Pin<Box<dyn Future<Output = HandlerResult> + Send + 'static>>;

trait ErasedHandler {
    fn call(&self, w: ResponseWriter, req: Request) -> BoxFuture;
}

/// A type-erased handler shared across concurrent requests.
///
/// Cloning costs one atomic increment.
#[derive(Clone)]
pub struct BoxedHandler(Arc<dyn ErasedHandler + Send + Sync + 'static>);

impl BoxedHandler {
    pub fn call(&self, w: ResponseWriter, req: Request) -> BoxFuture {
        self.0.call(w, req)
    }

    /// True when both handles point at the same handler.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl std::fmt::Debug for BoxedHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("BoxedHandler")
    }
}

// ── Public Handler trait ──────────────────────────────────────────────────────

/// Implemented for every valid route handler.
///
/// You never implement this yourself. It is satisfied by any
/// `async fn(ResponseWriter, Request) -> R` where `R` is `()` or
/// `Result<(), E: Into<HttpError>>`, by closures of the same shape, and by
/// [`BoxedHandler`] itself. The trait is sealed.
pub trait Handler: private::Sealed + Send + Sync + 'static {
    #[doc(hidden)]
    fn into_boxed_handler(self) -> BoxedHandler;
}

mod private {
    pub trait Sealed {}
}

/// Converts a handler's return value into a [`HandlerResult`].
pub trait IntoResult {
    fn into_result(self) -> HandlerResult;
}

impl IntoResult for () {
    fn into_result(self) -> HandlerResult { Ok(()) }
}

impl<E: Into<HttpError>> IntoResult for Result<(), E> {
    fn into_result(self) -> HandlerResult { self.map_err(Into::into) }
}

// ── Blanket implementations ───────────────────────────────────────────────────

impl<F, Fut, R> private::Sealed for F
where
    F: Fn(ResponseWriter, Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoResult + Send + 'static,
{
}

impl<F, Fut, R> Handler for F
where
    F: Fn(ResponseWriter, Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoResult + Send + 'static,
{
    fn into_boxed_handler(self) -> BoxedHandler {
        BoxedHandler(Arc::new(FnHandler(self)))
    }
}

impl private::Sealed for BoxedHandler {}

impl Handler for BoxedHandler {
    fn into_boxed_handler(self) -> BoxedHandler { self }
}

/// Erases any [`Handler`].
pub fn boxed(handler: impl Handler) -> BoxedHandler {
    handler.into_boxed_handler()
}

// ── Concrete wrapper ──────────────────────────────────────────────────────────

struct FnHandler<F>(F);

impl<F, Fut, R> ErasedHandler for FnHandler<F>
where
    F: Fn(ResponseWriter, Request) -> Fut + Send + Sync,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoResult + Send + 'static,
{
    fn call(&self, w: ResponseWriter, req: Request) -> BoxFuture {
        let fut = (self.0)(w, req);
        Box::pin(async move { fut.await.into_result() })
    }
}

#[cfg(test)]
mod tests {
    use http::{StatusCode, Uri};

    use super::*;
    use crate::Recorder;

    fn get(path: &'static str) -> Request {
        Request::new(http::Method::GET, Uri::from_static(path))
    }

    #[tokio::test]
    async fn infallible_handlers_map_to_ok() {
        let h = boxed(|w: ResponseWriter, _req: Request| async move {
            w.text(StatusCode::OK, "fine");
        });
        let rec = Recorder::new();
        assert!(h.call(rec.writer(), get("/")).await.is_ok());
        assert_eq!(rec.body(), b"fine".as_slice());
    }

    #[tokio::test]
    async fn failures_are_converted() {
        let h = boxed(|_w: ResponseWriter, _req: Request| async move {
            Err::<(), _>(std::io::Error::other("nope"))
        });
        let err = h.call(Recorder::new().writer(), get("/")).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.message(), "nope");
    }

    #[test]
    fn boxing_a_boxed_handler_is_identity() {
        let h = boxed(|_w: ResponseWriter, _req: Request| async {});
        assert!(boxed(h.clone()).ptr_eq(&h));
    }
}
