//! Middleware layer.
//!
//! A [`Middleware`] takes the next handler in the chain and returns a new
//! handler that wraps it. [`compose`] folds a list of them around a terminal
//! handler so that, for `[m1, m2]`, the request flows `m1 → m2 → handler` and
//! the response unwinds `handler → m2 → m1`.
//!
//! Composition happens once, when the app is built. Nothing is re-ordered or
//! re-wrapped per request.
//!
//! Built-in middleware:
//! - [`headers`]: adds fixed response headers
//! - [`timeout`]: runs the rest of the chain against a deadline
//! - [`errors`]: turns failures and error statuses into error responses
//! - [`recover`]: converts a panic into `500 Internal Server Error`
//! - [`trace`]: one log line per request with method, path, status, latency

use std::future::Future;
use std::sync::Arc;

use crate::handler::{self, BoxFuture, BoxedHandler, IntoResult};
use crate::request::Request;
use crate::response::ResponseWriter;
use crate::timeout::{self as executor, Timeout};

mod errors;
mod headers;
mod recover;
mod trace;

pub use errors::errors;
pub(crate) use errors::write_error;
pub use headers::headers;
pub use recover::recover;
pub use trace::trace;

/// A function from the next handler to a wrapping handler.
#[derive(Clone)]
pub struct Middleware(Arc<dyn Fn(BoxedHandler) -> BoxedHandler + Send + Sync + 'static>);

impl Middleware {
    pub fn new(f: impl Fn(BoxedHandler) -> BoxedHandler + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    pub fn apply(&self, next: BoxedHandler) -> BoxedHandler {
        (self.0)(next)
    }
}

impl std::fmt::Debug for Middleware {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Middleware")
    }
}

/// The rest of the chain, handed to a [`from_fn`] middleware.
pub struct Next(BoxedHandler);

impl Next {
    pub fn run(self, w: ResponseWriter, req: Request) -> BoxFuture {
        self.0.call(w, req)
    }
}

/// Builds a middleware from an async function that receives the writer, the
/// request and the rest of the chain.
///
/// ```rust,no_run
/// use canopy::middleware::{self, Next};
/// use canopy::{Request, ResponseWriter};
///
/// let stamp = middleware::from_fn(|w: ResponseWriter, req: Request, next: Next| async move {
///     w.headers().insert("x-served-by", "canopy".parse().unwrap());
///     next.run(w, req).await
/// });
/// ```
pub fn from_fn<F, Fut, R>(f: F) -> Middleware
where
    F: Fn(ResponseWriter, Request, Next) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoResult + Send + 'static,
{
    let f = Arc::new(f);
    Middleware::new(move |next| {
        let f = Arc::clone(&f);
        handler::boxed(move |w: ResponseWriter, req: Request| (*f)(w, req, Next(next.clone())))
    })
}

/// Wraps `terminal` so that `middleware[0]` is outermost.
///
/// An empty list returns `terminal` itself.
pub fn compose(terminal: BoxedHandler, middleware: &[Middleware]) -> BoxedHandler {
    middleware.iter().rev().fold(terminal, |next, mw| mw.apply(next))
}

/// Runs the rest of the chain under `timeout`. See [`crate::timeout`].
pub fn timeout(timeout: Timeout) -> Middleware {
    let timeout = Arc::new(timeout);
    Middleware::new(move |next| {
        let timeout = Arc::clone(&timeout);
        handler::boxed(move |w: ResponseWriter, req: Request| {
            let timeout = Arc::clone(&timeout);
            let next = next.clone();
            async move { executor::run_with_timeout(&timeout, next, w, req).await }
        })
    })
}

/// App-wide middleware that wraps every route.
///
/// `pre` middleware runs before everything else on the way in; `post`
/// middleware sits immediately around the route handler. For a route whose
/// own chain is `[headers, mw, timeout]` the final order is
/// `pre… → headers → mw → timeout → post… → handler`.
#[derive(Clone, Debug, Default)]
pub struct Pipeline {
    pre: Vec<Middleware>,
    post: Vec<Middleware>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pre(&mut self, mw: Middleware) -> &mut Self {
        self.pre.push(mw);
        self
    }

    pub fn post(&mut self, mw: Middleware) -> &mut Self {
        self.post.push(mw);
        self
    }

    /// Composes `pre ++ chain ++ post` around `terminal`.
    pub fn wrap(&self, terminal: BoxedHandler, chain: &[Middleware]) -> BoxedHandler {
        let all: Vec<Middleware> = self.pre.iter()
            .chain(chain)
            .chain(&self.post)
            .cloned()
            .collect();
        compose(terminal, &all)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Arc;

    use http::{StatusCode, Uri};
    use parking_lot::Mutex;

    use super::*;
    use crate::Recorder;

    pub(crate) type Log = Arc<Mutex<Vec<String>>>;

    pub(crate) fn marker(log: &Log, name: &'static str) -> Middleware {
        let log = Arc::clone(log);
        from_fn(move |w: ResponseWriter, req: Request, next: Next| {
            let log = Arc::clone(&log);
            async move {
                log.lock().push(format!("{name}>"));
                let res = next.run(w, req).await;
                log.lock().push(format!("<{name}"));
                res
            }
        })
    }

    pub(crate) fn terminal(log: &Log) -> BoxedHandler {
        let log = Arc::clone(log);
        handler::boxed(move |w: ResponseWriter, _req: Request| {
            let log = Arc::clone(&log);
            async move {
                log.lock().push("handler".to_owned());
                w.text(StatusCode::OK, "ok");
            }
        })
    }

    fn get() -> Request {
        Request::new(http::Method::GET, Uri::from_static("/"))
    }

    #[test]
    fn empty_composition_is_identity() {
        let log = Log::default();
        let h = terminal(&log);
        assert!(compose(h.clone(), &[]).ptr_eq(&h));
    }

    #[tokio::test]
    async fn request_and_response_order() {
        let log = Log::default();
        let h = compose(terminal(&log), &[marker(&log, "m1"), marker(&log, "m2")]);
        h.call(Recorder::new().writer(), get()).await.unwrap();
        assert_eq!(*log.lock(), ["m1>", "m2>", "handler", "<m2", "<m1"]);
    }

    #[tokio::test]
    async fn pipeline_wraps_pre_chain_post() {
        let log = Log::default();
        let mut pipeline = Pipeline::new();
        pipeline.pre(marker(&log, "pre1")).pre(marker(&log, "pre2"));
        pipeline.post(marker(&log, "post1"));

        let h = pipeline.wrap(terminal(&log), &[marker(&log, "route")]);
        h.call(Recorder::new().writer(), get()).await.unwrap();
        assert_eq!(
            *log.lock(),
            ["pre1>", "pre2>", "route>", "post1>", "handler", "<post1", "<route", "<pre2", "<pre1"],
        );
    }
}
