//! Request dispatcher.
//!
//! The [`Router`] owns the [`Mux`] and a map of error handlers. Dispatch has
//! two paths:
//!
//! ```text
//! error handlers registered? ──no──▶ mux handler → real writer          (fast path)
//!          │yes
//!          ▼
//! matched a route? ──yes──▶ mux handler → real writer
//!          │no (404 / 405)
//!          ▼
//! built-in handler → detached CaptureBuffer → status
//!          │
//!          ├── override registered for status → override → real writer
//!          └── none                           → built-in handler → real writer
//! ```
//!
//! The gate is a single atomic load, so an app without error handlers pays
//! nothing for the feature.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use dashmap::DashMap;
use http::StatusCode;
use tracing::debug;

use crate::capture::CaptureBuffer;
use crate::error::Error;
use crate::handler::{BoxedHandler, Handler, HandlerResult};
use crate::method::Method;
use crate::middleware::Pipeline;
use crate::mux::Mux;
use crate::request::Request;
use crate::response::ResponseWriter;

/// Routes requests to compiled handlers.
///
/// Usually produced by [`App::build`](crate::App::build). Registration takes
/// `&mut self` and happens before serving; error handlers can be added at any
/// time, including while requests are being dispatched.
pub struct Router {
    mux: Mux,
    pipeline: Pipeline,
    error_handlers: DashMap<StatusCode, BoxedHandler>,
    error_handler_count: AtomicUsize,
    interceptions: AtomicU64,
}

impl Router {
    pub fn new() -> Self {
        Self::with_pipeline(Pipeline::default())
    }

    /// A router whose error handlers are wrapped with `pipeline`.
    pub fn with_pipeline(pipeline: Pipeline) -> Self {
        Self {
            mux: Mux::new(),
            pipeline,
            error_handlers: DashMap::new(),
            error_handler_count: AtomicUsize::new(0),
            interceptions: AtomicU64::new(0),
        }
    }

    /// Binds `handler` under `"{METHOD} {pattern}"`. The handler is used as
    /// given; a duplicate key replaces the earlier handler.
    pub fn register(&mut self, method: Method, pattern: &str, handler: impl Handler) -> Result<(), Error> {
        self.mux.register(method, pattern, handler.into_boxed_handler())
    }

    /// Serves `handler` whenever the mux would answer with `status` on its
    /// own (`404` and `405`). Registering a status twice replaces the earlier
    /// handler. A status the mux never produces is accepted and never used.
    pub fn add_error_handler(&self, status: StatusCode, handler: impl Handler) {
        let handler = self.pipeline.wrap(handler.into_boxed_handler(), &[]);
        if self.error_handlers.insert(status, handler).is_none() {
            self.error_handler_count.fetch_add(1, Ordering::Release);
        }
    }

    /// Serves one request.
    pub async fn dispatch(&self, w: ResponseWriter, req: Request) -> HandlerResult {
        let resolved = self.mux.resolve(req.method(), req.path());
        let req = req.with_params(resolved.params);

        if self.error_handler_count.load(Ordering::Acquire) == 0 || !resolved.pattern.is_empty() {
            return resolved.handler.call(w, req).await;
        }

        self.interceptions.fetch_add(1, Ordering::Relaxed);
        let probe = CaptureBuffer::detached();
        // the built-in handlers cannot fail
        let _ = resolved.handler.call(probe.writer(), req.clone()).await;

        let status = probe.status().unwrap_or(StatusCode::OK);
        let replacement = (status != StatusCode::OK)
            .then(|| self.error_handlers.get(&status).map(|h| h.value().clone()))
            .flatten();

        match replacement {
            Some(handler) => {
                debug!(%status, path = req.path(), "serving registered error handler");
                handler.call(w, req).await
            }
            None => resolved.handler.call(w, req).await,
        }
    }

    /// Registered route keys (`"GET /users/{id}"`) in registration order.
    pub fn routes(&self) -> Vec<String> {
        self.mux.keys().collect()
    }

    /// How many requests went through the error-handler interception path.
    pub fn interceptions(&self) -> u64 {
        self.interceptions.load(Ordering::Relaxed)
    }

    /// Number of distinct status codes with an error handler.
    pub fn error_handler_count(&self) -> usize {
        self.error_handler_count.load(Ordering::Acquire)
    }
}

impl Default for Router {
    fn default() -> Self { Self::new() }
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("routes", &self.routes())
            .field("error_handlers", &self.error_handler_count())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use http::Uri;

    use super::*;
    use crate::{Recorder, handler};

    fn req(method: http::Method, path: &'static str) -> Request {
        Request::new(method, Uri::from_static(path))
    }

    fn router() -> Router {
        let mut router = Router::new();
        router.register(Method::Get, "/users/{id}", |w: ResponseWriter, req: Request| async move {
            let id = req.param("id").unwrap_or_default().to_owned();
            w.text(StatusCode::OK, id);
        }).unwrap();
        router
    }

    #[tokio::test]
    async fn params_reach_the_handler() {
        let rec = Recorder::new();
        router().dispatch(rec.writer(), req(http::Method::GET, "/users/7")).await.unwrap();
        assert_eq!(rec.body_string(), "7");
    }

    #[tokio::test]
    async fn no_error_handlers_means_no_interception() {
        let router = router();
        let rec = Recorder::new();
        router.dispatch(rec.writer(), req(http::Method::GET, "/missing")).await.unwrap();
        assert_eq!(rec.status(), Some(StatusCode::NOT_FOUND));
        assert_eq!(router.interceptions(), 0);
    }

    #[tokio::test]
    async fn override_replaces_builtin_404() {
        let router = router();
        router.add_error_handler(StatusCode::NOT_FOUND, |w: ResponseWriter, _req: Request| async move {
            w.json(StatusCode::NOT_FOUND, r#"{"error":"nope"}"#);
        });

        let rec = Recorder::new();
        router.dispatch(rec.writer(), req(http::Method::GET, "/missing")).await.unwrap();
        assert_eq!(rec.status(), Some(StatusCode::NOT_FOUND));
        assert_eq!(rec.body_string(), r#"{"error":"nope"}"#);
        assert_eq!(router.interceptions(), 1);

        let rec = Recorder::new();
        router.dispatch(rec.writer(), req(http::Method::GET, "/users/1")).await.unwrap();
        assert_eq!(rec.body_string(), "1");
        assert_eq!(router.interceptions(), 1);
    }

    #[tokio::test]
    async fn unmatched_status_replays_the_builtin() {
        let router = router();
        router.add_error_handler(StatusCode::NOT_FOUND, |w: ResponseWriter, _req: Request| async move {
            w.write("custom 404");
        });

        let rec = Recorder::new();
        router.dispatch(rec.writer(), req(http::Method::DELETE, "/users/1")).await.unwrap();
        assert_eq!(rec.status(), Some(StatusCode::METHOD_NOT_ALLOWED));
        assert_eq!(rec.header("allow").as_deref(), Some("GET, HEAD"));
        assert_eq!(router.interceptions(), 1);
    }

    #[test]
    fn counter_only_counts_new_codes() {
        let router = Router::new();
        let h = handler::boxed(|_w: ResponseWriter, _req: Request| async {});
        router.add_error_handler(StatusCode::NOT_FOUND, h.clone());
        router.add_error_handler(StatusCode::NOT_FOUND, h.clone());
        router.add_error_handler(StatusCode::METHOD_NOT_ALLOWED, h);
        assert_eq!(router.error_handler_count(), 2);
    }

    #[tokio::test]
    async fn later_error_handler_wins() {
        let router = router();
        router.add_error_handler(StatusCode::NOT_FOUND, |w: ResponseWriter, _req: Request| async move {
            w.write("first");
        });
        router.add_error_handler(StatusCode::NOT_FOUND, |w: ResponseWriter, _req: Request| async move {
            w.write("second");
        });
        let rec = Recorder::new();
        router.dispatch(rec.writer(), req(http::Method::GET, "/missing")).await.unwrap();
        assert_eq!(rec.body_string(), "second");
    }
}
