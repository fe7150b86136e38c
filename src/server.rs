//! HTTP server and graceful shutdown.
//!
//! # Graceful shutdown and Kubernetes
//!
//! When Kubernetes terminates a pod it sends **SIGTERM** and waits
//! `terminationGracePeriodSeconds` (default 30 s) before sending SIGKILL.
//!
//! The server reacts by:
//! 1. Immediately stopping `listener.accept()`, so no new connections are made.
//! 2. Letting every in-flight connection task run to completion.
//! 3. Returning from [`Server::serve`], which lets `main` exit cleanly.
//!
//! Set `terminationGracePeriodSeconds` longer than your longest request
//! timeout.
//!
//! # Per-request lifecycle
//!
//! 1. The body is collected into memory.
//! 2. A fresh [`Context`] is attached. If hyper drops the request future
//!    (the client went away) the context is cancelled with
//!    `"client disconnected"`, which a guarded handler sees as a `503`.
//! 3. The router writes into a [`HyperSink`], which becomes the response.
//! 4. A failure that reaches this boundary with nothing written is answered
//!    with its status and message.

use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use http::{HeaderMap, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper::upgrade::OnUpgrade;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

use crate::app::App;
use crate::config::Config;
use crate::context::{CancelOnDrop, Context};
use crate::error::Error;
use crate::middleware::write_error;
use crate::request::Request;
use crate::response::{ResponseWriter, Sink};
use crate::router::Router;

enum Listen {
    Addr(SocketAddr),
    Listener(TcpListener),
}

/// The HTTP server.
pub struct Server {
    listen: Listen,
}

impl Server {
    /// Configures the server to bind to `addr` when serving starts.
    ///
    /// ```rust,no_run
    /// # fn main() -> Result<(), canopy::Error> {
    /// let server = canopy::Server::bind("0.0.0.0:3000")?;
    /// # Ok(()) }
    /// ```
    pub fn bind(addr: &str) -> Result<Self, Error> {
        let addr: SocketAddr = addr.trim()
            .parse()
            .map_err(|_| Error::InvalidAddress(addr.to_owned()))?;
        Ok(Self { listen: Listen::Addr(addr) })
    }

    /// Binds to the address in `config`.
    pub fn from_config(config: &Config) -> Result<Self, Error> {
        Ok(Self { listen: Listen::Addr(config.addr()?) })
    }

    /// Serves on an already bound listener.
    pub fn from_listener(listener: TcpListener) -> Self {
        Self { listen: Listen::Listener(listener) }
    }

    /// Builds `app` and serves it until SIGTERM or Ctrl-C.
    pub async fn serve(self, app: App) -> Result<(), Error> {
        self.serve_router(app.build()?).await
    }

    pub async fn serve_router(self, router: Router) -> Result<(), Error> {
        self.serve_with_shutdown(router, shutdown_signal()).await
    }

    /// Serves `router` until `signal` resolves, then drains in-flight
    /// connections and returns.
    pub async fn serve_with_shutdown(
        self,
        router: Router,
        signal: impl Future<Output = ()> + Send,
    ) -> Result<(), Error> {
        let listener = match self.listen {
            Listen::Addr(addr) => TcpListener::bind(addr).await?,
            Listen::Listener(listener) => listener,
        };
        let local_addr = listener.local_addr()?;

        let router = Arc::new(router);
        info!(addr = %local_addr, routes = router.routes().len(), "canopy listening");

        let mut tasks = tokio::task::JoinSet::new();

        tokio::pin!(signal);

        loop {
            tokio::select! {
                // Checked first so a shutdown stops accepting even when more
                // connections are queued.
                biased;

                () = &mut signal => {
                    info!(in_flight = tasks.len(), "shutdown signal received, draining connections");
                    break;
                }

                res = listener.accept() => {
                    let (stream, remote_addr) = match res {
                        Ok(v) => v,
                        Err(e) => {
                            error!("accept error: {e}");
                            continue;
                        }
                    };

                    let router = Arc::clone(&router);
                    let io = TokioIo::new(stream);

                    tasks.spawn(async move {
                        // called once per request on the connection
                        let svc = service_fn(move |req| {
                            let router = Arc::clone(&router);
                            async move { handle(router, req, remote_addr).await }
                        });

                        if let Err(e) = ConnBuilder::new(TokioExecutor::new())
                            .serve_connection_with_upgrades(io, svc)
                            .await
                        {
                            debug!(peer = %remote_addr, "connection error: {e}");
                        }
                    });
                }

                // Reap finished connection tasks so the JoinSet stays small.
                Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
            }
        }

        while tasks.join_next().await.is_some() {}

        info!("canopy stopped");
        Ok(())
    }
}

// ── Request handling ─────────────────────────────────────────────────────────

/// Serves one request. Every failure is turned into a response, so hyper
/// never sees an error.
async fn handle(
    router: Arc<Router>,
    mut req: hyper::Request<Incoming>,
    remote_addr: SocketAddr,
) -> Result<http::Response<Full<Bytes>>, Infallible> {
    let upgrade = hyper::upgrade::on(&mut req);
    let (parts, body) = req.into_parts();
    let body = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            warn!(peer = %remote_addr, "failed to read request body: {e}");
            let mut response = http::Response::new(Full::new(Bytes::from_static(b"Bad Request\n")));
            *response.status_mut() = StatusCode::BAD_REQUEST;
            return Ok(response);
        }
    };

    let ctx = Context::background();
    let guard = CancelOnDrop::new(ctx.clone(), "client disconnected");
    let request = Request::from(http::Request::from_parts(parts, body))
        .with_remote_addr(remote_addr)
        .with_context(ctx.clone());

    let sink = Arc::new(Mutex::new(HyperSink::new(Some(upgrade))));
    let w = ResponseWriter::shared(&sink);

    let result = router.dispatch(w.clone(), request).await;
    guard.disarm();
    ctx.cancel("request finished");

    if let Err(err) = result {
        if w.is_written() {
            debug!(status = %err.status(), "handler failed after writing: {err}");
        } else {
            write_error(&w, err.status(), err.message());
        }
    }

    let response = sink.lock().take_response();
    Ok(response)
}

// ── Hyper sink ───────────────────────────────────────────────────────────────

/// The connection's real response. Written once, turned into a hyper
/// response when the router returns.
pub(crate) struct HyperSink {
    pending: HeaderMap,
    sent: Option<HeaderMap>,
    status: Option<StatusCode>,
    body: BytesMut,
    upgrade: Option<OnUpgrade>,
    hijacked: bool,
}

impl HyperSink {
    pub(crate) fn new(upgrade: Option<OnUpgrade>) -> Self {
        Self {
            pending: HeaderMap::new(),
            sent: None,
            status: None,
            body: BytesMut::new(),
            upgrade,
            hijacked: false,
        }
    }

    /// Builds the response and leaves the sink empty.
    pub(crate) fn take_response(&mut self) -> http::Response<Full<Bytes>> {
        let headers = self.sent.take().unwrap_or_else(|| std::mem::take(&mut self.pending));
        let body = std::mem::take(&mut self.body).freeze();
        let mut response = http::Response::new(Full::new(body));
        *response.status_mut() = self.status.unwrap_or(StatusCode::OK);
        *response.headers_mut() = headers;
        response
    }
}

impl Sink for HyperSink {
    fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.pending
    }

    fn write_header(&mut self, status: StatusCode) {
        if let Some(current) = self.status {
            warn!(%current, ignored = %status, "superfluous write_header call");
            return;
        }
        self.status = Some(status);
        self.sent = Some(self.pending.clone());
    }

    fn write(&mut self, buf: &[u8]) -> usize {
        if self.status.is_none() {
            self.write_header(StatusCode::OK);
        }
        self.body.extend_from_slice(buf);
        buf.len()
    }

    fn status(&self) -> Option<StatusCode> {
        self.status
    }

    fn hijack(&mut self) -> Result<OnUpgrade, Error> {
        if self.hijacked {
            return Err(Error::AlreadyHijacked);
        }
        let upgrade = self.upgrade.take().ok_or(Error::Unsupported("hijack"))?;
        self.hijacked = true;
        Ok(upgrade)
    }
}

// ── Shutdown signal ──────────────────────────────────────────────────────────

/// Resolves on SIGTERM (Kubernetes) or SIGINT (Ctrl-C). On Windows only
/// Ctrl-C is available. A signal that cannot be installed is logged and
/// never fires.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to install Ctrl-C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let sigterm = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c  => {}
        () = sigterm => {}
    }
}
