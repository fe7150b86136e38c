//! # canopy
//!
//! Grouped routing, composable middleware and deadline-guarded handlers on
//! top of hyper.
//!
//! ## The request lifecycle
//!
//! Routes live in a tree of groups. A group carries a pattern prefix and
//! configuration shared by everything below it: response headers, a request
//! timeout, middleware. When the app is built every route is resolved
//! against its ancestors and compiled into a single handler:
//!
//! ```text
//! pre… → headers → group/route middleware… → timeout → post… → handler
//! ```
//!
//! - **Headers**: the route's own, plus every ancestor header it does not set.
//! - **Timeout**: the nearest enabled one. The handler runs on its own task
//!   and writes into a [`CaptureBuffer`]; it is committed only if the handler
//!   finishes in time, otherwise the client gets `503` and the configured
//!   message and the late response is thrown away.
//! - **Middleware**: outer groups wrap inner groups wrap the route.
//!
//! The built [`Router`] dispatches through a radix tree per method
//! ([`matchit`]) and can swap its built-in `404`/`405` answers for your own
//! handlers.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::time::Duration;
//!
//! use canopy::{App, Group, HttpError, Request, ResponseWriter, Server, Timeout, middleware};
//! use http::StatusCode;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), canopy::Error> {
//!     let app = App::new()
//!         .pre_middleware(middleware::trace())
//!         .pre_middleware(middleware::recover())
//!         .pre_middleware(middleware::errors())
//!         .group(
//!             Group::new("/api")
//!                 .header("cache-control", "no-store")
//!                 .timeout(Timeout::new(Duration::from_secs(2), "upstream too slow"))
//!                 .get("/users/{id}", get_user),
//!         );
//!
//!     Server::bind("0.0.0.0:3000")?.serve(app).await
//! }
//!
//! async fn get_user(w: ResponseWriter, req: Request) -> Result<(), HttpError> {
//!     let id = req.param("id").unwrap_or_default();
//!     if id == "0" {
//!         return Err(HttpError::new(StatusCode::NOT_FOUND, "no such user"));
//!     }
//!     w.json(StatusCode::OK, format!(r#"{{"id":"{id}"}}"#));
//!     Ok(())
//! }
//! ```

mod app;
mod capture;
mod config;
mod context;
mod error;
mod method;
mod mux;
mod recorder;
mod request;
mod response;
mod router;
mod server;
mod tree;

pub mod handler;
pub mod middleware;
pub mod pattern;
pub mod timeout;

pub use app::App;
pub use capture::CaptureBuffer;
pub use config::Config;
pub use context::{Cancelled, Context};
pub use error::{Error, HttpError};
pub use handler::{BoxedHandler, Handler, HandlerResult};
pub use method::Method;
pub use middleware::{Middleware, Next, Pipeline};
pub use mux::{Mux, Resolved};
pub use recorder::Recorder;
pub use request::Request;
pub use response::{ContentType, ResponseWriter, Sink};
pub use router::Router;
pub use server::Server;
pub use timeout::Timeout;
pub use tree::{Group, Route};
