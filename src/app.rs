//! Application builder and compile step.
//!
//! An [`App`] collects routes, groups, app-wide middleware and error
//! handlers, then [`App::build`] compiles them into a [`Router`]. Each route
//! ends up as one composed handler:
//!
//! ```text
//! pre… → headers → group/route middleware… → timeout → post… → handler
//! ```
//!
//! `headers` is left out when the route resolves no headers, `timeout` when
//! it resolves no enabled timeout.

use http::header::{HeaderMap, HeaderName, HeaderValue};
use http::StatusCode;
use tracing::{debug, info};

use crate::config::Config;
use crate::error::Error;
use crate::handler::{BoxedHandler, Handler};
use crate::middleware::{self, Middleware, Pipeline};
use crate::pattern;
use crate::router::Router;
use crate::timeout::Timeout;
use crate::tree::{Group, Route, RouteId, Tree};

/// The application: a root [`Group`] plus app-wide settings.
///
/// The root group starts out with the configured request timeout, so every
/// route inherits it unless a group or the route sets its own.
///
/// Routes are registered depth first: a group's own routes, then its child
/// groups. When two routes share a method and pattern the later one in that
/// order wins, whatever order the builder calls were made in. A route added
/// directly to the app therefore loses to a group route with the same key.
#[derive(Debug)]
pub struct App {
    root: Group,
    pipeline: Pipeline,
    error_handlers: Vec<(StatusCode, BoxedHandler)>,
}

macro_rules! method_builders {
    ($($name:ident),* $(,)?) => {
        $(
            #[doc = concat!("Adds a `", stringify!($name), "` route to the root group.")]
            pub fn $name(mut self, pattern: &str, handler: impl Handler) -> Self {
                self.root = self.root.$name(pattern, handler);
                self
            }
        )*
    };
}

impl App {
    /// An app with the default [`Config`].
    pub fn new() -> Self {
        Self::with_config(&Config::default())
    }

    pub fn with_config(config: &Config) -> Self {
        let mut root = Group::new("");
        root.set_timeout(config.request_timeout());
        Self { root, pipeline: Pipeline::new(), error_handlers: Vec::new() }
    }

    pub fn route(mut self, route: Route) -> Self {
        self.root = self.root.route(route);
        self
    }

    pub fn group(mut self, group: Group) -> Self {
        self.root = self.root.group(group);
        self
    }

    method_builders!(get, post, put, patch, delete, options);

    /// Sets a header on the root group.
    pub fn header(mut self, key: &str, value: &str) -> Self {
        self.root = self.root.header(key, value);
        self
    }

    /// Replaces the root group's timeout. Pass `Timeout::default()` to
    /// disable the app-wide deadline.
    pub fn timeout(mut self, timeout: Timeout) -> Self {
        self.root.set_timeout(timeout);
        self
    }

    /// Adds middleware to the root group: it wraps every route, inside the
    /// `pre_middleware` list.
    pub fn with_middleware(mut self, mw: Middleware) -> Self {
        self.root = self.root.with_middleware(mw);
        self
    }

    /// Adds middleware that runs before everything else, error handlers
    /// included.
    pub fn pre_middleware(mut self, mw: Middleware) -> Self {
        self.pipeline.pre(mw);
        self
    }

    /// Adds middleware that sits immediately around each handler, error
    /// handlers included.
    pub fn post_middleware(mut self, mw: Middleware) -> Self {
        self.pipeline.post(mw);
        self
    }

    /// Serves `handler` instead of the built-in response for `status`
    /// (`404` or `405`).
    pub fn error_handler(mut self, status: StatusCode, handler: impl Handler) -> Self {
        self.error_handlers.push((status, handler.into_boxed_handler()));
        self
    }

    /// Compiles the tree into a [`Router`].
    ///
    /// Fails on an invalid pattern, a header that is not a valid HTTP header,
    /// or a pattern the mux cannot accept.
    pub fn build(self) -> Result<Router, Error> {
        let Self { root, pipeline, error_handlers } = self;
        let tree = Tree::flatten(root);
        let mut router = Router::with_pipeline(pipeline.clone());

        for id in tree.routes() {
            let pattern = tree.pattern(id);
            pattern::validate(&pattern)?;
            let chain = route_chain(&tree, id)?;
            debug!(route = %tree.key(id), middleware = chain.len(), "compiled route");

            let handler = pipeline.wrap(tree.handler(id).clone(), &chain);
            router.register(tree.method(id), &pattern, handler)?;
        }

        for (status, handler) in error_handlers {
            router.add_error_handler(status, handler);
        }

        info!(routes = router.routes().len(), "router built");
        Ok(router)
    }
}

impl Default for App {
    fn default() -> Self { Self::new() }
}

/// `[headers, middleware…, timeout]` for one route.
fn route_chain(tree: &Tree, id: RouteId) -> Result<Vec<Middleware>, Error> {
    let mut chain = Vec::new();

    let headers = tree.headers(id);
    if !headers.is_empty() {
        chain.push(middleware::headers(header_map(&headers)?));
    }

    chain.extend(tree.middleware(id));

    let timeout = tree.timeout(id);
    if timeout.is_enabled() {
        chain.push(middleware::timeout(timeout));
    }
    Ok(chain)
}

fn header_map<'a>(headers: impl IntoIterator<Item = (&'a String, &'a String)>) -> Result<HeaderMap, Error> {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        let invalid = || Error::InvalidHeader { name: name.clone(), value: value.clone() };
        let name = HeaderName::try_from(name.as_str()).map_err(|_| invalid())?;
        let value = HeaderValue::try_from(value.as_str()).map_err(|_| invalid())?;
        map.insert(name, value);
    }
    Ok(map)
}
