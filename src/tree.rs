//! Route and group tree.
//!
//! Routes are declared with owned builders: a [`Group`] owns its routes and
//! child groups, so there is never a back-reference to worry about. When the
//! app is built, [`Tree::flatten`] walks the builders once and lays every node
//! out in two flat vectors. Each node records its parent as a [`GroupId`]
//! index, and the resolver methods on [`Tree`] walk upward by index:
//!
//! ```text
//! Group("/api")                         groups: [0: "" (root), 1: "/api", 2: "/v1"]
//! ├── GET /health           flatten     routes: [GET /health   → parent 1,
//! └── Group("/v1")          ──────▶              GET /users    → parent 2]
//!     └── GET /users
//! ```
//!
//! Resolution rules, nearest node first:
//!
//! | Property   | Rule |
//! |------------|------|
//! | pattern    | ancestor patterns root → leaf, then the route's own |
//! | headers    | union; the closest node that sets a key wins |
//! | timeout    | the route's own if enabled, else the nearest enabled ancestor's |
//! | middleware | ancestors' lists root first, then the route's own |

use std::collections::BTreeMap;

use crate::handler::{BoxedHandler, Handler};
use crate::method::Method;
use crate::middleware::Middleware;
use crate::timeout::Timeout;

// ── Builders ─────────────────────────────────────────────────────────────────

/// One `(method, pattern) → handler` binding plus its local configuration.
#[derive(Debug)]
pub struct Route {
    method: Method,
    pattern: String,
    handler: BoxedHandler,
    config: NodeConfig,
}

#[derive(Clone, Debug, Default)]
struct NodeConfig {
    headers: BTreeMap<String, String>,
    timeout: Timeout,
    middleware: Vec<Middleware>,
}

impl NodeConfig {
    fn header(&mut self, key: &str, value: &str) {
        self.headers.insert(key.trim().to_ascii_lowercase(), value.to_owned());
    }
}

impl Route {
    /// The pattern is trimmed; its case is kept so parameter names survive.
    pub fn new(method: Method, pattern: &str, handler: impl Handler) -> Self {
        Self {
            method,
            pattern: pattern.trim().to_owned(),
            handler: handler.into_boxed_handler(),
            config: NodeConfig::default(),
        }
    }

    /// Sets a response header for this route. Setting a key twice keeps the
    /// last value.
    pub fn header(mut self, key: &str, value: &str) -> Self {
        self.config.header(key, value);
        self
    }

    pub fn timeout(mut self, timeout: Timeout) -> Self {
        self.config.timeout = timeout;
        self
    }

    /// Appends middleware; the first one added runs first.
    pub fn with_middleware(mut self, mw: Middleware) -> Self {
        self.config.middleware.push(mw);
        self
    }

    pub fn method(&self) -> Method { self.method }
    pub fn pattern(&self) -> &str { &self.pattern }

    /// `"{METHOD} {pattern}"` for this route alone, ignoring any group.
    pub fn key(&self) -> String {
        format!("{} {}", self.method, self.pattern)
    }
}

/// A pattern prefix plus configuration shared by everything below it.
#[derive(Debug, Default)]
pub struct Group {
    pattern: String,
    config: NodeConfig,
    routes: Vec<Route>,
    groups: Vec<Group>,
}

macro_rules! method_builders {
    ($($name:ident => $method:ident),* $(,)?) => {
        $(
            #[doc = concat!("Adds a `", stringify!($method), "` route.")]
            pub fn $name(self, pattern: &str, handler: impl Handler) -> Self {
                self.route(Route::new(Method::$method, pattern, handler))
            }
        )*
    };
}

impl Group {
    pub fn new(pattern: &str) -> Self {
        Self { pattern: pattern.trim().to_owned(), ..Self::default() }
    }

    pub fn route(mut self, route: Route) -> Self {
        self.routes.push(route);
        self
    }

    /// Nests `group` under this one. Its pattern is appended to ours.
    pub fn group(mut self, group: Group) -> Self {
        self.groups.push(group);
        self
    }

    method_builders! {
        get     => Get,
        post    => Post,
        put     => Put,
        patch   => Patch,
        delete  => Delete,
        options => Options,
    }

    pub fn header(mut self, key: &str, value: &str) -> Self {
        self.config.header(key, value);
        self
    }

    pub fn timeout(mut self, timeout: Timeout) -> Self {
        self.config.timeout = timeout;
        self
    }

    pub fn with_middleware(mut self, mw: Middleware) -> Self {
        self.config.middleware.push(mw);
        self
    }

    pub fn pattern(&self) -> &str { &self.pattern }

    pub(crate) fn set_timeout(&mut self, timeout: Timeout) {
        self.config.timeout = timeout;
    }
}

// ── Arena ────────────────────────────────────────────────────────────────────

/// Index of a group in a [`Tree`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) struct GroupId(usize);

/// Index of a route in a [`Tree`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) struct RouteId(usize);

#[derive(Debug)]
struct GroupNode {
    pattern: String,
    config: NodeConfig,
    parent: Option<GroupId>,
}

#[derive(Debug)]
struct RouteNode {
    method: Method,
    pattern: String,
    handler: BoxedHandler,
    config: NodeConfig,
    parent: GroupId,
}

/// A flattened, immutable route tree. Ids are only minted by the tree that
/// owns them, so lookups never go out of bounds.
#[derive(Debug)]
pub(crate) struct Tree {
    groups: Vec<GroupNode>,
    routes: Vec<RouteNode>,
}

impl Tree {
    /// Flattens `root` depth first: a group's own routes come before the
    /// routes of its child groups, each in insertion order.
    pub fn flatten(root: Group) -> Self {
        let mut tree = Self { groups: Vec::new(), routes: Vec::new() };
        tree.push_group(root, None);
        tree
    }

    fn push_group(&mut self, group: Group, parent: Option<GroupId>) {
        let id = GroupId(self.groups.len());
        let Group { pattern, config, routes, groups } = group;
        self.groups.push(GroupNode { pattern, config, parent });

        for Route { method, pattern, handler, config } in routes {
            self.routes.push(RouteNode { method, pattern, handler, config, parent: id });
        }
        for child in groups {
            self.push_group(child, Some(id));
        }
    }

    /// Every route, in registration order.
    pub fn routes(&self) -> impl Iterator<Item = RouteId> + '_ {
        (0..self.routes.len()).map(RouteId)
    }

    pub fn method(&self, route: RouteId) -> Method {
        self.routes[route.0].method
    }

    pub fn handler(&self, route: RouteId) -> &BoxedHandler {
        &self.routes[route.0].handler
    }

    /// Groups enclosing `route`, immediate parent first.
    fn ancestors(&self, route: RouteId) -> impl Iterator<Item = &GroupNode> {
        std::iter::successors(Some(self.routes[route.0].parent), |id| self.groups[id.0].parent)
            .map(|id| &self.groups[id.0])
    }

    /// Ancestor patterns root → leaf followed by the route's own pattern.
    /// Duplicate slashes are kept as written.
    pub fn pattern(&self, route: RouteId) -> String {
        let mut prefixes: Vec<&str> = self.ancestors(route).map(|g| g.pattern.as_str()).collect();
        prefixes.reverse();
        let mut pattern = prefixes.concat();
        pattern.push_str(&self.routes[route.0].pattern);
        pattern
    }

    /// `"{METHOD} {pattern}"`, the route's identity in the router.
    pub fn key(&self, route: RouteId) -> String {
        format!("{} {}", self.method(route), self.pattern(route))
    }

    /// The route's headers plus every ancestor header it does not set itself.
    /// Closer ancestors win over farther ones.
    pub fn headers(&self, route: RouteId) -> BTreeMap<String, String> {
        let mut headers = self.routes[route.0].config.headers.clone();
        for group in self.ancestors(route) {
            for (key, value) in &group.config.headers {
                headers.entry(key.clone()).or_insert_with(|| value.clone());
            }
        }
        headers
    }

    /// The route's timeout if enabled, else the nearest enabled ancestor's,
    /// else a disabled timeout.
    pub fn timeout(&self, route: RouteId) -> Timeout {
        let own = &self.routes[route.0].config.timeout;
        if own.is_enabled() {
            return own.clone();
        }
        self.ancestors(route)
            .map(|g| &g.config.timeout)
            .find(|t| t.is_enabled())
            .cloned()
            .unwrap_or_default()
    }

    /// Ancestor middleware, outermost group first, then the route's own.
    pub fn middleware(&self, route: RouteId) -> Vec<Middleware> {
        let mut groups: Vec<&GroupNode> = self.ancestors(route).collect();
        groups.reverse();
        groups.iter()
            .flat_map(|g| g.config.middleware.iter())
            .chain(&self.routes[route.0].config.middleware)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use http::Uri;

    use super::*;
    use crate::middleware::compose;
    use crate::middleware::tests::{Log, marker, terminal};
    use crate::{Recorder, Request, ResponseWriter};

    async fn noop(_w: ResponseWriter, _req: Request) {}

    fn only_route(tree: &Tree) -> RouteId {
        let ids: Vec<RouteId> = tree.routes().collect();
        assert_eq!(ids.len(), 1);
        ids[0]
    }

    #[test]
    fn pattern_concatenates_root_to_leaf() {
        let root = Group::new("").group(
            Group::new("/api").group(Group::new("/v1").get("/users/{id}", noop)),
        );
        let tree = Tree::flatten(root);
        let id = only_route(&tree);
        assert_eq!(tree.pattern(id), "/api/v1/users/{id}");
        assert_eq!(tree.key(id), "GET /api/v1/users/{id}");
    }

    #[test]
    fn duplicate_slashes_are_kept() {
        let tree = Tree::flatten(Group::new("/api/").get("/x", noop));
        assert_eq!(tree.pattern(only_route(&tree)), "/api//x");
    }

    #[test]
    fn every_minted_id_resolves() {
        let tree = Tree::flatten(
            Group::new("")
                .get("/", noop)
                .group(Group::new("/a").get("/x", noop).group(Group::new("/b").delete("/y", noop))),
        );
        let keys: Vec<String> = tree.routes().map(|id| tree.key(id)).collect();
        assert_eq!(keys, ["GET /", "GET /a/x", "DELETE /a/b/y"]);
    }

    #[test]
    fn child_headers_win_and_nearest_ancestor_beats_root() {
        let root = Group::new("")
            .header("X-Level", "root")
            .header("x-root-only", "r")
            .header("x-shared", "root")
            .group(
                Group::new("/g")
                    .header("x-level", "group")
                    .header("x-shared", "group")
                    .route(Route::new(Method::Get, "/r", noop).header("x-level", "route")),
            );
        let tree = Tree::flatten(root);
        let headers = tree.headers(only_route(&tree));

        assert_eq!(headers["x-level"], "route");
        assert_eq!(headers["x-shared"], "group");
        assert_eq!(headers["x-root-only"], "r");
        assert_eq!(headers.len(), 3);
    }

    #[test]
    fn nearest_enabled_timeout_wins() {
        let outer = Timeout::new(Duration::from_secs(10), "outer");
        let inner = Timeout::new(Duration::from_secs(1), "inner");
        let root = Group::new("").timeout(outer.clone()).group(
            Group::new("/a")
                .timeout(inner.clone())
                .group(Group::new("/b").get("/c", noop)),
        );
        let tree = Tree::flatten(root);
        assert_eq!(tree.timeout(only_route(&tree)), inner);
    }

    #[test]
    fn own_timeout_beats_ancestors_and_absent_is_disabled() {
        let own = Timeout::new(Duration::from_millis(5), "own");
        let root = Group::new("")
            .timeout(Timeout::new(Duration::from_secs(1), "root"))
            .route(Route::new(Method::Get, "/a", noop).timeout(own.clone()));
        let tree = Tree::flatten(root);
        assert_eq!(tree.timeout(only_route(&tree)), own);

        let tree = Tree::flatten(Group::new("").get("/a", noop));
        assert!(!tree.timeout(only_route(&tree)).is_enabled());
    }

    #[tokio::test]
    async fn ancestor_middleware_wraps_route_middleware() {
        let log = Log::default();
        let root = Group::new("")
            .with_middleware(marker(&log, "root"))
            .group(
                Group::new("/g")
                    .with_middleware(marker(&log, "group"))
                    .route(Route::new(Method::Get, "/r", noop).with_middleware(marker(&log, "route"))),
            );
        let tree = Tree::flatten(root);
        let chain = tree.middleware(only_route(&tree));
        assert_eq!(chain.len(), 3);

        compose(terminal(&log), &chain)
            .call(Recorder::new().writer(), Request::new(http::Method::GET, Uri::from_static("/g/r")))
            .await
            .unwrap();
        assert_eq!(
            *log.lock(),
            ["root>", "group>", "route>", "handler", "<route", "<group", "<root"],
        );
    }

    #[test]
    fn flatten_lists_own_routes_before_child_groups() {
        let root = Group::new("")
            .group(Group::new("/child").get("/a", noop))
            .post("/b", noop)
            .delete("/c", noop);
        let tree = Tree::flatten(root);
        let keys: Vec<String> = tree.routes().map(|id| tree.key(id)).collect();
        assert_eq!(keys, ["POST /b", "DELETE /c", "GET /child/a"]);
    }

    #[test]
    fn patterns_are_trimmed_not_lowercased() {
        let route = Route::new(Method::Get, "  /Users/{userId} ", noop);
        assert_eq!(route.pattern(), "/Users/{userId}");
        assert_eq!(route.key(), "GET /Users/{userId}");
    }
}
