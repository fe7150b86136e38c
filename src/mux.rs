//! URL multiplexer.
//!
//! One radix tree per method, O(path-length) lookup via [`matchit`]. The mux
//! answers a single question: given a method and a path, which handler
//! serves it? When nothing does, it still hands back a handler (the built-in
//! `404` or `405`) but with an empty pattern, which is how the
//! [`Router`](crate::Router) tells a routing miss from a real match.

use std::collections::HashMap;

use http::StatusCode;
use http::header::{ALLOW, CONTENT_TYPE, HeaderValue, X_CONTENT_TYPE_OPTIONS};
use matchit::Router as MatchitRouter;
use tracing::warn;

use crate::error::Error;
use crate::handler::{self, BoxedHandler};
use crate::method::Method;
use crate::request::Request;
use crate::response::ResponseWriter;

/// The outcome of [`Mux::resolve`].
#[derive(Debug)]
pub struct Resolved {
    pub handler: BoxedHandler,
    /// The matched route pattern. Empty for the built-in 404/405 handlers.
    pub pattern: String,
    pub params: HashMap<String, String>,
}

struct Entry {
    method: Method,
    pattern: String,
    handler: BoxedHandler,
}

/// Method + pattern → handler.
pub struct Mux {
    trees: HashMap<Method, MatchitRouter<usize>>,
    entries: Vec<Entry>,
    keys: HashMap<String, usize>,
    not_found: BoxedHandler,
}

impl Mux {
    pub fn new() -> Self {
        Self {
            trees: HashMap::new(),
            entries: Vec::new(),
            keys: HashMap::new(),
            not_found: handler::boxed(not_found),
        }
    }

    /// Binds `handler` to `method` + `pattern`. Registering the same pair
    /// again replaces the earlier handler.
    ///
    /// Fails when the pattern conflicts with a different pattern already in
    /// the tree (e.g. `/users/{id}` vs `/users/{name}`) or is not valid
    /// matchit syntax.
    pub fn register(&mut self, method: Method, pattern: &str, handler: BoxedHandler) -> Result<(), Error> {
        let key = format!("{method} {pattern}");
        if let Some(&index) = self.keys.get(&key) {
            warn!(route = %key, "route registered twice, keeping the last handler");
            self.entries[index].handler = handler;
            return Ok(());
        }

        let index = self.entries.len();
        self.trees
            .entry(method)
            .or_default()
            .insert(pattern, index)
            .map_err(|source| Error::InvalidRoute { key: key.clone(), source })?;
        self.entries.push(Entry { method, pattern: pattern.to_owned(), handler });
        self.keys.insert(key, index);
        Ok(())
    }

    /// Finds the handler for `method` + `path`.
    ///
    /// `HEAD` is served by `GET` routes. A path that matches only under other
    /// methods resolves to a `405` handler listing them in `allow`; anything
    /// else resolves to the `404` handler.
    pub fn resolve(&self, method: &http::Method, path: &str) -> Resolved {
        let wanted = if *method == http::Method::HEAD {
            Some(Method::Get)
        } else {
            Method::from_http(method)
        };

        if let Some(found) = wanted.and_then(|m| self.lookup(m, path)) {
            return found;
        }

        let allowed: Vec<Method> = Method::ALL
            .into_iter()
            .filter(|m| self.trees.get(m).is_some_and(|tree| tree.at(path).is_ok()))
            .collect();

        let handler = if allowed.is_empty() {
            self.not_found.clone()
        } else {
            method_not_allowed(&allowed)
        };
        Resolved { handler, pattern: String::new(), params: HashMap::new() }
    }

    fn lookup(&self, method: Method, path: &str) -> Option<Resolved> {
        let matched = self.trees.get(&method)?.at(path).ok()?;
        let entry = &self.entries[*matched.value];
        let params = matched.params.iter()
            .map(|(k, v)| (k.to_owned(), v.to_owned()))
            .collect();
        Some(Resolved {
            handler: entry.handler.clone(),
            pattern: entry.pattern.clone(),
            params,
        })
    }

    /// Registered `"{METHOD} {pattern}"` keys in registration order.
    pub fn keys(&self) -> impl Iterator<Item = String> + '_ {
        self.entries.iter().map(|e| format!("{} {}", e.method, e.pattern))
    }
}

impl Default for Mux {
    fn default() -> Self { Self::new() }
}

// ── Built-in handlers ────────────────────────────────────────────────────────

fn plain_error(w: &ResponseWriter, status: StatusCode, body: &str) {
    {
        let mut headers = w.headers();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"));
        headers.insert(X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff"));
    }
    w.write_header(status);
    w.write(body);
}

async fn not_found(w: ResponseWriter, _req: Request) {
    plain_error(&w, StatusCode::NOT_FOUND, "404 page not found\n");
}

fn method_not_allowed(allowed: &[Method]) -> BoxedHandler {
    let mut names: Vec<&str> = allowed.iter().map(|m| m.as_str()).collect();
    if allowed.contains(&Method::Get) {
        names.push("HEAD");
    }
    let allow = names.join(", ");
    handler::boxed(move |w: ResponseWriter, _req: Request| {
        let allow = allow.clone();
        async move {
            if let Ok(value) = HeaderValue::from_str(&allow) {
                w.headers().insert(ALLOW, value);
            }
            plain_error(&w, StatusCode::METHOD_NOT_ALLOWED, "Method Not Allowed\n");
        }
    })
}

#[cfg(test)]
mod tests {
    use http::Uri;

    use super::*;
    use crate::Recorder;

    fn named(name: &'static str) -> BoxedHandler {
        handler::boxed(move |w: ResponseWriter, _req: Request| async move {
            w.write(name);
        })
    }

    async fn run(resolved: &Resolved, method: http::Method) -> Recorder {
        let rec = Recorder::new();
        let req = Request::new(method, Uri::from_static("/"));
        resolved.handler.call(rec.writer(), req).await.unwrap();
        rec
    }

    #[tokio::test]
    async fn match_carries_pattern_and_params() {
        let mut mux = Mux::new();
        mux.register(Method::Get, "/users/{id}", named("user")).unwrap();

        let resolved = mux.resolve(&http::Method::GET, "/users/42");
        assert_eq!(resolved.pattern, "/users/{id}");
        assert_eq!(resolved.params["id"], "42");
        assert_eq!(run(&resolved, http::Method::GET).await.body_string(), "user");
    }

    #[tokio::test]
    async fn duplicate_registration_keeps_the_last_handler() {
        let mut mux = Mux::new();
        mux.register(Method::Post, "/items", named("first")).unwrap();
        mux.register(Method::Post, "/items", named("second")).unwrap();

        let resolved = mux.resolve(&http::Method::POST, "/items");
        assert_eq!(run(&resolved, http::Method::POST).await.body_string(), "second");
        assert_eq!(mux.keys().collect::<Vec<_>>(), ["POST /items"]);
    }

    #[test]
    fn conflicting_patterns_are_rejected() {
        let mut mux = Mux::new();
        mux.register(Method::Get, "/users/{id}", named("a")).unwrap();
        let err = mux.register(Method::Get, "/users/{name}", named("b")).unwrap_err();
        assert!(matches!(err, Error::InvalidRoute { key, .. } if key == "GET /users/{name}"));
    }

    #[tokio::test]
    async fn miss_is_404_with_empty_pattern() {
        let mux = Mux::new();
        let resolved = mux.resolve(&http::Method::GET, "/nowhere");
        assert!(resolved.pattern.is_empty());

        let rec = run(&resolved, http::Method::GET).await;
        assert_eq!(rec.status(), Some(StatusCode::NOT_FOUND));
        assert_eq!(rec.body_string(), "404 page not found\n");
    }

    #[tokio::test]
    async fn wrong_method_is_405_with_allow() {
        let mut mux = Mux::new();
        mux.register(Method::Get, "/things", named("get")).unwrap();
        mux.register(Method::Delete, "/things", named("delete")).unwrap();

        let resolved = mux.resolve(&http::Method::PUT, "/things");
        assert!(resolved.pattern.is_empty());
        let rec = run(&resolved, http::Method::PUT).await;
        assert_eq!(rec.status(), Some(StatusCode::METHOD_NOT_ALLOWED));
        assert_eq!(rec.header("allow").as_deref(), Some("GET, DELETE, HEAD"));
    }

    #[tokio::test]
    async fn head_falls_back_to_get() {
        let mut mux = Mux::new();
        mux.register(Method::Get, "/page", named("page")).unwrap();
        let resolved = mux.resolve(&http::Method::HEAD, "/page");
        assert_eq!(resolved.pattern, "/page");
    }
}
