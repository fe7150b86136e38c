//! End-to-end behaviour of compiled routers, driven without a socket.

use std::sync::Arc;
use std::time::Duration;

use canopy::{App, Group, HttpError, Recorder, Request, ResponseWriter, Route, Method, Timeout, middleware};
use http::{StatusCode, Uri};

fn get(path: &'static str) -> Request {
    Request::new(http::Method::GET, Uri::from_static(path))
}

async fn ok(w: ResponseWriter, _req: Request) {
    w.text(StatusCode::OK, "ok");
}

async fn slow(w: ResponseWriter, _req: Request) {
    tokio::time::sleep(Duration::from_millis(300)).await;
    w.text(StatusCode::OK, "finally");
}

async fn buggy(_w: ResponseWriter, _req: Request) {
    panic!("handler bug");
}

#[tokio::test]
async fn headers_resolve_across_three_levels() {
    let router = App::new()
        .header("x-level", "root")
        .header("x-root", "yes")
        .group(
            Group::new("/a")
                .header("x-level", "group")
                .header("x-group", "yes")
                .route(Route::new(Method::Get, "/own", ok).header("x-level", "route"))
                .get("/inherited", ok),
        )
        .build()
        .unwrap();

    let rec = Recorder::new();
    router.dispatch(rec.writer(), get("/a/own")).await.unwrap();
    assert_eq!(rec.header("x-level").as_deref(), Some("route"));
    assert_eq!(rec.header("x-group").as_deref(), Some("yes"));
    assert_eq!(rec.header("x-root").as_deref(), Some("yes"));

    let rec = Recorder::new();
    router.dispatch(rec.writer(), get("/a/inherited")).await.unwrap();
    assert_eq!(rec.header("x-level").as_deref(), Some("group"));
}

#[tokio::test]
async fn nearest_group_timeout_is_enforced() {
    let router = App::new()
        .timeout(Timeout::new(Duration::from_secs(10), "root timeout"))
        .group(
            Group::new("/api")
                .timeout(Timeout::new(Duration::from_millis(30), "api timeout"))
                .get("/slow", slow),
        )
        .build()
        .unwrap();

    let rec = Recorder::new();
    let err = router.dispatch(rec.writer(), get("/api/slow")).await.unwrap_err();
    assert_eq!(err.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(rec.status(), Some(StatusCode::SERVICE_UNAVAILABLE));
    assert_eq!(rec.body_string(), "api timeout");

    // the abandoned handler finishes but its write goes nowhere
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(rec.body_string(), "api timeout");
    assert_eq!(rec.header_calls(), 1);
}

#[tokio::test]
async fn handler_header_replaces_group_header_with_or_without_timeout() {
    for timeout in [Timeout::default(), Timeout::new(Duration::from_secs(1), "slow")] {
        let guarded = timeout.is_enabled();
        let router = App::new()
            .timeout(timeout)
            .group(Group::new("/api").header("content-type", "application/json").get("/text", ok))
            .build()
            .unwrap();

        let rec = Recorder::new();
        router.dispatch(rec.writer(), get("/api/text")).await.unwrap();
        let headers = rec.headers();
        let content_types: Vec<_> = headers.get_all("content-type").iter().collect();
        assert_eq!(content_types, ["text/plain; charset=utf-8"], "guarded: {guarded}");
    }
}

#[tokio::test]
async fn fast_handler_is_committed_exactly_once() {
    let router = App::new()
        .timeout(Timeout::new(Duration::from_secs(1), "slow"))
        .get("/", ok)
        .build()
        .unwrap();

    let rec = Recorder::new();
    router.dispatch(rec.writer(), get("/")).await.unwrap();
    assert_eq!(rec.status(), Some(StatusCode::OK));
    assert_eq!(rec.body_string(), "ok");
    assert_eq!(rec.header_calls(), 1);
    assert_eq!(rec.write_calls(), 1);
}

#[tokio::test]
async fn client_disconnect_reason_reaches_the_response() {
    let router = App::new()
        .timeout(Timeout::new(Duration::from_secs(10), "slow"))
        .get("/slow", slow)
        .build()
        .unwrap();

    let req = get("/slow");
    let ctx = req.context().clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        ctx.cancel("client disconnected");
    });

    let rec = Recorder::new();
    let err = router.dispatch(rec.writer(), req).await.unwrap_err();
    assert!(!err.is_timeout());
    assert_eq!(rec.status(), Some(StatusCode::SERVICE_UNAVAILABLE));
    assert_eq!(rec.body_string(), "client disconnected");
}

#[tokio::test]
async fn zero_error_handlers_never_intercept() {
    let router = App::new().get("/", ok).build().unwrap();
    for path in ["/", "/missing", "/also/missing"] {
        let req = Request::new(http::Method::GET, Uri::try_from(path).unwrap());
        router.dispatch(Recorder::new().writer(), req).await.unwrap();
    }
    assert_eq!(router.interceptions(), 0);
}

#[tokio::test]
async fn not_found_override_is_served_verbatim() {
    let router = App::new()
        .get("/", ok)
        .error_handler(StatusCode::NOT_FOUND, |w: ResponseWriter, _req: Request| async move {
            w.headers().insert("x-custom", "1".parse().unwrap());
            w.json(StatusCode::NOT_FOUND, r#"{"error":"gone fishing"}"#);
        })
        .build()
        .unwrap();

    let rec = Recorder::new();
    router.dispatch(rec.writer(), get("/missing")).await.unwrap();
    assert_eq!(rec.status(), Some(StatusCode::NOT_FOUND));
    assert_eq!(rec.header("x-custom").as_deref(), Some("1"));
    assert_eq!(rec.body_string(), r#"{"error":"gone fishing"}"#);

    let rec = Recorder::new();
    router.dispatch(rec.writer(), get("/")).await.unwrap();
    assert_eq!(rec.body_string(), "ok");
    assert_eq!(router.interceptions(), 1);
}

#[tokio::test]
async fn error_handlers_can_be_added_while_serving() {
    let router = Arc::new(App::new().get("/", ok).build().unwrap());

    let mut tasks = Vec::new();
    for i in 0..32 {
        let router = Arc::clone(&router);
        tasks.push(tokio::spawn(async move {
            if i == 16 {
                router.add_error_handler(StatusCode::NOT_FOUND, |w: ResponseWriter, _req: Request| async move {
                    w.text(StatusCode::NOT_FOUND, "late override");
                });
            }
            let rec = Recorder::new();
            router.dispatch(rec.writer(), get("/missing")).await.unwrap();
            rec.status()
        }));
    }
    for task in tasks {
        assert_eq!(task.await.unwrap(), Some(StatusCode::NOT_FOUND));
    }

    let rec = Recorder::new();
    router.dispatch(rec.writer(), get("/missing")).await.unwrap();
    assert_eq!(rec.body_string(), "late override");
    assert_eq!(router.error_handler_count(), 1);
}

#[tokio::test]
async fn recover_and_errors_wrap_guarded_routes() {
    let router = App::new()
        .pre_middleware(middleware::recover())
        .pre_middleware(middleware::errors())
        .timeout(Timeout::new(Duration::from_secs(1), "slow"))
        .get("/panic", buggy)
        .get("/fail", |w: ResponseWriter, _req: Request| async move {
            w.headers().insert(http::header::CONTENT_TYPE, "application/json".parse().unwrap());
            Err::<(), _>(HttpError::new(StatusCode::BAD_REQUEST, "missing name"))
        })
        .build()
        .unwrap();

    let rec = Recorder::new();
    router.dispatch(rec.writer(), get("/panic")).await.unwrap();
    assert_eq!(rec.status(), Some(StatusCode::INTERNAL_SERVER_ERROR));

    let rec = Recorder::new();
    let err = router.dispatch(rec.writer(), get("/fail")).await.unwrap_err();
    assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    assert_eq!(rec.status(), Some(StatusCode::BAD_REQUEST));
    let body: serde_json::Value = serde_json::from_slice(&rec.body()).unwrap();
    assert_eq!(body["error"]["message"], "missing name");
}
