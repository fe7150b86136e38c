//! Minimal canopy example: a versioned JSON API with group-level headers,
//! timeouts, a custom 404 and the built-in middleware.
//!
//! Run with:
//!   RUST_LOG=info cargo run --example basic
//!
//! Try:
//!   curl -i http://localhost:8080/api/v1/users/42
//!   curl -i -X POST http://localhost:8080/api/v1/users -d '{"name":"alice"}'
//!   curl -i http://localhost:8080/api/v1/slow        # 503 after 1 s
//!   curl -i http://localhost:8080/nowhere            # custom 404
//!   curl -i http://localhost:8080/healthz

use std::time::Duration;

use canopy::{
    App, Config, Group, HttpError, Request, ResponseWriter, Route, Method, Server, Timeout,
    middleware,
};
use http::StatusCode;

#[tokio::main]
async fn main() -> Result<(), canopy::Error> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env()?;

    let api = Group::new("/api")
        .header("content-type", "application/json")
        .header("cache-control", "no-store")
        .group(
            Group::new("/v1")
                .timeout(Timeout::new(Duration::from_secs(1), "v1 is taking too long"))
                .get("/users/{id}", get_user)
                .post("/users", create_user)
                .delete("/users/{id}", delete_user)
                .get("/slow", slow),
        );

    let app = App::with_config(&config)
        .pre_middleware(middleware::trace())
        .pre_middleware(middleware::recover())
        .pre_middleware(middleware::errors())
        .route(Route::new(Method::Get, "/healthz", healthz).timeout(Timeout::default()))
        .group(api)
        .error_handler(StatusCode::NOT_FOUND, not_found);

    Server::from_config(&config)?.serve(app).await
}

// GET /api/v1/users/{id}
async fn get_user(w: ResponseWriter, req: Request) -> Result<(), HttpError> {
    let id = req.param("id").unwrap_or_default();
    if id.parse::<u64>().is_err() {
        return Err(HttpError::new(StatusCode::BAD_REQUEST, "user id must be numeric"));
    }
    w.json(StatusCode::OK, format!(r#"{{"id":"{id}","name":"alice"}}"#));
    Ok(())
}

// POST /api/v1/users
async fn create_user(w: ResponseWriter, req: Request) -> Result<(), HttpError> {
    let input: serde_json::Value = serde_json::from_slice(req.body())
        .map_err(|e| HttpError::new(StatusCode::BAD_REQUEST, e.to_string()))?;
    let name = input["name"].as_str().unwrap_or("anonymous");

    w.headers().insert(http::header::LOCATION, http::HeaderValue::from_static("/api/v1/users/99"));
    w.json(StatusCode::CREATED, format!(r#"{{"id":"99","name":"{name}"}}"#));
    Ok(())
}

// DELETE /api/v1/users/{id} → 204 No Content
async fn delete_user(w: ResponseWriter, _req: Request) {
    w.write_header(StatusCode::NO_CONTENT);
}

// Ignores its context; the client still gets a 503 after one second.
async fn slow(w: ResponseWriter, _req: Request) {
    tokio::time::sleep(Duration::from_secs(3)).await;
    w.json(StatusCode::OK, r#"{"done":true}"#);
}

async fn healthz(w: ResponseWriter, _req: Request) {
    w.text(StatusCode::OK, "ok");
}

async fn not_found(w: ResponseWriter, req: Request) {
    let body = serde_json::json!({ "error": { "code": 404, "message": format!("no route for {}", req.path()) } });
    w.json(StatusCode::NOT_FOUND, body.to_string());
}
