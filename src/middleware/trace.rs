use std::time::Instant;

use http::StatusCode;
use tracing::{debug, error, info};

use super::Middleware;
use crate::capture::CaptureBuffer;
use crate::handler;
use crate::request::Request;
use crate::response::ResponseWriter;

/// Logs one line per request: method, client host, path with query, status
/// and latency.
///
/// The host is the `x-forwarded-for` chain when present, otherwise the
/// `host` header. Requests that fail or answer with a status of 400 or above
/// are logged at `error`, everything else at `info`.
pub fn trace() -> Middleware {
    Middleware::new(|next| {
        handler::boxed(move |w: ResponseWriter, req: Request| {
            let next = next.clone();
            async move {
                let method = req.method().clone();
                let host = client_host(&req);
                let path = match req.query() {
                    Some(q) => format!("{}?{q}", req.path()),
                    None => req.path().to_owned(),
                };

                let capture = CaptureBuffer::new(&w);
                let start = Instant::now();
                let result = next.call(capture.writer(), req).await;
                let latency_ms = start.elapsed().as_millis() as u64;
                capture.settle(result.is_err());

                let captured = capture.status().unwrap_or(StatusCode::OK);
                match &result {
                    Err(err) => {
                        error!(%method, %host, %path, status = err.status().as_u16(), latency_ms, "{}", err.message());
                    }
                    Ok(()) if captured.as_u16() >= 400 => {
                        let body = capture.body();
                        error!(%method, %host, %path, status = captured.as_u16(), latency_ms, "{}", String::from_utf8_lossy(&body));
                    }
                    Ok(()) => {
                        let reason = captured.canonical_reason().unwrap_or("");
                        info!(%method, %host, %path, status = captured.as_u16(), latency_ms, "{reason}");
                    }
                }
                result
            }
        })
    })
}

fn client_host(req: &Request) -> String {
    let forwarded: Vec<&str> = req.headers()
        .get_all("x-forwarded-for")
        .iter()
        .filter_map(|v| v.to_str().ok())
        .collect();
    if !forwarded.is_empty() {
        return forwarded.join(",");
    }
    let host = req.header("host")
        .or_else(|| req.uri().host())
        .unwrap_or_default()
        .to_owned();
    debug!(%host, "no x-forwarded-for header, using host");
    host
}
