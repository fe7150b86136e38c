use http::StatusCode;
use http::header::{CONTENT_TYPE, HeaderValue, X_CONTENT_TYPE_OPTIONS};

use super::Middleware;
use crate::capture::{CaptureBuffer, overlay_headers};
use crate::error::HttpError;
use crate::handler;
use crate::request::Request;
use crate::response::ResponseWriter;

/// Turns failures into error responses and error responses into failures.
///
/// The rest of the chain writes into a [`CaptureBuffer`]. Then:
///
/// - **Success with a status below 400**: the buffer is persisted as is.
/// - **Success with a status of 400 or above**: the buffer is persisted and
///   a failure carrying that status and the body is returned, so outer
///   layers can assume "no failure" means "no error".
/// - **Failure**: the buffered response is dropped (its headers are kept)
///   and the failure's status and message are written to the real writer,
///   as JSON if the pending `content-type` asks for it, plain text
///   otherwise. The failure is returned unchanged.
pub fn errors() -> Middleware {
    Middleware::new(|next| {
        handler::boxed(move |w: ResponseWriter, req: Request| {
            let next = next.clone();
            async move {
                let capture = CaptureBuffer::new(&w);
                match next.call(capture.writer(), req).await {
                    Ok(()) => {
                        capture.persist();
                        match capture.status() {
                            Some(status) if status.as_u16() >= 400 => {
                                let body = capture.body();
                                Err(HttpError::new(status, String::from_utf8_lossy(&body)))
                            }
                            _ => Ok(()),
                        }
                    }
                    Err(err) => {
                        let pending = capture.headers();
                        capture.discard();
                        overlay_headers(&mut w.headers(), &pending);
                        write_error(&w, err.status(), err.message());
                        Err(err)
                    }
                }
            }
        })
    })
}

/// Writes `status` and `message` as an error response.
///
/// A pending `content-type` of `application/json` or
/// `application/vnd.api+json` produces `{"error":{"code":N,"message":"..."}}`;
/// anything else produces a plain-text body.
pub(crate) fn write_error(w: &ResponseWriter, status: StatusCode, message: &str) {
    let json = {
        let mut headers = w.headers();
        let json = headers.get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_ascii_lowercase)
            .is_some_and(|ct| ct.contains("application/json") || ct.contains("application/vnd.api+json"));
        if !json {
            headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"));
        }
        headers.insert(X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff"));
        json
    };

    w.write_header(status);
    if json {
        let body = serde_json::json!({
            "error": { "code": status.as_u16(), "message": message },
        });
        let mut bytes = serde_json::to_vec(&body).unwrap_or_default();
        bytes.push(b'\n');
        w.write(bytes);
    } else {
        w.write(format!("{message}\n"));
    }
}
