use std::any::Any;
use std::panic::AssertUnwindSafe;

use futures_util::FutureExt;
use http::StatusCode;
use tracing::error;

use super::Middleware;
use crate::handler;
use crate::request::Request;
use crate::response::ResponseWriter;

/// Converts a panic anywhere below it into `500 Internal Server Error`.
///
/// Upgrade requests (`Connection: Upgrade`) get no status: the connection may
/// already belong to another protocol. Place this outside
/// [`timeout`](super::timeout) so panics re-raised by the executor land here.
pub fn recover() -> Middleware {
    Middleware::new(|next| {
        handler::boxed(move |w: ResponseWriter, req: Request| {
            let next = next.clone();
            async move {
                let upgrade = req.header("connection")
                    .is_some_and(|v| v.eq_ignore_ascii_case("upgrade"));
                let method = req.method().clone();
                let path = req.path().to_owned();

                match AssertUnwindSafe(next.call(w.clone(), req)).catch_unwind().await {
                    Ok(result) => result,
                    Err(panic) => {
                        error!(%method, %path, panic = panic_message(&*panic), "recovered from handler panic");
                        if !upgrade {
                            w.write_header(StatusCode::INTERNAL_SERVER_ERROR);
                        }
                        Ok(())
                    }
                }
            }
        })
    })
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s
    } else {
        "non-string panic payload"
    }
}
