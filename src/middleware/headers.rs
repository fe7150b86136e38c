use std::sync::Arc;

use http::HeaderMap;

use super::Middleware;
use crate::handler;
use crate::request::Request;
use crate::response::ResponseWriter;

/// Appends every header in `headers` to the response before calling the rest
/// of the chain.
///
/// Values are appended, not replaced, so a handler that sets the same name
/// adds a second value rather than losing the injected one.
pub fn headers(headers: HeaderMap) -> Middleware {
    let headers = Arc::new(headers);
    Middleware::new(move |next| {
        let headers = Arc::clone(&headers);
        handler::boxed(move |w: ResponseWriter, req: Request| {
            {
                let mut pending = w.headers();
                for (name, value) in headers.iter() {
                    pending.append(name.clone(), value.clone());
                }
            }
            next.call(w, req)
        })
    })
}
