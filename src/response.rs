//! The response sink a handler writes into.
//!
//! Handlers do not return a response value. They receive a [`ResponseWriter`]
//! and write a status, headers and a body into it. What sits behind the
//! writer varies: the connection's real response, a
//! [`CaptureBuffer`](crate::CaptureBuffer) that holds everything back until it
//! is committed, or a [`Recorder`](crate::Recorder) in tests. All of them
//! implement [`Sink`].
//!
//! Single-commit semantics mirror HTTP itself: the first `write_header` wins,
//! later calls are logged and ignored, and writing a body without a status
//! commits `200 OK`.

use std::sync::Arc;

use http::header::{CONTENT_TYPE, HeaderMap, HeaderValue};
use http::StatusCode;
use hyper::upgrade::OnUpgrade;
use parking_lot::{MappedMutexGuard, Mutex, MutexGuard};

use crate::error::Error;

// ── Sink ─────────────────────────────────────────────────────────────────────

/// Anything a handler can write a response into.
///
/// The optional capabilities (`flush`, `push`, `hijack`) default to
/// [`Error::Unsupported`]; sinks that can do better override them.
pub trait Sink: Send {
    /// Headers that will be sent when the status is committed.
    fn headers_mut(&mut self) -> &mut HeaderMap;

    /// Commits the status code. Only the first call has an effect.
    fn write_header(&mut self, status: StatusCode);

    /// Appends to the body, committing `200 OK` first if no status is set.
    /// Returns the number of bytes accepted.
    fn write(&mut self, buf: &[u8]) -> usize;

    /// The committed status, if any.
    fn status(&self) -> Option<StatusCode>;

    fn flush(&mut self) -> Result<(), Error> {
        Err(Error::Unsupported("flush"))
    }

    /// HTTP/2 server push of `target`.
    fn push(&mut self, _target: &str) -> Result<(), Error> {
        Err(Error::Unsupported("push"))
    }

    /// Takes over the underlying connection after a protocol upgrade.
    fn hijack(&mut self) -> Result<OnUpgrade, Error> {
        Err(Error::Unsupported("hijack"))
    }
}

// ── ResponseWriter ───────────────────────────────────────────────────────────

/// A cloneable handle to a [`Sink`].
///
/// Every clone refers to the same sink. Each call takes a short lock; never
/// hold the guard returned by [`headers`](ResponseWriter::headers) across an
/// `.await`.
#[derive(Clone)]
pub struct ResponseWriter {
    sink: Arc<Mutex<dyn Sink>>,
}

impl ResponseWriter {
    pub fn new(sink: impl Sink + 'static) -> Self {
        Self { sink: Arc::new(Mutex::new(sink)) }
    }

    /// Wraps a sink the caller keeps a typed handle to.
    pub(crate) fn shared<S: Sink + 'static>(sink: &Arc<Mutex<S>>) -> Self {
        let sink: Arc<Mutex<dyn Sink>> = sink.clone();
        Self { sink }
    }

    /// Mutable access to the pending headers.
    pub fn headers(&self) -> MappedMutexGuard<'_, HeaderMap> {
        MutexGuard::map(self.sink.lock(), |s| s.headers_mut())
    }

    pub fn write_header(&self, status: StatusCode) {
        self.sink.lock().write_header(status);
    }

    pub fn write(&self, buf: impl AsRef<[u8]>) -> usize {
        self.sink.lock().write(buf.as_ref())
    }

    pub fn status(&self) -> Option<StatusCode> {
        self.sink.lock().status()
    }

    /// True once a status has been committed.
    pub fn is_written(&self) -> bool {
        self.status().is_some()
    }

    pub fn flush(&self) -> Result<(), Error> {
        self.sink.lock().flush()
    }

    pub fn push(&self, target: &str) -> Result<(), Error> {
        self.sink.lock().push(target)
    }

    pub fn hijack(&self) -> Result<OnUpgrade, Error> {
        self.sink.lock().hijack()
    }

    /// Writes `status` with a `text/plain; charset=utf-8` body.
    pub fn text(&self, status: StatusCode, body: impl AsRef<str>) {
        self.send(status, ContentType::Text, body.as_ref().as_bytes());
    }

    /// Writes `status` with an `application/json` body. Pass bytes straight
    /// from your serialiser.
    pub fn json(&self, status: StatusCode, body: impl AsRef<[u8]>) {
        self.send(status, ContentType::Json, body.as_ref());
    }

    /// Writes `status` with a body of the given content type.
    pub fn send(&self, status: StatusCode, content_type: ContentType, body: &[u8]) {
        let mut sink = self.sink.lock();
        sink.headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static(content_type.as_str()));
        sink.write_header(status);
        if !body.is_empty() {
            sink.write(body);
        }
    }
}

impl std::fmt::Debug for ResponseWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseWriter")
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

// ── ContentType ──────────────────────────────────────────────────────────────

/// Common content-type values for [`ResponseWriter::send`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ContentType {
    Csv,          // text/csv
    EventStream,  // text/event-stream  (SSE)
    Html,         // text/html; charset=utf-8
    Json,         // application/json
    OctetStream,  // application/octet-stream
    Text,         // text/plain; charset=utf-8
    Xml,          // application/xml
}

impl ContentType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Csv         => "text/csv",
            Self::EventStream => "text/event-stream",
            Self::Html        => "text/html; charset=utf-8",
            Self::Json        => "application/json",
            Self::OctetStream => "application/octet-stream",
            Self::Text        => "text/plain; charset=utf-8",
            Self::Xml         => "application/xml",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Recorder;

    #[test]
    fn clones_share_one_sink() {
        let rec = Recorder::new();
        let w = rec.writer();
        let other = w.clone();
        other.headers().insert("x-a", HeaderValue::from_static("1"));
        w.write("hi");
        assert_eq!(other.status(), Some(StatusCode::OK));
        assert_eq!(rec.header("x-a").as_deref(), Some("1"));
        assert_eq!(rec.body(), b"hi".as_slice());
    }

    #[test]
    fn text_sets_content_type() {
        let rec = Recorder::new();
        rec.writer().text(StatusCode::CREATED, "made");
        assert_eq!(rec.status(), Some(StatusCode::CREATED));
        assert_eq!(rec.header("content-type").as_deref(), Some("text/plain; charset=utf-8"));
        assert_eq!(rec.body(), b"made".as_slice());
    }

    #[test]
    fn push_is_unsupported_by_default() {
        let rec = Recorder::new();
        assert!(matches!(rec.writer().push("/style.css"), Err(Error::Unsupported("push"))));
    }
}
