//! Response capture buffer.
//!
//! A [`CaptureBuffer`] stands in for a real response writer. Handlers write a
//! status, headers and body into it exactly as they would into the
//! connection, but nothing reaches the target until [`persist`] is called.
//! That lets an outer layer look at a response before committing it (turning
//! an error status into a structured body, say) or throw it away entirely
//! (the timeout executor does this when a deadline fires).
//!
//! Lifecycle:
//!
//! ```text
//! new(target) ──writes──▶ buffered ──persist()──▶ committed (target written once)
//!                            │
//!                            └──discard()──▶ discarded (target never written)
//! ```
//!
//! [`persist`]: CaptureBuffer::persist

use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use http::{HeaderMap, StatusCode};
use hyper::upgrade::OnUpgrade;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::Error;
use crate::response::{ResponseWriter, Sink};

/// Cloneable handle to one request's capture buffer.
///
/// Never share a buffer between requests.
#[derive(Clone)]
pub struct CaptureBuffer {
    state: Arc<Mutex<State>>,
}

struct State {
    target: Option<ResponseWriter>,
    pending: HeaderMap,
    status: Option<StatusCode>,
    body: BytesMut,
    committed: bool,
    discarded: bool,
}

impl State {
    fn target(&self, capability: &'static str) -> Result<&ResponseWriter, Error> {
        match &self.target {
            Some(target) if !self.discarded => Ok(target),
            _ => Err(Error::Unsupported(capability)),
        }
    }
}

impl Sink for State {
    fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.pending
    }

    fn write_header(&mut self, status: StatusCode) {
        if let Some(current) = self.status {
            warn!(%current, ignored = %status, "superfluous write_header call on capture buffer");
            return;
        }
        self.status = Some(status);
    }

    fn write(&mut self, buf: &[u8]) -> usize {
        if self.status.is_none() {
            self.status = Some(StatusCode::OK);
        }
        if !self.discarded {
            self.body.extend_from_slice(buf);
        }
        buf.len()
    }

    fn status(&self) -> Option<StatusCode> {
        self.status
    }

    fn flush(&mut self) -> Result<(), Error> {
        self.target("flush")?.flush()
    }

    fn push(&mut self, target: &str) -> Result<(), Error> {
        self.target("push")?.push(target)
    }

    fn hijack(&mut self) -> Result<OnUpgrade, Error> {
        self.target("hijack")?.hijack()
    }
}

impl CaptureBuffer {
    /// A buffer that commits into `target`.
    pub fn new(target: &ResponseWriter) -> Self {
        Self::with_target(Some(target.clone()))
    }

    /// A buffer with no target: it only observes. `persist` writes nothing
    /// and optional capabilities report unsupported.
    pub fn detached() -> Self {
        Self::with_target(None)
    }

    fn with_target(target: Option<ResponseWriter>) -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                target,
                pending: HeaderMap::new(),
                status: None,
                body: BytesMut::new(),
                committed: false,
                discarded: false,
            })),
        }
    }

    /// A writer that writes into this buffer.
    pub fn writer(&self) -> ResponseWriter {
        ResponseWriter::shared(&self.state)
    }

    /// The status recorded so far.
    pub fn status(&self) -> Option<StatusCode> {
        self.state.lock().status
    }

    pub fn body(&self) -> Bytes {
        self.state.lock().body.clone().freeze()
    }

    pub fn headers(&self) -> HeaderMap {
        self.state.lock().pending.clone()
    }

    pub fn is_committed(&self) -> bool {
        self.state.lock().committed
    }

    /// Writes the pending headers, the status (`200 OK` if none was
    /// recorded) and the body to the target, in that order.
    ///
    /// Only the first call writes anything; it returns `true` when it did.
    /// The buffered values stay readable afterwards.
    pub fn persist(&self) -> bool {
        self.commit(true)
    }

    /// Commits after a handler finished. A failure that left no status
    /// behind forwards only the headers, so the layer handling the failure
    /// still picks the status.
    pub fn settle(&self, failed: bool) -> bool {
        let unwritten = self.status().is_none();
        self.commit(!(failed && unwritten))
    }

    fn commit(&self, response: bool) -> bool {
        let (target, headers, status, body) = {
            let mut state = self.state.lock();
            if state.committed {
                debug!(discarded = state.discarded, "capture buffer already committed");
                return false;
            }
            state.committed = true;
            let Some(target) = state.target.clone() else {
                return false;
            };
            (
                target,
                state.pending.clone(),
                state.status.unwrap_or(StatusCode::OK),
                state.body.clone().freeze(),
            )
        };

        overlay_headers(&mut target.headers(), &headers);
        if response {
            target.write_header(status);
            if !body.is_empty() {
                target.write(&body);
            }
        }
        true
    }

    /// Detaches the buffer for good: later writes are dropped, `persist`
    /// becomes a no-op and capabilities stop reaching the target.
    pub fn discard(&self) {
        let mut state = self.state.lock();
        state.discarded = true;
        state.committed = true;
        state.target = None;
        state.body.clear();
    }
}

/// Copies `captured` onto `target`. A captured name replaces every value the
/// target already holds for it; multiple captured values are all kept.
pub(crate) fn overlay_headers(target: &mut HeaderMap, captured: &HeaderMap) {
    for name in captured.keys() {
        target.remove(name);
    }
    for (name, value) in captured {
        target.append(name.clone(), value.clone());
    }
}

impl std::fmt::Debug for CaptureBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("CaptureBuffer")
            .field("status", &state.status)
            .field("body_len", &state.body.len())
            .field("committed", &state.committed)
            .field("discarded", &state.discarded)
            .finish()
    }
}
