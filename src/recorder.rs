//! An in-memory [`Sink`] that records what was written to it.
//!
//! Use it wherever a real connection is not available: unit tests, or probing
//! what a handler would answer without sending anything. It follows the same
//! single-commit rules as the connection sink and additionally counts every
//! call, so tests can assert that nothing was written twice.

use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use http::{HeaderMap, StatusCode};
use parking_lot::Mutex;
use tracing::warn;

use crate::error::Error;
use crate::response::{ResponseWriter, Sink};

/// Cloneable handle to a recording sink.
#[derive(Clone, Default)]
pub struct Recorder {
    state: Arc<Mutex<State>>,
}

#[derive(Default)]
struct State {
    pending: HeaderMap,
    sent: HeaderMap,
    status: Option<StatusCode>,
    body: BytesMut,
    header_calls: usize,
    write_calls: usize,
    flushes: usize,
}

impl Sink for State {
    fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.pending
    }

    fn write_header(&mut self, status: StatusCode) {
        self.header_calls += 1;
        if let Some(current) = self.status {
            warn!(%current, ignored = %status, "superfluous write_header call");
            return;
        }
        self.status = Some(status);
        self.sent = self.pending.clone();
    }

    fn write(&mut self, buf: &[u8]) -> usize {
        if self.status.is_none() {
            self.write_header(StatusCode::OK);
        }
        self.write_calls += 1;
        self.body.extend_from_slice(buf);
        buf.len()
    }

    fn status(&self) -> Option<StatusCode> {
        self.status
    }

    fn flush(&mut self) -> Result<(), Error> {
        self.flushes += 1;
        Ok(())
    }
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// A writer that records into this recorder.
    pub fn writer(&self) -> ResponseWriter {
        ResponseWriter::shared(&self.state)
    }

    pub fn status(&self) -> Option<StatusCode> {
        self.state.lock().status
    }

    /// Headers as they were when the status was committed, or the pending
    /// headers if nothing has been committed yet.
    pub fn headers(&self) -> HeaderMap {
        let state = self.state.lock();
        if state.status.is_some() { state.sent.clone() } else { state.pending.clone() }
    }

    /// First value of `name`, if present and valid UTF-8.
    pub fn header(&self, name: &str) -> Option<String> {
        self.headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned)
    }

    pub fn body(&self) -> Bytes {
        self.state.lock().body.clone().freeze()
    }

    pub fn body_string(&self) -> String {
        String::from_utf8_lossy(&self.body()).into_owned()
    }

    /// Number of `write_header` calls, including ignored ones.
    pub fn header_calls(&self) -> usize {
        self.state.lock().header_calls
    }

    /// Number of `write` calls.
    pub fn write_calls(&self) -> usize {
        self.state.lock().write_calls
    }

    pub fn flushes(&self) -> usize {
        self.state.lock().flushes
    }
}
