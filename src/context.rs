//! Per-request cancellation context.
//!
//! Every [`Request`](crate::Request) carries a [`Context`]. The server creates
//! a background context per request and cancels it with the reason
//! `"client disconnected"` if hyper drops the request future. The timeout
//! executor derives a child with [`Context::with_timeout`]; the child ends at
//! its deadline or as soon as any ancestor is cancelled, whichever comes
//! first. Cancelling a child never touches its parent or siblings.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

const CANCELED: &str = "context canceled";

/// Why a context ended.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum Cancelled {
    #[error("context deadline exceeded")]
    DeadlineExceeded,

    /// Cancelled explicitly; carries the reason given to [`Context::cancel`].
    #[error("{0}")]
    Canceled(String),
}

/// A cheaply cloneable, cancellable scope with an optional deadline.
#[derive(Clone, Debug)]
pub struct Context {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    token: CancellationToken,
    deadline: Option<Instant>,
    cause: OnceLock<Cancelled>,
    parent: Option<Context>,
}

impl Context {
    /// A root context: no deadline, never cancelled unless told to.
    pub fn background() -> Self {
        Self::from_parts(CancellationToken::new(), None, None)
    }

    /// Derives a child that ends `timeout` from now, or earlier if this
    /// context has a closer deadline or gets cancelled.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let own = Instant::now().checked_add(timeout);
        let deadline = match (self.deadline(), own) {
            (Some(parent), Some(own)) => Some(parent.min(own)),
            (parent, own) => parent.or(own),
        };
        Self::from_parts(self.inner.token.child_token(), deadline, Some(self.clone()))
    }

    fn from_parts(token: CancellationToken, deadline: Option<Instant>, parent: Option<Context>) -> Self {
        Self {
            inner: Arc::new(Inner { token, deadline, cause: OnceLock::new(), parent }),
        }
    }

    /// Cancels this context and every context derived from it. The first
    /// reason recorded wins.
    pub fn cancel(&self, reason: impl Into<String>) {
        self.cancel_with(Cancelled::Canceled(reason.into()));
    }

    fn cancel_with(&self, cause: Cancelled) {
        let _ = self.inner.cause.set(cause);
        self.inner.token.cancel();
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.inner.deadline
    }

    /// `None` while the context is live, otherwise why it ended.
    pub fn err(&self) -> Option<Cancelled> {
        if let Some(cause) = self.inner.cause.get() {
            return Some(cause.clone());
        }
        if self.inner.deadline.is_some_and(|d| Instant::now() >= d) {
            return Some(Cancelled::DeadlineExceeded);
        }
        if let Some(cause) = self.inner.parent.as_ref().and_then(Context::err) {
            return Some(cause);
        }
        if self.inner.token.is_cancelled() {
            return Some(Cancelled::Canceled(CANCELED.to_owned()));
        }
        None
    }

    pub fn is_cancelled(&self) -> bool {
        self.err().is_some()
    }

    /// Resolves once the context ends and reports why.
    ///
    /// Reaching the deadline cancels the context, so every clone (and every
    /// derived context) observes it too.
    pub async fn done(&self) -> Cancelled {
        match self.inner.deadline {
            Some(deadline) => tokio::select! {
                biased;
                () = self.inner.token.cancelled() => {}
                () = tokio::time::sleep_until(deadline) => {
                    self.cancel_with(Cancelled::DeadlineExceeded);
                }
            },
            None => self.inner.token.cancelled().await,
        }
        self.err().unwrap_or_else(|| Cancelled::Canceled(CANCELED.to_owned()))
    }
}

impl Default for Context {
    fn default() -> Self { Self::background() }
}

/// Cancels a context when dropped unless disarmed first.
///
/// The server holds one per request: if hyper drops the request future
/// because the client went away, the guard fires.
pub(crate) struct CancelOnDrop {
    ctx: Option<Context>,
    reason: &'static str,
}

impl CancelOnDrop {
    pub(crate) fn new(ctx: Context, reason: &'static str) -> Self {
        Self { ctx: Some(ctx), reason }
    }

    pub(crate) fn disarm(mut self) {
        self.ctx = None;
    }
}

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        if let Some(ctx) = self.ctx.take() {
            ctx.cancel(self.reason);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn background_is_live() {
        let ctx = Context::background();
        assert!(ctx.err().is_none());
        assert!(ctx.deadline().is_none());
    }

    #[test]
    fn first_cancel_reason_wins() {
        let ctx = Context::background();
        ctx.cancel("first");
        ctx.cancel("second");
        assert_eq!(ctx.err(), Some(Cancelled::Canceled("first".into())));
    }

    #[tokio::test]
    async fn deadline_ends_child_only() {
        let parent = Context::background();
        let child = parent.with_timeout(Duration::from_millis(20));
        assert_eq!(child.done().await, Cancelled::DeadlineExceeded);
        assert!(child.is_cancelled());
        assert!(parent.err().is_none());
    }

    #[tokio::test]
    async fn parent_reason_reaches_child() {
        let parent = Context::background();
        let child = parent.with_timeout(Duration::from_secs(60));
        parent.cancel("client disconnected");
        assert_eq!(child.done().await, Cancelled::Canceled("client disconnected".into()));
    }

    #[test]
    fn child_keeps_closer_parent_deadline() {
        let parent = Context::background().with_timeout(Duration::from_millis(10));
        let child = parent.with_timeout(Duration::from_secs(60));
        assert_eq!(child.deadline(), parent.deadline());
    }

    #[test]
    fn guard_cancels_unless_disarmed() {
        let ctx = Context::background();
        drop(CancelOnDrop::new(ctx.clone(), "gone"));
        assert_eq!(ctx.err(), Some(Cancelled::Canceled("gone".into())));

        let ctx = Context::background();
        CancelOnDrop::new(ctx.clone(), "gone").disarm();
        assert!(ctx.err().is_none());
    }
}
