//! Cancellation contexts.
//!
//! A [`Context`] is a cheap, clonable handle that answers one question: should
//! the work holding it stop? It becomes *done* when it is cancelled, when its
//! deadline passes, or when any ancestor becomes done. Children never affect
//! their parents.
//!
//! ```rust
//! use std::time::Duration;
//! use halyard::{Context, ContextError};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let root = Context::background();
//! let (ctx, cancel) = root.with_cancel();
//! let (bounded, _guard) = ctx.with_timeout(Duration::from_secs(5));
//!
//! cancel.cancel();
//! assert_eq!(bounded.done().await, ContextError::Canceled);
//! assert!(root.err().is_none());
//! # }
//! ```

use std::fmt;
use std::future::{self, Future};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{self, Instant};

/// Why a context is done.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ContextError {
    /// Explicitly cancelled through a [`CancelGuard`].
    Canceled,
    /// The deadline passed.
    DeadlineExceeded,
}

impl fmt::Display for ContextError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Canceled => f.write_str("context canceled"),
            Self::DeadlineExceeded => f.write_str("context deadline exceeded"),
        }
    }
}

impl std::error::Error for ContextError {}

/// What [`Context::done`] returns.
pub type DoneFuture<'a> = Pin<Box<dyn Future<Output = ContextError> + Send + 'a>>;

/// A hierarchical cancellation handle with an optional deadline.
#[derive(Clone)]
pub struct Context {
    inner: Arc<Inner>,
}

struct Inner {
    parent: Option<Context>,
    // Effective deadline: already folded with the parent's.
    deadline: Option<Instant>,
    cancelled: watch::Sender<Option<ContextError>>,
}

impl Context {
    /// The root context. Never cancelled, no deadline.
    pub fn background() -> Self {
        Self::derive(None, None)
    }

    /// A child that is done when `cancel` is called (or the guard dropped),
    /// or when `self` is done.
    pub fn with_cancel(&self) -> (Context, CancelGuard) {
        let child = Self::derive(Some(self.clone()), self.deadline());
        let guard = CancelGuard { ctx: child.clone() };
        (child, guard)
    }

    /// A child whose deadline is `timeout` from now, or the parent's
    /// deadline if that comes first. A zero timeout is already expired; a
    /// timeout too large to represent as an instant adds no deadline.
    pub fn with_timeout(&self, timeout: Duration) -> (Context, CancelGuard) {
        match Instant::now().checked_add(timeout) {
            Some(deadline) => self.with_deadline(deadline),
            None => self.with_cancel(),
        }
    }

    /// A child that expires at `deadline`, or at the parent's deadline if
    /// that comes first.
    pub fn with_deadline(&self, deadline: Instant) -> (Context, CancelGuard) {
        let effective = match self.deadline() {
            Some(parent) if parent < deadline => parent,
            _ => deadline,
        };
        let child = Self::derive(Some(self.clone()), Some(effective));
        let guard = CancelGuard { ctx: child.clone() };
        (child, guard)
    }

    fn derive(parent: Option<Context>, deadline: Option<Instant>) -> Self {
        let (cancelled, _) = watch::channel(None);
        Self { inner: Arc::new(Inner { parent, deadline, cancelled }) }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.inner.deadline
    }

    /// Returns why the context is done, or `None` while it is still live.
    pub fn err(&self) -> Option<ContextError> {
        if let Some(cause) = *self.inner.cancelled.borrow() {
            return Some(cause);
        }
        self.inherited_err()
    }

    pub fn is_done(&self) -> bool {
        self.err().is_some()
    }

    /// Causes that do not come from this context's own guard.
    fn inherited_err(&self) -> Option<ContextError> {
        if let Some(cause) = self.inner.parent.as_ref().and_then(Context::err) {
            return Some(cause);
        }
        match self.inner.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(ContextError::DeadlineExceeded),
            _ => None,
        }
    }

    /// Resolves once the context is done, yielding the cause.
    ///
    /// Cancel-safe: dropping the future has no effect on the context.
    pub fn done(&self) -> DoneFuture<'_> {
        Box::pin(async move {
            if let Some(cause) = self.err() {
                return cause;
            }

            let own = own_cancel(self.inner.cancelled.subscribe());

            let parent = async {
                match &self.inner.parent {
                    Some(parent) => parent.done().await,
                    None => future::pending().await,
                }
            };

            let expired = async {
                match self.inner.deadline {
                    Some(deadline) => {
                        time::sleep_until(deadline).await;
                        ContextError::DeadlineExceeded
                    }
                    None => future::pending().await,
                }
            };

            tokio::select! {
                biased;
                cause = own => cause,
                cause = parent => cause,
                cause = expired => cause,
            }
        })
    }

    fn cancel(&self) {
        let cause = self.inherited_err().unwrap_or(ContextError::Canceled);
        self.inner.cancelled.send_if_modified(|state| {
            if state.is_some() {
                return false;
            }
            *state = Some(cause);
            true
        });
    }
}

async fn own_cancel(mut rx: watch::Receiver<Option<ContextError>>) -> ContextError {
    match rx.wait_for(Option::is_some).await {
        Ok(state) => (*state).unwrap_or(ContextError::Canceled),
        // The sender lives as long as the context; unreachable while we hold it.
        Err(_) => ContextError::Canceled,
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("deadline", &self.inner.deadline)
            .field("err", &self.err())
            .finish()
    }
}

/// Cancels its context when [`cancel`](CancelGuard::cancel) is called or
/// when the guard is dropped, whichever happens first.
#[must_use = "dropping the guard cancels the context immediately"]
pub struct CancelGuard {
    ctx: Context,
}

impl CancelGuard {
    pub fn cancel(&self) {
        self.ctx.cancel();
    }
}

impl Drop for CancelGuard {
    fn drop(&mut self) {
        self.ctx.cancel();
    }
}
