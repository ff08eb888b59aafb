//! Cooperative cancellation.
//!
//! A [`CancelToken`] is shared by every stage of a pipeline. Firing it does not
//! interrupt anything directly; it only decides the outcome of the next
//! blocking wait each stage races against it.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio_util::sync::{
    CancellationToken, DropGuard, WaitForCancellationFuture, WaitForCancellationFutureOwned,
};

use crate::core::Cancelled;

/// Broadcast, idempotent stop signal.
///
/// Cloning is cheap and every clone observes the same state. A token moves
/// from active to fired exactly once and is never reset.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    inner: CancellationToken,
}

impl CancelToken {
    /// Create an active token
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire the token. Firing an already fired token is a no-op.
    pub fn fire(&self) {
        if !self.inner.is_cancelled() {
            tracing::info!("cancellation token fired");
        }
        self.inner.cancel();
    }

    /// Whether the token has fired
    pub fn is_fired(&self) -> bool {
        self.inner.is_cancelled()
    }

    /// Resolves once the token fires, immediately if it already has.
    pub fn fired(&self) -> WaitForCancellationFuture<'_> {
        self.inner.cancelled()
    }

    /// Owned variant of [`fired`](Self::fired) for futures that outlive the borrow.
    pub fn fired_owned(&self) -> WaitForCancellationFutureOwned {
        self.inner.clone().cancelled_owned()
    }

    /// A token that fires when this one does, but can also be fired on its own
    /// without affecting the parent.
    pub fn child(&self) -> CancelToken {
        CancelToken {
            inner: self.inner.child_token(),
        }
    }

    /// Fire this token when the returned guard is dropped.
    pub fn fire_on_drop(self) -> FireGuard {
        FireGuard {
            _guard: self.inner.drop_guard(),
        }
    }
}

/// Fires its token on drop. See [`CancelToken::fire_on_drop`].
#[must_use = "the token fires as soon as the guard is dropped"]
pub struct FireGuard {
    _guard: DropGuard,
}

/// A future raced against a [`CancelToken`].
///
/// Resolves to `Err(Cancelled)` if the token fires before the inner future
/// completes. The token is checked first on every poll, so a fired token wins
/// ties.
pub struct Cancellable<F> {
    future: Pin<Box<F>>,
    fired: Pin<Box<WaitForCancellationFutureOwned>>,
}

impl<F> Cancellable<F> {
    /// Create a new cancellable future
    pub fn new(future: F, token: &CancelToken) -> Self {
        Self {
            future: Box::pin(future),
            fired: Box::pin(token.fired_owned()),
        }
    }
}

impl<F: Future> Future for Cancellable<F> {
    type Output = Result<F::Output, Cancelled>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if self.fired.as_mut().poll(cx).is_ready() {
            return Poll::Ready(Err(Cancelled));
        }
        self.future.as_mut().poll(cx).map(Ok)
    }
}

/// Extension trait for racing any future against a token
pub trait CancellableExt: Future + Sized {
    /// Make this future cancellable
    fn or_cancel(self, token: &CancelToken) -> Cancellable<Self> {
        Cancellable::new(self, token)
    }
}

impl<F: Future> CancellableExt for F {}
