//! Predicate waits on shared state.
//!
//! A [`Gate`] pairs a lock-protected state with a wakeup signal, for stages
//! that must block until some externally mutated state satisfies a condition
//! rather than until a message arrives. Waiters re-check their predicate after
//! every wake; a signal only means "look again".

use std::fmt;

use tokio::sync::{Mutex, MutexGuard, Notify};

use crate::cancel::CancelToken;
use crate::core::Cancelled;

/// Shared state guarded by a lock, with wait-until-predicate support.
pub struct Gate<S> {
    state: Mutex<S>,
    signal: Notify,
}

impl<S: Send> Gate<S> {
    /// Create a gate around `state`
    pub fn new(state: S) -> Self {
        Self {
            state: Mutex::new(state),
            signal: Notify::new(),
        }
    }

    /// Lock the state. Callers that mutate it must signal afterwards; prefer
    /// [`update`](Self::update).
    pub async fn lock(&self) -> MutexGuard<'_, S> {
        self.state.lock().await
    }

    /// Wait until `predicate` holds and return the lock with the state in
    /// that condition.
    pub async fn wait_until<P>(&self, mut predicate: P) -> MutexGuard<'_, S>
    where
        P: FnMut(&S) -> bool,
    {
        loop {
            // Register interest before checking, so a signal between the check
            // and the await is not lost.
            let notified = self.signal.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let guard = self.state.lock().await;
            if predicate(&guard) {
                return guard;
            }
            drop(guard);
            notified.await;
        }
    }

    /// Like [`wait_until`](Self::wait_until), but gives up when the token
    /// fires.
    pub async fn wait_until_or_cancel<P>(
        &self,
        predicate: P,
        token: &CancelToken,
    ) -> Result<MutexGuard<'_, S>, Cancelled>
    where
        P: FnMut(&S) -> bool,
    {
        tokio::select! {
            biased;
            _ = token.fired() => Err(Cancelled),
            guard = self.wait_until(predicate) => Ok(guard),
        }
    }

    /// Mutate the state under the lock, then wake every waiter.
    pub async fn update<R>(&self, f: impl FnOnce(&mut S) -> R) -> R {
        let result = {
            let mut guard = self.state.lock().await;
            f(&mut guard)
        };
        self.signal_all();
        result
    }

    /// Wake one waiter.
    pub fn signal_one(&self) {
        self.signal.notify_one();
    }

    /// Wake every current waiter.
    pub fn signal_all(&self) {
        self.signal.notify_waiters();
    }
}

impl<S> fmt::Debug for Gate<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Gate").finish_non_exhaustive()
    }
}
