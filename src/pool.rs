//! Object reuse for per-item scratch allocations.
//!
//! A [`Pool`] hands out [`Slot`]s. A slot derefs to the pooled object and
//! returns it to the pool when dropped, so release happens on every exit path
//! including `?` and panics. Objects are reset before they go back on the idle
//! list. Retention is only an optimization: a pool can always be bypassed by
//! allocating directly.

use std::collections::VecDeque;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

/// Restores an object to a reusable, empty state.
pub trait Reset {
    fn reset(&mut self);
}

impl<T> Reset for Vec<T> {
    fn reset(&mut self) {
        self.clear();
    }
}

impl<T> Reset for VecDeque<T> {
    fn reset(&mut self) {
        self.clear();
    }
}

impl Reset for String {
    fn reset(&mut self) {
        self.clear();
    }
}

/// Point-in-time pool counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Objects created because the idle list was empty
    pub allocations: usize,
    /// Acquisitions served from the idle list
    pub reuses: usize,
    /// Released objects dropped because the idle list was full
    pub discarded: usize,
    /// Objects currently idle
    pub idle: usize,
}

struct PoolInner<T> {
    idle: Mutex<Vec<T>>,
    make: Box<dyn Fn() -> T + Send + Sync>,
    max_idle: Option<usize>,
    allocations: AtomicUsize,
    reuses: AtomicUsize,
    discarded: AtomicUsize,
}

/// A shared pool of reusable objects.
pub struct Pool<T> {
    inner: Arc<PoolInner<T>>,
}

impl<T> Clone for Pool<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Reset + Send + 'static> Pool<T> {
    /// Create an unbounded pool that allocates with `make`
    pub fn new<F>(make: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        Self::build(make, None)
    }

    /// Create a pool that keeps at most `max_idle` objects; excess releases
    /// are dropped.
    pub fn bounded<F>(max_idle: usize, make: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        Self::build(make, Some(max_idle))
    }

    fn build<F>(make: F, max_idle: Option<usize>) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(PoolInner {
                idle: Mutex::new(Vec::new()),
                make: Box::new(make),
                max_idle,
                allocations: AtomicUsize::new(0),
                reuses: AtomicUsize::new(0),
                discarded: AtomicUsize::new(0),
            }),
        }
    }

    /// Take an idle object, or allocate one if none is idle.
    pub fn acquire(&self) -> Slot<T> {
        let reused = self.inner.idle.lock().pop();
        let value = match reused {
            Some(value) => {
                self.inner.reuses.fetch_add(1, Ordering::Relaxed);
                value
            }
            None => {
                self.inner.allocations.fetch_add(1, Ordering::Relaxed);
                (self.inner.make)()
            }
        };
        Slot {
            value: Some(value),
            pool: self.clone(),
        }
    }

    /// Return a slot's object to this pool. Same as dropping the slot.
    pub fn release(&self, mut slot: Slot<T>) {
        if let Some(value) = slot.value.take() {
            self.put(value);
        }
    }

    fn put(&self, mut value: T) {
        value.reset();
        let mut idle = self.inner.idle.lock();
        match self.inner.max_idle {
            Some(max) if idle.len() >= max => {
                drop(idle);
                self.inner.discarded.fetch_add(1, Ordering::Relaxed);
                tracing::trace!(max_idle = max, "pool full, object discarded");
            }
            _ => idle.push(value),
        }
    }

    /// Snapshot of the pool counters
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            allocations: self.inner.allocations.load(Ordering::Relaxed),
            reuses: self.inner.reuses.load(Ordering::Relaxed),
            discarded: self.inner.discarded.load(Ordering::Relaxed),
            idle: self.inner.idle.lock().len(),
        }
    }
}

impl<T: Reset + Send + 'static> fmt::Debug for Pool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("max_idle", &self.inner.max_idle)
            .field("stats", &self.stats())
            .finish()
    }
}

/// Exclusive ownership of one pooled object until dropped.
pub struct Slot<T: Reset + Send + 'static> {
    value: Option<T>,
    pool: Pool<T>,
}

impl<T: Reset + Send + 'static> Slot<T> {
    /// Keep the object; it will not return to the pool.
    pub fn detach(mut self) -> T {
        match self.value.take() {
            Some(value) => value,
            None => unreachable!("slot emptied before drop"),
        }
    }
}

impl<T: Reset + Send + 'static> Deref for Slot<T> {
    type Target = T;

    fn deref(&self) -> &T {
        match &self.value {
            Some(value) => value,
            None => unreachable!("slot emptied before drop"),
        }
    }
}

impl<T: Reset + Send + 'static> DerefMut for Slot<T> {
    fn deref_mut(&mut self) -> &mut T {
        match &mut self.value {
            Some(value) => value,
            None => unreachable!("slot emptied before drop"),
        }
    }
}

impl<T: Reset + Send + 'static> Drop for Slot<T> {
    fn drop(&mut self) {
        if let Some(value) = self.value.take() {
            self.pool.put(value);
        }
    }
}

impl<T: Reset + Send + fmt::Debug + 'static> fmt::Debug for Slot<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Slot").field(&self.value).finish()
    }
}
