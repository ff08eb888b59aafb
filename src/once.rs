//! One-time asynchronous initialization.

use std::future::Future;

use tokio::sync::OnceCell;

/// A lazily initialized value shared by concurrent callers.
///
/// The first caller of [`get_or_init`](Self::get_or_init) runs the
/// initializer; every other caller, concurrent or later, waits for and
/// observes that single result.
#[derive(Debug, Default)]
pub struct OnceInit<T> {
    cell: OnceCell<T>,
}

impl<T> OnceInit<T> {
    /// Create an empty cell
    pub const fn new() -> Self {
        Self {
            cell: OnceCell::const_new(),
        }
    }

    /// Return the value, running `init` if nobody has yet.
    pub async fn get_or_init<F, Fut>(&self, init: F) -> &T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        self.cell
            .get_or_init(|| async {
                tracing::debug!("running one-time initializer");
                init().await
            })
            .await
    }

    /// The value, if initialization has completed.
    pub fn get(&self) -> Option<&T> {
        self.cell.get()
    }

    /// Whether an initializer has completed
    pub fn is_initialized(&self) -> bool {
        self.cell.initialized()
    }
}
