//! Sink stages.
//!
//! A sink drains a channel and owns no output. Several sinks reading the same
//! channel form a worker pool.

use async_trait::async_trait;

use crate::cancel::CancelToken;
use crate::channel::Receiver;
use crate::core::{ExitReason, Result, Stage};
use crate::metrics;

/// A stage that hands every item to a side-effecting function.
pub struct ForEachStage<T, F> {
    name: String,
    input: Receiver<T>,
    f: F,
}

impl<T, F> ForEachStage<T, F> {
    /// Create a new for-each sink
    pub fn new(name: impl Into<String>, input: Receiver<T>, f: F) -> Self {
        Self {
            name: name.into(),
            input,
            f,
        }
    }
}

#[async_trait]
impl<T, F> Stage for ForEachStage<T, F>
where
    T: Send + 'static,
    F: FnMut(T) + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&mut self, token: &CancelToken) -> Result<()> {
        let mut consumed = 0usize;
        let reason = loop {
            match self.input.recv_or_cancel(token).await {
                Ok(Some(item)) => {
                    (self.f)(item);
                    consumed += 1;
                }
                Ok(None) => break ExitReason::Exhausted,
                Err(_) => break ExitReason::Cancelled,
            }
        };

        tracing::debug!(consumed, %reason, "sink stopped");
        metrics::stage_exited(&self.name, reason);
        Ok(())
    }
}
