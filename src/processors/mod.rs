//! Transform stages.
//!
//! A transform reads one item at a time from its input, applies a function,
//! and writes the result to the channel it owns. Several transforms may read
//! the same input (fan-out); each item then goes to exactly one of them.

use std::fmt::Display;

use async_trait::async_trait;

use crate::cancel::CancelToken;
use crate::channel::{Receiver, Sender};
use crate::core::{Error, ExitReason, Result, Stage};
use crate::metrics;
use crate::tracker::TrackedSender;

/// Wait for the next input item, mapping closure and cancellation to an exit.
async fn next_item<T>(input: &Receiver<T>, token: &CancelToken) -> std::result::Result<T, ExitReason> {
    match input.recv_or_cancel(token).await {
        Ok(Some(item)) => Ok(item),
        Ok(None) => Err(ExitReason::Exhausted),
        Err(_) => Err(ExitReason::Cancelled),
    }
}

/// A stage that maps items using a function.
pub struct MapStage<T, U, F> {
    name: String,
    input: Receiver<T>,
    out: Sender<U>,
    f: F,
}

impl<T, U, F> MapStage<T, U, F> {
    /// Create a new map stage
    pub fn new(name: impl Into<String>, input: Receiver<T>, out: Sender<U>, f: F) -> Self {
        Self {
            name: name.into(),
            input,
            out,
            f,
        }
    }
}

#[async_trait]
impl<T, U, F> Stage for MapStage<T, U, F>
where
    T: Send + 'static,
    U: Send + 'static,
    F: FnMut(T) -> U + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&mut self, token: &CancelToken) -> Result<()> {
        let mut processed = 0usize;
        let reason = loop {
            let item = match next_item(&self.input, token).await {
                Ok(item) => item,
                Err(reason) => break reason,
            };
            let output = (self.f)(item);
            if let Err(err) = self.out.send(output, token).await {
                break ExitReason::from(err);
            }
            processed += 1;
            metrics::item_emitted(&self.name);
        };

        tracing::debug!(processed, %reason, "transform stopped");
        metrics::stage_exited(&self.name, reason);
        Ok(())
    }
}

/// A stage that maps items with a fallible function.
///
/// Failures travel downstream as `Err` items so one bad item never stops the
/// stage. With `fail_fast` set, the stage forwards the first failure and then
/// returns it as an [`Error::ItemFailed`], which makes the pipeline fire its
/// token.
pub struct TryMapStage<T, U, E, F> {
    name: String,
    input: Receiver<T>,
    out: Sender<std::result::Result<U, E>>,
    f: F,
    fail_fast: bool,
}

impl<T, U, E, F> TryMapStage<T, U, E, F> {
    /// Create a new fallible map stage
    pub fn new(
        name: impl Into<String>,
        input: Receiver<T>,
        out: Sender<std::result::Result<U, E>>,
        f: F,
    ) -> Self {
        Self {
            name: name.into(),
            input,
            out,
            f,
            fail_fast: false,
        }
    }

    /// Stop on the first failed item
    pub fn fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = fail_fast;
        self
    }
}

#[async_trait]
impl<T, U, E, F> Stage for TryMapStage<T, U, E, F>
where
    T: Send + 'static,
    U: Send + 'static,
    E: Display + Send + 'static,
    F: FnMut(T) -> std::result::Result<U, E> + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&mut self, token: &CancelToken) -> Result<()> {
        let mut failures = 0usize;
        let mut first_failure = None;
        let reason = loop {
            let item = match next_item(&self.input, token).await {
                Ok(item) => item,
                Err(reason) => break reason,
            };

            let output = (self.f)(item);
            if let Err(e) = &output {
                failures += 1;
                metrics::item_failed(&self.name);
                tracing::warn!(error = %e, "item failed");
                if self.fail_fast {
                    first_failure = Some(e.to_string());
                }
            }

            if let Err(err) = self.out.send(output, token).await {
                break ExitReason::from(err);
            }
            metrics::item_emitted(&self.name);
            if first_failure.is_some() {
                break ExitReason::Failed;
            }
        };

        tracing::debug!(failures, %reason, "fallible transform stopped");
        metrics::stage_exited(&self.name, reason);
        match first_failure {
            Some(message) => Err(Error::item_failed(&self.name, message)),
            None => Ok(()),
        }
    }
}

/// One branch of a merge: forwards an input to a shared, tracked output.
pub struct ForwardStage<T> {
    name: String,
    input: Receiver<T>,
    out: TrackedSender<T>,
}

impl<T> ForwardStage<T> {
    /// Create a new forwarding branch
    pub fn new(name: impl Into<String>, input: Receiver<T>, out: TrackedSender<T>) -> Self {
        Self {
            name: name.into(),
            input,
            out,
        }
    }
}

#[async_trait]
impl<T: Send + 'static> Stage for ForwardStage<T> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&mut self, token: &CancelToken) -> Result<()> {
        let mut forwarded = 0usize;
        let reason = loop {
            let item = match next_item(&self.input, token).await {
                Ok(item) => item,
                Err(reason) => break reason,
            };
            if let Err(err) = self.out.send(item, token).await {
                break ExitReason::from(err);
            }
            forwarded += 1;
        };

        tracing::debug!(forwarded, %reason, branch = self.out.index(), "merge branch stopped");
        metrics::stage_exited(&self.name, reason);
        Ok(())
    }
}
