//! Pipeline construction and lifecycle.
//!
//! A [`Pipeline`] spawns stages, hands out the channels that connect them, and
//! threads one [`CancelToken`] through all of them. Topology is built by
//! chaining calls: every builder method returns the receiving end of the
//! channel the new stage owns.
//!
//! ```rust
//! use pipeweld::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let (pipeline, _token) = Pipeline::new();
//!     let numbers = pipeline.source(vec![2, 3]);
//!     let squares = pipeline.transform(numbers, |n: i32| n * n);
//!     assert_eq!(squares.drain().await, vec![4, 9]);
//!     pipeline.join().await
//! }
//! ```

mod fan;

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use parking_lot::Mutex;
use tokio_util::task::TaskTracker;
use tracing::Instrument;

use crate::cancel::CancelToken;
use crate::channel::{named_channel, Capacity, Receiver, Sender};
use crate::core::{Error, Result, Stage};
use crate::processors::{MapStage, TryMapStage};
use crate::sources::IterSource;

/// Configuration for pipeline execution
#[derive(Debug, Clone)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(default)
)]
pub struct PipelineConfig {
    /// Prefix for stage and channel names
    pub name: String,
    /// Capacity of every channel the pipeline creates
    pub capacity: Capacity,
    /// Whether to fire the token on the first stage failure
    pub fail_fast: bool,
    /// How long `shutdown` waits for stages after firing the token
    pub shutdown_grace: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            name: "pipeline".to_string(),
            capacity: Capacity::Rendezvous,
            fail_fast: false,
            shutdown_grace: Duration::from_millis(50),
        }
    }
}

impl PipelineConfig {
    /// Set the pipeline name
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the channel capacity
    pub fn capacity(mut self, capacity: impl Into<Capacity>) -> Self {
        self.capacity = capacity.into();
        self
    }

    /// Set whether to fail fast on errors
    pub fn fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = fail_fast;
        self
    }

    /// Set the shutdown grace period
    pub fn shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// Reject settings the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.capacity == Capacity::Bounded(0) {
            return Err(Error::invalid_config(
                "bounded capacity must be at least 1; use Capacity::Rendezvous for 0",
            ));
        }
        if self.shutdown_grace.is_zero() {
            return Err(Error::invalid_config("shutdown grace must be non-zero"));
        }
        Ok(())
    }
}

/// A set of concurrently running stages sharing one cancellation token.
///
/// Builder methods must be called from inside a tokio runtime. Dropping the
/// pipeline fires its token, so every stage unwinds once the owner is gone.
pub struct Pipeline {
    config: PipelineConfig,
    token: CancelToken,
    tasks: TaskTracker,
    failure: Arc<Mutex<Option<Error>>>,
    next_id: AtomicUsize,
}

impl Pipeline {
    /// Create a pipeline with the default configuration
    pub fn new() -> (Pipeline, CancelToken) {
        Self::build(PipelineConfig::default())
    }

    /// Create a pipeline with a validated configuration
    pub fn with_config(config: PipelineConfig) -> Result<(Pipeline, CancelToken)> {
        config.validate()?;
        Ok(Self::build(config))
    }

    fn build(config: PipelineConfig) -> (Pipeline, CancelToken) {
        let token = CancelToken::new();
        tracing::debug!(
            pipeline = %config.name,
            capacity = %config.capacity,
            fail_fast = config.fail_fast,
            "pipeline created"
        );
        let pipeline = Pipeline {
            config,
            token: token.clone(),
            tasks: TaskTracker::new(),
            failure: Arc::new(Mutex::new(None)),
            next_id: AtomicUsize::new(0),
        };
        (pipeline, token)
    }

    /// The token shared by every stage
    pub fn token(&self) -> &CancelToken {
        &self.token
    }

    /// The configuration this pipeline runs with
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Number of stages that have not exited yet
    pub fn active_stages(&self) -> usize {
        self.tasks.len()
    }

    /// Create a channel with the pipeline's capacity, for custom stages.
    pub fn channel<T>(&self) -> (Sender<T>, Receiver<T>) {
        let name = self.stage_name("channel");
        named_channel(name, self.config.capacity)
    }

    /// Spawn a stage.
    ///
    /// The stage runs inside a `stage` tracing span. It is dropped as soon as
    /// `run` returns or panics, which closes the channels it owns. Errors and
    /// panics are recorded for [`join`](Self::join); panics always fire the
    /// token, errors do so only under `fail_fast`.
    pub fn spawn<S: Stage>(&self, stage: S) {
        let name = stage.name().to_string();
        let token = self.token.clone();
        let failure = self.failure.clone();
        let fail_fast = self.config.fail_fast;
        let span = tracing::info_span!("stage", stage = %name);

        self.tasks.spawn(
            async move {
                tracing::debug!("stage started");
                let mut stage = stage;
                let outcome = AssertUnwindSafe(stage.run(&token)).catch_unwind().await;
                drop(stage);

                match outcome {
                    Ok(Ok(())) => tracing::debug!("stage exited"),
                    Ok(Err(err)) => {
                        tracing::warn!(error = %err, "stage failed");
                        record_failure(&failure, err);
                        if fail_fast {
                            token.fire();
                        }
                    }
                    Err(payload) => {
                        let err = Error::panicked(&name, payload);
                        tracing::error!(error = %err, "stage panicked");
                        record_failure(&failure, err);
                        token.fire();
                    }
                }
            }
            .instrument(span),
        );
    }

    /// Source stage: write `items` in order, then close.
    pub fn source<I>(&self, items: I) -> Receiver<I::Item>
    where
        I: IntoIterator,
        I::IntoIter: Send + 'static,
        I::Item: Send + 'static,
    {
        let name = self.stage_name("source");
        let (tx, rx) = named_channel(format!("{}.out", name), self.config.capacity);
        self.spawn(IterSource::new(name, items.into_iter(), tx));
        rx
    }

    /// Source stage driven by a generator; stops when it returns `None`.
    pub fn generate<T, F>(&self, f: F) -> Receiver<T>
    where
        T: Send + 'static,
        F: FnMut() -> Option<T> + Send + 'static,
    {
        self.source(std::iter::from_fn(f))
    }

    /// Transform stage: apply `f` to every item of `input`, preserving order.
    pub fn transform<T, U, F>(&self, input: Receiver<T>, f: F) -> Receiver<U>
    where
        T: Send + 'static,
        U: Send + 'static,
        F: FnMut(T) -> U + Send + 'static,
    {
        let name = self.stage_name("transform");
        let (tx, rx) = named_channel(format!("{}.out", name), self.config.capacity);
        self.spawn(MapStage::new(name, input, tx, f));
        rx
    }

    /// Transform stage for a fallible function.
    ///
    /// Failures are forwarded as `Err` items. Under `fail_fast` the first
    /// failure also stops the stage and fires the token.
    pub fn try_transform<T, U, E, F>(
        &self,
        input: Receiver<T>,
        f: F,
    ) -> Receiver<std::result::Result<U, E>>
    where
        T: Send + 'static,
        U: Send + 'static,
        E: std::fmt::Display + Send + 'static,
        F: FnMut(T) -> std::result::Result<U, E> + Send + 'static,
    {
        let name = self.stage_name("try-transform");
        let (tx, rx) = named_channel(format!("{}.out", name), self.config.capacity);
        self.spawn(TryMapStage::new(name, input, tx, f).fail_fast(self.config.fail_fast));
        rx
    }

    /// Wait for every stage to exit.
    ///
    /// Terminal channels must be drained (or dropped) first, otherwise the
    /// stages writing into them never finish. Returns the first recorded stage
    /// failure, if any.
    pub async fn join(&self) -> Result<()> {
        self.tasks.close();
        self.tasks.wait().await;
        self.tasks.reopen();
        self.outcome()
    }

    /// Fire the token and wait up to the configured grace period for every
    /// stage to unwind.
    pub async fn shutdown(&self) -> Result<()> {
        self.token.fire();
        self.tasks.close();
        let grace = self.config.shutdown_grace;
        let waited = tokio::time::timeout(grace, self.tasks.wait()).await;
        self.tasks.reopen();

        if waited.is_err() {
            tracing::error!(
                pipeline = %self.config.name,
                remaining = self.tasks.len(),
                "stages did not unwind in time"
            );
            return Err(Error::timeout(grace));
        }
        tracing::debug!(pipeline = %self.config.name, "pipeline shut down");
        self.outcome()
    }

    fn outcome(&self) -> Result<()> {
        match self.failure.lock().clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    pub(crate) fn stage_name(&self, kind: &str) -> String {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        format!("{}.{}-{}", self.config.name, kind, id)
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.token.fire();
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("config", &self.config)
            .field("active_stages", &self.active_stages())
            .field("fired", &self.token.is_fired())
            .finish()
    }
}

fn record_failure(slot: &Mutex<Option<Error>>, err: Error) {
    let mut slot = slot.lock();
    if slot.is_none() {
        *slot = Some(err);
    }
}
