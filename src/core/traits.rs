//! The stage abstraction.
//!
//! A stage is one concurrent unit of pipeline work. It owns the sending half
//! of its output channels, reads from zero or more input channels, and runs
//! until its inputs are exhausted or the pipeline token fires. Output
//! channels close when the stage value is dropped, so every exit path
//! (normal, cancelled, error, panic) closes them.

use std::fmt;

use async_trait::async_trait;

use crate::cancel::CancelToken;
use crate::core::error::Result;

/// A named unit of concurrent pipeline work.
///
/// Implementations must race every blocking wait against `token` so that a
/// fired token lets the stage reach its exit within one scheduling step.
/// [`Sender::send`](crate::channel::Sender::send) and
/// [`Receiver::recv_or_cancel`](crate::channel::Receiver::recv_or_cancel)
/// already do this.
///
/// # Examples
///
/// ```rust
/// use async_trait::async_trait;
/// use pipeweld::prelude::*;
///
/// struct Countdown {
///     from: u32,
///     out: Sender<u32>,
/// }
///
/// #[async_trait]
/// impl Stage for Countdown {
///     fn name(&self) -> &str {
///         "countdown"
///     }
///
///     async fn run(&mut self, token: &CancelToken) -> Result<()> {
///         for n in (0..=self.from).rev() {
///             if self.out.send(n, token).await.is_err() {
///                 break;
///             }
///         }
///         Ok(())
///     }
/// }
///
/// #[tokio::main]
/// async fn main() -> Result<()> {
///     let (pipeline, _token) = Pipeline::new();
///     let (tx, rx) = pipeline.channel();
///     pipeline.spawn(Countdown { from: 3, out: tx });
///     assert_eq!(rx.drain().await, vec![3, 2, 1, 0]);
///     pipeline.join().await
/// }
/// ```
#[async_trait]
pub trait Stage: Send + 'static {
    /// Name used in logs, spans and errors
    fn name(&self) -> &str;

    /// Run the stage to completion.
    ///
    /// Returning `Ok(())` after observing a fired token is the expected way
    /// to finish on cancellation; `Err` is reserved for genuine failures.
    async fn run(&mut self, token: &CancelToken) -> Result<()>;
}

/// Why a built-in stage stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// Inputs ran out (or a source ran out of items)
    Exhausted,
    /// The token fired
    Cancelled,
    /// Every reader of the output went away
    Disconnected,
    /// The stage stopped on an item failure under fail-fast
    Failed,
}

impl ExitReason {
    /// Short label for logs and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitReason::Exhausted => "exhausted",
            ExitReason::Cancelled => "cancelled",
            ExitReason::Disconnected => "disconnected",
            ExitReason::Failed => "failed",
        }
    }
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<crate::core::SendError> for ExitReason {
    fn from(err: crate::core::SendError) -> Self {
        match err {
            crate::core::SendError::Cancelled => ExitReason::Cancelled,
            crate::core::SendError::Disconnected => ExitReason::Disconnected,
        }
    }
}
