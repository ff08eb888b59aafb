//! # Cancellable concurrent pipelines for tokio
//!
//! This crate builds data pipelines out of concurrently running stages joined
//! by typed channels, with one cancellation token threaded through all of
//! them.
//!
//! ## Core Concepts
//!
//! - **Stage**: one task with typed inputs and outputs (source, transform,
//!   sink, merge branch, or anything implementing [`Stage`](core::Stage))
//! - **Channel**: rendezvous, bounded or unbounded; closed by its owner only
//! - **CancelToken**: idempotent stop signal raced against every blocking wait
//! - **CompletionTracker**: closes a multi-producer channel exactly once
//! - **Pool**, **Gate**, **OnceInit**: reuse, predicate waits, one-time init
//!
//! ## Example
//!
//! ```rust
//! use pipeweld::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let (pipeline, _token) = Pipeline::new();
//!     let numbers = pipeline.source(vec![2, 3]);
//!     let squares = pipeline.parallel(numbers, |n: i64| n * n, 2);
//!
//!     let mut out = squares.drain().await;
//!     out.sort();
//!     assert_eq!(out, vec![4, 9]);
//!     pipeline.join().await
//! }
//! ```

pub mod cancel;
pub mod channel;
pub mod core;
pub mod gate;
pub mod once;
pub mod pipeline;
pub mod pool;
pub mod processors;
pub mod sinks;
pub mod sources;
pub mod tracker;

mod metrics;

// Re-export commonly used items
pub mod prelude {
    pub use crate::cancel::{CancelToken, CancellableExt};
    pub use crate::channel::{channel, Capacity, Receiver, Sender};
    pub use crate::core::{Cancelled, Error, ExitReason, Result, SendError, Stage};
    pub use crate::gate::Gate;
    pub use crate::once::OnceInit;
    pub use crate::pipeline::{Pipeline, PipelineConfig};
    pub use crate::pool::{Pool, Reset, Slot};
    pub use crate::tracker::{CompletionTracker, TrackedSender};
    pub use async_trait::async_trait;
}

// Re-export main error type
pub use crate::core::{Error, Result};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
