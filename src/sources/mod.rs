//! Source stages.
//!
//! A source has no input. It writes a finite or unbounded sequence of items
//! to the channel it owns and closes that channel when it stops.

use async_trait::async_trait;

use crate::cancel::CancelToken;
use crate::channel::Sender;
use crate::core::{ExitReason, Result, Stage};
use crate::metrics;

/// A source that writes every item of an iterator, in order.
///
/// Each write races the token; once it fires the remaining items are never
/// written. Infinite iterators are fine, the token is the only way they stop.
pub struct IterSource<I: Iterator> {
    name: String,
    items: I,
    out: Sender<I::Item>,
}

impl<I: Iterator> IterSource<I> {
    /// Create a new iterator source writing into `out`
    pub fn new(name: impl Into<String>, items: I, out: Sender<I::Item>) -> Self {
        Self {
            name: name.into(),
            items,
            out,
        }
    }
}

#[async_trait]
impl<I> Stage for IterSource<I>
where
    I: Iterator + Send + 'static,
    I::Item: Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&mut self, token: &CancelToken) -> Result<()> {
        let mut sent = 0usize;
        let reason = loop {
            let Some(item) = self.items.next() else {
                break ExitReason::Exhausted;
            };
            if let Err(err) = self.out.send(item, token).await {
                break ExitReason::from(err);
            }
            sent += 1;
            metrics::item_emitted(&self.name);
        };

        tracing::debug!(sent, %reason, "source stopped");
        metrics::stage_exited(&self.name, reason);
        Ok(())
    }
}
