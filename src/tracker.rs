//! Safe closing of channels fed by several producers.
//!
//! [`CompletionTracker::register`] takes ownership of a channel's
//! [`Sender`] and hands out one [`TrackedSender`] per producer. Each producer
//! reports completion exactly once, by calling [`TrackedSender::done`] or by
//! being dropped. The producer that brings the count to zero closes the
//! channel, so the close happens exactly once and never while a registered
//! producer can still write.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::cancel::CancelToken;
use crate::channel::Sender;
use crate::core::SendError;

type Closer = Box<dyn FnOnce() + Send>;

struct TrackerInner {
    name: String,
    registered: usize,
    outstanding: AtomicUsize,
    closer: Mutex<Option<Closer>>,
    closed: AtomicBool,
    latch: CancellationToken,
}

/// Counts outstanding producers of one channel and closes it when the last
/// one finishes.
#[derive(Clone)]
pub struct CompletionTracker {
    inner: Arc<TrackerInner>,
}

impl CompletionTracker {
    /// Register `producers` writers for the channel behind `sender`.
    ///
    /// The count is fixed before any handle exists, so no producer can finish
    /// before registration. With zero producers the channel closes at once.
    pub fn register<T: Send + 'static>(
        sender: Sender<T>,
        producers: usize,
    ) -> (CompletionTracker, Vec<TrackedSender<T>>) {
        let handles: Vec<Sender<T>> = (0..producers).map(|_| sender.fork()).collect();
        let tracker = CompletionTracker {
            inner: Arc::new(TrackerInner {
                name: sender.name().to_string(),
                registered: producers,
                outstanding: AtomicUsize::new(producers),
                closer: Mutex::new(Some(Box::new(move || sender.close()))),
                closed: AtomicBool::new(false),
                latch: CancellationToken::new(),
            }),
        };
        tracing::debug!(channel = %tracker.inner.name, producers, "producers registered");

        if producers == 0 {
            tracker.close();
        }

        let senders = handles
            .into_iter()
            .enumerate()
            .map(|(index, sender)| TrackedSender {
                sender: Some(sender),
                tracker: tracker.clone(),
                index,
            })
            .collect();
        (tracker, senders)
    }

    /// Number of producers registered
    pub fn registered(&self) -> usize {
        self.inner.registered
    }

    /// Number of producers that have not reported completion yet
    pub fn outstanding(&self) -> usize {
        self.inner.outstanding.load(Ordering::Acquire)
    }

    /// Whether the channel has been closed
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Wait until every producer is done and the channel is closed.
    pub async fn closed(&self) {
        self.inner.latch.cancelled().await
    }

    fn producer_done(&self) {
        let previous = self
            .inner
            .outstanding
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .unwrap_or_else(|_| {
                panic!(
                    "producer completed on `{}` after all {} registered producers finished",
                    self.inner.name, self.inner.registered
                )
            });
        tracing::trace!(channel = %self.inner.name, remaining = previous - 1, "producer done");

        if previous == 1 {
            self.close();
        }
    }

    fn close(&self) {
        let closer = self.inner.closer.lock().take();
        match closer {
            Some(close) => close(),
            None => panic!("channel `{}` closed twice", self.inner.name),
        }
        self.inner.closed.store(true, Ordering::Release);
        self.inner.latch.cancel();
        tracing::debug!(channel = %self.inner.name, "all producers done, channel closed");
    }
}

impl fmt::Debug for CompletionTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionTracker")
            .field("channel", &self.inner.name)
            .field("registered", &self.inner.registered)
            .field("outstanding", &self.outstanding())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// One registered producer of a tracked channel.
pub struct TrackedSender<T> {
    sender: Option<Sender<T>>,
    tracker: CompletionTracker,
    index: usize,
}

impl<T> TrackedSender<T> {
    /// Write one item, racing the write against `token`.
    pub async fn send(&self, item: T, token: &CancelToken) -> Result<(), SendError> {
        match &self.sender {
            Some(sender) => sender.send(item, token).await,
            None => unreachable!("tracked sender used after completion"),
        }
    }

    /// Report that this producer will not write again.
    pub fn done(self) {
        drop(self);
    }

    /// Position of this producer in registration order
    pub fn index(&self) -> usize {
        self.index
    }

    /// The tracker this producer reports to
    pub fn tracker(&self) -> &CompletionTracker {
        &self.tracker
    }
}

impl<T> Drop for TrackedSender<T> {
    fn drop(&mut self) {
        // Release the write handle before the count can reach zero.
        if let Some(sender) = self.sender.take() {
            drop(sender);
            self.tracker.producer_done();
        }
    }
}
