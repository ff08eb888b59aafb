//! Item channels between stages.
//!
//! A channel is a FIFO conduit with a fixed [`Capacity`]. The [`Sender`] is
//! owned by exactly one producer; dropping it (or calling
//! [`Sender::close`]) closes the channel. Channels fed by several producers
//! are closed through a [`CompletionTracker`](crate::tracker::CompletionTracker)
//! instead. [`Receiver`] is cheap to clone and every clone competes for the
//! same items: each item goes to exactly one reader.
//!
//! A rendezvous channel (capacity 0) completes a write only once a reader has
//! taken the item. A write that is cancelled before that point leaves the item
//! undelivered.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::Stream;
use tokio::sync::{mpsc, oneshot, Mutex};

use crate::cancel::{CancelToken, CancellableExt};
use crate::core::{Cancelled, SendError};

/// How many items a channel buffers before writers block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Capacity {
    /// Synchronous handoff: a write waits for a reader
    #[default]
    Rendezvous,
    /// Buffer up to `n` items, then apply backpressure
    Bounded(usize),
    /// Never block writers
    Unbounded,
}

impl From<usize> for Capacity {
    fn from(n: usize) -> Self {
        match n {
            0 => Capacity::Rendezvous,
            n => Capacity::Bounded(n),
        }
    }
}

impl fmt::Display for Capacity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Capacity::Rendezvous => write!(f, "rendezvous"),
            Capacity::Bounded(n) => write!(f, "bounded({})", n),
            Capacity::Unbounded => write!(f, "unbounded"),
        }
    }
}

/// Reason a [`Receiver::try_recv`] returned nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TryRecvError {
    /// No item is ready right now
    #[error("channel is empty")]
    Empty,
    /// The channel is closed and drained
    #[error("channel is closed")]
    Closed,
}

struct Envelope<T> {
    item: T,
    ack: Option<oneshot::Sender<()>>,
}

impl<T> Envelope<T> {
    fn plain(item: T) -> Self {
        Self { item, ack: None }
    }

    /// Hand the item to a reader. A rendezvous item whose writer already
    /// gave up is rejected.
    fn accept(self) -> Option<T> {
        let Envelope { item, ack } = self;
        match ack {
            None => Some(item),
            Some(ack) => ack.send(()).ok().map(|_| item),
        }
    }
}

enum Tx<T> {
    Bounded {
        tx: mpsc::Sender<Envelope<T>>,
        rendezvous: bool,
    },
    Unbounded(mpsc::UnboundedSender<Envelope<T>>),
}

impl<T> Clone for Tx<T> {
    fn clone(&self) -> Self {
        match self {
            Tx::Bounded { tx, rendezvous } => Tx::Bounded {
                tx: tx.clone(),
                rendezvous: *rendezvous,
            },
            Tx::Unbounded(tx) => Tx::Unbounded(tx.clone()),
        }
    }
}

enum Rx<T> {
    Bounded(mpsc::Receiver<Envelope<T>>),
    Unbounded(mpsc::UnboundedReceiver<Envelope<T>>),
}

impl<T> Rx<T> {
    async fn recv(&mut self) -> Option<Envelope<T>> {
        match self {
            Rx::Bounded(rx) => rx.recv().await,
            Rx::Unbounded(rx) => rx.recv().await,
        }
    }

    fn try_recv(&mut self) -> Result<Envelope<T>, mpsc::error::TryRecvError> {
        match self {
            Rx::Bounded(rx) => rx.try_recv(),
            Rx::Unbounded(rx) => rx.try_recv(),
        }
    }
}

struct Shared {
    name: String,
    capacity: Capacity,
    closed: AtomicBool,
}

/// Create an anonymous channel with the given capacity.
pub fn channel<T>(capacity: impl Into<Capacity>) -> (Sender<T>, Receiver<T>) {
    named_channel("channel", capacity)
}

/// Create a channel whose name shows up in logs and misuse panics.
pub fn named_channel<T>(
    name: impl Into<String>,
    capacity: impl Into<Capacity>,
) -> (Sender<T>, Receiver<T>) {
    let capacity = capacity.into();
    let shared = Arc::new(Shared {
        name: name.into(),
        capacity,
        closed: AtomicBool::new(false),
    });

    let (tx, rx) = match capacity {
        Capacity::Rendezvous => {
            let (tx, rx) = mpsc::channel(1);
            (
                Tx::Bounded {
                    tx,
                    rendezvous: true,
                },
                Rx::Bounded(rx),
            )
        }
        Capacity::Bounded(n) => {
            assert!(n > 0, "bounded channel `{}` needs a capacity above zero", shared.name);
            let (tx, rx) = mpsc::channel(n);
            (
                Tx::Bounded {
                    tx,
                    rendezvous: false,
                },
                Rx::Bounded(rx),
            )
        }
        Capacity::Unbounded => {
            let (tx, rx) = mpsc::unbounded_channel();
            (Tx::Unbounded(tx), Rx::Unbounded(rx))
        }
    };

    (
        Sender {
            tx,
            shared: shared.clone(),
            owner: true,
        },
        Receiver {
            rx: Arc::new(Mutex::new(rx)),
            shared,
        },
    )
}

/// Writing half of a channel.
///
/// Not `Clone`: the owner is the only handle allowed to close the channel.
/// Several producers share one channel through a
/// [`CompletionTracker`](crate::tracker::CompletionTracker).
pub struct Sender<T> {
    tx: Tx<T>,
    shared: Arc<Shared>,
    owner: bool,
}

impl<T> Sender<T> {
    /// Write one item, racing the write against `token`.
    ///
    /// Blocks while the channel is full (or, for a rendezvous channel, until a
    /// reader takes the item). Returns [`SendError::Cancelled`] if the token
    /// fires first and [`SendError::Disconnected`] if every reader is gone.
    ///
    /// # Panics
    ///
    /// Panics if the channel has already been closed by its owner.
    pub async fn send(&self, item: T, token: &CancelToken) -> Result<(), SendError> {
        if self.shared.closed.load(Ordering::Acquire) {
            panic!("write to closed channel `{}`", self.shared.name);
        }
        if token.is_fired() {
            return Err(SendError::Cancelled);
        }

        match &self.tx {
            Tx::Unbounded(tx) => {
                // The push itself never waits; spend coop budget so a writer
                // that is never blocked still yields to the scheduler.
                tokio::select! {
                    biased;
                    _ = token.fired() => return Err(SendError::Cancelled),
                    _ = tokio::task::consume_budget() => {}
                }
                tx.send(Envelope::plain(item))
                    .map_err(|_| SendError::Disconnected)
            }
            Tx::Bounded { tx, rendezvous } => {
                let permit = tokio::select! {
                    biased;
                    _ = token.fired() => return Err(SendError::Cancelled),
                    permit = tx.reserve() => permit.map_err(|_| SendError::Disconnected)?,
                };

                if !rendezvous {
                    permit.send(Envelope::plain(item));
                    return Ok(());
                }

                let (ack_tx, mut ack_rx) = oneshot::channel();
                permit.send(Envelope {
                    item,
                    ack: Some(ack_tx),
                });

                tokio::select! {
                    biased;
                    acked = &mut ack_rx => acked.map_err(|_| SendError::Disconnected),
                    _ = token.fired() => {
                        // A reader may have taken the item between the two checks.
                        ack_rx.close();
                        match ack_rx.try_recv() {
                            Ok(()) => Ok(()),
                            Err(_) => Err(SendError::Cancelled),
                        }
                    }
                }
            }
        }
    }

    /// Close the channel. Readers drain what is buffered and then see the end.
    pub fn close(self) {
        drop(self);
    }

    /// Whether every reader has been dropped
    pub fn is_disconnected(&self) -> bool {
        match &self.tx {
            Tx::Bounded { tx, .. } => tx.is_closed(),
            Tx::Unbounded(tx) => tx.is_closed(),
        }
    }

    /// Name of the channel
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Capacity of the channel
    pub fn capacity(&self) -> Capacity {
        self.shared.capacity
    }

    /// A second writer into the same channel that cannot close it.
    pub(crate) fn fork(&self) -> Sender<T> {
        Sender {
            tx: self.tx.clone(),
            shared: self.shared.clone(),
            owner: false,
        }
    }
}

impl<T> Drop for Sender<T> {
    fn drop(&mut self) {
        if self.owner {
            self.shared.closed.store(true, Ordering::Release);
            tracing::trace!(channel = %self.shared.name, "channel closed by owner");
        }
    }
}

impl<T> fmt::Debug for Sender<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sender")
            .field("name", &self.shared.name)
            .field("capacity", &self.shared.capacity)
            .field("owner", &self.owner)
            .finish()
    }
}

/// Reading half of a channel.
///
/// Clones share one underlying queue; concurrent readers compete and every
/// item is delivered to exactly one of them.
pub struct Receiver<T> {
    rx: Arc<Mutex<Rx<T>>>,
    shared: Arc<Shared>,
}

impl<T> Clone for Receiver<T> {
    fn clone(&self) -> Self {
        Self {
            rx: self.rx.clone(),
            shared: self.shared.clone(),
        }
    }
}

impl<T> Receiver<T> {
    /// Receive the next item, or `None` once the channel is closed and empty.
    pub async fn recv(&self) -> Option<T> {
        let mut rx = self.rx.lock().await;
        while let Some(envelope) = rx.recv().await {
            if let Some(item) = envelope.accept() {
                return Some(item);
            }
        }
        None
    }

    /// Receive the next item unless `token` fires first.
    pub async fn recv_or_cancel(&self, token: &CancelToken) -> Result<Option<T>, Cancelled> {
        self.recv().or_cancel(token).await
    }

    /// Receive with an upper bound on the wait.
    pub async fn recv_timeout(
        &self,
        timeout: Duration,
    ) -> Result<Option<T>, tokio::time::error::Elapsed> {
        tokio::time::timeout(timeout, self.recv()).await
    }

    /// Take an item if one is ready, without waiting.
    ///
    /// Reports [`TryRecvError::Empty`] while another reader holds the queue.
    pub fn try_recv(&self) -> Result<T, TryRecvError> {
        let mut rx = self.rx.try_lock().map_err(|_| TryRecvError::Empty)?;
        loop {
            match rx.try_recv() {
                Ok(envelope) => {
                    if let Some(item) = envelope.accept() {
                        return Ok(item);
                    }
                }
                Err(mpsc::error::TryRecvError::Empty) => return Err(TryRecvError::Empty),
                Err(mpsc::error::TryRecvError::Disconnected) => return Err(TryRecvError::Closed),
            }
        }
    }

    /// Receive until the channel closes and return everything in arrival order.
    pub async fn drain(&self) -> Vec<T> {
        let mut items = Vec::new();
        while let Some(item) = self.recv().await {
            items.push(item);
        }
        items
    }

    /// Convert into a [`Stream`] that ends when the channel closes.
    pub fn into_stream(self) -> impl Stream<Item = T> {
        futures::stream::unfold(self, |rx| async move {
            let item = rx.recv().await?;
            Some((item, rx))
        })
    }

    /// Whether the owner has closed the channel. Buffered items may remain.
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// Name of the channel
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Capacity of the channel
    pub fn capacity(&self) -> Capacity {
        self.shared.capacity
    }
}

impl<T> fmt::Debug for Receiver<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Receiver")
            .field("name", &self.shared.name)
            .field("capacity", &self.shared.capacity)
            .finish()
    }
}
