//! # Suspension Queue
//!
//! Ordered buffer of requests waiting for a refresh outcome.
//!
//! Each entry holds a [`Continuation`] and the sending half of the request's
//! result channel. Nothing runs at enqueue time: continuations are only
//! invoked by [`SuspensionQueue::drain`], once, with the refresh outcome.
//!
//! Draining swaps the buffer for an empty one under the lock and runs the
//! snapshot after releasing it, so anything enqueued while a drain is running
//! (including from inside a continuation) waits for the next cycle instead of
//! being lost.

use std::future::Future;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};

use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::LinkError;

/// Operation started for a suspended request once the queue drains.
pub type ReplayFuture<T, E> = BoxFuture<'static, Result<T, E>>;

/// Deferred work for a suspended request; receives `refreshed`.
pub type Continuation<T, E> = Box<dyn FnOnce(bool) -> Resume<T, E> + Send>;

type ResultSender<T, E> = oneshot::Sender<Result<T, LinkError<E>>>;

/// What a continuation wants done with its request.
pub enum Resume<T, E> {
    /// Start this operation and stream its outcome to the waiting caller.
    Replay(ReplayFuture<T, E>),
    /// Hand this outcome to the waiting caller as-is.
    Deliver(Result<T, E>),
}

/// Outcome of a single drain pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Items whose continuation started a replay.
    pub replayed: usize,
    /// Items whose continuation delivered a result directly.
    pub delivered: usize,
    /// Items cancelled after the snapshot was taken.
    pub skipped: usize,
    /// Items whose continuation panicked.
    pub abandoned: usize,
}

impl DrainReport {
    /// Number of items whose continuation was invoked.
    pub fn drained(&self) -> usize {
        self.replayed + self.delivered + self.abandoned
    }
}

struct QueueItem<T, E> {
    id: u64,
    continuation: Continuation<T, E>,
    result_tx: ResultSender<T, E>,
    cancel: CancellationToken,
}

/// Items taken out of the queue by [`SuspensionQueue::take_pending`].
pub(crate) struct PendingItems<T, E>(Vec<QueueItem<T, E>>);

impl<T, E> PendingItems<T, E> {
    pub(crate) fn len(&self) -> usize {
        self.0.len()
    }
}

struct QueueState<T, E> {
    items: Mutex<Vec<QueueItem<T, E>>>,
    next_id: AtomicU64,
    cancelled: AtomicU64,
}

impl<T, E> QueueState<T, E> {
    /// Remove a still-buffered item. Returns false if it was already taken.
    fn remove(&self, id: u64) -> bool {
        // The item is dropped after the guard: its continuation may own handles
        // into this same queue.
        let removed = {
            let mut items = self.items.lock();
            items
                .iter()
                .position(|item| item.id == id)
                .map(|index| items.remove(index))
        };

        match removed {
            Some(_item) => {
                self.cancelled.fetch_add(1, Ordering::Relaxed);
                true
            }
            None => false,
        }
    }
}

/// FIFO buffer of suspended requests.
///
/// Cloning is cheap and yields a handle to the same buffer.
pub struct SuspensionQueue<T, E> {
    state: Arc<QueueState<T, E>>,
}

impl<T, E> Clone for SuspensionQueue<T, E> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

impl<T, E> Default for SuspensionQueue<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T, E> SuspensionQueue<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    pub fn new() -> Self {
        Self {
            state: Arc::new(QueueState {
                items: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(0),
                cancelled: AtomicU64::new(0),
            }),
        }
    }

    /// Park a continuation until the next drain.
    ///
    /// The returned handle resolves with whatever the continuation produces.
    /// Dropping or cancelling it before the drain removes the item; doing so
    /// after the drain aborts the replay.
    pub fn enqueue(&self, continuation: Continuation<T, E>) -> QueueHandle<T, E> {
        let id = self.state.next_id.fetch_add(1, Ordering::Relaxed);
        let (result_tx, result_rx) = oneshot::channel();
        let cancel = CancellationToken::new();

        self.state.items.lock().push(QueueItem {
            id,
            continuation,
            result_tx,
            cancel: cancel.clone(),
        });

        QueueHandle {
            id,
            result_rx,
            cancel,
            queue: Arc::downgrade(&self.state),
            settled: false,
        }
    }

    /// Number of buffered items.
    pub fn len(&self) -> usize {
        self.state.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.items.lock().is_empty()
    }

    /// Total number of items cancelled before their continuation ran.
    pub fn cancelled_count(&self) -> u64 {
        self.state.cancelled.load(Ordering::Relaxed)
    }

    /// Invoke every buffered continuation with `refreshed`, in enqueue order.
    ///
    /// Must be called from within a Tokio runtime: replays are spawned.
    pub fn drain(&self, refreshed: bool) -> DrainReport {
        let pending = self.take_pending();
        self.run(pending, refreshed)
    }

    /// Swap the buffer for an empty one and return its previous contents.
    pub(crate) fn take_pending(&self) -> PendingItems<T, E> {
        PendingItems(std::mem::take(&mut *self.state.items.lock()))
    }

    /// Run a snapshot produced by [`take_pending`](Self::take_pending).
    pub(crate) fn run(&self, pending: PendingItems<T, E>, refreshed: bool) -> DrainReport {
        let PendingItems(items) = pending;
        debug!(refreshed, "processing {} queued requests", items.len());

        let mut report = DrainReport::default();
        for QueueItem {
            id,
            continuation,
            result_tx,
            cancel,
        } in items
        {
            if cancel.is_cancelled() || result_tx.is_closed() {
                self.state.cancelled.fetch_add(1, Ordering::Relaxed);
                report.skipped += 1;
                continue;
            }

            let resume = match catch_unwind(AssertUnwindSafe(|| continuation(refreshed))) {
                Ok(resume) => resume,
                Err(_) => {
                    // Dropping the sender resolves the handle with `Abandoned`.
                    warn!(id, "Queued continuation panicked, abandoning request");
                    report.abandoned += 1;
                    continue;
                }
            };

            match resume {
                Resume::Replay(replay) => {
                    report.replayed += 1;
                    tokio::spawn(replay_into(replay, result_tx, cancel));
                }
                Resume::Deliver(result) => {
                    report.delivered += 1;
                    let _ = result_tx.send(result.map_err(LinkError::Transport));
                }
            }
        }

        report
    }
}

async fn replay_into<T, E>(
    replay: ReplayFuture<T, E>,
    result_tx: ResultSender<T, E>,
    cancel: CancellationToken,
) {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => {}
        result = replay => {
            let _ = result_tx.send(result.map_err(LinkError::Transport));
        }
    }
}

/// Caller-side handle to a suspended request.
///
/// Resolves once the queue drains and the continuation settles. Dropping an
/// unresolved handle cancels it.
pub struct QueueHandle<T, E> {
    id: u64,
    result_rx: oneshot::Receiver<Result<T, LinkError<E>>>,
    cancel: CancellationToken,
    queue: Weak<QueueState<T, E>>,
    settled: bool,
}

impl<T, E> QueueHandle<T, E> {
    /// Cancel the suspended request.
    ///
    /// Before the drain the item is removed and its continuation never runs.
    /// After the drain the replay started for it is dropped.
    pub fn cancel(&mut self) {
        if self.settled || self.cancel.is_cancelled() {
            return;
        }

        self.cancel.cancel();
        if let Some(queue) = self.queue.upgrade() {
            queue.remove(self.id);
        }
        self.result_rx.close();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl<T, E> Future for QueueHandle<T, E> {
    type Output = Result<T, LinkError<E>>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();

        if this.cancel.is_cancelled() && !this.settled {
            this.settled = true;
            return Poll::Ready(Err(LinkError::Cancelled));
        }

        match Pin::new(&mut this.result_rx).poll(cx) {
            Poll::Ready(Ok(result)) => {
                this.settled = true;
                Poll::Ready(result)
            }
            Poll::Ready(Err(_)) => {
                this.settled = true;
                Poll::Ready(Err(LinkError::Abandoned))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<T, E> Drop for QueueHandle<T, E> {
    fn drop(&mut self) {
        if !self.settled {
            self.cancel();
        }
    }
}
