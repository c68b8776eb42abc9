//! # Refresh Coordinator
//!
//! Single-flight execution of the refresh policy.
//!
//! The coordinator owns the `refreshing` flag. Every transition that has to
//! be atomic with respect to the [`SuspensionQueue`] happens while holding
//! the flag's lock:
//!
//! - "refresh in progress? then park this request" ([`suspend_if_refreshing`])
//! - "park this request and start a refresh unless one is running"
//!   ([`suspend_and_refresh`])
//! - "clear the flag and take the queue snapshot" (end of a cycle)
//!
//! A request can therefore never be parked after the snapshot of the cycle it
//! observed, which would leave it waiting for a refresh that nobody starts.
//!
//! Cycles run on their own Tokio task: a caller that is dropped while the
//! policy runs cannot leave the flag stuck at `true`.
//!
//! [`suspend_if_refreshing`]: RefreshCoordinator::suspend_if_refreshing
//! [`suspend_and_refresh`]: RefreshCoordinator::suspend_and_refresh

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::task::JoinError;
use tracing::{info, instrument, warn};

use crate::config::RefreshConfig;
use crate::error::RefreshError;
use crate::events::RefreshEvent;
use crate::policy::RefreshPolicy;
use crate::queue::{Continuation, DrainReport, QueueHandle, SuspensionQueue};

#[derive(Default)]
struct Counters {
    cycles: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    replayed: AtomicU64,
    delivered: AtomicU64,
}

impl Counters {
    fn record_drain(&self, report: &DrainReport) {
        self.replayed.fetch_add(report.replayed as u64, Ordering::Relaxed);
        self.delivered.fetch_add(report.delivered as u64, Ordering::Relaxed);
    }
}

/// Snapshot of a coordinator's activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshStats {
    /// Refresh cycles started.
    pub cycles: u64,
    /// Cycles whose policy call succeeded.
    pub succeeded: u64,
    /// Cycles whose policy call failed, timed out or panicked.
    pub failed: u64,
    /// Suspended requests that were replayed.
    pub replayed: u64,
    /// Suspended requests handed their original outcome.
    pub delivered: u64,
    /// Suspended requests cancelled before their continuation ran.
    pub cancelled: u64,
    /// Requests currently parked in the queue.
    pub pending: usize,
    /// Whether a cycle is in flight.
    pub refreshing: bool,
}

/// Runs the refresh policy at most once at a time and drains the queue with
/// its outcome.
pub struct RefreshCoordinator<Req, T, E> {
    refreshing: Mutex<bool>,
    queue: SuspensionQueue<T, E>,
    policy: Arc<dyn RefreshPolicy<Req, T, E>>,
    config: RefreshConfig,
    counters: Counters,
    events: broadcast::Sender<RefreshEvent>,
}

impl<Req, T, E> RefreshCoordinator<Req, T, E>
where
    Req: Send + Sync + 'static,
    T: Send + 'static,
    E: Send + 'static,
{
    pub fn new(policy: Arc<dyn RefreshPolicy<Req, T, E>>, config: RefreshConfig) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            refreshing: Mutex::new(false),
            queue: SuspensionQueue::new(),
            policy,
            config,
            counters: Counters::default(),
            events,
        }
    }

    pub fn config(&self) -> &RefreshConfig {
        &self.config
    }

    /// The queue drained by this coordinator.
    pub fn queue(&self) -> &SuspensionQueue<T, E> {
        &self.queue
    }

    pub fn is_refreshing(&self) -> bool {
        *self.refreshing.lock()
    }

    /// Number of requests parked in the queue.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Subscribe to refresh cycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<RefreshEvent> {
        self.events.subscribe()
    }

    pub fn stats(&self) -> RefreshStats {
        RefreshStats {
            cycles: self.counters.cycles.load(Ordering::Relaxed),
            succeeded: self.counters.succeeded.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            replayed: self.counters.replayed.load(Ordering::Relaxed),
            delivered: self.counters.delivered.load(Ordering::Relaxed),
            cancelled: self.queue.cancelled_count(),
            pending: self.queue.len(),
            refreshing: self.is_refreshing(),
        }
    }

    /// Park `continuation` if a refresh is in flight.
    ///
    /// Returns `None`, without enqueueing, when no refresh is running.
    pub fn suspend_if_refreshing(
        &self,
        continuation: Continuation<T, E>,
    ) -> Option<QueueHandle<T, E>> {
        let refreshing = self.refreshing.lock();
        if *refreshing {
            Some(self.queue.enqueue(continuation))
        } else {
            None
        }
    }

    /// Park `continuation` and make sure a refresh cycle will drain it.
    ///
    /// Starts a cycle with `context` unless one is already running, in which
    /// case the continuation joins that cycle.
    pub fn suspend_and_refresh(
        self: &Arc<Self>,
        continuation: Continuation<T, E>,
        context: Req,
    ) -> QueueHandle<T, E> {
        let (handle, leader) = {
            let mut refreshing = self.refreshing.lock();
            let handle = self.queue.enqueue(continuation);
            let leader = !*refreshing;
            *refreshing = true;
            (handle, leader)
        };

        if leader {
            self.start_cycle(context);
        }
        handle
    }

    /// Start a refresh cycle unless one is already running.
    ///
    /// Returns `true` if this call started the cycle. Callers that want their
    /// request replayed must enqueue it before, or use
    /// [`suspend_and_refresh`](Self::suspend_and_refresh).
    pub fn request_refresh(self: &Arc<Self>, context: Req) -> bool {
        {
            let mut refreshing = self.refreshing.lock();
            if *refreshing {
                return false;
            }
            *refreshing = true;
        }

        self.start_cycle(context);
        true
    }

    fn start_cycle(self: &Arc<Self>, context: Req) {
        self.counters.cycles.fetch_add(1, Ordering::Relaxed);
        let _ = self.events.send(RefreshEvent::Started);
        tokio::spawn(Arc::clone(self).run_cycle(context));
    }

    #[instrument(skip_all, fields(link = %self.config.name))]
    async fn run_cycle(self: Arc<Self>, context: Req) {
        let started = Instant::now();
        info!("Refreshing credentials");

        let refreshed = self.attempt_refresh(context).await;
        if refreshed {
            self.counters.succeeded.fetch_add(1, Ordering::Relaxed);
        } else {
            self.counters.failed.fetch_add(1, Ordering::Relaxed);
        }

        let pending = {
            let mut refreshing = self.refreshing.lock();
            *refreshing = false;
            self.queue.take_pending()
        };
        let queued = pending.len();
        let report = self.queue.run(pending, refreshed);
        self.counters.record_drain(&report);

        info!(
            refreshed,
            queued,
            drained = report.drained(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Refresh cycle finished"
        );
        let _ = self.events.send(RefreshEvent::Completed {
            refreshed,
            drained: report.drained(),
        });
    }

    /// Invoke the policy once and reduce its outcome to `refreshed`.
    async fn attempt_refresh(&self, context: Req) -> bool {
        let policy = Arc::clone(&self.policy);
        let mut attempt = tokio::spawn(async move { policy.refresh_token(&context).await });

        let outcome = match self.config.refresh_timeout {
            Some(limit) => match tokio::time::timeout(limit, &mut attempt).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    attempt.abort();
                    warn!(
                        timeout_ms = limit.as_millis() as u64,
                        "Credential refresh timed out"
                    );
                    return false;
                }
            },
            None => attempt.await,
        };

        settle(outcome)
    }
}

fn settle(outcome: Result<Result<(), RefreshError>, JoinError>) -> bool {
    match outcome {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            warn!(error = %e, "Credential refresh failed");
            false
        }
        Err(join_error) => {
            warn!(error = %join_error, "Credential refresh task panicked");
            false
        }
    }
}
