//! # Request Interceptor
//!
//! [`RefreshLink`] sits in front of a [`Transport`] and decides, per request,
//! whether its outcome is handed to the caller or the request is suspended
//! until the credential has been refreshed.
//!
//! Per request:
//!
//! 1. A refresh is in flight: park the request without sending it; it is
//!    replayed when the queue drains.
//! 2. Otherwise send it. If the policy accepts the outcome, return it.
//! 3. If the policy asks for a refresh, park a continuation that replays the
//!    request when the refresh succeeds and returns the original outcome when
//!    it fails, then make sure a refresh cycle is running.
//!
//! Dropping the future returned by [`RefreshLink::intercept`] cancels
//! whatever is active at that point: the transport call, the parked queue
//! entry, or the replay.

use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::sync::broadcast;
use tracing::{debug, trace};

use crate::config::RefreshConfig;
use crate::coordinator::{RefreshCoordinator, RefreshStats};
use crate::error::LinkError;
use crate::events::RefreshEvent;
use crate::policy::{Observed, RefreshPolicy};
use crate::queue::{Continuation, ReplayFuture, Resume};
use crate::transport::Transport;

/// Future returned by [`RefreshLink::intercept`].
pub type Intercepted<T, E> = BoxFuture<'static, Result<T, LinkError<E>>>;

type LinkCoordinator<Req, Tr> = RefreshCoordinator<
    Req,
    <Tr as Transport<Req>>::Response,
    <Tr as Transport<Req>>::Error,
>;

/// Transport wrapper that refreshes an expired credential once and replays
/// the requests that hit the expiry.
///
/// Each `RefreshLink::new` owns its own coordinator and queue; clones share
/// them.
pub struct RefreshLink<Req, Tr>
where
    Req: Send + 'static,
    Tr: Transport<Req>,
{
    transport: Arc<Tr>,
    policy: Arc<dyn RefreshPolicy<Req, Tr::Response, Tr::Error>>,
    coordinator: Arc<LinkCoordinator<Req, Tr>>,
}

impl<Req, Tr> Clone for RefreshLink<Req, Tr>
where
    Req: Send + 'static,
    Tr: Transport<Req>,
{
    fn clone(&self) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
            policy: Arc::clone(&self.policy),
            coordinator: Arc::clone(&self.coordinator),
        }
    }
}

impl<Req, Tr> RefreshLink<Req, Tr>
where
    Req: Clone + Send + Sync + 'static,
    Tr: Transport<Req>,
{
    pub fn new<P>(transport: Tr, policy: P) -> Self
    where
        P: RefreshPolicy<Req, Tr::Response, Tr::Error>,
    {
        Self::with_config(transport, policy, RefreshConfig::default())
    }

    pub fn with_config<P>(transport: Tr, policy: P, config: RefreshConfig) -> Self
    where
        P: RefreshPolicy<Req, Tr::Response, Tr::Error>,
    {
        let policy: Arc<dyn RefreshPolicy<Req, Tr::Response, Tr::Error>> = Arc::new(policy);
        let coordinator = Arc::new(RefreshCoordinator::new(Arc::clone(&policy), config));

        Self {
            transport: Arc::new(transport),
            policy,
            coordinator,
        }
    }

    pub fn coordinator(&self) -> &Arc<LinkCoordinator<Req, Tr>> {
        &self.coordinator
    }

    pub fn transport(&self) -> &Tr {
        &self.transport
    }

    pub fn stats(&self) -> RefreshStats {
        self.coordinator.stats()
    }

    /// Subscribe to refresh cycle events of this link.
    pub fn subscribe(&self) -> broadcast::Receiver<RefreshEvent> {
        self.coordinator.subscribe()
    }

    /// Send `request` through the link.
    ///
    /// Nothing happens until the returned future is polled.
    pub fn intercept(&self, request: Req) -> Intercepted<Tr::Response, Tr::Error> {
        let transport = Arc::clone(&self.transport);
        let policy = Arc::clone(&self.policy);
        let coordinator = Arc::clone(&self.coordinator);

        async move {
            // Sending now would only hit the credential being replaced.
            let replay = replay_on_drain(&transport, request.clone());
            if let Some(handle) = coordinator.suspend_if_refreshing(replay) {
                trace!("Refresh in flight, request suspended");
                return handle.await;
            }

            let outcome = transport.forward(request.clone()).await;
            if !policy.should_refresh(&request, Observed::from(&outcome)) {
                return outcome.map_err(LinkError::Transport);
            }

            debug!(
                failed = outcome.is_err(),
                "Credential rejected, suspending request until refresh"
            );
            let retry = retry_or_settle(&transport, request.clone(), outcome);
            coordinator.suspend_and_refresh(retry, request).await
        }
        .boxed()
    }
}

fn forward_owned<Req, Tr>(
    transport: Arc<Tr>,
    request: Req,
) -> ReplayFuture<Tr::Response, Tr::Error>
where
    Req: Send + 'static,
    Tr: Transport<Req>,
{
    async move { transport.forward(request).await }.boxed()
}

/// Continuation for a request parked before it was ever sent: it is sent on
/// drain whatever the refresh outcome.
fn replay_on_drain<Req, Tr>(
    transport: &Arc<Tr>,
    request: Req,
) -> Continuation<Tr::Response, Tr::Error>
where
    Req: Send + 'static,
    Tr: Transport<Req>,
{
    let transport = Arc::clone(transport);
    Box::new(move |_refreshed: bool| Resume::Replay(forward_owned(transport, request)))
}

/// Continuation for a request whose outcome asked for a refresh: replay it
/// on success, hand back `outcome` on failure.
fn retry_or_settle<Req, Tr>(
    transport: &Arc<Tr>,
    request: Req,
    outcome: Result<Tr::Response, Tr::Error>,
) -> Continuation<Tr::Response, Tr::Error>
where
    Req: Send + 'static,
    Tr: Transport<Req>,
{
    let transport = Arc::clone(transport);
    Box::new(move |refreshed: bool| {
        if refreshed {
            Resume::Replay(forward_owned(transport, request))
        } else {
            Resume::Deliver(outcome)
        }
    })
}
