//! Shared fixtures: an API server that rotates its token and a client-side
//! transport that sends the token it currently holds.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use refresh_link::{Observed, RefreshError, RefreshLink, RefreshPolicy, Transport};
use tokio::sync::Notify;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub id: u32,
    pub query: &'static str,
}

impl Request {
    pub fn new(id: u32) -> Self {
        Self {
            id,
            query: "query Viewer { viewer { id } }",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub id: u32,
    pub status: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkError {
    ConnectionReset,
}

/// Server and client credential state.
#[derive(Default)]
pub struct AuthState {
    server_token: AtomicU64,
    client_token: AtomicU64,
    /// Refresh leaves the client token stale.
    refresh_is_noop: AtomicBool,
    fail_refresh: AtomicBool,
    hold_refresh: AtomicBool,
    release: Notify,
    refreshes: AtomicUsize,
    sent: Mutex<Vec<u32>>,
}

impl AuthState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Invalidate the token held by the client.
    pub fn rotate_server_token(&self) {
        self.server_token.fetch_add(1, Ordering::SeqCst);
    }

    pub fn fail_refresh(&self) {
        self.fail_refresh.store(true, Ordering::SeqCst);
    }

    pub fn make_refresh_noop(&self) {
        self.refresh_is_noop.store(true, Ordering::SeqCst);
    }

    pub fn hold_refresh(&self) {
        self.hold_refresh.store(true, Ordering::SeqCst);
    }

    pub fn release_refresh(&self) {
        self.release.notify_one();
    }

    pub fn refreshes(&self) -> usize {
        self.refreshes.load(Ordering::SeqCst)
    }

    /// Request ids in the order they reached the server.
    pub fn sent(&self) -> Vec<u32> {
        self.sent.lock().clone()
    }

    pub fn sent_count(&self, id: u32) -> usize {
        self.sent.lock().iter().filter(|sent| **sent == id).count()
    }
}

pub struct ApiTransport {
    pub auth: Arc<AuthState>,
}

#[async_trait]
impl Transport<Request> for ApiTransport {
    type Response = Response;
    type Error = NetworkError;

    async fn forward(&self, request: Request) -> Result<Response, NetworkError> {
        self.auth.sent.lock().push(request.id);
        // Let concurrently issued requests reach the server before any answer.
        tokio::task::yield_now().await;

        let valid = self.auth.client_token.load(Ordering::SeqCst)
            == self.auth.server_token.load(Ordering::SeqCst);

        Ok(Response {
            id: request.id,
            status: if valid { 200 } else { 401 },
        })
    }
}

/// Refreshes on a 401 response.
pub struct TokenPolicy {
    pub auth: Arc<AuthState>,
}

#[async_trait]
impl RefreshPolicy<Request, Response, NetworkError> for TokenPolicy {
    fn should_refresh(
        &self,
        _request: &Request,
        observed: Observed<'_, Response, NetworkError>,
    ) -> bool {
        observed.response().is_some_and(|response| response.status == 401)
    }

    async fn refresh_token(&self, _context: &Request) -> Result<(), RefreshError> {
        self.auth.refreshes.fetch_add(1, Ordering::SeqCst);
        if self.auth.hold_refresh.load(Ordering::SeqCst) {
            self.auth.release.notified().await;
        }
        if self.auth.fail_refresh.load(Ordering::SeqCst) {
            return Err("refresh token revoked".into());
        }
        if !self.auth.refresh_is_noop.load(Ordering::SeqCst) {
            let current = self.auth.server_token.load(Ordering::SeqCst);
            self.auth.client_token.store(current, Ordering::SeqCst);
        }
        Ok(())
    }
}

pub fn api_link(auth: &Arc<AuthState>) -> RefreshLink<Request, ApiTransport> {
    RefreshLink::new(
        ApiTransport {
            auth: Arc::clone(auth),
        },
        TokenPolicy {
            auth: Arc::clone(auth),
        },
    )
}

pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}
