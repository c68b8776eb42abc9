//! Refresh policy.
//!
//! The policy is the caller-supplied half of the link: it decides which
//! outcomes mean "the credential expired" and knows how to get a new one.

use std::future::Future;

use async_trait::async_trait;

use crate::error::RefreshError;

/// A transport outcome as seen by [`RefreshPolicy::should_refresh`].
#[derive(Debug)]
pub enum Observed<'a, T, E> {
    Response(&'a T),
    Error(&'a E),
}

impl<T, E> Clone for Observed<'_, T, E> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T, E> Copy for Observed<'_, T, E> {}

impl<'a, T, E> From<&'a Result<T, E>> for Observed<'a, T, E> {
    fn from(result: &'a Result<T, E>) -> Self {
        match result {
            Ok(response) => Self::Response(response),
            Err(err) => Self::Error(err),
        }
    }
}

impl<'a, T, E> Observed<'a, T, E> {
    pub fn response(self) -> Option<&'a T> {
        match self {
            Self::Response(response) => Some(response),
            Self::Error(_) => None,
        }
    }

    pub fn error(self) -> Option<&'a E> {
        match self {
            Self::Response(_) => None,
            Self::Error(err) => Some(err),
        }
    }
}

/// Decides when a credential refresh is needed and performs it.
#[async_trait]
pub trait RefreshPolicy<Req, T, E>: Send + Sync + 'static {
    /// Whether `observed` means the credential used by `request` expired.
    ///
    /// Called once per outcome; must not block.
    fn should_refresh(&self, request: &Req, observed: Observed<'_, T, E>) -> bool;

    /// Obtain a fresh credential.
    ///
    /// `context` is the request that triggered the refresh. Invoked at most
    /// once at a time per link and must settle exactly once.
    async fn refresh_token(&self, context: &Req) -> Result<(), RefreshError>;
}

/// A [`RefreshPolicy`] assembled from two closures.
///
/// See [`policy_fn`].
pub struct PolicyFn<S, R> {
    should_refresh: S,
    refresh_token: R,
}

/// Build a policy from a `should_refresh` predicate and a `refresh_token`
/// function.
///
/// `refresh_token` receives an owned clone of the triggering request.
///
/// ```ignore
/// let policy = policy_fn(
///     |_req: &Request, observed: Observed<'_, Response, HttpError>| {
///         observed.error().is_some_and(|e| e.status() == 401)
///     },
///     move |_req: Request| {
///         let auth = auth.clone();
///         async move { auth.renew().await.map_err(Into::into) }
///     },
/// );
/// ```
pub fn policy_fn<Req, T, E, S, R, Fut>(should_refresh: S, refresh_token: R) -> PolicyFn<S, R>
where
    S: Fn(&Req, Observed<'_, T, E>) -> bool,
    R: Fn(Req) -> Fut,
    Fut: Future<Output = Result<(), RefreshError>>,
{
    PolicyFn {
        should_refresh,
        refresh_token,
    }
}

#[async_trait]
impl<Req, T, E, S, R, Fut> RefreshPolicy<Req, T, E> for PolicyFn<S, R>
where
    Req: Clone + Send + Sync + 'static,
    S: Fn(&Req, Observed<'_, T, E>) -> bool + Send + Sync + 'static,
    R: Fn(Req) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), RefreshError>> + Send + 'static,
{
    fn should_refresh(&self, request: &Req, observed: Observed<'_, T, E>) -> bool {
        (self.should_refresh)(request, observed)
    }

    async fn refresh_token(&self, context: &Req) -> Result<(), RefreshError> {
        (self.refresh_token)(context.clone()).await
    }
}
