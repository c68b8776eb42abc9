use async_trait::async_trait;

/// The outbound request path wrapped by a [`RefreshLink`](crate::RefreshLink).
///
/// A resolved future is a finished request: one response or one error.
/// Dropping the future before it resolves cancels the request.
#[async_trait]
pub trait Transport<Req>: Send + Sync + 'static
where
    Req: Send + 'static,
{
    type Response: Send + 'static;
    type Error: Send + 'static;

    /// Send a request.
    async fn forward(&self, request: Req) -> Result<Self::Response, Self::Error>;
}
