use thiserror::Error;

/// Error returned by [`RefreshPolicy::refresh_token`](crate::RefreshPolicy::refresh_token).
///
/// It is logged by the coordinator and reduced to `refreshed = false`; no
/// waiting request ever sees it.
pub type RefreshError = Box<dyn std::error::Error + Send + Sync>;

/// Terminal error of an intercepted request.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LinkError<E> {
    /// The transport failed, either directly or on replay.
    #[error("transport error: {0}")]
    Transport(E),

    /// The request was cancelled while suspended or replaying.
    #[error("request cancelled")]
    Cancelled,

    /// The result channel closed before a result was delivered.
    ///
    /// Happens when the queue is dropped with the request still parked, or
    /// when wiring up the replay failed.
    #[error("request abandoned before a result was delivered")]
    Abandoned,
}

impl<E> LinkError<E> {
    /// Unwrap the transport error, if this is one.
    pub fn into_transport(self) -> Option<E> {
        match self {
            Self::Transport(err) => Some(err),
            Self::Cancelled | Self::Abandoned => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
