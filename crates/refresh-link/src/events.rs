//! Refresh cycle events.
//!
//! Broadcast by the coordinator so callers can react to credential
//! refreshes (e.g. persist the new token or surface a re-login prompt).

/// Events broadcast over the lifetime of a refresh cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshEvent {
    /// A refresh cycle started; the policy is being invoked.
    Started,
    /// A refresh cycle settled and the queue was drained.
    Completed {
        /// Whether the policy reported success.
        refreshed: bool,
        /// Number of suspended requests handed the outcome.
        drained: usize,
    },
}

impl RefreshEvent {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }
}
