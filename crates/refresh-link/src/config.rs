use std::time::Duration;

pub const DEFAULT_LINK_NAME: &str = "refresh-link";

/// Configuration for a [`RefreshLink`](crate::RefreshLink).
#[derive(Debug, Clone)]
pub struct RefreshConfig {
    /// Label attached to log spans of this link
    pub name: String,

    /// Upper bound on a single refresh attempt.
    ///
    /// An attempt that runs longer is aborted and treated as a failed refresh.
    /// `None` waits for the policy indefinitely.
    pub refresh_timeout: Option<Duration>,

    /// Buffer size of the [`RefreshEvent`](crate::RefreshEvent) broadcast channel
    pub event_capacity: usize,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_LINK_NAME.to_owned(),
            refresh_timeout: Some(Duration::from_secs(30)),
            event_capacity: 16,
        }
    }
}

impl RefreshConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_refresh_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.refresh_timeout = timeout;
        self
    }

    /// Set the event channel capacity. Zero is bumped to one.
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }
}
