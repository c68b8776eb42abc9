//! # Refresh Link
//!
//! Single-flight credential refresh for outbound requests.
//!
//! A [`RefreshLink`] wraps a [`Transport`]. Every request goes through
//! [`RefreshLink::intercept`]; when the [`RefreshPolicy`] decides that a
//! response (or error) means the shared credential has expired, the request
//! is parked in a [`SuspensionQueue`] and the [`RefreshCoordinator`] runs the
//! policy's refresh exactly once, however many requests noticed the expiry.
//! When the refresh settles every parked request is replayed (or handed back
//! its original outcome if the refresh failed).
//!
//! While a refresh is in flight new requests are not sent at all; they are
//! queued straight away and replayed with the fresh credential.
//!
//! ## Components
//!
//! - [`SuspensionQueue`]: ordered buffer of continuations, drained once per cycle
//! - [`RefreshCoordinator`]: owns the `refreshing` flag and runs the policy
//! - [`RefreshLink`]: per-request decision logic
//!
//! ## License
//!
//! MIT License
//!
//! ## Authors
//!
//! - hua0512
//!

mod config;
mod coordinator;
mod error;
mod events;
mod link;
mod policy;
mod queue;
mod transport;

#[cfg(test)]
mod test_utils;

pub use config::RefreshConfig;
pub use coordinator::{RefreshCoordinator, RefreshStats};
pub use error::{LinkError, RefreshError};
pub use events::RefreshEvent;
pub use link::{Intercepted, RefreshLink};
pub use policy::{Observed, PolicyFn, RefreshPolicy, policy_fn};
pub use queue::{Continuation, DrainReport, QueueHandle, ReplayFuture, Resume, SuspensionQueue};
pub use transport::Transport;
