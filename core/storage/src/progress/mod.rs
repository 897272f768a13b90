//! Write-progress subscription registry and relay.
//!
//! Providers emit raw progress events through a [`ProgressEmitter`]; the
//! [`ProgressRelay`] fans each event out to global subscribers and to the
//! subscribers of the originating request, unsubscribing a request's
//! handlers once its write completes.

pub mod relay;
pub mod subscriptions;

pub use relay::{ProgressEmitter, ProgressEvent, ProgressRelay, ProgressSource};
pub use subscriptions::{ProgressHandler, SubscriptionId, SubscriptionRegistry};
