//! Flexible Sync subscriptions.
//!
//! A [`SubscriptionSet`] is an immutable, versioned list of queries. The
//! [`SubscriptionSetManager`] owns the latest one, commits new versions
//! through [`MutableSubscriptionSet`] and applies server acknowledgements:
//!
//! ```text
//! UNCOMMITTED -> PENDING -> BOOTSTRAPPING -> COMPLETE
//!                   |            |
//!                   +-> ERROR <--+
//! ```
//!
//! Any version that is still in flight when a newer one commits becomes
//! SUPERSEDED.

mod clock;
mod manager;
mod mutable;
mod set;

pub use manager::SubscriptionSetManager;
pub use mutable::MutableSubscriptionSet;
pub use set::{Subscription, SubscriptionSet, SubscriptionSetState};
