//! Immutable subscription sets.

use chrono::{DateTime, Utc};
use flexsync_core::Query;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// A query registered for synchronization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    id: Uuid,
    name: Option<String>,
    object_type: String,
    query_description: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Subscription {
    pub(crate) fn new(name: Option<String>, query: &Query, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name,
            object_type: query.object_type().to_string(),
            query_description: query.description().to_string(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Opaque identity, stable across query updates.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Returns the name, or `None` for anonymous subscriptions.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Returns the object type.
    #[must_use]
    pub fn object_type(&self) -> &str {
        &self.object_type
    }

    /// Returns the canonical query text.
    #[must_use]
    pub fn query_description(&self) -> &str {
        &self.query_description
    }

    /// Returns when the subscription was created.
    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Returns when the query was last replaced.
    #[must_use]
    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Returns true if this subscription is for `query`.
    #[must_use]
    pub fn matches_query(&self, query: &Query) -> bool {
        self.object_type == query.object_type() && self.query_description == query.description()
    }

    pub(crate) fn replace_query(&mut self, query: &Query, now: DateTime<Utc>) {
        self.object_type = query.object_type().to_string();
        self.query_description = query.description().to_string();
        self.updated_at = now;
    }
}

/// Lifecycle of one subscription set version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SubscriptionSetState {
    /// Being built inside `update`. Never observable outside it.
    Uncommitted,
    /// Committed locally, not yet acknowledged.
    Pending,
    /// The server is sending the initial data.
    Bootstrapping,
    /// All data for the set has been downloaded.
    Complete,
    /// The server rejected the set.
    Error,
    /// A newer version was committed before this one finished.
    Superseded,
}

impl SubscriptionSetState {
    /// Returns true if this version can no longer change state.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SubscriptionSetState::Complete
                | SubscriptionSetState::Error
                | SubscriptionSetState::Superseded
        )
    }

    /// Moves a server acknowledgement may cause.
    pub(crate) fn can_advance_to(self, next: SubscriptionSetState) -> bool {
        use SubscriptionSetState::*;
        matches!(
            (self, next),
            (Pending, Bootstrapping)
                | (Pending, Complete)
                | (Bootstrapping, Complete)
                | (Pending, Error)
                | (Bootstrapping, Error)
        )
    }
}

impl fmt::Display for SubscriptionSetState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SubscriptionSetState::Uncommitted => "UNCOMMITTED",
            SubscriptionSetState::Pending => "PENDING",
            SubscriptionSetState::Bootstrapping => "BOOTSTRAPPING",
            SubscriptionSetState::Complete => "COMPLETE",
            SubscriptionSetState::Error => "ERROR",
            SubscriptionSetState::Superseded => "SUPERSEDED",
        };
        f.write_str(name)
    }
}

/// An immutable, versioned set of subscriptions.
///
/// Returned by [`SubscriptionSetManager`](crate::SubscriptionSetManager);
/// changing it means running a new `update`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionSet {
    pub(crate) version: i64,
    pub(crate) state: SubscriptionSetState,
    pub(crate) error_message: Option<String>,
    pub(crate) subscriptions: Vec<Subscription>,
}

impl SubscriptionSet {
    /// The set a database starts with: nothing to sync, so already complete.
    pub(crate) fn initial() -> Self {
        Self {
            version: 0,
            state: SubscriptionSetState::Complete,
            error_message: None,
            subscriptions: Vec::new(),
        }
    }

    /// Returns the version.
    #[must_use]
    pub fn version(&self) -> i64 {
        self.version
    }

    /// Returns the state.
    #[must_use]
    pub fn state(&self) -> SubscriptionSetState {
        self.state
    }

    /// Returns the server message when the state is `Error`.
    #[must_use]
    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    /// Number of subscriptions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    /// Returns true if there are no subscriptions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }

    /// Iterates in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Subscription> {
        self.subscriptions.iter()
    }

    /// Finds a subscription by name.
    #[must_use]
    pub fn find_by_name(&self, name: &str) -> Option<&Subscription> {
        self.subscriptions.iter().find(|s| s.name() == Some(name))
    }

    /// Finds the first subscription, named or not, for `query`.
    #[must_use]
    pub fn find_by_query(&self, query: &Query) -> Option<&Subscription> {
        self.subscriptions.iter().find(|s| s.matches_query(query))
    }
}

impl<'a> IntoIterator for &'a SubscriptionSet {
    type Item = &'a Subscription;
    type IntoIter = std::slice::Iter<'a, Subscription>;

    fn into_iter(self) -> Self::IntoIter {
        self.subscriptions.iter()
    }
}
