//! The subscription set under construction inside `update`.

use crate::error::{SyncError, SyncResult};
use crate::subscription::clock::MonotonicClock;
use crate::subscription::set::{Subscription, SubscriptionSet, SubscriptionSetState};
use flexsync_core::{Query, Schema};

/// A mutable copy of the latest subscription set.
///
/// Only reachable inside [`SubscriptionSetManager::update`]; every change is
/// visible to later calls in the same block and is committed as one new
/// version when the block returns `Ok`.
///
/// [`SubscriptionSetManager::update`]: crate::SubscriptionSetManager::update
#[derive(Debug)]
pub struct MutableSubscriptionSet<'a> {
    base_version: i64,
    schema: &'a Schema,
    clock: &'a MonotonicClock,
    subscriptions: Vec<Subscription>,
}

impl<'a> MutableSubscriptionSet<'a> {
    pub(crate) fn new(base: &SubscriptionSet, schema: &'a Schema, clock: &'a MonotonicClock) -> Self {
        Self {
            base_version: base.version,
            schema,
            clock,
            subscriptions: base.subscriptions.clone(),
        }
    }

    /// Adds an anonymous subscription.
    ///
    /// Returns the existing anonymous subscription when one already covers
    /// the same object type and query.
    pub fn add(&mut self, query: &Query) -> SyncResult<Subscription> {
        self.schema.ensure_contains(query.object_type())?;
        if let Some(existing) = self
            .subscriptions
            .iter()
            .find(|s| s.name().is_none() && s.matches_query(query))
        {
            return Ok(existing.clone());
        }

        let subscription = Subscription::new(None, query, self.clock.now());
        self.subscriptions.push(subscription.clone());
        Ok(subscription)
    }

    /// Adds a named subscription.
    ///
    /// # Errors
    ///
    /// [`SyncError::ConflictingSubscriptionName`] if `name` is taken by a
    /// different query and `update_existing` is false. With
    /// `update_existing` the query is replaced in place; the id and creation
    /// time are kept.
    pub fn add_named(
        &mut self,
        name: impl Into<String>,
        query: &Query,
        update_existing: bool,
    ) -> SyncResult<Subscription> {
        let name = name.into();
        if name.is_empty() {
            return Err(SyncError::IllegalArgument(
                "subscription name must not be empty".into(),
            ));
        }
        self.schema.ensure_contains(query.object_type())?;

        let clock = self.clock;
        match self
            .subscriptions
            .iter_mut()
            .find(|s| s.name() == Some(name.as_str()))
        {
            Some(existing) if existing.matches_query(query) => Ok(existing.clone()),
            Some(existing) if update_existing => {
                existing.replace_query(query, clock.now());
                Ok(existing.clone())
            }
            Some(_) => Err(SyncError::ConflictingSubscriptionName { name }),
            None => {
                let subscription = Subscription::new(Some(name), query, clock.now());
                self.subscriptions.push(subscription.clone());
                Ok(subscription)
            }
        }
    }

    /// Removes the subscription called `name`. Returns false if absent.
    pub fn remove(&mut self, name: &str) -> bool {
        self.retain(|s| s.name() != Some(name))
    }

    /// Removes `subscription` by identity. Returns false if absent.
    pub fn remove_subscription(&mut self, subscription: &Subscription) -> bool {
        let id = subscription.id();
        self.retain(|s| s.id() != id)
    }

    /// Removes everything. Returns false if the set was already empty.
    pub fn remove_all(&mut self) -> bool {
        self.retain(|_| false)
    }

    /// Removes every subscription on `object_type`.
    ///
    /// # Errors
    ///
    /// [`SyncError::IllegalArgument`] if the type is not part of the synced
    /// schema.
    pub fn remove_all_of_type(&mut self, object_type: &str) -> SyncResult<bool> {
        if !self.schema.contains(object_type) {
            return Err(SyncError::IllegalArgument(format!(
                "'{object_type}' is not part of the schema for this Realm"
            )));
        }
        Ok(self.retain(|s| s.object_type() != object_type))
    }

    /// Iterates over the subscriptions as changed so far.
    pub fn iter(&self) -> impl Iterator<Item = &Subscription> {
        self.subscriptions.iter()
    }

    /// Number of subscriptions as changed so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    /// Returns true if no subscriptions remain.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }

    /// Finds a subscription by name.
    #[must_use]
    pub fn find_by_name(&self, name: &str) -> Option<&Subscription> {
        self.subscriptions.iter().find(|s| s.name() == Some(name))
    }

    /// Finds the first subscription for `query`.
    #[must_use]
    pub fn find_by_query(&self, query: &Query) -> Option<&Subscription> {
        self.subscriptions.iter().find(|s| s.matches_query(query))
    }

    /// Always `Uncommitted`.
    #[must_use]
    pub fn state(&self) -> SubscriptionSetState {
        SubscriptionSetState::Uncommitted
    }

    /// The version this transaction started from.
    #[must_use]
    pub fn version(&self) -> i64 {
        self.base_version
    }

    pub(crate) fn into_subscriptions(self) -> Vec<Subscription> {
        self.subscriptions
    }

    fn retain(&mut self, keep: impl FnMut(&Subscription) -> bool) -> bool {
        let before = self.subscriptions.len();
        self.subscriptions.retain(keep);
        self.subscriptions.len() != before
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};
    use proptest::prelude::*;

    fn schema() -> Schema {
        Schema::new(["FlexParentObject", "FlexChildObject"])
    }

    fn clock() -> MonotonicClock {
        MonotonicClock::new(DateTime::<Utc>::MIN_UTC)
    }

    #[test]
    fn add_normalizes_query() {
        let schema = schema();
        let clock = clock();
        let mut set = MutableSubscriptionSet::new(&SubscriptionSet::initial(), &schema, &clock);

        let query = Query::new(&schema, "FlexParentObject", "section = 42").unwrap();
        let sub = set.add(&query).unwrap();
        assert_eq!(sub.query_description(), "section == 42 ");
        assert_eq!(sub.object_type(), "FlexParentObject");
        assert_eq!(sub.name(), None);
        assert_eq!(sub.created_at(), sub.updated_at());
        assert_eq!(set.state(), SubscriptionSetState::Uncommitted);
    }

    #[test]
    fn anonymous_duplicates_collapse() {
        let schema = schema();
        let clock = clock();
        let mut set = MutableSubscriptionSet::new(&SubscriptionSet::initial(), &schema, &clock);

        let first = set
            .add(&Query::all(&schema, "FlexParentObject").unwrap())
            .unwrap();
        let second = set
            .add(&Query::new(&schema, "FlexParentObject", "TRUEPREDICATE").unwrap())
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(set.len(), 1);

        // A named subscription for the same query is a separate entry.
        set.add_named("parents", &Query::all(&schema, "FlexParentObject").unwrap(), false)
            .unwrap();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn named_conflict_leaves_set_unchanged() {
        let schema = schema();
        let clock = clock();
        let mut set = MutableSubscriptionSet::new(&SubscriptionSet::initial(), &schema, &clock);

        let q1 = Query::new(&schema, "FlexParentObject", "section = 1").unwrap();
        let q2 = Query::new(&schema, "FlexParentObject", "section = 2").unwrap();
        let original = set.add_named("x", &q1, false).unwrap();

        let err = set.add_named("x", &q2, false).unwrap_err();
        assert!(matches!(err, SyncError::ConflictingSubscriptionName { ref name } if name == "x"));
        assert_eq!(set.len(), 1);
        assert_eq!(set.find_by_name("x").unwrap(), &original);

        // Same name and query is not a conflict.
        assert_eq!(set.add_named("x", &q1, false).unwrap(), original);
    }

    #[test]
    fn update_existing_keeps_identity() {
        let schema = schema();
        let clock = clock();
        let mut set = MutableSubscriptionSet::new(&SubscriptionSet::initial(), &schema, &clock);

        let q1 = Query::new(&schema, "FlexParentObject", "section = 1").unwrap();
        let q2 = Query::new(&schema, "FlexChildObject", "section = 2").unwrap();
        let original = set.add_named("x", &q1, false).unwrap();
        let updated = set.add_named("x", &q2, true).unwrap();

        assert_eq!(updated.id(), original.id());
        assert_eq!(updated.created_at(), original.created_at());
        assert!(updated.updated_at() > original.updated_at());
        assert_eq!(updated.object_type(), "FlexChildObject");
        assert_eq!(updated.query_description(), "section == 2 ");
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn removal() {
        let schema = schema();
        let clock = clock();
        let mut set = MutableSubscriptionSet::new(&SubscriptionSet::initial(), &schema, &clock);

        assert!(!set.remove("missing"));
        assert!(!set.remove_all());

        let parent = set
            .add(&Query::all(&schema, "FlexParentObject").unwrap())
            .unwrap();
        set.add_named("child", &Query::all(&schema, "FlexChildObject").unwrap(), false)
            .unwrap();
        assert_eq!(set.iter().count(), 2);

        assert!(set.remove_subscription(&parent));
        assert!(!set.remove_subscription(&parent));
        assert!(!set.remove_all_of_type("FlexParentObject").unwrap());
        assert!(set.remove_all_of_type("FlexChildObject").unwrap());
        assert!(set.is_empty());
    }

    #[test]
    fn remove_all_of_unknown_type_fails() {
        let schema = schema();
        let clock = clock();
        let mut set = MutableSubscriptionSet::new(&SubscriptionSet::initial(), &schema, &clock);
        let err = set.remove_all_of_type("Nope").unwrap_err();
        assert!(matches!(err, SyncError::IllegalArgument(_)));
    }

    #[test]
    fn rejects_types_outside_schema() {
        let schema = schema();
        let other = Schema::new(["Other"]);
        let clock = clock();
        let mut set = MutableSubscriptionSet::new(&SubscriptionSet::initial(), &schema, &clock);
        let query = Query::all(&other, "Other").unwrap();
        assert!(matches!(
            set.add(&query),
            Err(SyncError::Database(flexsync_core::CoreError::UnknownObjectType { .. }))
        ));
        assert!(set.add_named("", &Query::all(&schema, "FlexChildObject").unwrap(), false).is_err());
    }

    proptest! {
        #[test]
        fn anonymous_adds_dedup(sections in prop::collection::vec(0i64..5, 1..20)) {
            let schema = schema();
            let clock = clock();
            let mut set = MutableSubscriptionSet::new(&SubscriptionSet::initial(), &schema, &clock);
            for section in &sections {
                let query = Query::new(&schema, "FlexParentObject", &format!("section = {section}")).unwrap();
                set.add(&query).unwrap();
            }
            let distinct: std::collections::BTreeSet<_> = sections.iter().collect();
            prop_assert_eq!(set.len(), distinct.len());
        }
    }
}
