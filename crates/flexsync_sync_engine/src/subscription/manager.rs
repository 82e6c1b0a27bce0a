//! Owner of the latest subscription set.

use crate::error::{SyncError, SyncResult};
use crate::subscription::clock::MonotonicClock;
use crate::subscription::mutable::MutableSubscriptionSet;
use crate::subscription::set::{Subscription, SubscriptionSet, SubscriptionSetState};
use chrono::{DateTime, Utc};
use flexsync_core::{from_cbor, to_cbor, CoreError, Database};
use flexsync_sync_protocol::AckState;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Metadata key holding the persisted subscription set.
pub(crate) const SUBSCRIPTIONS_KEY: &str = "flexsync.subscriptions";

#[derive(Serialize, Deserialize)]
struct PersistedSubscriptionSet {
    version: i64,
    state: SubscriptionSetState,
    error_message: Option<String>,
    /// CBOR encoded `Vec<Subscription>`.
    subscriptions: Vec<u8>,
    /// SHA-256 of `subscriptions`.
    fingerprint: Vec<u8>,
}

struct ManagerState {
    latest: SubscriptionSet,
    /// Final states of older versions that finished before being replaced.
    finished: BTreeMap<i64, SubscriptionSetState>,
}

/// Owns the subscription set of one synced database.
///
/// Readers get immutable [`SubscriptionSet`] values; writers go through
/// [`update`](Self::update), which serializes on the engine's write gate.
/// The server drives state through [`on_server_state`](Self::on_server_state).
///
/// Writers take the persist lock, then the database write lock. The state
/// lock is only held for in-memory reads and swaps, never across database
/// I/O, so [`state_of`](Self::state_of) works from a thread that holds a
/// write transaction. Readers of [`current`](Self::current) only touch the
/// watch channel.
pub struct SubscriptionSetManager {
    db: Arc<Database>,
    state: Mutex<ManagerState>,
    /// Serializes persist-then-publish so versions land in order.
    persist_lock: Mutex<()>,
    publisher: watch::Sender<SubscriptionSet>,
    write_gate: Arc<tokio::sync::Mutex<()>>,
    clock: MonotonicClock,
}

impl SubscriptionSetManager {
    /// Loads the persisted set from `db`, or starts from the empty,
    /// complete version 0.
    ///
    /// # Errors
    ///
    /// `InvalidFormat` if the persisted record is corrupt.
    pub fn open(db: Arc<Database>, write_gate: Arc<tokio::sync::Mutex<()>>) -> SyncResult<Self> {
        let latest = load(&db)?.unwrap_or_else(SubscriptionSet::initial);
        let floor = latest
            .iter()
            .map(Subscription::updated_at)
            .max()
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        debug!(
            version = latest.version,
            state = %latest.state,
            subscriptions = latest.len(),
            "loaded subscription set"
        );

        let (publisher, _) = watch::channel(latest.clone());
        Ok(Self {
            db,
            state: Mutex::new(ManagerState {
                latest,
                finished: BTreeMap::new(),
            }),
            persist_lock: Mutex::new(()),
            publisher,
            write_gate,
            clock: MonotonicClock::new(floor),
        })
    }

    /// Returns the latest subscription set.
    #[must_use]
    pub fn current(&self) -> SubscriptionSet {
        self.publisher.borrow().clone()
    }

    /// Observes every published set, in version order.
    #[must_use]
    pub fn state_changes(&self) -> watch::Receiver<SubscriptionSet> {
        self.publisher.subscribe()
    }

    /// Returns the state of `version`, or `None` if it never existed.
    ///
    /// Older versions that were still in flight when replaced report
    /// `Superseded`.
    #[must_use]
    pub fn state_of(&self, version: i64) -> Option<SubscriptionSetState> {
        let state = self.state.lock();
        if version == state.latest.version {
            Some(state.latest.state)
        } else if (0..state.latest.version).contains(&version) {
            Some(
                state
                    .finished
                    .get(&version)
                    .copied()
                    .unwrap_or(SubscriptionSetState::Superseded),
            )
        } else {
            None
        }
    }

    /// Runs `block` against a mutable copy of the latest set and commits the
    /// result as a new `Pending` version.
    ///
    /// Nothing is committed if `block` fails. A block that leaves the list
    /// unchanged returns the current set without allocating a version.
    ///
    /// # Errors
    ///
    /// - `IllegalState` when called from the thread holding the write
    ///   transaction
    /// - Whatever `block` returns
    /// - [`SyncError::StaleSubscriptionSet`] if the set moved on meanwhile
    pub async fn update<F>(&self, block: F) -> SyncResult<SubscriptionSet>
    where
        F: FnOnce(&mut MutableSubscriptionSet<'_>) -> SyncResult<()>,
    {
        self.ensure_outside_write("update subscriptions")?;
        let _gate = self.write_gate.lock().await;

        let base = self.state.lock().latest.clone();
        let mut mutable = MutableSubscriptionSet::new(&base, self.db.schema(), &self.clock);
        block(&mut mutable)?;

        let subscriptions = mutable.into_subscriptions();
        if subscriptions == base.subscriptions {
            debug!(version = base.version, "subscription update changed nothing");
            return Ok(self.current());
        }
        self.commit(base.version, subscriptions)
    }

    fn commit(&self, base_version: i64, subscriptions: Vec<Subscription>) -> SyncResult<SubscriptionSet> {
        let _persist = self.persist_lock.lock();
        self.ensure_latest(base_version)?;

        let next = SubscriptionSet {
            version: base_version + 1,
            state: SubscriptionSetState::Pending,
            error_message: None,
            subscriptions,
        };
        persist(&self.db, &next)?;

        let mut state = self.state.lock();
        let previous = std::mem::replace(&mut state.latest, next.clone());
        if previous.state.is_terminal() {
            state.finished.insert(previous.version, previous.state);
        } else {
            debug!(version = previous.version, "subscription set superseded");
        }
        self.publisher.send_replace(next.clone());
        drop(state);

        info!(
            version = next.version,
            subscriptions = next.len(),
            "committed subscription set"
        );
        Ok(next)
    }

    fn ensure_latest(&self, base_version: i64) -> SyncResult<()> {
        let latest = self.state.lock().latest.version;
        if latest != base_version {
            return Err(SyncError::StaleSubscriptionSet {
                base: base_version,
                latest,
            });
        }
        Ok(())
    }

    /// Applies a server acknowledgement.
    ///
    /// Acks for older versions are ignored, as are acks for versions this
    /// client never committed. Terminal states never change. The new state
    /// is published even if persisting it fails.
    pub fn on_server_state(&self, version: i64, ack: &AckState) {
        let _persist = self.persist_lock.lock();
        let next = {
            let state = self.state.lock();
            let latest = &state.latest;
            if version < latest.version {
                debug!(version, latest = latest.version, "ignoring ack for superseded subscription set");
                return;
            }
            if version > latest.version {
                warn!(version, latest = latest.version, "ignoring ack for unknown subscription set version");
                return;
            }

            let (next_state, message) = match ack {
                AckState::Bootstrapping => (SubscriptionSetState::Bootstrapping, None),
                AckState::Complete => (SubscriptionSetState::Complete, None),
                AckState::Error(message) => (SubscriptionSetState::Error, Some(message.clone())),
            };
            if !latest.state.can_advance_to(next_state) {
                debug!(version, from = %latest.state, to = %next_state, "ignoring subscription state change");
                return;
            }

            let mut next = latest.clone();
            next.state = next_state;
            next.error_message = message;
            next
        };

        if let Err(err) = persist(&self.db, &next) {
            error!(version, error = %err, "failed to persist subscription state");
        }

        match next.state {
            SubscriptionSetState::Error => warn!(
                version,
                message = next.error_message.as_deref().unwrap_or_default(),
                "server rejected subscription set"
            ),
            _ => debug!(version, state = %next.state, "subscription set state changed"),
        }
        let mut state = self.state.lock();
        state.latest = next.clone();
        self.publisher.send_replace(next);
    }

    /// Marks the latest set `Pending` again after a client reset, keeping
    /// its version. The server re-bootstraps it on reconnect.
    pub fn on_client_reset(&self) -> SyncResult<()> {
        let _persist = self.persist_lock.lock();
        let mut next = self.state.lock().latest.clone();
        if next.version == 0 {
            return Ok(());
        }

        next.state = SubscriptionSetState::Pending;
        next.error_message = None;
        persist(&self.db, &next)?;

        debug!(version = next.version, "subscription set pending after client reset");
        let mut state = self.state.lock();
        state.latest = next.clone();
        self.publisher.send_replace(next);
        Ok(())
    }

    /// Waits until the latest set is `Complete`.
    ///
    /// Follows newer versions committed while waiting. Timing out only stops
    /// the wait; the set keeps synchronizing.
    ///
    /// # Errors
    ///
    /// - `IllegalArgument` if `timeout` is zero
    /// - `IllegalState` from the thread holding the write transaction
    /// - [`SyncError::BadFlexibleSyncQuery`] if the server rejected the set
    /// - [`SyncError::Timeout`] when `timeout` elapses first
    pub async fn wait_for_synchronization(&self, timeout: Duration) -> SyncResult<SubscriptionSet> {
        if timeout.is_zero() {
            return Err(SyncError::IllegalArgument(format!(
                "'timeout' must be > 0. It was: {timeout:?}"
            )));
        }
        self.ensure_outside_write("wait for synchronization")?;

        let mut changes = self.publisher.subscribe();
        let wait = async move {
            loop {
                let set = changes.borrow_and_update().clone();
                match set.state {
                    SubscriptionSetState::Complete => return Ok(set),
                    SubscriptionSetState::Error => {
                        return Err(SyncError::BadFlexibleSyncQuery(
                            set.error_message.unwrap_or_default(),
                        ))
                    }
                    _ => {}
                }
                if changes.changed().await.is_err() {
                    return Err(SyncError::Cancelled);
                }
            }
        };

        tokio::time::timeout(timeout, wait)
            .await
            .map_err(|_| SyncError::Timeout { after: timeout })?
    }

    pub(crate) fn ensure_outside_write(&self, operation: &str) -> SyncResult<()> {
        if self.db.is_write_held_by_current_thread() {
            return Err(SyncError::IllegalState(format!(
                "cannot {operation} from inside a write transaction"
            )));
        }
        Ok(())
    }
}

impl std::fmt::Debug for SubscriptionSetManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let latest = self.publisher.borrow();
        f.debug_struct("SubscriptionSetManager")
            .field("version", &latest.version)
            .field("state", &latest.state)
            .finish_non_exhaustive()
    }
}

fn fingerprint(bytes: &[u8]) -> Vec<u8> {
    Sha256::digest(bytes).to_vec()
}

fn persist(db: &Database, set: &SubscriptionSet) -> SyncResult<()> {
    let subscriptions = to_cbor(&set.subscriptions)?;
    let record = PersistedSubscriptionSet {
        version: set.version,
        state: set.state,
        error_message: set.error_message.clone(),
        fingerprint: fingerprint(&subscriptions),
        subscriptions,
    };
    db.set_metadata(SUBSCRIPTIONS_KEY, to_cbor(&record)?)?;
    Ok(())
}

fn load(db: &Database) -> SyncResult<Option<SubscriptionSet>> {
    let Some(bytes) = db.metadata(SUBSCRIPTIONS_KEY) else {
        return Ok(None);
    };
    let record: PersistedSubscriptionSet = from_cbor(&bytes)?;
    if fingerprint(&record.subscriptions) != record.fingerprint {
        return Err(CoreError::invalid_format("subscription set fingerprint mismatch").into());
    }

    Ok(Some(SubscriptionSet {
        version: record.version,
        state: record.state,
        error_message: record.error_message,
        subscriptions: from_cbor(&record.subscriptions)?,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use flexsync_core::{DatabaseConfig, Query, Schema};

    fn schema() -> Schema {
        Schema::new(["FlexParentObject", "FlexChildObject"])
    }

    fn manager(db: &Arc<Database>) -> SubscriptionSetManager {
        SubscriptionSetManager::open(Arc::clone(db), Arc::new(tokio::sync::Mutex::new(()))).unwrap()
    }

    fn parents(db: &Database) -> Query {
        Query::all(db.schema(), "FlexParentObject").unwrap()
    }

    #[tokio::test]
    async fn starts_complete_at_version_zero() {
        let db = Arc::new(Database::in_memory(schema()));
        let manager = manager(&db);
        let current = manager.current();
        assert_eq!(current.version(), 0);
        assert_eq!(current.state(), SubscriptionSetState::Complete);
        assert!(current.is_empty());
    }

    #[tokio::test]
    async fn update_commits_pending_version() {
        let db = Arc::new(Database::in_memory(schema()));
        let manager = manager(&db);
        let query = parents(&db);

        let set = manager
            .update(|subs| {
                subs.add(&query)?;
                Ok(())
            })
            .await
            .unwrap();
        assert_eq!(set.version(), 1);
        assert_eq!(set.state(), SubscriptionSetState::Pending);
        assert_eq!(manager.current(), set);
        assert!(db.metadata(SUBSCRIPTIONS_KEY).is_some());
    }

    #[tokio::test]
    async fn failed_block_commits_nothing() {
        let db = Arc::new(Database::in_memory(schema()));
        let manager = manager(&db);
        let query = parents(&db);
        let db_version = db.version();

        let err = manager
            .update(|subs| {
                subs.add(&query)?;
                Err(SyncError::IllegalArgument("user abort".into()))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::IllegalArgument(_)));
        assert_eq!(manager.current().version(), 0);
        assert!(manager.current().is_empty());
        assert_eq!(db.version(), db_version);
    }

    #[tokio::test]
    async fn stale_commit_is_rejected() {
        let db = Arc::new(Database::in_memory(schema()));
        let manager = manager(&db);
        let query = parents(&db);
        manager
            .update(|subs| subs.add(&query).map(|_| ()))
            .await
            .unwrap();

        let err = manager.commit(0, Vec::new()).unwrap_err();
        assert!(matches!(
            err,
            SyncError::StaleSubscriptionSet { base: 0, latest: 1 }
        ));
        assert_eq!(manager.current().len(), 1);
    }

    #[tokio::test]
    async fn acks_follow_allowed_moves() {
        let db = Arc::new(Database::in_memory(schema()));
        let manager = manager(&db);
        let query = parents(&db);
        manager
            .update(|subs| subs.add(&query).map(|_| ()))
            .await
            .unwrap();

        manager.on_server_state(1, &AckState::Bootstrapping);
        assert_eq!(manager.current().state(), SubscriptionSetState::Bootstrapping);

        manager.on_server_state(1, &AckState::Complete);
        assert_eq!(manager.current().state(), SubscriptionSetState::Complete);

        // Terminal.
        manager.on_server_state(1, &AckState::Error("late".into()));
        assert_eq!(manager.current().state(), SubscriptionSetState::Complete);
        assert_eq!(manager.current().error_message(), None);

        // Unknown future version.
        manager.on_server_state(7, &AckState::Complete);
        assert_eq!(manager.current().version(), 1);
    }

    #[tokio::test]
    async fn older_versions_become_superseded() {
        let db = Arc::new(Database::in_memory(schema()));
        let manager = manager(&db);
        let parents = parents(&db);
        let children = Query::all(db.schema(), "FlexChildObject").unwrap();

        manager
            .update(|subs| subs.add(&parents).map(|_| ()))
            .await
            .unwrap();
        manager
            .update(|subs| subs.add(&children).map(|_| ()))
            .await
            .unwrap();

        assert_eq!(manager.state_of(0), Some(SubscriptionSetState::Complete));
        assert_eq!(manager.state_of(1), Some(SubscriptionSetState::Superseded));
        assert_eq!(manager.state_of(2), Some(SubscriptionSetState::Pending));
        assert_eq!(manager.state_of(3), None);

        // A late ack for the superseded version is dropped.
        manager.on_server_state(1, &AckState::Complete);
        assert_eq!(manager.current().version(), 2);
        assert_eq!(manager.current().state(), SubscriptionSetState::Pending);
    }

    #[tokio::test]
    async fn reloads_persisted_set() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("default.realm");
        let created_at;
        {
            let db = Arc::new(Database::open(DatabaseConfig::new(&path, schema())).unwrap());
            let manager = manager(&db);
            let query = Query::new(db.schema(), "FlexParentObject", "section = 42").unwrap();
            let set = manager
                .update(|subs| subs.add_named("answer", &query, false).map(|_| ()))
                .await
                .unwrap();
            manager.on_server_state(set.version(), &AckState::Error("Invalid query".into()));
            created_at = manager.current().find_by_name("answer").unwrap().created_at();
            db.close().unwrap();
        }

        let db = Arc::new(Database::open(DatabaseConfig::new(&path, schema())).unwrap());
        let manager = manager(&db);
        let current = manager.current();
        assert_eq!(current.version(), 1);
        assert_eq!(current.state(), SubscriptionSetState::Error);
        assert_eq!(current.error_message(), Some("Invalid query"));
        let sub = current.find_by_name("answer").unwrap();
        assert_eq!(sub.query_description(), "section == 42 ");
        assert_eq!(sub.created_at(), created_at);
    }

    #[tokio::test]
    async fn corrupt_record_is_detected() {
        let db = Arc::new(Database::in_memory(schema()));
        let record = PersistedSubscriptionSet {
            version: 1,
            state: SubscriptionSetState::Pending,
            error_message: None,
            subscriptions: to_cbor(&Vec::<Subscription>::new()).unwrap(),
            fingerprint: vec![0; 32],
        };
        db.set_metadata(SUBSCRIPTIONS_KEY, to_cbor(&record).unwrap())
            .unwrap();

        let err = SubscriptionSetManager::open(Arc::clone(&db), Arc::new(tokio::sync::Mutex::new(())))
            .unwrap_err();
        assert!(matches!(err, SyncError::Database(CoreError::InvalidFormat { .. })));
    }

    #[tokio::test]
    async fn client_reset_marks_pending() {
        let db = Arc::new(Database::in_memory(schema()));
        let manager = manager(&db);
        let query = parents(&db);
        manager
            .update(|subs| subs.add(&query).map(|_| ()))
            .await
            .unwrap();
        manager.on_server_state(1, &AckState::Complete);

        manager.on_client_reset().unwrap();
        let current = manager.current();
        assert_eq!(current.version(), 1);
        assert_eq!(current.state(), SubscriptionSetState::Pending);
    }

    #[tokio::test]
    async fn wait_rejects_zero_timeout() {
        let db = Arc::new(Database::in_memory(schema()));
        let manager = manager(&db);
        let err = manager
            .wait_for_synchronization(Duration::ZERO)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::IllegalArgument(_)));
    }

    #[tokio::test]
    async fn sync_operations_fail_inside_write() {
        let db = Arc::new(Database::in_memory(schema()));
        let manager = manager(&db);
        let txn = db.begin_write().unwrap();

        let err = manager
            .wait_for_synchronization(Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::IllegalState(_)));
        let err = manager.update(|_| Ok(())).await.unwrap_err();
        assert!(matches!(err, SyncError::IllegalState(_)));

        // Reading does not need the writer.
        assert_eq!(manager.current().version(), 0);
        drop(txn);
    }

    #[tokio::test]
    async fn state_is_readable_while_an_ack_waits_for_the_writer() {
        let db = Arc::new(Database::in_memory(schema()));
        let manager = Arc::new(manager(&db));
        let query = parents(&db);
        manager
            .update(|subs| subs.add(&query).map(|_| ()))
            .await
            .unwrap();

        let txn = db.begin_write().unwrap();
        let acker = {
            let manager = Arc::clone(&manager);
            std::thread::spawn(move || manager.on_server_state(1, &AckState::Complete))
        };
        // Give the ack time to block on the write lock.
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(manager.state_of(1), Some(SubscriptionSetState::Pending));
        assert_eq!(manager.state_of(0), Some(SubscriptionSetState::Complete));

        drop(txn);
        acker.join().unwrap();
        assert_eq!(manager.state_of(1), Some(SubscriptionSetState::Complete));
    }

    #[tokio::test]
    async fn ack_is_published_when_persisting_fails() {
        let db = Arc::new(Database::in_memory(schema()));
        let manager = manager(&db);
        let query = parents(&db);
        manager
            .update(|subs| subs.add(&query).map(|_| ()))
            .await
            .unwrap();
        let mut changes = manager.state_changes();
        changes.borrow_and_update();

        db.close().unwrap();
        manager.on_server_state(1, &AckState::Complete);

        assert!(changes.has_changed().unwrap());
        assert_eq!(manager.current().state(), SubscriptionSetState::Complete);
        assert_eq!(manager.state_of(1), Some(SubscriptionSetState::Complete));
    }
}
