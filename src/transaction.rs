//! Transactions over copy-on-write store snapshots.
//!
//! A read-only transaction sees the stores as they were when it began. A
//! read-write transaction additionally holds the write lock of every store in
//! its scope and mutates private copies; `commit` publishes them atomically.

use crate::cursor::{Cursor, CursorSource};
use crate::engine::index::IndexData;
use crate::engine::store::StoreData;
use crate::engine::{Connection, Engine};
use crate::errors::DbError;
use crate::schema::StoreSchema;
use crate::types::{Direction, Key, KeyRange, Record, TxMode};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use tokio::sync::OwnedMutexGuard;

#[derive(Debug, Clone, PartialEq, Eq)]
enum TxStatus {
    Active,
    Committing,
    Committed,
    Aborted(String),
}

struct TxState {
    status: TxStatus,
    stores: BTreeMap<String, Arc<StoreData>>,
    dirty: BTreeSet<String>,
    guards: Vec<OwnedMutexGuard<()>>,
}

impl TxState {
    fn ensure_active(&self) -> Result<(), DbError> {
        match &self.status {
            TxStatus::Active => Ok(()),
            TxStatus::Aborted(reason) => Err(DbError::Transaction(format!("aborted: {reason}"))),
            TxStatus::Committing | TxStatus::Committed => {
                Err(DbError::Transaction("finished".into()))
            }
        }
    }

    fn finish(&mut self, status: TxStatus) {
        self.status = status;
        self.stores.clear();
        self.dirty.clear();
        self.guards.clear();
    }
}

struct TxInner {
    engine: Arc<Engine>,
    conn: Arc<Connection>,
    mode: TxMode,
    scope: Vec<String>,
    state: Mutex<TxState>,
}

impl Drop for TxInner {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        if state.status == TxStatus::Active && !state.dirty.is_empty() {
            log::warn!(
                "uncommitted transaction on {:?} dropped; changes to {} store(s) discarded",
                self.scope,
                state.dirty.len()
            );
            self.engine.counters().record_abort();
        }
    }
}

/// A handle to one transaction. Clones refer to the same transaction.
#[derive(Clone)]
pub struct Transaction {
    inner: Arc<TxInner>,
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("database", &self.inner.conn.slot.name)
            .field("mode", &self.inner.mode)
            .field("scope", &self.inner.scope)
            .field("status", &self.inner.state.lock().status)
            .finish()
    }
}

impl Transaction {
    pub(crate) async fn begin(
        engine: Arc<Engine>,
        conn: Arc<Connection>,
        stores: &[&str],
        mode: TxMode,
    ) -> Result<Self, DbError> {
        let scope: BTreeSet<String> = stores.iter().map(|s| (*s).to_string()).collect();
        if scope.is_empty() {
            return Err(DbError::InvalidArgument(
                "a transaction needs at least one store".into(),
            ));
        }
        {
            let state = conn.slot.state.read();
            if let Some(missing) = scope.iter().find(|s| !state.stores.contains_key(*s)) {
                return Err(DbError::StoreNotFound(missing.clone()));
            }
        }
        // Sorted acquisition order keeps overlapping scopes deadlock free.
        let mut guards = Vec::new();
        if mode == TxMode::ReadWrite {
            for name in &scope {
                guards.push(conn.slot.write_lock(name).lock_owned().await);
            }
        }
        let stores = {
            let state = conn.slot.state.read();
            scope
                .iter()
                .map(|n| match state.stores.get(n) {
                    Some(s) => Ok((n.clone(), s.clone())),
                    None => Err(DbError::StoreNotFound(n.clone())),
                })
                .collect::<Result<BTreeMap<_, _>, _>>()?
        };
        log::trace!("begin {mode:?} transaction on {scope:?} in '{}'", conn.slot.name);
        let state = TxState {
            status: TxStatus::Active,
            stores,
            dirty: BTreeSet::new(),
            guards,
        };
        Ok(Self {
            inner: Arc::new(TxInner {
                engine,
                conn,
                mode,
                scope: scope.into_iter().collect(),
                state: Mutex::new(state),
            }),
        })
    }

    #[must_use]
    pub fn mode(&self) -> TxMode {
        self.inner.mode
    }

    /// Store names in scope, sorted.
    #[must_use]
    pub fn store_names(&self) -> &[String] {
        &self.inner.scope
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.inner.state.lock().status == TxStatus::Active
    }

    pub(crate) fn engine(&self) -> &Engine {
        &self.inner.engine
    }

    /// # Errors
    /// `StoreNotFound` when `name` is not in scope, `Transaction` when the
    /// transaction is no longer active.
    pub fn store(&self, name: &str) -> Result<ObjectStore, DbError> {
        self.with_store(name, |_| ())?;
        Ok(ObjectStore {
            tx: self.clone(),
            name: name.to_string(),
        })
    }

    /// Runs `f` against the transaction's view of `name`.
    pub(crate) fn with_store<R>(
        &self,
        name: &str,
        f: impl FnOnce(&StoreData) -> R,
    ) -> Result<R, DbError> {
        let store = {
            let state = self.inner.state.lock();
            state.ensure_active()?;
            state
                .stores
                .get(name)
                .cloned()
                .ok_or_else(|| DbError::StoreNotFound(name.to_string()))?
        };
        Ok(f(&store))
    }

    /// Runs a write against the private copy of `name`. A failing write
    /// aborts the transaction and its error is returned unchanged.
    pub(crate) fn with_store_mut<R>(
        &self,
        name: &str,
        f: impl FnOnce(&mut StoreData) -> Result<R, DbError>,
    ) -> Result<R, DbError> {
        let mut state = self.inner.state.lock();
        state.ensure_active()?;
        if self.inner.mode == TxMode::ReadOnly {
            return Err(DbError::ReadOnly(format!("cannot write to '{name}'")));
        }
        let store = state
            .stores
            .get_mut(name)
            .ok_or_else(|| DbError::StoreNotFound(name.to_string()))?;
        match f(Arc::make_mut(store)) {
            Ok(r) => {
                state.dirty.insert(name.to_string());
                Ok(r)
            }
            Err(e) => {
                log::debug!("aborting transaction on {:?}: {e}", self.inner.scope);
                state.finish(TxStatus::Aborted(e.to_string()));
                self.inner.engine.counters().record_abort();
                Err(e)
            }
        }
    }

    /// Publishes the changes. Read-only transactions simply finish.
    ///
    /// # Errors
    /// `Transaction` when the transaction is not active or the image could
    /// not be written; in the latter case it is aborted.
    pub async fn commit(&self) -> Result<(), DbError> {
        let changes: BTreeMap<String, Arc<StoreData>> = {
            let mut state = self.inner.state.lock();
            state.ensure_active()?;
            if state.dirty.is_empty() {
                state.finish(TxStatus::Committed);
                return Ok(());
            }
            state.status = TxStatus::Committing;
            let dirty = std::mem::take(&mut state.dirty);
            dirty
                .into_iter()
                .filter_map(|n| state.stores.get(&n).cloned().map(|s| (n, s)))
                .collect()
        };

        let slot = &self.inner.conn.slot;
        let published = {
            let _commit = slot.commit_lock.lock().await;
            let (version, merged) = {
                let current = slot.state.read();
                let mut merged = current.stores.clone();
                merged.extend(changes.iter().map(|(n, s)| (n.clone(), s.clone())));
                (current.version, merged)
            };
            let written = self.inner.engine.persist(slot, version, merged).await;
            if written.is_ok() {
                let mut current = slot.state.write();
                for (name, store) in changes {
                    current.stores.insert(name, store);
                }
            }
            written
        };

        let mut state = self.inner.state.lock();
        match published {
            Ok(()) => {
                state.finish(TxStatus::Committed);
                self.inner.engine.counters().record_commit();
                log::trace!("committed transaction on {:?}", self.inner.scope);
                Ok(())
            }
            Err(e) => {
                log::error!("commit of transaction on {:?} failed: {e}", self.inner.scope);
                state.finish(TxStatus::Aborted(format!("commit failed: {e}")));
                self.inner.engine.counters().record_abort();
                Err(DbError::Transaction(format!("commit failed: {e}")))
            }
        }
    }

    /// Discards every change. Aborting twice is a no-op.
    ///
    /// # Errors
    /// `Transaction("finished")` after a commit.
    pub fn abort(&self) -> Result<(), DbError> {
        let mut state = self.inner.state.lock();
        let status = state.status.clone();
        match status {
            TxStatus::Active => {
                state.finish(TxStatus::Aborted("aborted by caller".into()));
                self.inner.engine.counters().record_abort();
                Ok(())
            }
            TxStatus::Aborted(_) => Ok(()),
            TxStatus::Committing | TxStatus::Committed => {
                Err(DbError::Transaction("finished".into()))
            }
        }
    }
}

fn take_count(count: Option<usize>) -> usize {
    count.filter(|c| *c > 0).unwrap_or(usize::MAX)
}

/// One store inside a transaction.
#[derive(Debug, Clone)]
pub struct ObjectStore {
    tx: Transaction,
    name: String,
}

impl ObjectStore {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub const fn transaction(&self) -> &Transaction {
        &self.tx
    }

    /// # Errors
    /// `Transaction` when the transaction is no longer active.
    pub fn schema(&self) -> Result<StoreSchema, DbError> {
        self.tx.with_store(&self.name, |s| s.schema.clone())
    }

    /// # Errors
    /// `Transaction` when the transaction is no longer active.
    pub fn index_names(&self) -> Result<Vec<String>, DbError> {
        self.tx.with_store(&self.name, |s| s.indexes.keys().cloned().collect())
    }

    /// # Errors
    /// `Transaction` when the transaction is no longer active.
    pub fn get(&self, key: &Key) -> Result<Option<Record>, DbError> {
        self.tx.with_store(&self.name, |s| s.records.get(key).cloned())
    }

    /// Records in `range` (all when `None`), ascending by key; `count` of
    /// `None` or 0 means no limit.
    ///
    /// # Errors
    /// `Transaction` when the transaction is no longer active.
    pub fn get_all(
        &self,
        range: Option<&KeyRange>,
        count: Option<usize>,
    ) -> Result<Vec<Record>, DbError> {
        let all = KeyRange::all();
        let range = range.unwrap_or(&all);
        self.tx.with_store(&self.name, |s| {
            s.keys_in(range)
                .take(take_count(count))
                .filter_map(|k| s.records.get(k).cloned())
                .collect()
        })
    }

    /// # Errors
    /// `Transaction` when the transaction is no longer active.
    pub fn get_all_keys(
        &self,
        range: Option<&KeyRange>,
        count: Option<usize>,
    ) -> Result<Vec<Key>, DbError> {
        let all = KeyRange::all();
        let range = range.unwrap_or(&all);
        self.tx.with_store(&self.name, |s| {
            s.keys_in(range).take(take_count(count)).cloned().collect()
        })
    }

    /// Inserts a record; an existing key is a constraint error.
    ///
    /// # Errors
    /// `ReadOnly`, `Data` for unresolvable keys, `Constraint` for duplicate
    /// keys or unique index violations.
    pub fn add(&self, record: Record, key: Option<Key>) -> Result<Key, DbError> {
        self.tx.with_store_mut(&self.name, |s| s.put(record, key, true))
    }

    /// Inserts or replaces a record.
    ///
    /// # Errors
    /// As [`ObjectStore::add`], minus the duplicate key case.
    pub fn put(&self, record: Record, key: Option<Key>) -> Result<Key, DbError> {
        self.tx.with_store_mut(&self.name, |s| s.put(record, key, false))
    }

    /// # Errors
    /// `ReadOnly` or `Transaction`.
    pub fn delete(&self, key: &Key) -> Result<bool, DbError> {
        self.tx.with_store_mut(&self.name, |s| Ok(s.delete(key)))
    }

    /// # Errors
    /// `ReadOnly` or `Transaction`.
    pub fn delete_range(&self, range: &KeyRange) -> Result<usize, DbError> {
        self.tx.with_store_mut(&self.name, |s| Ok(s.delete_range(range)))
    }

    /// # Errors
    /// `ReadOnly` or `Transaction`.
    pub fn clear(&self) -> Result<(), DbError> {
        self.tx.with_store_mut(&self.name, |s| {
            s.clear();
            Ok(())
        })
    }

    /// # Errors
    /// `Transaction` when the transaction is no longer active.
    pub fn count(&self, range: Option<&KeyRange>) -> Result<usize, DbError> {
        let all = KeyRange::all();
        self.tx.with_store(&self.name, |s| s.count(range.unwrap_or(&all)))
    }

    /// # Errors
    /// `IndexNotFound` when the store has no index called `name`.
    pub fn index(&self, name: &str) -> Result<IndexHandle, DbError> {
        let handle = IndexHandle {
            tx: self.tx.clone(),
            store: self.name.clone(),
            name: name.to_string(),
        };
        if !self.tx.with_store(&self.name, |s| s.index(name).is_some())? {
            return Err(handle.not_found());
        }
        Ok(handle)
    }

    /// Cursor over the records in `range`, by primary key.
    ///
    /// # Errors
    /// `Transaction` when the transaction is no longer active.
    pub fn open_cursor(
        &self,
        range: Option<KeyRange>,
        direction: Direction,
    ) -> Result<Cursor, DbError> {
        self.tx.with_store(&self.name, |_| ())?;
        Ok(Cursor::new(
            self.tx.clone(),
            self.name.clone(),
            CursorSource::Store,
            range.unwrap_or_else(KeyRange::all),
            direction,
        ))
    }
}

/// A secondary index inside a transaction.
#[derive(Debug, Clone)]
pub struct IndexHandle {
    tx: Transaction,
    store: String,
    name: String,
}

impl IndexHandle {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    fn not_found(&self) -> DbError {
        DbError::IndexNotFound {
            store: self.store.clone(),
            index: self.name.clone(),
        }
    }

    fn with_index<R>(&self, f: impl FnOnce(&StoreData, &IndexData) -> R) -> Result<R, DbError> {
        self.tx
            .with_store(&self.store, |s| s.index(&self.name).map(|i| f(s, i)))?
            .ok_or_else(|| self.not_found())
    }

    /// First record (lowest index key, then lowest primary key) in `query`.
    ///
    /// # Errors
    /// `Transaction` when the transaction is no longer active.
    pub fn get(&self, query: impl Into<KeyRange>) -> Result<Option<Record>, DbError> {
        let range = query.into();
        self.with_index(|s, idx| {
            let (_, pk) = idx.entries(&range).next()?;
            s.records.get(pk).cloned()
        })
    }

    /// # Errors
    /// `Transaction` when the transaction is no longer active.
    pub fn get_all(
        &self,
        range: Option<&KeyRange>,
        count: Option<usize>,
    ) -> Result<Vec<Record>, DbError> {
        let all = KeyRange::all();
        let range = range.unwrap_or(&all);
        self.with_index(|s, idx| {
            idx.entries(range)
                .take(take_count(count))
                .filter_map(|(_, pk)| s.records.get(pk).cloned())
                .collect()
        })
    }

    /// Primary keys of the records in `range`, in index order.
    ///
    /// # Errors
    /// `Transaction` when the transaction is no longer active.
    pub fn get_all_keys(
        &self,
        range: Option<&KeyRange>,
        count: Option<usize>,
    ) -> Result<Vec<Key>, DbError> {
        let all = KeyRange::all();
        let range = range.unwrap_or(&all);
        self.with_index(|_, idx| {
            idx.entries(range)
                .take(take_count(count))
                .map(|(_, pk)| pk.clone())
                .collect()
        })
    }

    /// # Errors
    /// `Transaction` when the transaction is no longer active.
    pub fn count(&self, range: Option<&KeyRange>) -> Result<usize, DbError> {
        let all = KeyRange::all();
        self.with_index(|_, idx| idx.count(range.unwrap_or(&all)))
    }

    /// Cursor in index order; records without a valid index key are not
    /// visited.
    ///
    /// # Errors
    /// `Transaction` when the transaction is no longer active.
    pub fn open_cursor(
        &self,
        range: Option<KeyRange>,
        direction: Direction,
    ) -> Result<Cursor, DbError> {
        self.with_index(|_, _| ())?;
        Ok(Cursor::new(
            self.tx.clone(),
            self.store.clone(),
            CursorSource::Index(self.name.clone()),
            range.unwrap_or_else(KeyRange::all),
            direction,
        ))
    }
}
