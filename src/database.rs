//! The store accessor: a lazily opened, shareable connection to one named
//! database with single-record, bulk and cursor operations.

use crate::config::DbConfig;
use crate::cursor::Cursor;
use crate::engine::{Connection, Engine, VersionChange};
use crate::errors::DbError;
use crate::query::QueryBuilder;
use crate::schema::Migrations;
use crate::transaction::{ObjectStore, Transaction};
use crate::types::{Direction, Key, KeyRange, Record, TxMode, from_record, to_record};
use serde::de::DeserializeOwned;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{OnceCell, watch};

/// Where and how [`Database::open_cursor`] walks a store.
#[derive(Debug, Clone, Default)]
pub struct CursorOptions {
    /// Walk this index instead of the primary keys.
    pub index: Option<String>,
    pub range: Option<KeyRange>,
    pub direction: Direction,
    pub mode: TxMode,
}

impl CursorOptions {
    #[must_use]
    pub fn index(mut self, name: impl Into<String>) -> Self {
        self.index = Some(name.into());
        self
    }

    #[must_use]
    pub fn range(mut self, range: KeyRange) -> Self {
        self.range = Some(range);
        self
    }

    #[must_use]
    pub const fn direction(mut self, direction: Direction) -> Self {
        self.direction = direction;
        self
    }

    #[must_use]
    pub const fn mode(mut self, mode: TxMode) -> Self {
        self.mode = mode;
        self
    }
}

struct DatabaseInner {
    engine: Arc<Engine>,
    config: DbConfig,
    migrations: Migrations,
    conn: OnceCell<Arc<Connection>>,
}

/// Handle to one database. Clones share the same connection, which closes
/// when the last clone (and every transaction it started) is dropped.
#[derive(Clone)]
pub struct Database {
    inner: Arc<DatabaseInner>,
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("name", &self.inner.config.name)
            .field("version", &self.inner.config.version)
            .field("open", &self.inner.conn.initialized())
            .finish()
    }
}

impl Database {
    /// Creates an unopened handle; nothing touches the engine until the
    /// first operation or [`Database::ensure_open`].
    #[must_use]
    pub fn new(engine: Arc<Engine>, config: DbConfig, migrations: Migrations) -> Self {
        let inner = DatabaseInner {
            engine,
            config,
            migrations,
            conn: OnceCell::new(),
        };
        Self {
            inner: Arc::new(inner),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.config.name
    }

    #[must_use]
    pub fn config(&self) -> &DbConfig {
        &self.inner.config
    }

    #[must_use]
    pub fn engine(&self) -> &Arc<Engine> {
        &self.inner.engine
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.inner.conn.initialized()
    }

    async fn connection(&self) -> Result<Arc<Connection>, DbError> {
        let conn = self
            .inner
            .conn
            .get_or_try_init(|| async {
                let inner = &self.inner;
                inner
                    .engine
                    .connect(&inner.config, &inner.migrations)
                    .await
                    .map(Arc::new)
            })
            .await?;
        Ok(conn.clone())
    }

    /// Opens the connection if it is not open yet. Concurrent callers share
    /// one in-flight open; after a failure the next call tries again.
    ///
    /// # Errors
    /// `Connection` when the open or its upgrade fails.
    pub async fn ensure_open(&self) -> Result<(), DbError> {
        self.connection().await.map(|_| ())
    }

    /// # Errors
    /// `Connection` when the database cannot be opened.
    pub async fn version(&self) -> Result<u32, DbError> {
        Ok(self.connection().await?.version)
    }

    /// # Errors
    /// `Connection` when the database cannot be opened.
    pub async fn store_names(&self) -> Result<Vec<String>, DbError> {
        let conn = self.connection().await?;
        let names = conn.slot.state.read().stores.keys().cloned().collect();
        Ok(names)
    }

    /// Pending version changes requested by other connections. Close every
    /// handle to this database to let them proceed.
    ///
    /// # Errors
    /// `Connection` when the database cannot be opened.
    pub async fn version_changes(
        &self,
    ) -> Result<watch::Receiver<Option<VersionChange>>, DbError> {
        Ok(self.connection().await?.slot.version_change.subscribe())
    }

    /// # Errors
    /// `Connection`, `StoreNotFound` for stores outside the database.
    pub async fn transaction(
        &self,
        stores: &[&str],
        mode: TxMode,
    ) -> Result<Transaction, DbError> {
        let conn = self.connection().await?;
        Transaction::begin(self.inner.engine.clone(), conn, stores, mode).await
    }

    /// Opens a cursor in a fresh transaction; commit it through
    /// [`Cursor::transaction`] after writing.
    ///
    /// # Errors
    /// `StoreNotFound`, `IndexNotFound`.
    pub async fn open_cursor(
        &self,
        store: &str,
        options: CursorOptions,
    ) -> Result<Cursor, DbError> {
        let tx = self.transaction(&[store], options.mode).await?;
        let os = tx.store(store)?;
        match &options.index {
            Some(index) => os.index(index)?.open_cursor(options.range, options.direction),
            None => os.open_cursor(options.range, options.direction),
        }
    }

    #[must_use]
    pub fn query(&self, store: &str) -> QueryBuilder {
        QueryBuilder::new(self, store)
    }

    async fn read<R>(
        &self,
        store: &str,
        f: impl FnOnce(&ObjectStore) -> Result<R, DbError>,
    ) -> Result<R, DbError> {
        let tx = self.transaction(&[store], TxMode::ReadOnly).await?;
        let out = f(&tx.store(store)?)?;
        tx.commit().await?;
        Ok(out)
    }

    async fn write<R>(
        &self,
        store: &str,
        f: impl FnOnce(&ObjectStore) -> Result<R, DbError>,
    ) -> Result<R, DbError> {
        let tx = self.transaction(&[store], TxMode::ReadWrite).await?;
        let out = match f(&tx.store(store)?) {
            Ok(out) => out,
            Err(e) => {
                if let Err(abort) = tx.abort() {
                    log::debug!("abort after failed write to '{store}' was refused: {abort}");
                }
                return Err(e);
            }
        };
        tx.commit().await?;
        Ok(out)
    }

    /// # Errors
    /// `Connection`, `StoreNotFound`.
    pub async fn get(&self, store: &str, key: impl Into<Key>) -> Result<Option<Record>, DbError> {
        let key = key.into();
        self.read(store, |os| os.get(&key)).await
    }

    /// As [`Database::get`], deserialized into `T`.
    ///
    /// # Errors
    /// Also `Json` when the record does not match `T`.
    pub async fn get_as<T: DeserializeOwned>(
        &self,
        store: &str,
        key: impl Into<Key>,
    ) -> Result<Option<T>, DbError> {
        self.get(store, key).await?.map(|r| from_record(&r)).transpose()
    }

    /// # Errors
    /// `Connection`, `StoreNotFound`.
    pub async fn get_all(
        &self,
        store: &str,
        range: Option<KeyRange>,
        count: Option<usize>,
    ) -> Result<Vec<Record>, DbError> {
        self.read(store, |os| os.get_all(range.as_ref(), count)).await
    }

    /// First record whose `index` key equals `key`.
    ///
    /// # Errors
    /// `IndexNotFound` when the index does not exist.
    pub async fn get_by_index(
        &self,
        store: &str,
        index: &str,
        key: impl Into<Key>,
    ) -> Result<Option<Record>, DbError> {
        let key = key.into();
        self.read(store, |os| os.index(index)?.get(key)).await
    }

    /// # Errors
    /// `IndexNotFound` when the index does not exist.
    pub async fn get_all_by_index(
        &self,
        store: &str,
        index: &str,
        range: Option<KeyRange>,
    ) -> Result<Vec<Record>, DbError> {
        self.read(store, |os| os.index(index)?.get_all(range.as_ref(), None))
            .await
    }

    /// # Errors
    /// `Constraint` when the key exists, `Data` for unresolvable keys.
    pub async fn add(&self, store: &str, record: Record, key: Option<Key>) -> Result<Key, DbError> {
        self.write(store, |os| os.add(record, key)).await
    }

    /// # Errors
    /// `Data` for unresolvable keys, `Constraint` for unique violations.
    pub async fn put(&self, store: &str, record: Record, key: Option<Key>) -> Result<Key, DbError> {
        self.write(store, |os| os.put(record, key)).await
    }

    /// Returns whether a record was removed.
    ///
    /// # Errors
    /// `Connection`, `StoreNotFound`.
    pub async fn delete(&self, store: &str, key: impl Into<Key>) -> Result<bool, DbError> {
        let key = key.into();
        self.write(store, |os| os.delete(&key)).await
    }

    /// # Errors
    /// `Connection`, `StoreNotFound`.
    pub async fn clear(&self, store: &str) -> Result<(), DbError> {
        self.write(store, ObjectStore::clear).await
    }

    /// # Errors
    /// `Connection`, `StoreNotFound`.
    pub async fn count(&self, store: &str, range: Option<KeyRange>) -> Result<usize, DbError> {
        self.read(store, |os| os.count(range.as_ref())).await
    }

    /// # Errors
    /// `IndexNotFound` when the index does not exist.
    pub async fn count_by_index(
        &self,
        store: &str,
        index: &str,
        range: Option<KeyRange>,
    ) -> Result<usize, DbError> {
        self.read(store, |os| os.index(index)?.count(range.as_ref())).await
    }

    /// Adds every record in one transaction; nothing is stored if any fails.
    ///
    /// # Errors
    /// The first failing record's error.
    pub async fn bulk_add(&self, store: &str, records: Vec<Record>) -> Result<Vec<Key>, DbError> {
        self.write(store, |os| {
            records.into_iter().map(|r| os.add(r, None)).collect()
        })
        .await
    }

    /// Puts every record in one transaction; nothing is stored if any fails.
    ///
    /// # Errors
    /// The first failing record's error.
    pub async fn bulk_put(&self, store: &str, records: Vec<Record>) -> Result<Vec<Key>, DbError> {
        self.write(store, |os| {
            records.into_iter().map(|r| os.put(r, None)).collect()
        })
        .await
    }

    /// # Errors
    /// `Connection`, `StoreNotFound`.
    pub async fn bulk_get(
        &self,
        store: &str,
        keys: &[Key],
    ) -> Result<Vec<Option<Record>>, DbError> {
        self.read(store, |os| keys.iter().map(|k| os.get(k)).collect()).await
    }

    /// Deletes every key in one transaction and returns how many existed.
    ///
    /// # Errors
    /// `Connection`, `StoreNotFound`.
    pub async fn bulk_delete(&self, store: &str, keys: &[Key]) -> Result<usize, DbError> {
        self.write(store, |os| {
            let mut removed = 0;
            for k in keys {
                if os.delete(k)? {
                    removed += 1;
                }
            }
            Ok(removed)
        })
        .await
    }

    /// Every record of `store` as a JSON array, ascending by key.
    ///
    /// # Errors
    /// `Connection`, `StoreNotFound`, `Json`.
    pub async fn export_store(&self, store: &str) -> Result<serde_json::Value, DbError> {
        let records = self.get_all(store, None, None).await?;
        let items = records
            .iter()
            .map(serde_json::to_value)
            .collect::<Result<Vec<_>, _>>()?;
        log::info!("exported {} record(s) from '{store}'", items.len());
        Ok(serde_json::Value::Array(items))
    }

    /// Puts every object of a JSON array into `store` in one transaction.
    ///
    /// # Errors
    /// `InvalidArgument` when `data` is not an array; the first failing
    /// record's error otherwise.
    pub async fn import_store(
        &self,
        store: &str,
        data: &serde_json::Value,
    ) -> Result<usize, DbError> {
        let items = data.as_array().ok_or_else(|| {
            DbError::InvalidArgument("import data must be a JSON array".into())
        })?;
        let records = items
            .iter()
            .map(to_record)
            .collect::<Result<Vec<_>, _>>()?;
        let n = self.bulk_put(store, records).await?.len();
        log::info!("imported {n} record(s) into '{store}'");
        Ok(n)
    }
}
