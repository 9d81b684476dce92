//! The keyed-storage engine: a registry of named databases, connection
//! accounting, version upgrades and optional on-disk images.

pub mod index;
pub mod persist;
pub mod store;

use crate::config::{DbConfig, EngineOptions};
use crate::errors::DbError;
use crate::schema::{IndexSchema, Migrations, StoreSchema};
use crate::types::{Key, KeyRange, Record};
use crate::warnings::{self, Warning};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use store::StoreData;
use tokio::sync::watch;
use uuid::Uuid;

/// A pending version change announced to open connections.
/// `new_version` is `None` when the database is being deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionChange {
    pub old_version: u32,
    pub new_version: Option<u32>,
}

#[derive(Debug, Default)]
pub struct EngineStats {
    cursor_visits: AtomicU64,
    commits: AtomicU64,
    aborts: AtomicU64,
    upgrades: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineStatsSnapshot {
    pub cursor_visits: u64,
    pub commits: u64,
    pub aborts: u64,
    pub upgrades: u64,
}

impl EngineStats {
    #[must_use]
    pub fn snapshot(&self) -> EngineStatsSnapshot {
        EngineStatsSnapshot {
            cursor_visits: self.cursor_visits.load(Ordering::Relaxed),
            commits: self.commits.load(Ordering::Relaxed),
            aborts: self.aborts.load(Ordering::Relaxed),
            upgrades: self.upgrades.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn record_visit(&self) {
        self.cursor_visits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_commit(&self) {
        self.commits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_abort(&self) {
        self.aborts.fetch_add(1, Ordering::Relaxed);
    }
}

#[derive(Debug, Default)]
pub(crate) struct DatabaseState {
    pub version: u32,
    pub stores: BTreeMap<String, Arc<StoreData>>,
}

/// Everything the engine tracks for one database name.
pub(crate) struct DatabaseSlot {
    pub name: String,
    pub state: RwLock<DatabaseState>,
    pub image_path: Option<PathBuf>,
    /// Serializes opens, upgrades and deletion.
    pub open_lock: tokio::sync::Mutex<()>,
    /// Serializes publication of committed changes and their image writes.
    pub commit_lock: tokio::sync::Mutex<()>,
    pub connections: watch::Sender<usize>,
    pub version_change: watch::Sender<Option<VersionChange>>,
    write_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl DatabaseSlot {
    fn new(name: &str, image_path: Option<PathBuf>, state: DatabaseState) -> Self {
        Self {
            name: name.to_string(),
            state: RwLock::new(state),
            image_path,
            open_lock: tokio::sync::Mutex::new(()),
            commit_lock: tokio::sync::Mutex::new(()),
            connections: watch::Sender::new(0),
            version_change: watch::Sender::new(None),
            write_locks: Mutex::new(HashMap::new()),
        }
    }

    /// The lock a read-write transaction holds on `store` for its lifetime.
    pub fn write_lock(&self, store: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.write_locks
            .lock()
            .entry(store.to_string())
            .or_default()
            .clone()
    }

    fn open_connections(&self) -> usize {
        *self.connections.borrow()
    }
}

/// An open connection. Dropping it releases the slot for pending upgrades.
pub(crate) struct Connection {
    pub id: Uuid,
    pub version: u32,
    pub slot: Arc<DatabaseSlot>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("database", &self.slot.name)
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.slot.connections.send_modify(|n| *n = n.saturating_sub(1));
        log::debug!("closed connection {} to '{}'", self.id, self.slot.name);
    }
}

/// The main in-process engine. Share it behind an `Arc`.
pub struct Engine {
    options: EngineOptions,
    databases: Mutex<HashMap<String, Arc<DatabaseSlot>>>,
    stats: EngineStats,
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("options", &self.options)
            .field("databases", &self.databases.lock().len())
            .finish()
    }
}

impl Engine {
    /// Memory-only engine.
    #[must_use]
    pub fn in_memory() -> Arc<Self> {
        Arc::new(Self::with_options(EngineOptions::default()))
    }

    fn with_options(options: EngineOptions) -> Self {
        Self {
            options,
            databases: Mutex::new(HashMap::new()),
            stats: EngineStats::default(),
        }
    }

    /// Engine persisting every database under `options.data_dir`, if set.
    ///
    /// # Errors
    /// `Io` when the data directory cannot be created.
    pub fn open(options: EngineOptions) -> Result<Arc<Self>, DbError> {
        if let Some(dir) = &options.data_dir {
            std::fs::create_dir_all(dir)
                .map_err(|e| DbError::Io(format!("create {}: {e}", dir.display())))?;
        }
        log::info!("engine opened (data_dir: {:?})", options.data_dir);
        Ok(Arc::new(Self::with_options(options)))
    }

    #[must_use]
    pub const fn options(&self) -> &EngineOptions {
        &self.options
    }

    #[must_use]
    pub fn stats(&self) -> EngineStatsSnapshot {
        self.stats.snapshot()
    }

    pub(crate) const fn counters(&self) -> &EngineStats {
        &self.stats
    }

    /// Names of databases that currently exist (version ≥ 1) in this engine.
    #[must_use]
    pub fn database_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .databases
            .lock()
            .values()
            .filter(|s| s.state.read().version > 0)
            .map(|s| s.name.clone())
            .collect();
        names.sort();
        names
    }

    /// Returns the slot for `name`, loading its image on first use.
    fn slot(&self, name: &str) -> Result<Arc<DatabaseSlot>, DbError> {
        if let Some(slot) = self.databases.lock().get(name) {
            return Ok(slot.clone());
        }
        let path = self
            .options
            .data_dir
            .as_deref()
            .map(|d| persist::image_path(d, name));
        let state = match path.as_deref().map(persist::load).transpose()?.flatten() {
            Some(image) => {
                log::info!("loaded '{name}' v{} (saved {})", image.version, image.saved_at);
                DatabaseState {
                    version: image.version,
                    stores: image
                        .stores
                        .into_iter()
                        .map(|(n, s)| (n, Arc::new(s)))
                        .collect(),
                }
            }
            None => DatabaseState::default(),
        };
        let mut dbs = self.databases.lock();
        // Another caller may have raced us to the load.
        let slot = dbs
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(DatabaseSlot::new(name, path, state)));
        Ok(slot.clone())
    }

    /// Writes the image of `slot` with the given contents when a data
    /// directory is configured. Runs on the blocking pool.
    pub(crate) async fn persist(
        &self,
        slot: &DatabaseSlot,
        version: u32,
        stores: BTreeMap<String, Arc<StoreData>>,
    ) -> Result<(), DbError> {
        let Some(path) = slot.image_path.clone() else {
            return Ok(());
        };
        let name = slot.name.clone();
        tokio::task::spawn_blocking(move || persist::save(&path, &name, version, &stores))
            .await
            .map_err(|e| DbError::Io(format!("image writer failed: {e}")))?
    }

    /// Announces a version change and waits until every other connection to
    /// `slot` has closed.
    async fn wait_for_others(
        &self,
        slot: &DatabaseSlot,
        requested: Option<u32>,
    ) -> Result<(), DbError> {
        let open = slot.open_connections();
        if open == 0 {
            return Ok(());
        }
        let current = slot.state.read().version;
        warnings::emit(&Warning::Blocked {
            database: slot.name.clone(),
            current_version: current,
            requested_version: requested,
            open_connections: open,
        });
        slot.version_change.send_replace(Some(VersionChange {
            old_version: current,
            new_version: requested,
        }));
        let mut rx = slot.connections.subscribe();
        let waited = rx.wait_for(|n| *n == 0).await.map(|_| ()).map_err(|_| {
            DbError::Connection(format!(
                "'{}' was dropped while waiting for connections",
                slot.name
            ))
        });
        slot.version_change.send_replace(None);
        waited
    }

    /// Opens a connection to `config.name`, upgrading it first when
    /// `config.version` is newer than the stored version.
    pub(crate) async fn connect(
        &self,
        config: &DbConfig,
        migrations: &Migrations,
    ) -> Result<Connection, DbError> {
        let as_connection = |e: DbError| match e {
            DbError::Connection(_) => e,
            other => DbError::Connection(other.to_string()),
        };
        config.validate().map_err(as_connection)?;
        let slot = self.slot(&config.name).map_err(as_connection)?;
        let _open = slot.open_lock.lock().await;

        let current = slot.state.read().version;
        if config.version < current {
            return Err(DbError::Connection(format!(
                "requested version {} of '{}' is lower than the stored version {current}",
                config.version, config.name
            )));
        }
        if config.version > current {
            self.wait_for_others(&slot, Some(config.version)).await?;
            self.upgrade(&slot, current, config, migrations)
                .await
                .map_err(as_connection)?;
        }

        slot.connections.send_modify(|n| *n += 1);
        let conn = Connection {
            id: Uuid::new_v4(),
            version: config.version,
            slot: Arc::clone(&slot),
        };
        log::debug!("opened {conn:?}");
        Ok(conn)
    }

    async fn upgrade(
        &self,
        slot: &DatabaseSlot,
        old_version: u32,
        config: &DbConfig,
        migrations: &Migrations,
    ) -> Result<(), DbError> {
        let mut stores = slot.state.read().stores.clone();
        {
            let mut up = Upgrade {
                database: &slot.name,
                old_version,
                new_version: config.version,
                stores: &mut stores,
            };
            up.apply_declared(&config.stores)?;
            for (version, step) in migrations.between(old_version, config.version) {
                log::info!("running migration of '{}' to v{version}", slot.name);
                step(&mut up).map_err(|e| {
                    DbError::Connection(format!("migration to v{version} failed: {e}"))
                })?;
            }
        }
        self.persist(slot, config.version, stores.clone()).await?;
        {
            let mut state = slot.state.write();
            state.version = config.version;
            state.stores = stores;
        }
        self.stats.upgrades.fetch_add(1, Ordering::Relaxed);
        log::info!("upgraded '{}' from v{old_version} to v{}", slot.name, config.version);
        Ok(())
    }

    /// Deletes database `name` and its image, waiting for open connections
    /// to close first. Deleting an unknown database succeeds.
    ///
    /// # Errors
    /// `Io` when the image cannot be removed.
    pub async fn delete_database(&self, name: &str) -> Result<(), DbError> {
        let slot = self.slot(name)?;
        let _open = slot.open_lock.lock().await;
        self.wait_for_others(&slot, None).await?;
        let _commit = slot.commit_lock.lock().await;
        if let Some(path) = &slot.image_path {
            persist::remove(path)?;
        }
        *slot.state.write() = DatabaseState::default();
        log::info!("deleted database '{name}'");
        Ok(())
    }
}

/// Schema and data access handed to migration steps. Changes become visible
/// only when the whole upgrade succeeds.
pub struct Upgrade<'a> {
    database: &'a str,
    old_version: u32,
    new_version: u32,
    stores: &'a mut BTreeMap<String, Arc<StoreData>>,
}

impl Upgrade<'_> {
    #[must_use]
    pub const fn database(&self) -> &str {
        self.database
    }

    #[must_use]
    pub const fn old_version(&self) -> u32 {
        self.old_version
    }

    #[must_use]
    pub const fn new_version(&self) -> u32 {
        self.new_version
    }

    #[must_use]
    pub fn store_names(&self) -> Vec<String> {
        self.stores.keys().cloned().collect()
    }

    #[must_use]
    pub fn has_store(&self, name: &str) -> bool {
        self.stores.contains_key(name)
    }

    fn store(&self, name: &str) -> Result<&StoreData, DbError> {
        self.stores
            .get(name)
            .map(|s| &**s)
            .ok_or_else(|| DbError::StoreNotFound(name.to_string()))
    }

    fn store_mut(&mut self, name: &str) -> Result<&mut StoreData, DbError> {
        self.stores
            .get_mut(name)
            .map(Arc::make_mut)
            .ok_or_else(|| DbError::StoreNotFound(name.to_string()))
    }

    /// # Errors
    /// `Constraint` if the store exists, `InvalidArgument` for a bad schema.
    pub fn create_store(&mut self, schema: StoreSchema) -> Result<(), DbError> {
        schema.validate()?;
        if self.stores.contains_key(&schema.name) {
            return Err(DbError::Constraint(format!(
                "store '{}' already exists",
                schema.name
            )));
        }
        let name = schema.name.clone();
        let indexes = schema.indexes.clone();
        let mut data = StoreData::new(StoreSchema {
            indexes: Vec::new(),
            ..schema
        });
        for idx in indexes {
            data.create_index(idx)?;
        }
        self.stores.insert(name, Arc::new(data));
        Ok(())
    }

    /// # Errors
    /// `StoreNotFound`.
    pub fn delete_store(&mut self, name: &str) -> Result<(), DbError> {
        self.stores
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| DbError::StoreNotFound(name.to_string()))
    }

    /// # Errors
    /// `StoreNotFound`, `Constraint` for a duplicate name or when existing
    /// records violate a unique index.
    pub fn create_index(&mut self, store: &str, index: IndexSchema) -> Result<(), DbError> {
        index.validate()?;
        self.store_mut(store)?.create_index(index)
    }

    /// # Errors
    /// `StoreNotFound` or `IndexNotFound`.
    pub fn delete_index(&mut self, store: &str, index: &str) -> Result<(), DbError> {
        self.store_mut(store)?.delete_index(index)
    }

    /// # Errors
    /// The key and constraint errors of [`StoreData::put`].
    pub fn put(&mut self, store: &str, record: Record, key: Option<Key>) -> Result<Key, DbError> {
        self.store_mut(store)?.put(record, key, false)
    }

    /// # Errors
    /// As [`Upgrade::put`], plus `Constraint` when the key exists.
    pub fn add(&mut self, store: &str, record: Record, key: Option<Key>) -> Result<Key, DbError> {
        self.store_mut(store)?.put(record, key, true)
    }

    /// # Errors
    /// `StoreNotFound`.
    pub fn get(&self, store: &str, key: &Key) -> Result<Option<Record>, DbError> {
        Ok(self.store(store)?.records.get(key).cloned())
    }

    /// # Errors
    /// `StoreNotFound`.
    pub fn get_all(&self, store: &str) -> Result<Vec<(Key, Record)>, DbError> {
        Ok(self
            .store(store)?
            .records
            .iter()
            .map(|(k, r)| (k.clone(), r.clone()))
            .collect())
    }

    /// # Errors
    /// `StoreNotFound`.
    pub fn delete(&mut self, store: &str, key: &Key) -> Result<bool, DbError> {
        Ok(self.store_mut(store)?.delete(key))
    }

    /// # Errors
    /// `StoreNotFound`.
    pub fn delete_range(&mut self, store: &str, range: &KeyRange) -> Result<usize, DbError> {
        Ok(self.store_mut(store)?.delete_range(range))
    }

    /// # Errors
    /// `StoreNotFound`.
    pub fn clear(&mut self, store: &str) -> Result<(), DbError> {
        self.store_mut(store)?.clear();
        Ok(())
    }

    /// Creates declared stores and indexes that do not exist yet.
    fn apply_declared(&mut self, declared: &[StoreSchema]) -> Result<(), DbError> {
        for schema in declared {
            if !self.stores.contains_key(&schema.name) {
                log::debug!("creating store '{}' in '{}'", schema.name, self.database);
                self.create_store(schema.clone())?;
                continue;
            }
            for idx in &schema.indexes {
                if self.store(&schema.name)?.index(&idx.name).is_none() {
                    log::debug!("creating index '{}' on '{}'", idx.name, schema.name);
                    self.create_index(&schema.name, idx.clone())?;
                }
            }
        }
        Ok(())
    }
}
