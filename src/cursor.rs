//! Lending async cursors over stores and indexes.

use crate::errors::DbError;
use crate::transaction::Transaction;
use crate::types::{Direction, Key, KeyRange, Record};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum CursorSource {
    Store,
    Index(String),
}

/// Walks a store or index one record per `next().await`.
///
/// The cursor remembers the last visited `(key, primary key)` and resumes
/// after it against the transaction's current view, so writes made through
/// the cursor never make it skip or repeat a neighbour.
#[derive(Debug)]
pub struct Cursor {
    tx: Transaction,
    store: String,
    source: CursorSource,
    range: KeyRange,
    direction: Direction,
    position: Option<(Key, Key)>,
    done: bool,
    visited: u64,
}

impl Cursor {
    pub(crate) fn new(
        tx: Transaction,
        store: String,
        source: CursorSource,
        range: KeyRange,
        direction: Direction,
    ) -> Self {
        Self {
            tx,
            store,
            source,
            range,
            direction,
            position: None,
            done: false,
            visited: 0,
        }
    }

    #[must_use]
    pub const fn transaction(&self) -> &Transaction {
        &self.tx
    }

    #[must_use]
    pub const fn direction(&self) -> Direction {
        self.direction
    }

    /// Records visited so far.
    #[must_use]
    pub const fn visited(&self) -> u64 {
        self.visited
    }

    #[must_use]
    pub const fn is_done(&self) -> bool {
        self.done
    }

    /// Advances to the next record. `Ok(None)` once exhausted; a cursor is
    /// not restartable.
    ///
    /// # Errors
    /// `Transaction` when the transaction ended, `IndexNotFound` if the
    /// index disappeared.
    pub async fn next(&mut self) -> Result<Option<CursorEntry<'_>>, DbError> {
        if self.done {
            return Ok(None);
        }
        tokio::task::yield_now().await;
        match self.advance() {
            Ok(Some((key, primary_key, value))) => {
                self.position = Some((key.clone(), primary_key.clone()));
                self.visited += 1;
                self.tx.engine().counters().record_visit();
                Ok(Some(CursorEntry {
                    cursor: self,
                    key,
                    primary_key,
                    value,
                }))
            }
            Ok(None) => {
                self.done = true;
                Ok(None)
            }
            Err(e) => {
                self.done = true;
                Err(e)
            }
        }
    }

    fn advance(&self) -> Result<Option<(Key, Key, Record)>, DbError> {
        let reverse = self.direction.is_reverse();
        match &self.source {
            CursorSource::Store => self.tx.with_store(&self.store, |s| {
                let after = self.position.as_ref().map(|(k, _)| k);
                let k = s.seek(&self.range, after, reverse)?;
                let r = s.records.get(&k).cloned()?;
                Some((k.clone(), k, r))
            }),
            CursorSource::Index(name) => self.tx.with_store(&self.store, |s| {
                let idx = s.index(name).ok_or_else(|| DbError::IndexNotFound {
                    store: self.store.clone(),
                    index: name.clone(),
                })?;
                let unique = self.direction.is_unique();
                Ok(idx
                    .seek(&self.range, self.position.as_ref(), reverse, unique)
                    .and_then(|(ik, pk)| s.records.get(&pk).cloned().map(|r| (ik, pk, r))))
            })?,
        }
    }
}

/// The record under the cursor. Holding it borrows the cursor, so the
/// cursor cannot advance until the entry is dropped.
#[derive(Debug)]
pub struct CursorEntry<'c> {
    cursor: &'c mut Cursor,
    key: Key,
    primary_key: Key,
    value: Record,
}

impl CursorEntry<'_> {
    /// Index key for index cursors, primary key otherwise.
    #[must_use]
    pub const fn key(&self) -> &Key {
        &self.key
    }

    #[must_use]
    pub const fn primary_key(&self) -> &Key {
        &self.primary_key
    }

    #[must_use]
    pub const fn value(&self) -> &Record {
        &self.value
    }

    #[must_use]
    pub fn into_value(self) -> Record {
        self.value
    }

    /// Replaces the record under the cursor.
    ///
    /// # Errors
    /// `ReadOnly` outside a read-write transaction, `Data` when an in-line
    /// key would change, `Constraint` for unique index violations.
    pub fn update(&mut self, record: Record) -> Result<(), DbError> {
        let pk = self.primary_key.clone();
        let stored = record.clone();
        self.cursor
            .tx
            .with_store_mut(&self.cursor.store, |s| s.replace_at(&pk, record))?;
        self.value = stored;
        Ok(())
    }

    /// Deletes the record under the cursor.
    ///
    /// # Errors
    /// `ReadOnly` outside a read-write transaction.
    pub fn delete(&mut self) -> Result<bool, DbError> {
        let pk = self.primary_key.clone();
        self.cursor.tx.with_store_mut(&self.cursor.store, |s| Ok(s.delete(&pk)))
    }
}
