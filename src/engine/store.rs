use super::index::{IndexData, tighter_lower, tighter_upper};
use crate::errors::DbError;
use crate::schema::{IndexSchema, StoreSchema};
use crate::types::{Key, KeyRange, Record, bounds_empty, set_path};
use bson::Bson;
use std::collections::BTreeMap;

/// One object store: records by primary key plus its secondary indexes.
#[derive(Debug, Clone)]
pub struct StoreData {
    pub schema: StoreSchema,
    pub records: BTreeMap<Key, Record>,
    pub indexes: BTreeMap<String, IndexData>,
    /// Next auto-increment key.
    pub next_key: u64,
}

impl StoreData {
    #[must_use]
    pub fn new(schema: StoreSchema) -> Self {
        let indexes = schema
            .indexes
            .iter()
            .map(|i| (i.name.clone(), IndexData::new(i.clone())))
            .collect();
        Self {
            schema,
            records: BTreeMap::new(),
            indexes,
            next_key: 1,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.schema.name
    }

    #[must_use]
    pub fn index(&self, name: &str) -> Option<&IndexData> {
        self.indexes.get(name)
    }

    /// Adds an index and builds it from the current records.
    ///
    /// # Errors
    /// `Constraint` if the index already exists or existing records violate
    /// its uniqueness.
    pub fn create_index(&mut self, schema: IndexSchema) -> Result<(), DbError> {
        schema.validate()?;
        if self.indexes.contains_key(&schema.name) {
            return Err(DbError::Constraint(format!(
                "index '{}' already exists on store '{}'",
                schema.name,
                self.name()
            )));
        }
        let mut idx = IndexData::new(schema.clone());
        for (pk, rec) in &self.records {
            let keys = idx.keys_for(rec);
            if let Some(k) = idx.unique_conflict(&keys, pk) {
                return Err(DbError::Constraint(format!(
                    "unique index '{}' on store '{}' would hold key {k} twice",
                    schema.name,
                    self.name()
                )));
            }
            idx.insert(rec, pk);
        }
        self.schema.indexes.push(schema.clone());
        self.indexes.insert(schema.name, idx);
        Ok(())
    }

    /// # Errors
    /// `IndexNotFound` if no such index exists.
    pub fn delete_index(&mut self, name: &str) -> Result<(), DbError> {
        if self.indexes.remove(name).is_none() {
            return Err(DbError::IndexNotFound {
                store: self.name().to_string(),
                index: name.to_string(),
            });
        }
        self.schema.indexes.retain(|i| i.name != name);
        Ok(())
    }

    /// Rebuilds every index from the records; used after loading an image.
    pub fn rebuild_indexes(&mut self) {
        for idx in self.indexes.values_mut() {
            *idx = IndexData::new(idx.schema.clone());
            for (pk, rec) in &self.records {
                idx.insert(rec, pk);
            }
        }
    }

    /// Works out the primary key for `record`, generating one when the store
    /// auto-increments. Generated keys are written into in-line key paths.
    #[allow(clippy::cast_possible_wrap)]
    fn resolve_key(&mut self, record: &mut Record, explicit: Option<Key>) -> Result<Key, DbError> {
        let store = self.schema.name.clone();
        let key_path = self.schema.key_path.clone();
        let key = match (&key_path, explicit) {
            (Some(kp), Some(_)) => {
                return Err(DbError::Data(format!(
                    "store '{store}' uses in-line keys ({kp}); an explicit key is not allowed"
                )));
            }
            (Some(kp), None) => match kp.extract(record) {
                Some(k) => k,
                None if self.schema.auto_increment && kp.raw(record).is_none() => {
                    let k = self.generate_key()?;
                    if let crate::schema::KeyPath::Single(path) = kp {
                        set_path(record, path, Bson::Int64(k as i64))?;
                    }
                    return Ok(Key::from(k));
                }
                None => {
                    return Err(DbError::Data(format!(
                        "record has no valid key at '{kp}' for store '{store}'"
                    )));
                }
            },
            (None, Some(k)) => k,
            (None, None) if self.schema.auto_increment => {
                return Ok(Key::from(self.generate_key()?));
            }
            (None, None) => {
                return Err(DbError::Data(format!(
                    "store '{store}' uses out-of-line keys without a key generator; \
                     a key is required"
                )));
            }
        };
        if self.schema.auto_increment {
            self.bump_generator(&key);
        }
        Ok(key)
    }

    fn generate_key(&mut self) -> Result<u64, DbError> {
        const MAX_GENERATED: u64 = 1 << 53;
        if self.next_key > MAX_GENERATED {
            return Err(DbError::Constraint(format!(
                "key generator of store '{}' is exhausted",
                self.name()
            )));
        }
        let k = self.next_key;
        self.next_key += 1;
        Ok(k)
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn bump_generator(&mut self, key: &Key) {
        if let Some(n) = key.as_number()
            && n >= 1.0
        {
            let floor = n.floor().min(9.007_199_254_740_992e15) as u64;
            if floor >= self.next_key {
                self.next_key = floor + 1;
            }
        }
    }

    /// Inserts or replaces a record. With `no_overwrite` an existing key is a
    /// constraint error (the `add` semantics).
    ///
    /// # Errors
    /// `Data` for unresolvable keys, `Constraint` for duplicate keys or unique
    /// index violations.
    pub fn put(
        &mut self,
        mut record: Record,
        key: Option<Key>,
        no_overwrite: bool,
    ) -> Result<Key, DbError> {
        let pk = self.resolve_key(&mut record, key)?;
        if no_overwrite && self.records.contains_key(&pk) {
            return Err(DbError::Constraint(format!(
                "key {pk} already exists in store '{}'",
                self.name()
            )));
        }
        for idx in self.indexes.values() {
            let keys = idx.keys_for(&record);
            if let Some(k) = idx.unique_conflict(&keys, &pk) {
                return Err(DbError::Constraint(format!(
                    "unique index '{}' on store '{}' already holds key {k}",
                    idx.schema.name,
                    self.name()
                )));
            }
        }
        if let Some(old) = self.records.remove(&pk) {
            for idx in self.indexes.values_mut() {
                idx.remove(&old, &pk);
            }
        }
        for idx in self.indexes.values_mut() {
            idx.insert(&record, &pk);
        }
        self.records.insert(pk.clone(), record);
        Ok(pk)
    }

    /// Replaces the record stored under `pk`; an in-line key must agree.
    ///
    /// # Errors
    /// `Data` when the record's in-line key differs from `pk`.
    pub fn replace_at(&mut self, pk: &Key, record: Record) -> Result<(), DbError> {
        match self.schema.key_path.clone() {
            Some(kp) => {
                if kp.extract(&record).as_ref() != Some(pk) {
                    return Err(DbError::Data(format!(
                        "record key at '{kp}' must stay {pk} when updating through a cursor"
                    )));
                }
                self.put(record, None, false)?;
            }
            None => {
                self.put(record, Some(pk.clone()), false)?;
            }
        }
        Ok(())
    }

    pub fn delete(&mut self, pk: &Key) -> bool {
        match self.records.remove(pk) {
            Some(old) => {
                for idx in self.indexes.values_mut() {
                    idx.remove(&old, pk);
                }
                true
            }
            None => false,
        }
    }

    pub fn delete_range(&mut self, range: &KeyRange) -> usize {
        let doomed: Vec<Key> = self.keys_in(range).cloned().collect();
        for pk in &doomed {
            self.delete(pk);
        }
        doomed.len()
    }

    pub fn clear(&mut self) {
        self.records.clear();
        for idx in self.indexes.values_mut() {
            *idx = IndexData::new(idx.schema.clone());
        }
    }

    pub fn keys_in<'a>(&'a self, range: &KeyRange) -> Box<dyn Iterator<Item = &'a Key> + 'a> {
        if bounds_empty(&range.lower, &range.upper) {
            return Box::new(std::iter::empty());
        }
        let bounds = (range.lower.clone(), range.upper.clone());
        Box::new(self.records.range(bounds).map(|(k, _)| k))
    }

    #[must_use]
    pub fn count(&self, range: &KeyRange) -> usize {
        self.keys_in(range).count()
    }

    /// Primary key following `after` in traversal order within `range`.
    #[must_use]
    pub fn seek(&self, range: &KeyRange, after: Option<&Key>, reverse: bool) -> Option<Key> {
        let (lower, upper) = match (after, reverse) {
            (None, _) => (range.lower.clone(), range.upper.clone()),
            (Some(k), false) => (tighter_lower(&range.lower, k), range.upper.clone()),
            (Some(k), true) => (range.lower.clone(), tighter_upper(&range.upper, k)),
        };
        if bounds_empty(&lower, &upper) {
            return None;
        }
        let mut it = self.records.range((lower, upper));
        let found = if reverse { it.next_back() } else { it.next() };
        found.map(|(k, _)| k.clone())
    }
}
