//! Store and index declarations plus per-version migration steps.

use crate::engine::Upgrade;
use crate::errors::DbError;
use crate::types::{Key, Record, get_path};
use bson::Bson;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::ops::Bound;

/// Location of a key inside a record: one dotted path or a compound list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KeyPath {
    Single(String),
    Compound(Vec<String>),
}

impl KeyPath {
    #[must_use]
    pub const fn is_compound(&self) -> bool {
        matches!(self, Self::Compound(_))
    }

    /// Extracts the key the path designates, or `None` when a component is
    /// missing or not a valid key.
    #[must_use]
    pub fn extract(&self, record: &Record) -> Option<Key> {
        match self {
            Self::Single(p) => get_path(record, p).and_then(Key::from_bson),
            Self::Compound(ps) => ps
                .iter()
                .map(|p| get_path(record, p).and_then(Key::from_bson))
                .collect::<Option<Vec<_>>>()
                .map(Key::Array),
        }
    }

    /// Raw value at a single path; compound paths have no single raw value.
    #[must_use]
    pub fn raw<'a>(&self, record: &'a Record) -> Option<&'a Bson> {
        match self {
            Self::Single(p) => get_path(record, p),
            Self::Compound(_) => None,
        }
    }
}

impl From<&str> for KeyPath {
    fn from(p: &str) -> Self {
        Self::Single(p.to_string())
    }
}

impl From<String> for KeyPath {
    fn from(p: String) -> Self {
        Self::Single(p)
    }
}

impl From<Vec<&str>> for KeyPath {
    fn from(ps: Vec<&str>) -> Self {
        Self::Compound(ps.into_iter().map(str::to_string).collect())
    }
}

impl fmt::Display for KeyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Single(p) => f.write_str(p),
            Self::Compound(ps) => write!(f, "[{}]", ps.join(", ")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSchema {
    pub name: String,
    pub key_path: KeyPath,
    #[serde(default)]
    pub unique: bool,
    #[serde(default)]
    pub multi_entry: bool,
}

impl IndexSchema {
    pub fn new(name: impl Into<String>, key_path: impl Into<KeyPath>) -> Self {
        Self {
            name: name.into(),
            key_path: key_path.into(),
            unique: false,
            multi_entry: false,
        }
    }

    /// Index named after the field it orders by; the shape `order_by` expects.
    pub fn on(field: impl Into<String>) -> Self {
        let field = field.into();
        Self::new(field.clone(), field)
    }

    #[must_use]
    pub const fn unique(mut self, unique: bool) -> Self {
        self.unique = unique;
        self
    }

    #[must_use]
    pub const fn multi_entry(mut self, multi_entry: bool) -> Self {
        self.multi_entry = multi_entry;
        self
    }

    /// # Errors
    /// `InvalidArgument` for multi-entry compound indexes.
    pub fn validate(&self) -> Result<(), DbError> {
        if self.name.is_empty() {
            return Err(DbError::InvalidArgument("index name must not be empty".into()));
        }
        if self.multi_entry && self.key_path.is_compound() {
            return Err(DbError::InvalidArgument(format!(
                "index '{}': multi_entry cannot use a compound key path",
                self.name
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreSchema {
    pub name: String,
    #[serde(default)]
    pub key_path: Option<KeyPath>,
    #[serde(default)]
    pub auto_increment: bool,
    #[serde(default)]
    pub indexes: Vec<IndexSchema>,
}

impl StoreSchema {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key_path: None,
            auto_increment: false,
            indexes: Vec::new(),
        }
    }

    #[must_use]
    pub fn key_path(mut self, key_path: impl Into<KeyPath>) -> Self {
        self.key_path = Some(key_path.into());
        self
    }

    #[must_use]
    pub const fn auto_increment(mut self, auto_increment: bool) -> Self {
        self.auto_increment = auto_increment;
        self
    }

    #[must_use]
    pub fn index(mut self, index: IndexSchema) -> Self {
        self.indexes.push(index);
        self
    }

    #[must_use]
    pub fn find_index(&self, name: &str) -> Option<&IndexSchema> {
        self.indexes.iter().find(|i| i.name == name)
    }

    /// # Errors
    /// `InvalidArgument` for empty names, duplicate index names, or an
    /// auto-increment compound key path.
    pub fn validate(&self) -> Result<(), DbError> {
        if self.name.is_empty() {
            return Err(DbError::InvalidArgument("store name must not be empty".into()));
        }
        if self.auto_increment && self.key_path.as_ref().is_some_and(KeyPath::is_compound) {
            return Err(DbError::InvalidArgument(format!(
                "store '{}': auto_increment cannot use a compound key path",
                self.name
            )));
        }
        let mut seen = HashSet::new();
        for idx in &self.indexes {
            idx.validate()?;
            if !seen.insert(idx.name.as_str()) {
                return Err(DbError::InvalidArgument(format!(
                    "store '{}': duplicate index '{}'",
                    self.name, idx.name
                )));
            }
        }
        Ok(())
    }
}

pub type MigrationFn = Box<dyn Fn(&mut Upgrade<'_>) -> Result<(), DbError> + Send + Sync>;

/// Per-version upgrade steps, run in ascending version order.
#[derive(Default)]
pub struct Migrations {
    steps: BTreeMap<u32, MigrationFn>,
}

impl Migrations {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the step that brings the database to `version`. A later
    /// registration for the same version replaces the earlier one.
    #[must_use]
    pub fn add<F>(mut self, version: u32, step: F) -> Self
    where
        F: Fn(&mut Upgrade<'_>) -> Result<(), DbError> + Send + Sync + 'static,
    {
        self.steps.insert(version, Box::new(step));
        self
    }

    /// Steps for versions in `(from, to]`, ascending.
    pub fn between(&self, from: u32, to: u32) -> impl Iterator<Item = (u32, &MigrationFn)> {
        let empty = from >= to;
        let range = if empty {
            self.steps.range((Bound::Excluded(0), Bound::Included(0)))
        } else {
            self.steps.range((Bound::Excluded(from), Bound::Included(to)))
        };
        range.map(|(v, f)| (*v, f))
    }

    #[must_use]
    pub fn versions(&self) -> Vec<u32> {
        self.steps.keys().copied().collect()
    }
}

impl fmt::Debug for Migrations {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Migrations").field("versions", &self.versions()).finish()
    }
}
