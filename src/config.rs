//! Database declarations and engine options, loadable from TOML with
//! environment overrides.

use crate::errors::DbError;
use crate::schema::StoreSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Declared shape of one database: its name, target version and stores.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DbConfig {
    pub name: String,
    pub version: u32,
    #[serde(default)]
    pub stores: Vec<StoreSchema>,
}

impl DbConfig {
    pub fn new(name: impl Into<String>, version: u32) -> Self {
        Self {
            name: name.into(),
            version,
            stores: Vec::new(),
        }
    }

    #[must_use]
    pub fn store(mut self, schema: StoreSchema) -> Self {
        self.stores.push(schema);
        self
    }

    /// # Errors
    /// `Config` when the text is not a valid declaration.
    pub fn from_toml_str(text: &str) -> Result<Self, DbError> {
        Ok(toml::from_str(text)?)
    }

    /// # Errors
    /// `Io` when the file cannot be read, `Config` when it does not parse.
    pub fn from_path(path: &Path) -> Result<Self, DbError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| DbError::Io(format!("read {}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    /// Applies `IDBQUERY_DB_NAME` and `IDBQUERY_DB_VERSION` when set.
    /// An unparsable version is ignored with a warning.
    #[must_use]
    pub fn apply_env(mut self) -> Self {
        if let Ok(name) = std::env::var("IDBQUERY_DB_NAME")
            && !name.trim().is_empty()
        {
            self.name = name.trim().to_string();
        }
        if let Ok(v) = std::env::var("IDBQUERY_DB_VERSION") {
            match v.trim().parse::<u32>() {
                Ok(version) => self.version = version,
                Err(_) => log::warn!("ignoring IDBQUERY_DB_VERSION={v:?}: not a version number"),
            }
        }
        self
    }

    /// # Errors
    /// `InvalidArgument` for an empty name, version 0, duplicate store names
    /// or any invalid store schema.
    pub fn validate(&self) -> Result<(), DbError> {
        if self.name.is_empty() {
            return Err(DbError::InvalidArgument("database name must not be empty".into()));
        }
        if self.version == 0 {
            return Err(DbError::InvalidArgument(format!(
                "database '{}': version must be at least 1",
                self.name
            )));
        }
        let mut seen = HashSet::new();
        for store in &self.stores {
            store.validate()?;
            if !seen.insert(store.name.as_str()) {
                return Err(DbError::InvalidArgument(format!(
                    "database '{}': duplicate store '{}'",
                    self.name, store.name
                )));
            }
        }
        Ok(())
    }
}

/// Engine-wide options.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineOptions {
    /// Directory holding one image per database; `None` keeps everything in
    /// memory.
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
}

impl EngineOptions {
    #[must_use]
    pub fn in_memory() -> Self {
        Self::default()
    }

    pub fn with_data_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: Some(dir.into()),
        }
    }

    /// Reads `IDBQUERY_DATA_DIR`; unset or empty means memory only.
    #[must_use]
    pub fn from_env() -> Self {
        let data_dir = std::env::var("IDBQUERY_DATA_DIR")
            .ok()
            .filter(|d| !d.trim().is_empty())
            .map(PathBuf::from);
        Self { data_dir }
    }
}
