//! Versioned keyed-store accessor with ordered indexes, async cursors and a
//! fluent query builder.

pub mod config;
pub mod cursor;
pub mod database;
pub mod engine;
pub mod errors;
pub mod logger;
pub mod query;
pub mod schema;
pub mod transaction;
pub mod types;
pub mod utils;
pub mod warnings;

#[cfg(test)]
mod test_support;

pub use config::{DbConfig, EngineOptions};
pub use cursor::{Cursor, CursorEntry};
pub use database::{CursorOptions, Database};
pub use engine::{Engine, EngineStatsSnapshot, Upgrade, VersionChange};
pub use errors::DbError;
pub use query::{Filter, Operator, Order, QueryBuilder, QuerySpec, QueryStats};
pub use schema::{IndexSchema, KeyPath, Migrations, StoreSchema};
pub use transaction::{IndexHandle, ObjectStore, Transaction};
pub use types::{Direction, Key, KeyRange, Record, TxMode, from_record, to_record};
pub use warnings::Warning;

/// Initializes logging from `log4rs.yaml` when present, otherwise from the
/// `IDBQUERY_LOG_*` environment variables.
///
/// # Errors
/// `Logging` when the configuration cannot be applied.
pub fn init() -> Result<(), DbError> {
    if std::path::Path::new("log4rs.yaml").exists() {
        logger::init()
    } else {
        logger::configure_from_env()
    }
}
