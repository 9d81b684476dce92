use bson::doc;
use idbquery::{Database, DbConfig, Engine, IndexSchema, Migrations, Record, StoreSchema};
use std::sync::Arc;

/// `users` keyed by auto-increment `id` with `name` and `role` indexes.
pub fn users_config(name: &str) -> DbConfig {
    DbConfig::new(name, 1).store(
        StoreSchema::new("users")
            .key_path("id")
            .auto_increment(true)
            .index(IndexSchema::on("name"))
            .index(IndexSchema::on("role")),
    )
}

pub fn role_users() -> Vec<Record> {
    vec![
        doc! {"name": "Alice", "role": "admin"},
        doc! {"name": "Bob", "role": "user"},
        doc! {"name": "Charlie", "role": "user"},
        doc! {"name": "David", "role": "admin"},
        doc! {"name": "Eve", "role": "user"},
    ]
}

pub async fn open_users(engine: Arc<Engine>) -> Database {
    let db = Database::new(engine, users_config("people"), Migrations::new());
    db.bulk_add("users", role_users()).await.unwrap();
    db
}

pub fn names(records: &[Record]) -> Vec<String> {
    records
        .iter()
        .filter_map(|r| r.get_str("name").ok().map(str::to_string))
        .collect()
}
