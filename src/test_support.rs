#![cfg(test)]

// Test-only fixtures shared by unit tests.
use crate::config::DbConfig;
use crate::database::Database;
use crate::engine::Engine;
use crate::schema::{IndexSchema, Migrations, StoreSchema};
use bson::doc;

/// `users` store keyed by an auto-increment `id`, with `age` and `name`
/// indexes.
pub fn users_config() -> DbConfig {
    DbConfig::new("users_db", 1).store(
        StoreSchema::new("users")
            .key_path("id")
            .auto_increment(true)
            .index(IndexSchema::on("age"))
            .index(IndexSchema::on("name")),
    )
}

/// A fresh in-memory database holding the five sample users:
/// Alice 30, Bob 25, Carol 35, Dave (no age), Eve 28.
pub async fn seeded_users() -> Database {
    let db = Database::new(Engine::in_memory(), users_config(), Migrations::new());
    db.bulk_add(
        "users",
        vec![
            doc! {"name": "Alice", "age": 30},
            doc! {"name": "Bob", "age": 25},
            doc! {"name": "Carol", "age": 35},
            doc! {"name": "Dave"},
            doc! {"name": "Eve", "age": 28},
        ],
    )
    .await
    .expect("seed users");
    db
}
