use super::common::{names, open_users, users_config};
use bson::doc;
use idbquery::{
    CursorOptions, Database, DbError, Direction, Engine, Key, KeyRange, Migrations, TxMode,
};

#[tokio::test]
async fn accessor_round_trip() {
    let db = open_users(Engine::in_memory()).await;
    assert_eq!(db.count("users", None).await.unwrap(), 5);

    let frank = doc! {"name": "Frank", "role": "user"};
    let key = db.add("users", frank, None).await.unwrap();
    assert_eq!(key, Key::from(6));
    let frank = db.get("users", 6).await.unwrap().unwrap();
    assert_eq!(frank.get_i64("id").unwrap(), 6);

    let promoted = doc! {"id": 6, "name": "Frank", "role": "admin"};
    db.put("users", promoted, None).await.unwrap();
    let admins = db
        .get_all_by_index("users", "role", Some(KeyRange::only("admin")))
        .await
        .unwrap();
    assert_eq!(names(&admins), vec!["Alice", "David", "Frank"]);

    assert!(db.delete("users", 6).await.unwrap());
    assert!(!db.delete("users", 6).await.unwrap());
    assert_eq!(db.get("users", 6).await.unwrap(), None);
}

#[tokio::test]
async fn duplicate_add_is_a_constraint_error() {
    let db = open_users(Engine::in_memory()).await;
    let mallory = doc! {"id": 1, "name": "Mallory", "role": "user"};
    let err = db.add("users", mallory, None).await.unwrap_err();
    assert!(matches!(err, DbError::Constraint(_)));
    let alice = db.get("users", 1).await.unwrap().unwrap();
    assert_eq!(alice.get_str("name").unwrap(), "Alice");
}

#[tokio::test]
async fn get_by_index_returns_the_lowest_match() {
    let db = open_users(Engine::in_memory()).await;
    let first = db
        .get_by_index("users", "role", "user")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first.get_str("name").unwrap(), "Bob");
    let users = db
        .count_by_index("users", "role", Some(KeyRange::only("user")))
        .await
        .unwrap();
    assert_eq!(users, 3);
    let guest = db.get_by_index("users", "role", "guest").await.unwrap();
    assert!(guest.is_none());
}

#[tokio::test]
async fn ranged_get_all_and_clear() {
    let db = open_users(Engine::in_memory()).await;
    let range = KeyRange::bound(2, 4, false, true).unwrap();
    let mid = db.get_all("users", Some(range), None).await.unwrap();
    assert_eq!(names(&mid), vec!["Bob", "Charlie"]);
    let capped = db.get_all("users", None, Some(2)).await.unwrap();
    assert_eq!(names(&capped), vec!["Alice", "Bob"]);

    db.clear("users").await.unwrap();
    assert_eq!(db.count("users", None).await.unwrap(), 0);
}

#[tokio::test]
async fn cursor_over_an_index_in_reverse() {
    let db = open_users(Engine::in_memory()).await;
    let by_name = CursorOptions::default()
        .index("name")
        .direction(Direction::Prev);
    let mut cursor = db.open_cursor("users", by_name).await.unwrap();
    let mut seen = Vec::new();
    while let Some(entry) = cursor.next().await.unwrap() {
        seen.push(entry.value().get_str("name").unwrap().to_string());
    }
    assert_eq!(seen, vec!["Eve", "David", "Charlie", "Bob", "Alice"]);
    assert_eq!(cursor.visited(), 5);
    assert!(cursor.is_done());
}

async fn count_role(db: &Database, role: &str) -> usize {
    db.count_by_index("users", "role", Some(KeyRange::only(role)))
        .await
        .unwrap()
}

#[tokio::test]
async fn cursor_writes_commit_with_the_transaction() {
    let db = open_users(Engine::in_memory()).await;
    let admins = CursorOptions::default()
        .index("role")
        .range(KeyRange::only("admin"))
        .mode(TxMode::ReadWrite);
    let mut cursor = db.open_cursor("users", admins).await.unwrap();
    while let Some(mut entry) = cursor.next().await.unwrap() {
        let mut promoted = entry.value().clone();
        promoted.insert("role", "owner");
        entry.update(promoted).unwrap();
    }
    cursor.transaction().commit().await.unwrap();

    assert_eq!(count_role(&db, "owner").await, 2);
    assert_eq!(count_role(&db, "admin").await, 0);
}

#[tokio::test]
async fn object_store_batch_in_one_transaction() {
    let db = open_users(Engine::in_memory()).await;
    let tx = db.transaction(&["users"], TxMode::ReadWrite).await.unwrap();
    let users = tx.store("users").unwrap();
    assert_eq!(users.index_names().unwrap(), vec!["name", "role"]);
    let removed = users
        .delete_range(&KeyRange::lower_bound(4, false))
        .unwrap();
    assert_eq!(removed, 2);
    users.put(doc! {"name": "Zed", "role": "user"}, None).unwrap();
    assert_eq!(users.count(None).unwrap(), 4);
    tx.commit().await.unwrap();

    let all = db.get_all("users", None, None).await.unwrap();
    assert_eq!(names(&all), vec!["Alice", "Bob", "Charlie", "Zed"]);
    // Auto-increment keys keep climbing after deletes.
    assert_eq!(all[3].get_i64("id").unwrap(), 6);
}

#[tokio::test]
async fn aborted_transaction_leaves_no_trace() {
    let db = open_users(Engine::in_memory()).await;
    let tx = db.transaction(&["users"], TxMode::ReadWrite).await.unwrap();
    tx.store("users").unwrap().clear().unwrap();
    tx.abort().unwrap();
    assert!(!tx.is_active());
    assert!(matches!(tx.store("users"), Err(DbError::Transaction(_))));
    assert_eq!(db.count("users", None).await.unwrap(), 5);
}

#[tokio::test]
async fn export_and_import_between_databases() {
    let engine = Engine::in_memory();
    let source = open_users(engine.clone()).await;
    let dump = source.export_store("users").await.unwrap();
    assert_eq!(dump.as_array().map(Vec::len), Some(5));

    let copy = Database::new(engine, users_config("people_copy"), Migrations::new());
    assert_eq!(copy.import_store("users", &dump).await.unwrap(), 5);
    let copied = copy.get_all("users", None, None).await.unwrap();
    let original = source.get_all("users", None, None).await.unwrap();
    assert_eq!(names(&copied), names(&original));

    let not_an_array = serde_json::json!({"not": "an array"});
    let err = copy.import_store("users", &not_an_array).await.unwrap_err();
    assert!(matches!(err, DbError::InvalidArgument(_)));
}
