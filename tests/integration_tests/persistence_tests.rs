use super::common::{names, open_users, users_config};
use bson::doc;
use idbquery::{Database, DbError, Engine, EngineOptions, Migrations, TxMode};
use tempfile::tempdir;

#[tokio::test]
async fn committed_data_survives_a_new_engine() {
    let dir = tempdir().unwrap();
    {
        let engine = Engine::open(EngineOptions::with_data_dir(dir.path())).unwrap();
        let db = open_users(engine).await;
        let bobby = doc! {"id": 2, "name": "Bobby", "role": "user"};
        db.put("users", bobby, None).await.unwrap();
    }
    assert!(dir.path().join("people.idb").exists());

    let engine = Engine::open(EngineOptions::with_data_dir(dir.path())).unwrap();
    let db = Database::new(engine.clone(), users_config("people"), Migrations::new());
    let all = db.get_all("users", None, None).await.unwrap();
    assert_eq!(names(&all), vec!["Alice", "Bobby", "Charlie", "David", "Eve"]);
    // Reopening at the stored version is not an upgrade.
    assert_eq!(engine.stats().upgrades, 0);

    let frank = doc! {"name": "Frank", "role": "user"};
    let next = db.add("users", frank, None).await.unwrap();
    assert_eq!(next, idbquery::Key::from(6));
}

#[tokio::test]
async fn uncommitted_changes_are_not_written() {
    let dir = tempdir().unwrap();
    {
        let engine = Engine::open(EngineOptions::with_data_dir(dir.path())).unwrap();
        let db = open_users(engine).await;
        let tx = db.transaction(&["users"], TxMode::ReadWrite).await.unwrap();
        tx.store("users").unwrap().clear().unwrap();
        drop(tx);
    }

    let engine = Engine::open(EngineOptions::with_data_dir(dir.path())).unwrap();
    let db = Database::new(engine, users_config("people"), Migrations::new());
    assert_eq!(db.count("users", None).await.unwrap(), 5);
}

#[tokio::test]
async fn corrupt_image_fails_the_open() {
    let dir = tempdir().unwrap();
    std::fs::write(dir.path().join("people.idb"), b"not an image").unwrap();

    let engine = Engine::open(EngineOptions::with_data_dir(dir.path())).unwrap();
    let db = Database::new(engine, users_config("people"), Migrations::new());
    let err = db.ensure_open().await.unwrap_err();
    assert!(matches!(err, DbError::Connection(ref m) if m.contains("corrupt")));
}

#[tokio::test]
async fn deleting_removes_the_image() {
    let dir = tempdir().unwrap();
    let engine = Engine::open(EngineOptions::with_data_dir(dir.path())).unwrap();
    drop(open_users(engine.clone()).await);
    let image = dir.path().join("people.idb");
    assert!(image.exists());

    engine.delete_database("people").await.unwrap();
    assert!(!image.exists());
}
