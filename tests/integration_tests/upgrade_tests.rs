use super::common::{names, open_users, users_config};
use bson::doc;
use idbquery::utils::devlog;
use idbquery::{
    Database, DbError, Engine, IndexSchema, KeyRange, Migrations, StoreSchema, VersionChange,
};

fn v3_migrations() -> Migrations {
    Migrations::new()
        .add(2, |up| {
            up.create_index("users", IndexSchema::on("email"))?;
            for (_, mut user) in up.get_all("users")? {
                let name = user.get_str("name").unwrap_or_default().to_lowercase();
                user.insert("email", format!("{name}@example.com"));
                up.put("users", user, None)?;
            }
            Ok(())
        })
        .add(3, |up| {
            assert_eq!((up.old_version(), up.new_version()), (1, 3));
            up.delete_range("users", &KeyRange::lower_bound(5, false))?;
            Ok(())
        })
}

#[tokio::test]
async fn migrations_reshape_existing_data() {
    let engine = Engine::in_memory();
    drop(open_users(engine.clone()).await);

    let mut config = users_config("people");
    config.version = 3;
    let db = Database::new(engine.clone(), config, v3_migrations());
    assert_eq!(db.version().await.unwrap(), 3);

    let by_email = db
        .get_by_index("users", "email", "charlie@example.com")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(by_email.get_str("name").unwrap(), "Charlie");
    let all = db.get_all("users", None, None).await.unwrap();
    assert_eq!(names(&all), vec!["Alice", "Bob", "Charlie", "David"]);
    assert_eq!(engine.stats().upgrades, 2);
}

#[tokio::test]
async fn failing_migration_keeps_the_old_version() {
    let engine = Engine::in_memory();
    drop(open_users(engine.clone()).await);

    let mut config = users_config("people");
    config.version = 2;
    let broken = Migrations::new().add(2, |up| {
        up.clear("users")?;
        Err(DbError::Data("bad row".into()))
    });
    let db = Database::new(engine.clone(), config, broken);
    assert!(matches!(db.ensure_open().await, Err(DbError::Connection(_))));
    assert!(!db.is_open());

    let v1 = Database::new(engine, users_config("people"), Migrations::new());
    assert_eq!(v1.count("users", None).await.unwrap(), 5);
}

#[tokio::test]
async fn older_version_is_refused() {
    let engine = Engine::in_memory();
    let mut config = users_config("people");
    config.version = 2;
    Database::new(engine.clone(), config, Migrations::new())
        .ensure_open()
        .await
        .unwrap();

    let stale = Database::new(engine, users_config("people"), Migrations::new());
    let err = stale.ensure_open().await.unwrap_err();
    assert!(
        matches!(err, DbError::Connection(ref m) if m.contains("lower than the stored version"))
    );
}

#[tokio::test]
async fn upgrade_is_blocked_until_old_handles_close() {
    let _capture = devlog::capture();
    let engine = Engine::in_memory();
    let v1 = open_users(engine.clone()).await;
    let mut changes = v1.version_changes().await.unwrap();

    let audit = StoreSchema::new("audit").auto_increment(true);
    let mut config = users_config("people").store(audit);
    config.version = 2;
    let v2 = Database::new(engine, config, Migrations::new());
    let opener = tokio::spawn({
        let v2 = v2.clone();
        async move { v2.ensure_open().await }
    });

    let pending = changes.wait_for(Option::is_some).await.unwrap().clone();
    let expected = VersionChange {
        old_version: 1,
        new_version: Some(2),
    };
    assert_eq!(pending, Some(expected));
    let blocked = devlog::drain_matching("warning[blocked]");
    assert_eq!(blocked.len(), 1);
    assert!(blocked[0].contains("1 open connection"));
    assert!(!opener.is_finished());

    drop(changes);
    drop(v1);
    opener.await.unwrap().unwrap();
    assert_eq!(v2.store_names().await.unwrap(), vec!["audit", "users"]);
    v2.add("audit", doc! {"event": "upgraded"}, None).await.unwrap();
}

#[tokio::test]
async fn deleted_database_starts_over() {
    let engine = Engine::in_memory();
    let db = open_users(engine.clone()).await;
    assert_eq!(engine.database_names(), vec!["people"]);
    drop(db);

    engine.delete_database("people").await.unwrap();
    assert!(engine.database_names().is_empty());

    let fresh = Database::new(engine, users_config("people"), Migrations::new());
    assert_eq!(fresh.count("users", None).await.unwrap(), 0);
    assert_eq!(fresh.version().await.unwrap(), 1);
}
