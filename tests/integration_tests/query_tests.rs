use super::common::{names, open_users};
use bson::doc;
use idbquery::{Database, DbConfig, DbError, Engine, Migrations, Order, StoreSchema};

#[tokio::test]
async fn role_filter_sorted_page() {
    let db = open_users(Engine::in_memory()).await;
    let out = db
        .query("users")
        .filter("role", "=", "user")
        .order_by("name", Order::Asc)
        .offset(1)
        .unwrap()
        .limit(1)
        .unwrap()
        .execute()
        .await
        .unwrap();
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].get_str("name").unwrap(), "Charlie");
    assert_eq!(out[0].get_str("role").unwrap(), "user");
}

#[tokio::test]
async fn zero_limit_is_rejected_before_io() {
    let engine = Engine::in_memory();
    let db = open_users(engine.clone()).await;
    let before = engine.stats();
    assert!(matches!(
        db.query("users").limit(0),
        Err(DbError::InvalidArgument(_))
    ));
    assert_eq!(engine.stats(), before);
}

#[tokio::test]
async fn undefined_age_is_excluded() {
    let db = open_users(Engine::in_memory()).await;
    db.put("users", doc! {"name": "Frank", "role": "user", "age": 40}, None)
        .await
        .unwrap();
    let out = db
        .query("users")
        .filter("age", ">", 18)
        .execute()
        .await
        .unwrap();
    assert_eq!(names(&out), vec!["Frank"]);
}

#[tokio::test]
async fn limit_stops_the_cursor_early() {
    let engine = Engine::in_memory();
    let db = open_users(engine.clone()).await;
    let before = engine.stats().cursor_visits;
    let out = db
        .query("users")
        .filter("role", "=", "user")
        .limit(1)
        .unwrap()
        .execute()
        .await
        .unwrap();
    assert_eq!(names(&out), vec!["Bob"]);
    // Alice fails the filter, Bob fills the limit.
    assert_eq!(engine.stats().cursor_visits - before, 2);
}

#[tokio::test]
async fn offset_and_limit_stop_at_the_last_needed_match() {
    let engine = Engine::in_memory();
    let config = DbConfig::new("numbers", 1).store(
        StoreSchema::new("numbers")
            .key_path("id")
            .auto_increment(true),
    );
    let db = Database::new(engine.clone(), config, Migrations::new());
    let rows = (1..=10i64).map(|n| doc! {"n": n, "even": (n % 2 == 0)}).collect();
    db.bulk_add("numbers", rows).await.unwrap();

    let before = engine.stats().cursor_visits;
    let out = db
        .query("numbers")
        .filter("even", "=", true)
        .offset(1)
        .unwrap()
        .limit(2)
        .unwrap()
        .execute()
        .await
        .unwrap();
    let got: Vec<i64> = out.iter().map(|r| r.get_i64("n").unwrap()).collect();
    assert_eq!(got, vec![4, 6]);
    // 2 is skipped, 4 and 6 fill the page, nothing past 6 is read.
    assert_eq!(engine.stats().cursor_visits - before, 6);
}

#[tokio::test]
async fn copies_are_independent() {
    let db = open_users(Engine::in_memory()).await;
    let base = db.query("users").filter("role", "=", "user");
    let narrowed = base.copy().filter("name", "!=", "Bob").limit(1).unwrap();
    assert_eq!(names(&narrowed.execute().await.unwrap()), vec!["Charlie"]);
    assert_eq!(
        names(&base.execute().await.unwrap()),
        vec!["Bob", "Charlie", "Eve"]
    );
    assert!(base.spec().limit.is_none());
}

#[tokio::test]
async fn descending_order_reverses_ascending() {
    let db = open_users(Engine::in_memory()).await;
    let asc = db
        .query("users")
        .order_by("name", Order::Asc)
        .execute()
        .await
        .unwrap();
    let mut desc = db
        .query("users")
        .order_by("name", Order::Desc)
        .execute()
        .await
        .unwrap();
    desc.reverse();
    assert_eq!(asc, desc);
    assert_eq!(names(&asc), vec!["Alice", "Bob", "Charlie", "David", "Eve"]);
}

#[tokio::test]
async fn offset_past_the_end_is_empty() {
    let db = open_users(Engine::in_memory()).await;
    let out = db
        .query("users")
        .filter("role", "=", "admin")
        .offset(5)
        .unwrap()
        .execute()
        .await
        .unwrap();
    assert!(out.is_empty());
}

#[tokio::test]
async fn unknown_operator_matches_nothing() {
    let db = open_users(Engine::in_memory()).await;
    let out = db
        .query("users")
        .filter("role", "LIKE", "user")
        .execute()
        .await
        .unwrap();
    assert!(out.is_empty());
}

#[tokio::test]
async fn unknown_store_fails_execution() {
    let db = open_users(Engine::in_memory()).await;
    assert!(matches!(
        db.query("orders").execute().await,
        Err(DbError::StoreNotFound(_))
    ));
}
