use bson::doc;
use idbquery::{Database, DbConfig, Engine, IndexSchema, Migrations, Order, Record, StoreSchema};
use proptest::prelude::*;

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

async fn scores_db(scores: &[i64]) -> Database {
    let players = StoreSchema::new("players")
        .key_path("id")
        .auto_increment(true)
        .index(IndexSchema::on("score"));
    let config = DbConfig::new("scores", 1).store(players);
    let db = Database::new(Engine::in_memory(), config, Migrations::new());
    let records = scores
        .iter()
        .enumerate()
        .map(|(i, s)| doc! {"seq": i as i64, "score": *s})
        .collect();
    db.bulk_add("players", records).await.unwrap();
    db
}

fn seqs(records: &[Record]) -> Vec<i64> {
    records.iter().map(|r| r.get_i64("seq").unwrap()).collect()
}

proptest! {
    #![proptest_config(proptest::test_runner::Config {
        cases: 48,
        failure_persistence: Some(Box::new(proptest::test_runner::FileFailurePersistence::WithSource("proptest-regressions"))),
        .. proptest::test_runner::Config::default()
    })]

    #[test]
    fn prop_page_is_a_slice_of_the_model(
        scores in proptest::collection::vec(0i64..20, 0..40),
        floor in 0i64..20,
        offset in 0usize..10,
        limit in 1usize..10,
    ) {
        // Index order is (score, primary key); keys follow insertion order.
        let mut model: Vec<(i64, i64)> = scores
            .iter()
            .enumerate()
            .filter(|(_, s)| **s >= floor)
            .map(|(i, s)| (*s, i as i64))
            .collect();
        model.sort();
        let expected: Vec<i64> = model
            .into_iter()
            .map(|(_, seq)| seq)
            .skip(offset)
            .take(limit)
            .collect();

        let got = runtime().block_on(async {
            let db = scores_db(&scores).await;
            db.query("players")
                .filter("score", ">=", floor)
                .order_by("score", Order::Asc)
                .offset(offset as i64)
                .unwrap()
                .limit(limit as i64)
                .unwrap()
                .execute()
                .await
                .unwrap()
        });
        prop_assert_eq!(seqs(&got), expected);
    }

    #[test]
    fn prop_desc_is_reversed_asc(scores in proptest::collection::vec(0i64..1000, 0..40)) {
        let (asc, desc) = runtime().block_on(async {
            let db = scores_db(&scores).await;
            let asc = db.query("players").order_by("score", Order::Asc).execute().await.unwrap();
            let desc = db.query("players").order_by("score", Order::Desc).execute().await.unwrap();
            (asc, desc)
        });
        let asc_scores: Vec<i64> = asc.iter().map(|r| r.get_i64("score").unwrap()).collect();
        let mut desc_scores: Vec<i64> = desc.iter().map(|r| r.get_i64("score").unwrap()).collect();
        desc_scores.reverse();
        prop_assert_eq!(asc.len(), scores.len());
        prop_assert_eq!(asc_scores, desc_scores);
    }

    #[test]
    fn prop_count_matches_filtered_scan(
        scores in proptest::collection::vec(-50i64..50, 0..40),
        pivot in -50i64..50,
    ) {
        let expected = scores.iter().filter(|s| **s != pivot).count();
        let (count, unsorted) = runtime().block_on(async {
            let db = scores_db(&scores).await;
            let q = db.query("players").filter("score", "!=", pivot);
            (q.count().await.unwrap(), q.execute().await.unwrap())
        });
        prop_assert_eq!(count, expected);
        // Without ordering, results come back in primary key order.
        let s = seqs(&unsorted);
        prop_assert!(s.windows(2).all(|w| w[0] < w[1]));
    }
}
