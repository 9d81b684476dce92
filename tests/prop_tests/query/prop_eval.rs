use bson::{Bson, doc};
use idbquery::query::{eval_filter, matches_all};
use idbquery::{Filter, Operator};
use proptest::prelude::*;

fn filter(field: &str, op: Operator, value: Bson) -> Filter {
    Filter {
        field: field.into(),
        op,
        value,
    }
}

fn any_bson_number() -> impl Strategy<Value = Bson> {
    prop_oneof![
        any::<i32>().prop_map(Bson::Int32),
        (-1_000_000_000i64..1_000_000_000).prop_map(Bson::Int64),
        // no NaN or infinities
        (-1.0e6f64..1.0e6f64).prop_map(Bson::Double),
    ]
}

fn any_operator() -> impl Strategy<Value = Operator> {
    prop_oneof![
        Just(Operator::Eq),
        Just(Operator::Ne),
        Just(Operator::Gt),
        Just(Operator::Lt),
        Just(Operator::Gte),
        Just(Operator::Lte),
    ]
}

proptest! {
    #![proptest_config(proptest::test_runner::Config {
        failure_persistence: Some(Box::new(proptest::test_runner::FileFailurePersistence::WithSource("proptest-regressions"))),
        .. proptest::test_runner::Config::default()
    })]

    #[test]
    fn prop_eq_symmetry(v in any_bson_number(), w in any_bson_number()) {
        let a = eval_filter(&doc! {"x": v.clone()}, &filter("x", Operator::Eq, w.clone()));
        let b = eval_filter(&doc! {"x": w}, &filter("x", Operator::Eq, v));
        prop_assert_eq!(a, b);
    }

    #[test]
    fn prop_gt_and_lte_are_complementary(
        i in -1_000_000i64..1_000_000,
        j in -1_000_000i64..1_000_000,
    ) {
        let d = doc! {"x": i};
        let gt = eval_filter(&d, &filter("x", Operator::Gt, Bson::Int64(j)));
        let lte = eval_filter(&d, &filter("x", Operator::Lte, Bson::Int64(j)));
        prop_assert_eq!(gt, !lte);
    }

    #[test]
    fn prop_missing_field_fails_ordering(op in any_operator(), v in any_bson_number()) {
        let hit = eval_filter(&doc! {"other": 1}, &filter("x", op.clone(), v));
        prop_assert_eq!(hit, op == Operator::Ne);
    }

    #[test]
    fn prop_conjunction_is_all(
        x in any_bson_number(),
        ops in proptest::collection::vec((any_operator(), any_bson_number()), 0..5),
    ) {
        let d = doc! {"x": x};
        let filters: Vec<Filter> = ops.into_iter().map(|(op, v)| filter("x", op, v)).collect();
        let each = filters.iter().all(|f| eval_filter(&d, f));
        prop_assert_eq!(matches_all(&d, &filters), each);
    }

    #[test]
    fn prop_unknown_operator_never_matches(sym in "[a-z~%]{1,4}", v in any_bson_number()) {
        let op = Operator::from(sym.as_str());
        prop_assume!(op.is_unknown());
        let d = doc! {"x": v.clone()};
        prop_assert!(!eval_filter(&d, &filter("x", op, v)));
    }
}
