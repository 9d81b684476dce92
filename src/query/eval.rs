use super::types::{Filter, Operator};
use crate::types::{Record, get_path};
use bson::Bson;
use std::cmp::Ordering;

/// True when `doc` satisfies every filter, checked in order and stopping at
/// the first failure.
#[must_use]
pub fn matches_all(doc: &Record, filters: &[Filter]) -> bool {
    filters.iter().all(|f| eval_filter(doc, f))
}

#[must_use]
pub fn eval_filter(doc: &Record, filter: &Filter) -> bool {
    let field = get_path(doc, &filter.field);
    match &filter.op {
        Operator::Eq => strict_eq(field, &filter.value),
        Operator::Ne => !strict_eq(field, &filter.value),
        Operator::Gt => ordered(field, &filter.value, Ordering::is_gt),
        Operator::Lt => ordered(field, &filter.value, Ordering::is_lt),
        Operator::Gte => ordered(field, &filter.value, Ordering::is_ge),
        Operator::Lte => ordered(field, &filter.value, Ordering::is_le),
        Operator::Unknown(_) => false,
    }
}

const fn is_undefined(v: Option<&Bson>) -> bool {
    matches!(v, None | Some(Bson::Undefined))
}

#[allow(clippy::cast_precision_loss)]
fn as_number(v: &Bson) -> Option<f64> {
    match v {
        Bson::Int32(i) => Some(f64::from(*i)),
        Bson::Int64(i) => Some(*i as f64),
        Bson::Double(f) => Some(*f),
        _ => None,
    }
}

/// Strict equality: no coercion between types, numbers compare by value,
/// a missing field equals only `Undefined`.
#[must_use]
#[allow(clippy::float_cmp)]
pub fn strict_eq(field: Option<&Bson>, value: &Bson) -> bool {
    if is_undefined(field) || matches!(value, Bson::Undefined) {
        return is_undefined(field) && matches!(value, Bson::Undefined);
    }
    let Some(field) = field else {
        return false;
    };
    if let (Some(a), Some(b)) = (as_number(field), as_number(value)) {
        return a == b;
    }
    field == value
}

/// Ordering between two comparable values: number/number, string/string,
/// date/date or bool/bool. Anything else is incomparable.
#[must_use]
pub fn compare_values(a: &Bson, b: &Bson) -> Option<Ordering> {
    if let (Some(x), Some(y)) = (as_number(a), as_number(b)) {
        return x.partial_cmp(&y);
    }
    match (a, b) {
        (Bson::String(x), Bson::String(y)) => Some(x.cmp(y)),
        (Bson::DateTime(x), Bson::DateTime(y)) => Some(x.cmp(y)),
        (Bson::Boolean(x), Bson::Boolean(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

fn ordered(field: Option<&Bson>, value: &Bson, accept: fn(Ordering) -> bool) -> bool {
    let absent = |v: &Bson| matches!(v, Bson::Null | Bson::Undefined);
    match field {
        Some(f) if !absent(f) && !absent(value) => compare_values(f, value).is_some_and(accept),
        _ => false,
    }
}
