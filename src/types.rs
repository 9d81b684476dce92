use crate::errors::DbError;
use bson::spec::BinarySubtype;
use bson::{Binary, Bson, Document as BsonDocument};
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Bound;

/// A stored record: a schema-less field map.
pub type Record = BsonDocument;

const MAX_PATH_DEPTH: usize = 32;

/// A totally ordered store or index key.
///
/// Variant order is significant: numbers sort before dates, dates before
/// strings, strings before binaries and binaries before arrays.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Key {
    Number(OrderedFloat<f64>),
    Date(i64),
    String(String),
    Binary(Vec<u8>),
    Array(Vec<Key>),
}

impl Key {
    /// Converts a BSON value into a key. Returns `None` for values that cannot
    /// be keys (null, booleans, documents, NaN, arrays holding any of those).
    #[must_use]
    pub fn from_bson(v: &Bson) -> Option<Self> {
        match v {
            Bson::Int32(i) => Some(Self::Number(OrderedFloat(f64::from(*i)))),
            #[allow(clippy::cast_precision_loss)]
            Bson::Int64(i) => Some(Self::Number(OrderedFloat(*i as f64))),
            Bson::Double(f) if !f.is_nan() => Some(Self::Number(OrderedFloat(*f))),
            Bson::DateTime(dt) => Some(Self::Date(dt.timestamp_millis())),
            Bson::String(s) => Some(Self::String(s.clone())),
            Bson::Binary(b) => Some(Self::Binary(b.bytes.clone())),
            Bson::Array(items) => items
                .iter()
                .map(Self::from_bson)
                .collect::<Option<Vec<_>>>()
                .map(Self::Array),
            _ => None,
        }
    }

    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn to_bson(&self) -> Bson {
        match self {
            Self::Number(n) => {
                let f = n.into_inner();
                if f.fract() == 0.0 && f.abs() < 9.0e15 {
                    Bson::Int64(f as i64)
                } else {
                    Bson::Double(f)
                }
            }
            Self::Date(ms) => Bson::DateTime(bson::DateTime::from_millis(*ms)),
            Self::String(s) => Bson::String(s.clone()),
            Self::Binary(b) => Bson::Binary(Binary {
                subtype: BinarySubtype::Generic,
                bytes: b.clone(),
            }),
            Self::Array(items) => Bson::Array(items.iter().map(Self::to_bson).collect()),
        }
    }

    #[must_use]
    pub const fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(n.0),
            _ => None,
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{}", n.0),
            Self::Date(ms) => write!(f, "date({ms})"),
            Self::String(s) => write!(f, "{s:?}"),
            Self::Binary(b) => write!(f, "binary({} bytes)", b.len()),
            Self::Array(items) => {
                f.write_str("[")?;
                for (i, k) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{k}")?;
                }
                f.write_str("]")
            }
        }
    }
}

impl From<i32> for Key {
    fn from(v: i32) -> Self {
        Self::Number(OrderedFloat(f64::from(v)))
    }
}

impl From<i64> for Key {
    #[allow(clippy::cast_precision_loss)]
    fn from(v: i64) -> Self {
        Self::Number(OrderedFloat(v as f64))
    }
}

impl From<u64> for Key {
    #[allow(clippy::cast_precision_loss)]
    fn from(v: u64) -> Self {
        Self::Number(OrderedFloat(v as f64))
    }
}

impl From<f64> for Key {
    fn from(v: f64) -> Self {
        Self::Number(OrderedFloat(v))
    }
}

impl From<&str> for Key {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for Key {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

/// A contiguous interval of keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRange {
    pub lower: Bound<Key>,
    pub upper: Bound<Key>,
}

impl KeyRange {
    #[must_use]
    pub fn only(key: impl Into<Key>) -> Self {
        let k = key.into();
        Self {
            lower: Bound::Included(k.clone()),
            upper: Bound::Included(k),
        }
    }

    /// # Errors
    /// Returns `InvalidArgument` when `lower > upper`, or when both are equal
    /// and either end is open.
    pub fn bound(
        lower: impl Into<Key>,
        upper: impl Into<Key>,
        lower_open: bool,
        upper_open: bool,
    ) -> Result<Self, DbError> {
        let (l, u) = (lower.into(), upper.into());
        if l > u {
            return Err(DbError::InvalidArgument(format!(
                "lower bound {l} is above upper bound {u}"
            )));
        }
        if l == u && (lower_open || upper_open) {
            return Err(DbError::InvalidArgument(format!("empty range around {l}")));
        }
        Ok(Self {
            lower: edge(l, lower_open),
            upper: edge(u, upper_open),
        })
    }

    #[must_use]
    pub fn lower_bound(key: impl Into<Key>, open: bool) -> Self {
        Self {
            lower: edge(key.into(), open),
            upper: Bound::Unbounded,
        }
    }

    #[must_use]
    pub fn upper_bound(key: impl Into<Key>, open: bool) -> Self {
        Self {
            lower: Bound::Unbounded,
            upper: edge(key.into(), open),
        }
    }

    #[must_use]
    pub const fn all() -> Self {
        Self {
            lower: Bound::Unbounded,
            upper: Bound::Unbounded,
        }
    }

    #[must_use]
    pub fn contains(&self, key: &Key) -> bool {
        let above_lower = match &self.lower {
            Bound::Included(l) => key >= l,
            Bound::Excluded(l) => key > l,
            Bound::Unbounded => true,
        };
        let below_upper = match &self.upper {
            Bound::Included(u) => key <= u,
            Bound::Excluded(u) => key < u,
            Bound::Unbounded => true,
        };
        above_lower && below_upper
    }
}

fn edge(k: Key, open: bool) -> Bound<Key> {
    if open {
        Bound::Excluded(k)
    } else {
        Bound::Included(k)
    }
}

impl From<Key> for KeyRange {
    fn from(k: Key) -> Self {
        Self::only(k)
    }
}

/// True when `(lower, upper)` selects nothing. `BTreeMap::range` panics on such
/// bounds, so callers check first.
pub(crate) fn bounds_empty<K: Ord>(lower: &Bound<K>, upper: &Bound<K>) -> bool {
    match (lower, upper) {
        (Bound::Included(l), Bound::Included(u)) => l > u,
        (Bound::Included(l) | Bound::Excluded(l), Bound::Excluded(u))
        | (Bound::Excluded(l), Bound::Included(u)) => l >= u,
        _ => false,
    }
}

/// Cursor traversal direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Direction {
    #[default]
    Next,
    NextUnique,
    Prev,
    PrevUnique,
}

impl Direction {
    #[must_use]
    pub const fn is_reverse(self) -> bool {
        matches!(self, Self::Prev | Self::PrevUnique)
    }

    #[must_use]
    pub const fn is_unique(self) -> bool {
        matches!(self, Self::NextUnique | Self::PrevUnique)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TxMode {
    #[default]
    ReadOnly,
    ReadWrite,
}

/// Resolves a dotted field path. Intermediate segments must be documents.
#[must_use]
pub fn get_path<'a>(doc: &'a BsonDocument, path: &str) -> Option<&'a Bson> {
    if path.is_empty() || path.len() > 1024 {
        return None;
    }
    let mut parts = path.split('.');
    let first = parts.next()?;
    let mut cur = doc.get(first)?;
    for (depth, p) in parts.enumerate() {
        if depth + 1 >= MAX_PATH_DEPTH {
            return None;
        }
        match cur {
            Bson::Document(d) => cur = d.get(p)?,
            _ => return None,
        }
    }
    Some(cur)
}

/// Writes `value` at a dotted path, creating intermediate documents.
///
/// # Errors
/// Returns `Data` if an intermediate segment exists and is not a document.
pub fn set_path(doc: &mut BsonDocument, path: &str, value: Bson) -> Result<(), DbError> {
    let mut cur = doc;
    let mut iter = path.split('.').peekable();
    while let Some(seg) = iter.next() {
        if iter.peek().is_none() {
            cur.insert(seg.to_string(), value);
            return Ok(());
        }
        if !cur.contains_key(seg) {
            cur.insert(seg.to_string(), Bson::Document(BsonDocument::new()));
        }
        cur = match cur.get_mut(seg) {
            Some(Bson::Document(d)) => d,
            _ => {
                return Err(DbError::Data(format!(
                    "cannot write key path '{path}': '{seg}' is not a document"
                )));
            }
        };
    }
    Err(DbError::Data("empty key path".into()))
}

/// Converts a record into a typed value through its JSON form.
///
/// # Errors
/// `Json` when the record does not match `T`.
pub fn from_record<T: serde::de::DeserializeOwned>(record: &Record) -> Result<T, DbError> {
    let value = serde_json::to_value(record)?;
    Ok(serde_json::from_value(value)?)
}

/// Converts a serializable value into a record. The value must serialize to
/// a JSON object.
///
/// # Errors
/// `Json` when `value` cannot be serialized, `Data` when it is not an object.
pub fn to_record<T: Serialize + ?Sized>(value: &T) -> Result<Record, DbError> {
    let json = serde_json::to_value(value)?;
    if !json.is_object() {
        return Err(DbError::Data(format!("expected a JSON object, found {json}")));
    }
    Ok(Record::deserialize(json)?)
}
