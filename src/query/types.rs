use bson::Bson;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Comparison applied by a filter. Strings outside the six known symbols
/// become `Unknown`, which never matches.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operator {
    Eq,
    Ne,
    Gt,
    Lt,
    Gte,
    Lte,
    Unknown(String),
}

impl Operator {
    #[must_use]
    pub fn symbol(&self) -> &str {
        match self {
            Self::Eq => "=",
            Self::Ne => "!=",
            Self::Gt => ">",
            Self::Lt => "<",
            Self::Gte => ">=",
            Self::Lte => "<=",
            Self::Unknown(s) => s,
        }
    }

    #[must_use]
    pub const fn is_unknown(&self) -> bool {
        matches!(self, Self::Unknown(_))
    }
}

impl FromStr for Operator {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "=" => Self::Eq,
            "!=" => Self::Ne,
            ">" => Self::Gt,
            "<" => Self::Lt,
            ">=" => Self::Gte,
            "<=" => Self::Lte,
            other => Self::Unknown(other.to_string()),
        })
    }
}

impl From<&str> for Operator {
    fn from(s: &str) -> Self {
        match s.parse() {
            Ok(op) => op,
            Err(never) => match never {},
        }
    }
}

impl From<String> for Operator {
    fn from(s: String) -> Self {
        Self::from(s.as_str())
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Order {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortSpec {
    pub field: String,
    pub order: Order,
}

/// One `(field, operator, value)` condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub field: String,
    pub op: Operator,
    pub value: Bson,
}

/// Everything a query execution needs. Cloning is a deep copy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QuerySpec {
    pub filters: Vec<Filter>,
    pub sort: Option<SortSpec>,
    pub limit: Option<usize>,
    pub offset: usize,
}

/// Counters of the last execution, also written to the metrics log.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueryStats {
    pub visited: u64,
    pub matched: u64,
    pub returned: u64,
    pub elapsed_ms: u128,
}
