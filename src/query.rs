//! Fluent queries: filter evaluation and the builder that drives cursors.

mod builder;
mod eval;
mod types;

pub use builder::QueryBuilder;
pub use eval::{compare_values, eval_filter, matches_all, strict_eq};
pub use types::{Filter, Operator, Order, QuerySpec, QueryStats, SortSpec};
