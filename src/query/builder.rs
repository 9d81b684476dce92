use super::eval::matches_all;
use super::types::{Filter, Operator, Order, QuerySpec, QueryStats, SortSpec};
use crate::database::Database;
use crate::errors::DbError;
use crate::logger::METRICS_TARGET;
use crate::types::{Direction, Record, TxMode, from_record};
use crate::warnings::{self, Warning};
use bson::Bson;
use serde::de::DeserializeOwned;
use std::time::Instant;

/// Fluent query over one store: filters, optional index-backed ordering,
/// offset and limit.
///
/// ```no_run
/// # async fn demo(db: idbquery::Database) -> Result<(), idbquery::DbError> {
/// use idbquery::Order;
/// let adults = db
///     .query("users")
///     .filter("age", ">=", 18)
///     .order_by("age", Order::Desc)
///     .limit(10)?
///     .execute()
///     .await?;
/// # let _ = adults;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct QueryBuilder {
    db: Database,
    store: String,
    spec: QuerySpec,
}

impl QueryBuilder {
    pub fn new(db: &Database, store: impl Into<String>) -> Self {
        Self {
            db: db.clone(),
            store: store.into(),
            spec: QuerySpec::default(),
        }
    }

    #[must_use]
    pub fn store(&self) -> &str {
        &self.store
    }

    #[must_use]
    pub const fn spec(&self) -> &QuerySpec {
        &self.spec
    }

    /// Adds a condition; all conditions must hold. Unrecognized operator
    /// strings are kept and never match.
    #[must_use]
    pub fn filter(
        mut self,
        field: impl Into<String>,
        op: impl Into<Operator>,
        value: impl Into<Bson>,
    ) -> Self {
        self.spec.filters.push(Filter {
            field: field.into(),
            op: op.into(),
            value: value.into(),
        });
        self
    }

    /// Orders results through the index named `field`. The index must exist
    /// when the query runs.
    #[must_use]
    pub fn order_by(mut self, field: impl Into<String>, order: Order) -> Self {
        self.spec.sort = Some(SortSpec {
            field: field.into(),
            order,
        });
        self
    }

    /// # Errors
    /// `InvalidArgument` unless `n > 0`.
    pub fn limit(mut self, n: i64) -> Result<Self, DbError> {
        let limit = usize::try_from(n).ok().filter(|n| *n > 0).ok_or_else(|| {
            DbError::InvalidArgument(format!("limit must be greater than 0, got {n}"))
        })?;
        self.spec.limit = Some(limit);
        Ok(self)
    }

    /// # Errors
    /// `InvalidArgument` when `n < 0`.
    pub fn offset(mut self, n: i64) -> Result<Self, DbError> {
        self.spec.offset = usize::try_from(n).map_err(|_| {
            DbError::InvalidArgument(format!("offset must not be negative, got {n}"))
        })?;
        Ok(self)
    }

    /// An independent builder with the same store and conditions.
    #[must_use]
    pub fn copy(&self) -> Self {
        self.clone()
    }

    /// # Errors
    /// `IndexNotFound` for an ordering without index, `StoreNotFound`,
    /// `Connection` or `Transaction`. Partial results are discarded.
    pub async fn execute(&self) -> Result<Vec<Record>, DbError> {
        Ok(self.run(&self.spec).await?.0)
    }

    /// As [`QueryBuilder::execute`], with the execution counters.
    ///
    /// # Errors
    /// As [`QueryBuilder::execute`].
    pub async fn execute_with_stats(&self) -> Result<(Vec<Record>, QueryStats), DbError> {
        self.run(&self.spec).await
    }

    /// # Errors
    /// As [`QueryBuilder::execute`], plus `Json` when a record does not
    /// match `T`.
    pub async fn execute_as<T: DeserializeOwned>(&self) -> Result<Vec<T>, DbError> {
        self.execute().await?.iter().map(from_record).collect()
    }

    /// The first matching record after the offset, in query order.
    ///
    /// # Errors
    /// As [`QueryBuilder::execute`].
    pub async fn first(&self) -> Result<Option<Record>, DbError> {
        let spec = QuerySpec {
            limit: Some(1),
            ..self.spec.clone()
        };
        Ok(self.run(&spec).await?.0.into_iter().next())
    }

    /// Number of records matching the filters; ordering, offset and limit
    /// are ignored.
    ///
    /// # Errors
    /// `StoreNotFound`, `Connection` or `Transaction`.
    pub async fn count(&self) -> Result<usize, DbError> {
        let spec = QuerySpec {
            filters: self.spec.filters.clone(),
            ..QuerySpec::default()
        };
        Ok(self.run(&spec).await?.0.len())
    }

    async fn run(&self, spec: &QuerySpec) -> Result<(Vec<Record>, QueryStats), DbError> {
        let started = Instant::now();
        for f in spec.filters.iter().filter(|f| f.op.is_unknown()) {
            warnings::emit(&Warning::UnknownOperator {
                field: f.field.clone(),
                operator: f.op.symbol().to_string(),
            });
        }

        let tx = self
            .db
            .transaction(&[self.store.as_str()], TxMode::ReadOnly)
            .await?;
        let os = tx.store(&self.store)?;
        let (mut cursor, strategy) = match &spec.sort {
            Some(sort) => {
                let direction = match sort.order {
                    Order::Asc => Direction::Next,
                    Order::Desc => Direction::Prev,
                };
                (os.index(&sort.field)?.open_cursor(None, direction)?, "index")
            }
            None => (os.open_cursor(None, Direction::Next)?, "scan"),
        };

        let mut results = Vec::new();
        let mut matched = 0u64;
        let mut skipped = 0usize;
        while let Some(entry) = cursor.next().await? {
            if !matches_all(entry.value(), &spec.filters) {
                continue;
            }
            matched += 1;
            if skipped < spec.offset {
                skipped += 1;
                continue;
            }
            results.push(entry.into_value());
            if spec.limit.is_some_and(|limit| results.len() >= limit) {
                break;
            }
        }
        tx.commit().await?;

        let stats = QueryStats {
            visited: cursor.visited(),
            matched,
            returned: results.len() as u64,
            elapsed_ms: started.elapsed().as_millis(),
        };
        crate::devlog!(
            "query store={} strategy={strategy} filters={} visited={} matched={} \
             returned={} elapsed_ms={}",
            self.store,
            spec.filters.len(),
            stats.visited,
            stats.matched,
            stats.returned,
            stats.elapsed_ms
        );
        log::info!(
            target: METRICS_TARGET,
            "query db={} store={} strategy={strategy} visited={} returned={} elapsed_ms={}",
            self.db.name(),
            self.store,
            stats.visited,
            stats.returned,
            stats.elapsed_ms
        );
        Ok((results, stats))
    }
}
