//! In-process query engine over the warehouse tables.
//!
//! One expression tree ([`Expr`]) and one logical plan ([`LogicalPlan`])
//! sit behind three front ends: typed [`Records`], the [`DataFrame`]
//! builder and [`Session::sql`]. Plans are executed partition by partition
//! on the rayon pool.

use std::sync::{Arc, Mutex, RwLock};

use tracing::{debug, info};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::error::{ExecError, QueryError};

pub mod cache;
pub mod catalog;
pub mod dataframe;
pub mod exec;
pub mod expr;
pub mod frame;
pub mod plan;
pub mod records;
pub mod schema;
pub mod sql;
pub mod value;

pub use cache::ResultCache;
pub use catalog::{Catalog, Table, TableKind};
pub use dataframe::{DataFrame, GroupedData};
pub use exec::{AggregateMode, ExecutionStats, JoinStrategy, PhysicalPlan};
pub use expr::{array_contains, col, lit, when, ColumnRef, Expr, NamedExpr};
pub use frame::{Frame, Partitioning, ResultSet, Row};
pub use plan::{avg, count, count_star, max, min, sum, AggExpr, LogicalPlan, NamedAgg, SortKey};
pub use records::{Record, Records};
pub use schema::{DataType, Field, Schema};
pub use value::Value;

use exec::Planner;

/// A query session: a catalog of tables plus the results cached in it.
///
/// Cloning is cheap and clones share the catalog and the cache. Cached
/// results live until they are evicted or the last clone is dropped.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    id: Uuid,
    catalog: RwLock<Catalog>,
    cache: ResultCache,
    config: EngineConfig,
    stats: Mutex<ExecutionStats>,
}

impl Session {
    pub fn new(catalog: Catalog, config: EngineConfig) -> Self {
        let id = Uuid::new_v4();
        info!(session = %id, tables = ?catalog.names(), "session started");
        Self {
            inner: Arc::new(SessionInner {
                id,
                catalog: RwLock::new(catalog),
                cache: ResultCache::new(),
                config,
                stats: Mutex::new(ExecutionStats::default()),
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Adds or replaces a table. Cached results are kept; evict them
    /// explicitly if they were computed from the replaced table.
    pub fn register(&self, table: Table) {
        debug!(table = %table.name, rows = table.frame.num_rows(), "registering table");
        self.inner
            .catalog
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .register(table);
    }

    pub fn table_names(&self) -> Vec<String> {
        self.catalog().names()
    }

    fn catalog(&self) -> std::sync::RwLockReadGuard<'_, Catalog> {
        self.inner.catalog.read().unwrap_or_else(|e| e.into_inner())
    }

    pub fn table(&self, name: &str) -> Result<DataFrame, QueryError> {
        DataFrame::try_new(self.clone(), LogicalPlan::scan(name))
    }

    /// Like [`Session::table`], with columns qualified by `alias`.
    pub fn table_as(&self, name: &str, alias: &str) -> Result<DataFrame, QueryError> {
        let plan = LogicalPlan::Scan {
            table: name.to_string(),
            alias: Some(alias.to_string()),
        };
        DataFrame::try_new(self.clone(), plan)
    }

    /// Parses and resolves a `SELECT` statement.
    pub fn sql(&self, query: &str) -> Result<DataFrame, QueryError> {
        let plan = sql::parse(query)?;
        debug!(plan = %plan, "parsed sql");
        DataFrame::try_new(self.clone(), plan)
    }

    /// All records of `T`'s table.
    pub fn records<T: Record>(&self) -> Result<Records<T>, QueryError> {
        self.records_in(T::TABLE)
    }

    /// All records of `table`, read as `T`.
    pub fn records_in<T: Record>(&self, table: &str) -> Result<Records<T>, QueryError> {
        let table = self.catalog().get(table)?;
        let expected = T::schema().names();
        let found = table.frame.schema.names();
        if expected != found {
            return Err(QueryError::Type(format!(
                "table `{}` has columns [{}], expected [{}]",
                table.name,
                found.join(", "),
                expected.join(", ")
            )));
        }
        let items = table
            .frame
            .rows()
            .map(|row| T::from_row(row))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Records::new(items))
    }

    /// Resolves `plan` into the physical plan that would run it.
    pub fn plan(&self, plan: &LogicalPlan) -> Result<PhysicalPlan, QueryError> {
        let catalog = self.catalog();
        Planner {
            catalog: &catalog,
            cache: &self.inner.cache,
            config: &self.inner.config,
        }
        .plan(plan)
    }

    /// Logical and physical plan of `plan`, as text.
    pub fn explain(&self, plan: &LogicalPlan) -> Result<String, QueryError> {
        let physical = self.plan(plan)?;
        Ok(format!("== Logical Plan ==\n{plan}== Physical Plan ==\n{physical}"))
    }

    pub(crate) fn execute_frame(&self, plan: &LogicalPlan) -> Result<(Arc<Frame>, ExecutionStats), ExecError> {
        let physical = self.plan(plan)?;
        let mut stats = ExecutionStats::default();
        let frame = exec::execute(&physical, &mut stats)?;
        stats.rows_out = frame.num_rows();
        debug!(
            session = %self.inner.id,
            rows = stats.rows_out,
            shuffles = stats.shuffles,
            broadcasts = stats.broadcasts,
            colocated = stats.colocated,
            cache_hits = stats.cache_hits,
            "executed plan"
        );
        self.inner
            .stats
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .merge(&stats);
        // Scans hand back the catalog frame, whose schema is unqualified.
        let frame = if Arc::ptr_eq(&frame.schema, &physical.schema()) {
            frame
        } else {
            Arc::new(Frame::new(physical.schema(), frame.partitions.clone(), frame.partitioning.clone()))
        };
        Ok((frame, stats))
    }

    pub fn execute(&self, plan: &LogicalPlan) -> Result<(ResultSet, ExecutionStats), ExecError> {
        let (frame, stats) = self.execute_frame(plan)?;
        Ok((ResultSet::from_frame(&frame), stats))
    }

    /// Computes `plan` and keeps its result for later plans that contain it.
    pub fn cache_plan(&self, plan: &LogicalPlan) -> Result<(), ExecError> {
        let key = plan.key();
        if self.inner.cache.contains(&key) {
            return Ok(());
        }
        let (frame, _) = self.execute_frame(plan)?;
        self.inner.cache.put(&key, frame);
        info!(session = %self.inner.id, entries = self.inner.cache.len(), "cached result");
        Ok(())
    }

    pub fn is_cached(&self, plan: &LogicalPlan) -> bool {
        self.inner.cache.contains(&plan.key())
    }

    /// Releases the cached result of `plan`. Returns whether there was one.
    pub fn uncache_plan(&self, plan: &LogicalPlan) -> bool {
        self.inner.cache.evict(&plan.key())
    }

    pub fn cache_table(&self, name: &str) -> Result<(), ExecError> {
        self.cache_plan(&LogicalPlan::scan(name))
    }

    pub fn uncache_table(&self, name: &str) -> Result<(), QueryError> {
        if self.uncache_plan(&LogicalPlan::scan(name)) {
            Ok(())
        } else {
            Err(QueryError::NotCached(name.to_string()))
        }
    }

    pub fn cache(&self) -> &ResultCache {
        &self.inner.cache
    }

    pub fn clear_cache(&self) {
        self.inner.cache.clear();
    }

    /// Totals over every plan this session executed.
    pub fn stats(&self) -> ExecutionStats {
        *self.inner.stats.lock().unwrap_or_else(|e| e.into_inner())
    }
}
