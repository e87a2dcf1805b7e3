//! Physical planning and partition-parallel execution.
//!
//! Rows live in partitions; each operator runs one task per partition on
//! the worker pool. Grouping or joining on a key the input is already
//! hash-bucketed on runs bucket by bucket. Any other keyed operator first
//! exchanges rows into `ihash(key) % n` partitions (a shuffle).

use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use itertools::Itertools;
use rayon::prelude::*;
use serde::Serialize;
use tracing::debug;

use crate::config::EngineConfig;
use crate::error::{EngineError, ExecError, QueryError};
use crate::ihash;

use super::cache::ResultCache;
use super::catalog::Catalog;
use super::expr::{Expr, PhysicalExpr};
use super::frame::{bucket_of, Frame, Partitioning, Row};
use super::plan::{AggFunc, LogicalPlan};
use super::schema::{DataType, Field, Schema};
use super::value::Value;

/// What an execution did, so plan choices can be checked by callers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ExecutionStats {
    /// Hash exchanges of a whole input.
    pub shuffles: usize,
    /// Joins that copied one side to every partition of the other.
    pub broadcasts: usize,
    /// Joins and aggregations that ran bucket by bucket without an exchange.
    pub colocated: usize,
    /// Sub-plans answered from the result cache.
    pub cache_hits: usize,
    pub rows_out: usize,
}

impl ExecutionStats {
    pub fn merge(&mut self, other: &ExecutionStats) {
        self.shuffles += other.shuffles;
        self.broadcasts += other.broadcasts;
        self.colocated += other.colocated;
        self.cache_hits += other.cache_hits;
        self.rows_out += other.rows_out;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinStrategy {
    /// Both sides bucketed on their join keys with equal bucket counts.
    CoLocated,
    /// Left side is copied to every partition of the right side.
    BroadcastLeft,
    /// Right side is copied to every partition of the left side.
    BroadcastRight,
    Shuffle { partitions: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateMode {
    /// Input already bucketed on a grouping key.
    PerBucket,
    Shuffle { partitions: usize },
    /// No grouping keys, everything folds into one row.
    Gather,
}

#[derive(Debug, Clone)]
pub struct PhysicalAgg {
    pub func: AggFunc,
    pub arg: Option<PhysicalExpr>,
    pub text: String,
}

#[derive(Debug, Clone)]
pub enum PhysicalPlan {
    Scan {
        table: String,
        frame: Arc<Frame>,
        schema: Arc<Schema>,
    },
    Cached {
        frame: Arc<Frame>,
    },
    Filter {
        input: Box<PhysicalPlan>,
        predicate: PhysicalExpr,
        text: String,
    },
    Project {
        input: Box<PhysicalPlan>,
        exprs: Vec<PhysicalExpr>,
        schema: Arc<Schema>,
        partitioning: Partitioning,
    },
    Join {
        left: Box<PhysicalPlan>,
        right: Box<PhysicalPlan>,
        left_key: PhysicalExpr,
        right_key: PhysicalExpr,
        strategy: JoinStrategy,
        schema: Arc<Schema>,
        text: String,
    },
    Aggregate {
        input: Box<PhysicalPlan>,
        group_by: Vec<PhysicalExpr>,
        aggregates: Vec<PhysicalAgg>,
        mode: AggregateMode,
        schema: Arc<Schema>,
    },
    Sort {
        input: Box<PhysicalPlan>,
        keys: Vec<(PhysicalExpr, bool)>,
    },
    Limit {
        input: Box<PhysicalPlan>,
        n: usize,
    },
}

impl PhysicalPlan {
    pub fn schema(&self) -> Arc<Schema> {
        match self {
            PhysicalPlan::Scan { schema, .. }
            | PhysicalPlan::Project { schema, .. }
            | PhysicalPlan::Join { schema, .. }
            | PhysicalPlan::Aggregate { schema, .. } => schema.clone(),
            PhysicalPlan::Cached { frame } => frame.schema.clone(),
            PhysicalPlan::Filter { input, .. }
            | PhysicalPlan::Sort { input, .. }
            | PhysicalPlan::Limit { input, .. } => input.schema(),
        }
    }

    pub fn partitioning(&self) -> Partitioning {
        match self {
            PhysicalPlan::Scan { frame, .. } | PhysicalPlan::Cached { frame } => frame.partitioning.clone(),
            PhysicalPlan::Filter { input, .. } => input.partitioning(),
            PhysicalPlan::Project { partitioning, .. } => partitioning.clone(),
            PhysicalPlan::Join {
                left,
                right,
                left_key,
                strategy,
                ..
            } => match strategy {
                JoinStrategy::CoLocated | JoinStrategy::BroadcastRight => left.partitioning(),
                JoinStrategy::BroadcastLeft => match right.partitioning() {
                    Partitioning::Hash { column, num } => Partitioning::Hash {
                        column: column + left.schema().len(),
                        num,
                    },
                    Partitioning::Unknown => Partitioning::Unknown,
                },
                JoinStrategy::Shuffle { partitions } => match left_key.column_index() {
                    Some(column) => Partitioning::Hash {
                        column,
                        num: *partitions,
                    },
                    None => Partitioning::Unknown,
                },
            },
            PhysicalPlan::Aggregate {
                input,
                group_by,
                mode,
                ..
            } => match mode {
                AggregateMode::PerBucket => {
                    let bucketed = input.partitioning().hash_column();
                    bucketed
                        .and_then(|(column, num)| {
                            group_by
                                .iter()
                                .position(|g| g.column_index() == Some(column))
                                .map(|pos| Partitioning::Hash { column: pos, num })
                        })
                        .unwrap_or(Partitioning::Unknown)
                }
                AggregateMode::Shuffle { partitions } if group_by.len() == 1 => Partitioning::Hash {
                    column: 0,
                    num: *partitions,
                },
                _ => Partitioning::Unknown,
            },
            PhysicalPlan::Sort { .. } | PhysicalPlan::Limit { .. } => Partitioning::Unknown,
        }
    }

    /// Upper bound on the rows this plan produces, when known up front.
    fn estimated_rows(&self) -> Option<usize> {
        match self {
            PhysicalPlan::Scan { frame, .. } | PhysicalPlan::Cached { frame } => Some(frame.num_rows()),
            PhysicalPlan::Filter { input, .. }
            | PhysicalPlan::Project { input, .. }
            | PhysicalPlan::Aggregate { input, .. }
            | PhysicalPlan::Sort { input, .. } => input.estimated_rows(),
            PhysicalPlan::Limit { input, n } => Some(input.estimated_rows().map_or(*n, |r| r.min(*n))),
            PhysicalPlan::Join { .. } => None,
        }
    }

    /// Whether executing this plan exchanges rows between partitions.
    pub fn requires_shuffle(&self) -> bool {
        match self {
            PhysicalPlan::Scan { .. } | PhysicalPlan::Cached { .. } => false,
            PhysicalPlan::Filter { input, .. }
            | PhysicalPlan::Project { input, .. }
            | PhysicalPlan::Sort { input, .. }
            | PhysicalPlan::Limit { input, .. } => input.requires_shuffle(),
            PhysicalPlan::Join {
                left,
                right,
                strategy,
                ..
            } => {
                matches!(strategy, JoinStrategy::Shuffle { .. })
                    || left.requires_shuffle()
                    || right.requires_shuffle()
            }
            PhysicalPlan::Aggregate { input, mode, .. } => {
                matches!(mode, AggregateMode::Shuffle { .. }) || input.requires_shuffle()
            }
        }
    }

    fn fmt_indent(&self, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
        let pad = "  ".repeat(depth);
        let describe = |p: &Partitioning| match p {
            Partitioning::Hash { num, .. } => format!("hash x{num}"),
            Partitioning::Unknown => "unpartitioned".to_string(),
        };
        match self {
            PhysicalPlan::Scan { table, frame, .. } => writeln!(
                f,
                "{pad}Scan {table} [{} partitions, {}]",
                frame.partitions.len(),
                describe(&frame.partitioning)
            ),
            PhysicalPlan::Cached { frame } => {
                writeln!(f, "{pad}CachedResult [{} rows]", frame.num_rows())
            }
            PhysicalPlan::Filter { input, text, .. } => {
                writeln!(f, "{pad}Filter {text}")?;
                input.fmt_indent(f, depth + 1)
            }
            PhysicalPlan::Project { input, schema, .. } => {
                writeln!(f, "{pad}Project [{}]", schema.names().join(", "))?;
                input.fmt_indent(f, depth + 1)
            }
            PhysicalPlan::Join {
                left,
                right,
                strategy,
                text,
                ..
            } => {
                let how = match strategy {
                    JoinStrategy::CoLocated => "co-located".to_string(),
                    JoinStrategy::BroadcastLeft => "broadcast left".to_string(),
                    JoinStrategy::BroadcastRight => "broadcast right".to_string(),
                    JoinStrategy::Shuffle { partitions } => format!("shuffle x{partitions}"),
                };
                writeln!(f, "{pad}HashJoin [{how}] {text}")?;
                left.fmt_indent(f, depth + 1)?;
                right.fmt_indent(f, depth + 1)
            }
            PhysicalPlan::Aggregate {
                input,
                mode,
                schema,
                ..
            } => {
                let how = match mode {
                    AggregateMode::PerBucket => "per-bucket".to_string(),
                    AggregateMode::Shuffle { partitions } => format!("shuffle x{partitions}"),
                    AggregateMode::Gather => "gather".to_string(),
                };
                writeln!(f, "{pad}HashAggregate [{how}] -> [{}]", schema.names().join(", "))?;
                input.fmt_indent(f, depth + 1)
            }
            PhysicalPlan::Sort { input, keys } => {
                writeln!(f, "{pad}Sort [{} keys]", keys.len())?;
                input.fmt_indent(f, depth + 1)
            }
            PhysicalPlan::Limit { input, n } => {
                writeln!(f, "{pad}Limit {n}")?;
                input.fmt_indent(f, depth + 1)
            }
        }
    }
}

impl fmt::Display for PhysicalPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_indent(f, 0)
    }
}

/// Turns a logical plan into a physical one, resolving every name.
/// Sub-plans with a cached result are replaced by the cached frame.
pub struct Planner<'a> {
    pub catalog: &'a Catalog,
    pub cache: &'a ResultCache,
    pub config: &'a EngineConfig,
}

impl<'a> Planner<'a> {
    pub fn plan(&self, plan: &LogicalPlan) -> Result<PhysicalPlan, QueryError> {
        if let Some(frame) = self.cache.get(&plan.key()) {
            return Ok(PhysicalPlan::Cached { frame });
        }
        Ok(match plan {
            LogicalPlan::Scan { table, alias } => {
                let t = self.catalog.get(table)?;
                let schema = Arc::new(t.frame.schema.qualified(alias.as_deref().unwrap_or(table)));
                PhysicalPlan::Scan {
                    table: table.clone(),
                    frame: t.frame.clone(),
                    schema,
                }
            }
            LogicalPlan::Filter { input, predicate } => {
                let input = self.plan(input)?;
                let bound = predicate.bind(&input.schema())?;
                PhysicalPlan::Filter {
                    input: Box::new(input),
                    predicate: bound,
                    text: predicate.to_string(),
                }
            }
            LogicalPlan::Project { input, exprs } => {
                let input = self.plan(input)?;
                let in_schema = input.schema();
                let mut fields = Vec::with_capacity(exprs.len());
                let mut bound = Vec::with_capacity(exprs.len());
                for named in exprs {
                    let b = named.expr.bind(&in_schema)?;
                    let mut field = Field::new(&named.name, named.expr.data_type(&in_schema), true);
                    if let (Some(i), Expr::Column(c)) = (b.column_index(), &named.expr) {
                        if c.name == named.name {
                            field = in_schema.field(i).clone();
                        }
                    }
                    fields.push(field);
                    bound.push(b);
                }
                let partitioning = match input.partitioning() {
                    Partitioning::Hash { column, num } => bound
                        .iter()
                        .position(|b| b.column_index() == Some(column))
                        .map(|pos| Partitioning::Hash { column: pos, num })
                        .unwrap_or(Partitioning::Unknown),
                    Partitioning::Unknown => Partitioning::Unknown,
                };
                PhysicalPlan::Project {
                    input: Box::new(input),
                    exprs: bound,
                    schema: Arc::new(Schema::new(fields)),
                    partitioning,
                }
            }
            LogicalPlan::Join {
                left,
                right,
                left_key,
                right_key,
            } => {
                let left = self.plan(left)?;
                let right = self.plan(right)?;
                let lk = left_key.bind(&left.schema())?;
                let rk = right_key.bind(&right.schema())?;
                let strategy = self.join_strategy(&left, &right, &lk, &rk);
                let schema = Arc::new(left.schema().join(&right.schema()));
                PhysicalPlan::Join {
                    left: Box::new(left),
                    right: Box::new(right),
                    left_key: lk,
                    right_key: rk,
                    strategy,
                    schema,
                    text: format!("{left_key} = {right_key}"),
                }
            }
            LogicalPlan::Aggregate {
                input,
                group_by,
                aggregates,
            } => {
                let input = self.plan(input)?;
                let in_schema = input.schema();
                let mut fields = Vec::new();
                let mut keys = Vec::new();
                for g in group_by {
                    let b = g.expr.bind(&in_schema)?;
                    fields.push(Field::new(&g.name, g.expr.data_type(&in_schema), true));
                    keys.push(b);
                }
                let mut aggs = Vec::new();
                for a in aggregates {
                    let arg = match &a.agg.arg {
                        Some(e) => Some(e.bind(&in_schema)?),
                        None => None,
                    };
                    let data_type = match (a.agg.func, &a.agg.arg) {
                        (AggFunc::Count, _) => DataType::Int64,
                        (AggFunc::Avg, _) => DataType::Float64,
                        (_, Some(e)) => e.data_type(&in_schema),
                        (_, None) => DataType::Any,
                    };
                    fields.push(Field::new(&a.name, data_type, a.agg.func != AggFunc::Count));
                    aggs.push(PhysicalAgg {
                        func: a.agg.func,
                        arg,
                        text: a.agg.to_string(),
                    });
                }
                let mode = if keys.is_empty() {
                    AggregateMode::Gather
                } else {
                    match input.partitioning().hash_column() {
                        Some((column, _)) if keys.iter().any(|k| k.column_index() == Some(column)) => {
                            AggregateMode::PerBucket
                        }
                        _ => AggregateMode::Shuffle {
                            partitions: self.config.shuffle_partitions.max(1),
                        },
                    }
                };
                PhysicalPlan::Aggregate {
                    input: Box::new(input),
                    group_by: keys,
                    aggregates: aggs,
                    mode,
                    schema: Arc::new(Schema::new(fields)),
                }
            }
            LogicalPlan::Sort { input, keys } => {
                let input = self.plan(input)?;
                let schema = input.schema();
                let keys = keys
                    .iter()
                    .map(|k| Ok((k.expr.bind(&schema)?, k.ascending)))
                    .collect::<Result<_, QueryError>>()?;
                PhysicalPlan::Sort {
                    input: Box::new(input),
                    keys,
                }
            }
            LogicalPlan::Limit { input, n } => PhysicalPlan::Limit {
                input: Box::new(self.plan(input)?),
                n: *n,
            },
        })
    }

    fn join_strategy(
        &self,
        left: &PhysicalPlan,
        right: &PhysicalPlan,
        lk: &PhysicalExpr,
        rk: &PhysicalExpr,
    ) -> JoinStrategy {
        if let (Some((lc, ln)), Some((rc, rn))) =
            (left.partitioning().hash_column(), right.partitioning().hash_column())
        {
            if ln == rn && lk.column_index() == Some(lc) && rk.column_index() == Some(rc) {
                return JoinStrategy::CoLocated;
            }
        }
        let threshold = self.config.broadcast_threshold;
        match (left.estimated_rows(), right.estimated_rows()) {
            (_, Some(r)) if r <= threshold => JoinStrategy::BroadcastRight,
            (Some(l), _) if l <= threshold => JoinStrategy::BroadcastLeft,
            _ => JoinStrategy::Shuffle {
                partitions: self.config.shuffle_partitions.max(1),
            },
        }
    }
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

/// Runs one task per partition on the worker pool. A panicking task is
/// reported as an [`EngineError::WorkerPanic`].
fn par_partitions<T, F>(partitions: &[Vec<Row>], task: F) -> Result<Vec<T>, ExecError>
where
    T: Send,
    F: Fn(&[Row]) -> Result<T, ExecError> + Sync + Send,
{
    partitions
        .par_iter()
        .enumerate()
        .map(|(i, rows)| match catch_unwind(AssertUnwindSafe(|| task(rows))) {
            Ok(result) => result,
            Err(panic) => Err(EngineError::WorkerPanic {
                partition: i,
                message: panic_message(panic),
            }
            .into()),
        })
        .collect()
}

/// Like [`par_partitions`] over partition `i` of both inputs at once.
fn par_partition_pairs<T, F>(left: &[Vec<Row>], right: &[Vec<Row>], task: F) -> Result<Vec<T>, ExecError>
where
    T: Send,
    F: Fn(&[Row], &[Row]) -> Result<T, ExecError> + Sync + Send,
{
    left.par_iter()
        .zip(right.par_iter())
        .enumerate()
        .map(|(i, (l, r))| match catch_unwind(AssertUnwindSafe(|| task(l, r))) {
            Ok(result) => result,
            Err(panic) => Err(EngineError::WorkerPanic {
                partition: i,
                message: panic_message(panic),
            }
            .into()),
        })
        .collect()
}

fn key_of(row: &[Value], keys: &[PhysicalExpr]) -> Result<(Vec<u8>, Vec<Value>), ExecError> {
    let mut bytes = Vec::new();
    let mut values = Vec::with_capacity(keys.len());
    for k in keys {
        let v = k.eval(row)?;
        bytes.extend(v.key_bytes());
        values.push(v);
    }
    Ok((bytes, values))
}

/// Exchanges rows into `num` partitions by the hash of `keys`.
fn shuffle(partitions: &[Vec<Row>], keys: &[PhysicalExpr], num: usize) -> Result<Vec<Vec<Row>>, ExecError> {
    let local: Vec<Vec<Vec<Row>>> = par_partitions(partitions, |rows| {
        let mut buckets: Vec<Vec<Row>> = vec![Vec::new(); num];
        for row in rows {
            let (bytes, values) = key_of(row, keys)?;
            let b = if values.len() == 1 {
                bucket_of(&values[0], num)
            } else {
                ihash(&bytes) as usize % num
            };
            buckets[b].push(row.clone());
        }
        Ok(buckets)
    })?;
    let mut out: Vec<Vec<Row>> = vec![Vec::new(); num];
    for buckets in local {
        for (b, rows) in buckets.into_iter().enumerate() {
            out[b].extend(rows);
        }
    }
    Ok(out)
}

/// Inner hash join of `probe` against `build`, emitting left columns first.
fn hash_join(
    build: &[Row],
    build_key: &PhysicalExpr,
    probe: &[Row],
    probe_key: &PhysicalExpr,
    build_is_left: bool,
) -> Result<Vec<Row>, ExecError> {
    let mut table: HashMap<Vec<u8>, Vec<usize>> = HashMap::new();
    for (i, row) in build.iter().enumerate() {
        let key = build_key.eval(row)?;
        if key.is_null() {
            continue;
        }
        table.entry(key.key_bytes()).or_default().push(i);
    }
    let mut out = Vec::new();
    for row in probe {
        let key = probe_key.eval(row)?;
        if key.is_null() {
            continue;
        }
        if let Some(matches) = table.get(&key.key_bytes()) {
            for &i in matches {
                let (l, r) = if build_is_left {
                    (&build[i], row)
                } else {
                    (row, &build[i])
                };
                let mut joined = Vec::with_capacity(l.len() + r.len());
                joined.extend(l.iter().cloned());
                joined.extend(r.iter().cloned());
                out.push(joined);
            }
        }
    }
    Ok(out)
}

enum Accumulator {
    Count(i64),
    Sum(Option<Value>),
    Avg { sum: f64, n: i64 },
    Min(Option<Value>),
    Max(Option<Value>),
}

impl Accumulator {
    fn new(func: AggFunc) -> Self {
        match func {
            AggFunc::Count => Accumulator::Count(0),
            AggFunc::Sum => Accumulator::Sum(None),
            AggFunc::Avg => Accumulator::Avg { sum: 0.0, n: 0 },
            AggFunc::Min => Accumulator::Min(None),
            AggFunc::Max => Accumulator::Max(None),
        }
    }

    fn update(&mut self, v: Value, text: &str) -> Result<(), ExecError> {
        let type_error = |v: &Value| {
            ExecError::Query(QueryError::Type(format!("`{text}` over {} value", v.type_name())))
        };
        match self {
            Accumulator::Count(n) => {
                if !v.is_null() {
                    *n += 1;
                }
            }
            _ if v.is_null() => {}
            Accumulator::Sum(acc) => {
                let next = match acc.take() {
                    None if v.as_f64().is_some() => v,
                    None => return Err(type_error(&v)),
                    Some(Value::Int(a)) if v.as_i64().is_some() => {
                        let b = v.as_i64().unwrap_or_default();
                        Value::Int(
                            a.checked_add(b)
                                .ok_or_else(|| ExecError::from(EngineError::Overflow(text.to_string())))?,
                        )
                    }
                    Some(a) => match (a.as_f64(), v.as_f64()) {
                        (Some(x), Some(y)) => Value::Float(x + y),
                        _ => return Err(type_error(&v)),
                    },
                };
                *acc = Some(next);
            }
            Accumulator::Avg { sum, n } => {
                *sum += v.as_f64().ok_or_else(|| type_error(&v))?;
                *n += 1;
            }
            Accumulator::Min(acc) => keep_extreme(acc, v, std::cmp::Ordering::Less).map_err(|v| type_error(&v))?,
            Accumulator::Max(acc) => keep_extreme(acc, v, std::cmp::Ordering::Greater).map_err(|v| type_error(&v))?,
        }
        Ok(())
    }

    fn finish(self) -> Value {
        match self {
            Accumulator::Count(n) => Value::Int(n),
            Accumulator::Sum(v) | Accumulator::Min(v) | Accumulator::Max(v) => v.unwrap_or(Value::Null),
            Accumulator::Avg { sum, n } => {
                if n == 0 {
                    Value::Null
                } else {
                    Value::Float(sum / n as f64)
                }
            }
        }
    }
}

/// Replaces `acc` with `v` when `v` compares as `want` against it.
/// Returns the offending value when the two are not comparable.
fn keep_extreme(acc: &mut Option<Value>, v: Value, want: std::cmp::Ordering) -> Result<(), Value> {
    let replace = match acc {
        None => true,
        Some(cur) => match v.sql_cmp(cur) {
            Some(o) => o == want,
            None => return Err(v),
        },
    };
    if replace {
        *acc = Some(v);
    }
    Ok(())
}

fn fold_group<'r>(
    rows: impl Iterator<Item = &'r Row>,
    aggregates: &[PhysicalAgg],
) -> Result<Vec<Value>, ExecError> {
    let mut accs: Vec<Accumulator> = aggregates.iter().map(|a| Accumulator::new(a.func)).collect();
    for row in rows {
        for (acc, agg) in accs.iter_mut().zip(aggregates) {
            let v = match &agg.arg {
                Some(e) => e.eval(row)?,
                // count(*) counts rows
                None => Value::Bool(true),
            };
            acc.update(v, &agg.text)?;
        }
    }
    Ok(accs.into_iter().map(Accumulator::finish).collect())
}

/// Groups one partition: sort by key, then fold each run of equal keys.
fn aggregate_partition(
    rows: &[Row],
    group_by: &[PhysicalExpr],
    aggregates: &[PhysicalAgg],
) -> Result<Vec<Row>, ExecError> {
    let mut keyed = rows
        .iter()
        .map(|row| key_of(row, group_by).map(|(bytes, values)| (bytes, values, row)))
        .collect::<Result<Vec<_>, _>>()?;
    keyed.sort_by(|a, b| a.0.cmp(&b.0));

    let mut out = Vec::new();
    for (_, group) in &keyed.into_iter().chunk_by(|(bytes, _, _)| bytes.clone()) {
        let group: Vec<_> = group.collect();
        let mut row = group[0].1.clone();
        row.extend(fold_group(group.iter().map(|(_, _, r)| *r), aggregates)?);
        out.push(row);
    }
    Ok(out)
}

/// Executes `plan`, recording what it did in `stats`.
pub fn execute(plan: &PhysicalPlan, stats: &mut ExecutionStats) -> Result<Arc<Frame>, ExecError> {
    let frame = match plan {
        PhysicalPlan::Scan { frame, table, .. } => {
            debug!(table = %table, partitions = frame.partitions.len(), "scan");
            frame.clone()
        }
        PhysicalPlan::Cached { frame } => {
            stats.cache_hits += 1;
            frame.clone()
        }
        PhysicalPlan::Filter { input, predicate, .. } => {
            let input_frame = execute(input, stats)?;
            let partitions = par_partitions(&input_frame.partitions, |rows| {
                let mut kept = Vec::new();
                for row in rows {
                    if predicate.matches(row)? {
                        kept.push(row.clone());
                    }
                }
                Ok(kept)
            })?;
            Arc::new(Frame::new(input.schema(), partitions, input_frame.partitioning.clone()))
        }
        PhysicalPlan::Project {
            input,
            exprs,
            schema,
            partitioning,
        } => {
            let input_frame = execute(input, stats)?;
            let partitions = par_partitions(&input_frame.partitions, |rows| {
                rows.iter()
                    .map(|row| exprs.iter().map(|e| e.eval(row)).collect::<Result<Row, _>>())
                    .collect::<Result<Vec<_>, _>>()
            })?;
            Arc::new(Frame::new(schema.clone(), partitions, partitioning.clone()))
        }
        PhysicalPlan::Join {
            left,
            right,
            left_key,
            right_key,
            strategy,
            schema,
            ..
        } => {
            let l = execute(left, stats)?;
            let r = execute(right, stats)?;
            let partitions = match strategy {
                JoinStrategy::CoLocated => {
                    stats.colocated += 1;
                    par_partition_pairs(&l.partitions, &r.partitions, |lrows, rrows| {
                        hash_join(rrows, right_key, lrows, left_key, false)
                    })?
                }
                JoinStrategy::BroadcastRight => {
                    stats.broadcasts += 1;
                    let build: Vec<Row> = r.rows().cloned().collect();
                    par_partitions(&l.partitions, |rows| hash_join(&build, right_key, rows, left_key, false))?
                }
                JoinStrategy::BroadcastLeft => {
                    stats.broadcasts += 1;
                    let build: Vec<Row> = l.rows().cloned().collect();
                    par_partitions(&r.partitions, |rows| hash_join(&build, left_key, rows, right_key, true))?
                }
                JoinStrategy::Shuffle { partitions } => {
                    stats.shuffles += 2;
                    let lp = shuffle(&l.partitions, std::slice::from_ref(left_key), *partitions)?;
                    let rp = shuffle(&r.partitions, std::slice::from_ref(right_key), *partitions)?;
                    par_partition_pairs(&lp, &rp, |lrows, rrows| {
                        hash_join(rrows, right_key, lrows, left_key, false)
                    })?
                }
            };
            Arc::new(Frame::new(schema.clone(), partitions, plan.partitioning()))
        }
        PhysicalPlan::Aggregate {
            input,
            group_by,
            aggregates,
            mode,
            schema,
        } => {
            let input_frame = execute(input, stats)?;
            let partitions = match mode {
                AggregateMode::Gather => {
                    let row = fold_group(input_frame.rows(), aggregates)?;
                    vec![vec![row]]
                }
                AggregateMode::PerBucket => {
                    stats.colocated += 1;
                    par_partitions(&input_frame.partitions, |rows| {
                        aggregate_partition(rows, group_by, aggregates)
                    })?
                }
                AggregateMode::Shuffle { partitions } => {
                    stats.shuffles += 1;
                    let exchanged = shuffle(&input_frame.partitions, group_by, *partitions)?;
                    par_partitions(&exchanged, |rows| aggregate_partition(rows, group_by, aggregates))?
                }
            };
            Arc::new(Frame::new(schema.clone(), partitions, plan.partitioning()))
        }
        PhysicalPlan::Sort { input, keys } => {
            let input_frame = execute(input, stats)?;
            let mut keyed = input_frame
                .rows()
                .map(|row| {
                    keys.iter()
                        .map(|(k, _)| k.eval(row))
                        .collect::<Result<Vec<_>, _>>()
                        .map(|k| (k, row.clone()))
                })
                .collect::<Result<Vec<_>, ExecError>>()?;
            keyed.sort_by(|(a, _), (b, _)| {
                a.iter()
                    .zip(b)
                    .zip(keys)
                    .map(|((x, y), (_, asc))| if *asc { x.total_cmp(y) } else { y.total_cmp(x) })
                    .find(|o| o.is_ne())
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
            let rows = keyed.into_iter().map(|(_, row)| row).collect();
            Arc::new(Frame::single(input.schema(), rows))
        }
        PhysicalPlan::Limit { input, n } => {
            let input_frame = execute(input, stats)?;
            let rows = input_frame.rows().take(*n).cloned().collect();
            Arc::new(Frame::single(input.schema(), rows))
        }
    };
    Ok(frame)
}
