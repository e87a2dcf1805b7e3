//! Relational front end.
//!
//! A [`DataFrame`] is a logical plan bound to a session. Builder calls are
//! lazy but resolved eagerly, so an unknown column fails at the call that
//! introduced it rather than at `collect`.

use std::fmt;
use std::sync::Arc;

use crate::error::{ExecError, QueryError};

use super::exec::ExecutionStats;
use super::expr::{Expr, NamedExpr};
use super::frame::ResultSet;
use super::plan::{count_star, LogicalPlan, NamedAgg, SortKey};
use super::schema::Schema;
use super::Session;

#[derive(Clone)]
pub struct DataFrame {
    session: Session,
    plan: LogicalPlan,
}

impl DataFrame {
    /// Wraps `plan` after checking every name in it resolves.
    pub(crate) fn try_new(session: Session, plan: LogicalPlan) -> Result<Self, QueryError> {
        session.plan(&plan)?;
        Ok(Self { session, plan })
    }

    fn derive(&self, plan: LogicalPlan) -> Result<Self, QueryError> {
        Self::try_new(self.session.clone(), plan)
    }

    pub fn plan(&self) -> &LogicalPlan {
        &self.plan
    }

    pub fn schema(&self) -> Result<Arc<Schema>, QueryError> {
        Ok(self.session.plan(&self.plan)?.schema())
    }

    pub fn filter(&self, predicate: Expr) -> Result<Self, QueryError> {
        self.derive(LogicalPlan::Filter {
            input: Box::new(self.plan.clone()),
            predicate,
        })
    }

    pub fn select<I, E>(&self, exprs: I) -> Result<Self, QueryError>
    where
        I: IntoIterator<Item = E>,
        E: Into<NamedExpr>,
    {
        self.derive(LogicalPlan::Project {
            input: Box::new(self.plan.clone()),
            exprs: exprs.into_iter().map(Into::into).collect(),
        })
    }

    /// Inner equi-join; `left_on` resolves against `self`, `right_on`
    /// against `right`.
    pub fn join(&self, right: &DataFrame, left_on: Expr, right_on: Expr) -> Result<Self, QueryError> {
        self.derive(LogicalPlan::Join {
            left: Box::new(self.plan.clone()),
            right: Box::new(right.plan.clone()),
            left_key: left_on,
            right_key: right_on,
        })
    }

    pub fn group_by<I, E>(&self, keys: I) -> GroupedData
    where
        I: IntoIterator<Item = E>,
        E: Into<NamedExpr>,
    {
        GroupedData {
            frame: self.clone(),
            keys: keys.into_iter().map(Into::into).collect(),
        }
    }

    /// Whole-frame aggregation without grouping keys.
    pub fn agg<I, A>(&self, aggregates: I) -> Result<Self, QueryError>
    where
        I: IntoIterator<Item = A>,
        A: Into<NamedAgg>,
    {
        self.group_by(Vec::<NamedExpr>::new()).agg(aggregates)
    }

    pub fn sort(&self, keys: Vec<SortKey>) -> Result<Self, QueryError> {
        self.derive(LogicalPlan::Sort {
            input: Box::new(self.plan.clone()),
            keys,
        })
    }

    pub fn limit(&self, n: usize) -> Result<Self, QueryError> {
        self.derive(LogicalPlan::Limit {
            input: Box::new(self.plan.clone()),
            n,
        })
    }

    pub fn collect(&self) -> Result<ResultSet, ExecError> {
        Ok(self.collect_with_stats()?.0)
    }

    pub fn collect_with_stats(&self) -> Result<(ResultSet, ExecutionStats), ExecError> {
        self.session.execute(&self.plan)
    }

    pub fn count(&self) -> Result<usize, ExecError> {
        Ok(self.session.execute_frame(&self.plan)?.0.num_rows())
    }

    /// Materializes this frame into the session cache. Later plans that
    /// contain this one read the cached rows.
    pub fn cache(&self) -> Result<Self, ExecError> {
        self.session.cache_plan(&self.plan)?;
        Ok(self.clone())
    }

    pub fn is_cached(&self) -> bool {
        self.session.is_cached(&self.plan)
    }

    /// Drops the cached result. Returns whether there was one.
    pub fn unpersist(&self) -> bool {
        self.session.uncache_plan(&self.plan)
    }

    pub fn explain(&self) -> Result<String, QueryError> {
        self.session.explain(&self.plan)
    }
}

impl fmt::Debug for DataFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataFrame")
            .field("session", &self.session.id())
            .field("plan", &self.plan.key())
            .finish()
    }
}

/// A frame with grouping keys, waiting for its aggregates.
pub struct GroupedData {
    frame: DataFrame,
    keys: Vec<NamedExpr>,
}

impl GroupedData {
    pub fn agg<I, A>(self, aggregates: I) -> Result<DataFrame, QueryError>
    where
        I: IntoIterator<Item = A>,
        A: Into<NamedAgg>,
    {
        self.frame.derive(LogicalPlan::Aggregate {
            input: Box::new(self.frame.plan.clone()),
            group_by: self.keys,
            aggregates: aggregates.into_iter().map(Into::into).collect(),
        })
    }

    /// Row count per group, in a column named `count`.
    pub fn count(self) -> Result<DataFrame, QueryError> {
        self.agg([count_star().alias("count")])
    }
}
