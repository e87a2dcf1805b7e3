//! Logical plans shared by the dataframe and SQL front ends.

use std::fmt;

use super::expr::{Expr, NamedExpr};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggFunc {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

impl AggFunc {
    pub fn name(&self) -> &'static str {
        match self {
            AggFunc::Count => "count",
            AggFunc::Sum => "sum",
            AggFunc::Avg => "avg",
            AggFunc::Min => "min",
            AggFunc::Max => "max",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "count" => Some(AggFunc::Count),
            "sum" => Some(AggFunc::Sum),
            "avg" | "mean" => Some(AggFunc::Avg),
            "min" => Some(AggFunc::Min),
            "max" => Some(AggFunc::Max),
            _ => None,
        }
    }
}

/// An aggregate call. `arg == None` is `count(*)`.
#[derive(Debug, Clone, PartialEq)]
pub struct AggExpr {
    pub func: AggFunc,
    pub arg: Option<Expr>,
}

impl AggExpr {
    pub fn alias(self, name: &str) -> NamedAgg {
        NamedAgg {
            agg: self,
            name: name.to_string(),
        }
    }
}

impl fmt::Display for AggExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.arg {
            Some(e) => write!(f, "{}({e})", self.func.name()),
            None => write!(f, "{}(*)", self.func.name()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NamedAgg {
    pub agg: AggExpr,
    pub name: String,
}

impl From<AggExpr> for NamedAgg {
    fn from(agg: AggExpr) -> Self {
        let name = agg.to_string();
        Self { agg, name }
    }
}

pub fn count_star() -> AggExpr {
    AggExpr {
        func: AggFunc::Count,
        arg: None,
    }
}

pub fn count(expr: Expr) -> AggExpr {
    AggExpr {
        func: AggFunc::Count,
        arg: Some(expr),
    }
}

pub fn sum(expr: Expr) -> AggExpr {
    AggExpr {
        func: AggFunc::Sum,
        arg: Some(expr),
    }
}

pub fn avg(expr: Expr) -> AggExpr {
    AggExpr {
        func: AggFunc::Avg,
        arg: Some(expr),
    }
}

pub fn min(expr: Expr) -> AggExpr {
    AggExpr {
        func: AggFunc::Min,
        arg: Some(expr),
    }
}

pub fn max(expr: Expr) -> AggExpr {
    AggExpr {
        func: AggFunc::Max,
        arg: Some(expr),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SortKey {
    pub expr: Expr,
    pub ascending: bool,
}

impl SortKey {
    pub fn asc(expr: Expr) -> Self {
        Self {
            expr,
            ascending: true,
        }
    }

    pub fn desc(expr: Expr) -> Self {
        Self {
            expr,
            ascending: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LogicalPlan {
    Scan {
        table: String,
        alias: Option<String>,
    },
    Filter {
        input: Box<LogicalPlan>,
        predicate: Expr,
    },
    Project {
        input: Box<LogicalPlan>,
        exprs: Vec<NamedExpr>,
    },
    /// Inner equi-join.
    Join {
        left: Box<LogicalPlan>,
        right: Box<LogicalPlan>,
        left_key: Expr,
        right_key: Expr,
    },
    Aggregate {
        input: Box<LogicalPlan>,
        group_by: Vec<NamedExpr>,
        aggregates: Vec<NamedAgg>,
    },
    Sort {
        input: Box<LogicalPlan>,
        keys: Vec<SortKey>,
    },
    Limit {
        input: Box<LogicalPlan>,
        n: usize,
    },
}

impl LogicalPlan {
    pub fn scan(table: &str) -> Self {
        LogicalPlan::Scan {
            table: table.to_string(),
            alias: None,
        }
    }

    /// Canonical text of the plan. Two plans with the same key compute the
    /// same rows; the result cache is keyed on it.
    pub fn key(&self) -> String {
        self.to_string()
    }

    fn fmt_indent(&self, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
        let pad = "  ".repeat(depth);
        match self {
            LogicalPlan::Scan { table, alias } => match alias {
                Some(a) => writeln!(f, "{pad}Scan: {table} AS {a}"),
                None => writeln!(f, "{pad}Scan: {table}"),
            },
            LogicalPlan::Filter { input, predicate } => {
                writeln!(f, "{pad}Filter: {predicate}")?;
                input.fmt_indent(f, depth + 1)
            }
            LogicalPlan::Project { input, exprs } => {
                let list: Vec<String> = exprs.iter().map(|e| format!("{} AS {}", e.expr, e.name)).collect();
                writeln!(f, "{pad}Project: {}", list.join(", "))?;
                input.fmt_indent(f, depth + 1)
            }
            LogicalPlan::Join {
                left,
                right,
                left_key,
                right_key,
            } => {
                writeln!(f, "{pad}Join: {left_key} = {right_key}")?;
                left.fmt_indent(f, depth + 1)?;
                right.fmt_indent(f, depth + 1)
            }
            LogicalPlan::Aggregate {
                input,
                group_by,
                aggregates,
            } => {
                let keys: Vec<String> = group_by.iter().map(|e| format!("{} AS {}", e.expr, e.name)).collect();
                let aggs: Vec<String> = aggregates.iter().map(|a| format!("{} AS {}", a.agg, a.name)).collect();
                writeln!(f, "{pad}Aggregate: by [{}] compute [{}]", keys.join(", "), aggs.join(", "))?;
                input.fmt_indent(f, depth + 1)
            }
            LogicalPlan::Sort { input, keys } => {
                let keys: Vec<String> = keys
                    .iter()
                    .map(|k| format!("{} {}", k.expr, if k.ascending { "ASC" } else { "DESC" }))
                    .collect();
                writeln!(f, "{pad}Sort: {}", keys.join(", "))?;
                input.fmt_indent(f, depth + 1)
            }
            LogicalPlan::Limit { input, n } => {
                writeln!(f, "{pad}Limit: {n}")?;
                input.fmt_indent(f, depth + 1)
            }
        }
    }
}

impl fmt::Display for LogicalPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_indent(f, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::expr::{col, lit};

    #[test]
    fn plan_key_is_structural() {
        let a = LogicalPlan::Filter {
            input: Box::new(LogicalPlan::scan("problems")),
            predicate: col("time_limit").lt(lit(2.0)),
        };
        let b = LogicalPlan::Filter {
            input: Box::new(LogicalPlan::scan("problems")),
            predicate: col("time_limit").lt(lit(2.0)),
        };
        assert_eq!(a.key(), b.key());
        assert_eq!(a.key(), "Filter: (time_limit < 2.0)\n  Scan: problems\n");
    }

    #[test]
    fn aggregate_names_default_to_call_text() {
        let named: NamedAgg = avg(col("cf_rating")).into();
        assert_eq!(named.name, "avg(cf_rating)");
        let named: NamedAgg = count_star().into();
        assert_eq!(named.name, "count(*)");
    }
}
