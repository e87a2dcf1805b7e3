//! The canonical expression tree.
//!
//! Functional filters, dataframe operations and SQL statements all build an
//! [`Expr`]; the engine binds it against a schema into a [`PhysicalExpr`]
//! and evaluates that one representation, so the three styles agree by
//! construction.

use std::cmp::Ordering;
use std::fmt;

use crate::error::{EngineError, ExecError, QueryError};

use super::schema::{DataType, Schema};
use super::value::Value;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ColumnRef {
    pub qualifier: Option<String>,
    pub name: String,
}

impl ColumnRef {
    /// Parses `name` or `qualifier.name`.
    pub fn parse(s: &str) -> Self {
        match s.split_once('.') {
            Some((q, n)) => Self {
                qualifier: Some(q.to_string()),
                name: n.to_string(),
            },
            None => Self {
                qualifier: None,
                name: s.to_string(),
            },
        }
    }
}

impl fmt::Display for ColumnRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.qualifier {
            Some(q) => write!(f, "{q}.{}", self.name),
            None => f.write_str(&self.name),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    And,
    Or,
    Plus,
    Minus,
    Multiply,
    Divide,
}

impl BinaryOp {
    fn symbol(&self) -> &'static str {
        match self {
            BinaryOp::Eq => "=",
            BinaryOp::NotEq => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::LtEq => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::GtEq => ">=",
            BinaryOp::And => "AND",
            BinaryOp::Or => "OR",
            BinaryOp::Plus => "+",
            BinaryOp::Minus => "-",
            BinaryOp::Multiply => "*",
            BinaryOp::Divide => "/",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Column(ColumnRef),
    Literal(Value),
    Binary {
        left: Box<Expr>,
        op: BinaryOp,
        right: Box<Expr>,
    },
    Not(Box<Expr>),
    Negate(Box<Expr>),
    IsNull {
        expr: Box<Expr>,
        negated: bool,
    },
    InList {
        expr: Box<Expr>,
        list: Vec<Expr>,
        negated: bool,
    },
    ArrayContains {
        array: Box<Expr>,
        value: Box<Expr>,
    },
    Case {
        branches: Vec<(Expr, Expr)>,
        otherwise: Option<Box<Expr>>,
    },
}

/// Reference to a column, `qualifier.name` or `name`.
pub fn col(name: &str) -> Expr {
    Expr::Column(ColumnRef::parse(name))
}

pub fn lit(value: impl Into<Value>) -> Expr {
    Expr::Literal(value.into())
}

pub fn array_contains(array: Expr, value: Expr) -> Expr {
    Expr::ArrayContains {
        array: Box::new(array),
        value: Box::new(value),
    }
}

/// Starts a `CASE WHEN` expression.
pub fn when(condition: Expr, then: Expr) -> CaseBuilder {
    CaseBuilder {
        branches: vec![(condition, then)],
    }
}

pub struct CaseBuilder {
    branches: Vec<(Expr, Expr)>,
}

impl CaseBuilder {
    pub fn when(mut self, condition: Expr, then: Expr) -> Self {
        self.branches.push((condition, then));
        self
    }

    pub fn otherwise(self, value: Expr) -> Expr {
        Expr::Case {
            branches: self.branches,
            otherwise: Some(Box::new(value)),
        }
    }

    pub fn end(self) -> Expr {
        Expr::Case {
            branches: self.branches,
            otherwise: None,
        }
    }
}

/// An expression with an output column name.
#[derive(Debug, Clone, PartialEq)]
pub struct NamedExpr {
    pub expr: Expr,
    pub name: String,
}

impl From<Expr> for NamedExpr {
    fn from(expr: Expr) -> Self {
        let name = expr.output_name();
        Self { expr, name }
    }
}

impl From<&str> for NamedExpr {
    fn from(name: &str) -> Self {
        col(name).into()
    }
}

impl Expr {
    fn binary(self, op: BinaryOp, other: Expr) -> Expr {
        Expr::Binary {
            left: Box::new(self),
            op,
            right: Box::new(other),
        }
    }

    pub fn eq(self, other: Expr) -> Expr {
        self.binary(BinaryOp::Eq, other)
    }

    pub fn not_eq(self, other: Expr) -> Expr {
        self.binary(BinaryOp::NotEq, other)
    }

    pub fn lt(self, other: Expr) -> Expr {
        self.binary(BinaryOp::Lt, other)
    }

    pub fn lt_eq(self, other: Expr) -> Expr {
        self.binary(BinaryOp::LtEq, other)
    }

    pub fn gt(self, other: Expr) -> Expr {
        self.binary(BinaryOp::Gt, other)
    }

    pub fn gt_eq(self, other: Expr) -> Expr {
        self.binary(BinaryOp::GtEq, other)
    }

    pub fn and(self, other: Expr) -> Expr {
        self.binary(BinaryOp::And, other)
    }

    pub fn or(self, other: Expr) -> Expr {
        self.binary(BinaryOp::Or, other)
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(self) -> Expr {
        Expr::Not(Box::new(self))
    }

    pub fn is_null(self) -> Expr {
        Expr::IsNull {
            expr: Box::new(self),
            negated: false,
        }
    }

    pub fn is_not_null(self) -> Expr {
        Expr::IsNull {
            expr: Box::new(self),
            negated: true,
        }
    }

    pub fn in_list(self, list: Vec<Expr>) -> Expr {
        Expr::InList {
            expr: Box::new(self),
            list,
            negated: false,
        }
    }

    pub fn alias(self, name: &str) -> NamedExpr {
        NamedExpr {
            expr: self,
            name: name.to_string(),
        }
    }

    /// Name of the column this expression produces when no alias is given.
    pub fn output_name(&self) -> String {
        match self {
            Expr::Column(c) => c.name.clone(),
            other => other.to_string(),
        }
    }

    /// Resolves column references against `schema`.
    pub fn bind(&self, schema: &Schema) -> Result<PhysicalExpr, QueryError> {
        Ok(match self {
            Expr::Column(c) => PhysicalExpr::Column(schema.index_of(c)?, c.to_string()),
            Expr::Literal(v) => PhysicalExpr::Literal(v.clone()),
            Expr::Binary { left, op, right } => PhysicalExpr::Binary {
                left: Box::new(left.bind(schema)?),
                op: *op,
                right: Box::new(right.bind(schema)?),
                text: self.to_string(),
            },
            Expr::Not(e) => PhysicalExpr::Not(Box::new(e.bind(schema)?)),
            Expr::Negate(e) => PhysicalExpr::Negate(Box::new(e.bind(schema)?), self.to_string()),
            Expr::IsNull { expr, negated } => PhysicalExpr::IsNull {
                expr: Box::new(expr.bind(schema)?),
                negated: *negated,
            },
            Expr::InList {
                expr,
                list,
                negated,
            } => PhysicalExpr::InList {
                expr: Box::new(expr.bind(schema)?),
                list: list.iter().map(|e| e.bind(schema)).collect::<Result<_, _>>()?,
                negated: *negated,
            },
            Expr::ArrayContains { array, value } => PhysicalExpr::ArrayContains {
                array: Box::new(array.bind(schema)?),
                value: Box::new(value.bind(schema)?),
            },
            Expr::Case {
                branches,
                otherwise,
            } => PhysicalExpr::Case {
                branches: branches
                    .iter()
                    .map(|(c, v)| Ok((c.bind(schema)?, v.bind(schema)?)))
                    .collect::<Result<_, QueryError>>()?,
                otherwise: match otherwise {
                    Some(e) => Some(Box::new(e.bind(schema)?)),
                    None => None,
                },
            },
        })
    }

    /// Best-effort static type, used for output schemas.
    pub fn data_type(&self, schema: &Schema) -> DataType {
        match self {
            Expr::Column(c) => schema
                .index_of(c)
                .map(|i| schema.field(i).data_type.clone())
                .unwrap_or(DataType::Any),
            Expr::Literal(v) => match v {
                Value::Bool(_) => DataType::Boolean,
                Value::Int(_) => DataType::Int64,
                Value::Float(_) => DataType::Float64,
                Value::Str(_) => DataType::Utf8,
                _ => DataType::Any,
            },
            Expr::Binary { left, op, right } => match op {
                BinaryOp::Divide => DataType::Float64,
                BinaryOp::Plus | BinaryOp::Minus | BinaryOp::Multiply => {
                    match (left.data_type(schema), right.data_type(schema)) {
                        (DataType::Int64, DataType::Int64) => DataType::Int64,
                        _ => DataType::Float64,
                    }
                }
                _ => DataType::Boolean,
            },
            Expr::Negate(e) => e.data_type(schema),
            Expr::Case {
                branches,
                otherwise,
            } => branches
                .first()
                .map(|(_, v)| v.data_type(schema))
                .or_else(|| otherwise.as_ref().map(|e| e.data_type(schema)))
                .unwrap_or(DataType::Any),
            _ => DataType::Boolean,
        }
    }
}

impl std::ops::Add for Expr {
    type Output = Expr;
    fn add(self, rhs: Expr) -> Expr {
        self.binary(BinaryOp::Plus, rhs)
    }
}

impl std::ops::Sub for Expr {
    type Output = Expr;
    fn sub(self, rhs: Expr) -> Expr {
        self.binary(BinaryOp::Minus, rhs)
    }
}

impl std::ops::Mul for Expr {
    type Output = Expr;
    fn mul(self, rhs: Expr) -> Expr {
        self.binary(BinaryOp::Multiply, rhs)
    }
}

impl std::ops::Div for Expr {
    type Output = Expr;
    fn div(self, rhs: Expr) -> Expr {
        self.binary(BinaryOp::Divide, rhs)
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Column(c) => write!(f, "{c}"),
            Expr::Literal(v) => write!(f, "{v}"),
            Expr::Binary { left, op, right } => write!(f, "({left} {} {right})", op.symbol()),
            Expr::Not(e) => write!(f, "(NOT {e})"),
            Expr::Negate(e) => write!(f, "(- {e})"),
            Expr::IsNull { expr, negated } => {
                write!(f, "({expr} IS {}NULL)", if *negated { "NOT " } else { "" })
            }
            Expr::InList {
                expr,
                list,
                negated,
            } => {
                write!(f, "({expr} {}IN (", if *negated { "NOT " } else { "" })?;
                for (i, e) in list.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{e}")?;
                }
                f.write_str("))")
            }
            Expr::ArrayContains { array, value } => write!(f, "array_contains({array}, {value})"),
            Expr::Case {
                branches,
                otherwise,
            } => {
                f.write_str("CASE")?;
                for (c, v) in branches {
                    write!(f, " WHEN {c} THEN {v}")?;
                }
                if let Some(o) = otherwise {
                    write!(f, " ELSE {o}")?;
                }
                f.write_str(" END")
            }
        }
    }
}

/// An [`Expr`] with columns resolved to row positions.
#[derive(Debug, Clone)]
pub enum PhysicalExpr {
    Column(usize, String),
    Literal(Value),
    Binary {
        left: Box<PhysicalExpr>,
        op: BinaryOp,
        right: Box<PhysicalExpr>,
        text: String,
    },
    Not(Box<PhysicalExpr>),
    Negate(Box<PhysicalExpr>, String),
    IsNull {
        expr: Box<PhysicalExpr>,
        negated: bool,
    },
    InList {
        expr: Box<PhysicalExpr>,
        list: Vec<PhysicalExpr>,
        negated: bool,
    },
    ArrayContains {
        array: Box<PhysicalExpr>,
        value: Box<PhysicalExpr>,
    },
    Case {
        branches: Vec<(PhysicalExpr, PhysicalExpr)>,
        otherwise: Option<Box<PhysicalExpr>>,
    },
}

fn type_error(message: String) -> ExecError {
    ExecError::Query(QueryError::Type(message))
}

impl PhysicalExpr {
    pub fn column_index(&self) -> Option<usize> {
        match self {
            PhysicalExpr::Column(i, _) => Some(*i),
            _ => None,
        }
    }

    /// Evaluates a predicate; only `TRUE` keeps the row.
    pub fn matches(&self, row: &[Value]) -> Result<bool, ExecError> {
        match self.eval(row)? {
            Value::Bool(b) => Ok(b),
            Value::Null => Ok(false),
            other => Err(type_error(format!(
                "predicate evaluated to {} instead of boolean",
                other.type_name()
            ))),
        }
    }

    pub fn eval(&self, row: &[Value]) -> Result<Value, ExecError> {
        match self {
            PhysicalExpr::Column(i, _) => Ok(row[*i].clone()),
            PhysicalExpr::Literal(v) => Ok(v.clone()),
            PhysicalExpr::Binary {
                left,
                op,
                right,
                text,
            } => {
                let l = left.eval(row)?;
                // short-circuit like SQL engines do for FALSE AND x / TRUE OR x
                match (op, &l) {
                    (BinaryOp::And, Value::Bool(false)) => return Ok(Value::Bool(false)),
                    (BinaryOp::Or, Value::Bool(true)) => return Ok(Value::Bool(true)),
                    _ => {}
                }
                let r = right.eval(row)?;
                eval_binary(*op, l, r, text)
            }
            PhysicalExpr::Not(e) => match e.eval(row)? {
                Value::Bool(b) => Ok(Value::Bool(!b)),
                Value::Null => Ok(Value::Null),
                other => Err(type_error(format!("NOT applied to {}", other.type_name()))),
            },
            PhysicalExpr::Negate(e, text) => match e.eval(row)? {
                Value::Int(i) => i
                    .checked_neg()
                    .map(Value::Int)
                    .ok_or_else(|| EngineError::Overflow(text.clone()).into()),
                Value::Float(x) => Ok(Value::Float(-x)),
                Value::Null => Ok(Value::Null),
                other => Err(type_error(format!("cannot negate {}", other.type_name()))),
            },
            PhysicalExpr::IsNull { expr, negated } => {
                let is_null = expr.eval(row)?.is_null();
                Ok(Value::Bool(is_null != *negated))
            }
            PhysicalExpr::InList {
                expr,
                list,
                negated,
            } => {
                let v = expr.eval(row)?;
                if v.is_null() {
                    return Ok(Value::Null);
                }
                let mut saw_null = false;
                for item in list {
                    let item = item.eval(row)?;
                    match v.sql_cmp(&item) {
                        Some(Ordering::Equal) => return Ok(Value::Bool(!negated)),
                        None if item.is_null() => saw_null = true,
                        _ => {}
                    }
                }
                if saw_null {
                    Ok(Value::Null)
                } else {
                    Ok(Value::Bool(*negated))
                }
            }
            PhysicalExpr::ArrayContains { array, value } => {
                let needle = value.eval(row)?;
                match array.eval(row)? {
                    Value::Null => Ok(Value::Null),
                    Value::List(items) => {
                        if needle.is_null() {
                            return Ok(Value::Null);
                        }
                        Ok(Value::Bool(items.iter().any(|i| i == &needle)))
                    }
                    other => Err(type_error(format!(
                        "array_contains expects a list, got {}",
                        other.type_name()
                    ))),
                }
            }
            PhysicalExpr::Case {
                branches,
                otherwise,
            } => {
                for (condition, value) in branches {
                    if condition.matches(row)? {
                        return value.eval(row);
                    }
                }
                match otherwise {
                    Some(e) => e.eval(row),
                    None => Ok(Value::Null),
                }
            }
        }
    }
}

fn eval_binary(op: BinaryOp, l: Value, r: Value, text: &str) -> Result<Value, ExecError> {
    match op {
        BinaryOp::And | BinaryOp::Or => {
            let (a, b) = (as_logic(&l, text)?, as_logic(&r, text)?);
            Ok(match (op, a, b) {
                (BinaryOp::And, Some(false), _) | (BinaryOp::And, _, Some(false)) => Value::Bool(false),
                (BinaryOp::And, Some(true), Some(true)) => Value::Bool(true),
                (BinaryOp::Or, Some(true), _) | (BinaryOp::Or, _, Some(true)) => Value::Bool(true),
                (BinaryOp::Or, Some(false), Some(false)) => Value::Bool(false),
                _ => Value::Null,
            })
        }
        BinaryOp::Eq | BinaryOp::NotEq | BinaryOp::Lt | BinaryOp::LtEq | BinaryOp::Gt | BinaryOp::GtEq => {
            if l.is_null() || r.is_null() {
                return Ok(Value::Null);
            }
            let ord = l.sql_cmp(&r).ok_or_else(|| {
                type_error(format!(
                    "cannot compare {} with {} in `{text}`",
                    l.type_name(),
                    r.type_name()
                ))
            })?;
            Ok(Value::Bool(match op {
                BinaryOp::Eq => ord == Ordering::Equal,
                BinaryOp::NotEq => ord != Ordering::Equal,
                BinaryOp::Lt => ord == Ordering::Less,
                BinaryOp::LtEq => ord != Ordering::Greater,
                BinaryOp::Gt => ord == Ordering::Greater,
                _ => ord != Ordering::Less,
            }))
        }
        BinaryOp::Plus | BinaryOp::Minus | BinaryOp::Multiply | BinaryOp::Divide => {
            if l.is_null() || r.is_null() {
                return Ok(Value::Null);
            }
            if let (Value::Int(a), Value::Int(b), false) = (&l, &r, op == BinaryOp::Divide) {
                let out = match op {
                    BinaryOp::Plus => a.checked_add(*b),
                    BinaryOp::Minus => a.checked_sub(*b),
                    _ => a.checked_mul(*b),
                };
                return out
                    .map(Value::Int)
                    .ok_or_else(|| EngineError::Overflow(text.to_string()).into());
            }
            let (a, b) = match (l.as_f64(), r.as_f64()) {
                (Some(a), Some(b)) => (a, b),
                _ => {
                    return Err(type_error(format!(
                        "arithmetic on {} and {} in `{text}`",
                        l.type_name(),
                        r.type_name()
                    )))
                }
            };
            Ok(Value::Float(match op {
                BinaryOp::Plus => a + b,
                BinaryOp::Minus => a - b,
                BinaryOp::Multiply => a * b,
                _ => {
                    if b == 0.0 {
                        return Err(EngineError::DivisionByZero(text.to_string()).into());
                    }
                    a / b
                }
            }))
        }
    }
}

fn as_logic(v: &Value, text: &str) -> Result<Option<bool>, ExecError> {
    match v {
        Value::Bool(b) => Ok(Some(*b)),
        Value::Null => Ok(None),
        other => Err(type_error(format!(
            "boolean operator applied to {} in `{text}`",
            other.type_name()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::schema::Field;

    fn schema() -> Schema {
        Schema::new(vec![
            Field::new("a", DataType::Int64, true),
            Field::new("b", DataType::Float64, true),
            Field::new("tags", DataType::List(Box::new(DataType::Int64)), false),
        ])
    }

    fn eval(expr: Expr, row: &[Value]) -> Result<Value, ExecError> {
        expr.bind(&schema()).unwrap().eval(row)
    }

    #[test]
    fn comparisons_with_null_are_unknown() {
        let row = [Value::Null, Value::Float(1.0), Value::List(vec![])];
        assert_eq!(eval(col("a").lt(lit(3)), &row).unwrap(), Value::Null);
        let bound = col("a").lt(lit(3)).bind(&schema()).unwrap();
        assert!(!bound.matches(&row).unwrap());
        let bound = col("a").lt(lit(3)).not().bind(&schema()).unwrap();
        assert!(!bound.matches(&row).unwrap());
    }

    #[test]
    fn three_valued_and_or() {
        let row = [Value::Null, Value::Float(1.0), Value::List(vec![])];
        let unknown = col("a").eq(lit(1));
        assert_eq!(
            eval(unknown.clone().and(lit(false)), &row).unwrap(),
            Value::Bool(false)
        );
        assert_eq!(eval(unknown.clone().or(lit(true)), &row).unwrap(), Value::Bool(true));
        assert_eq!(eval(unknown.and(lit(true)), &row).unwrap(), Value::Null);
    }

    #[test]
    fn arithmetic_promotes_and_checks() {
        let row = [Value::Int(i64::MAX), Value::Float(0.0), Value::List(vec![])];
        assert_eq!(
            eval(col("a") + lit(1), &row),
            Err(ExecError::Engine(EngineError::Overflow("(a + 1)".into())))
        );
        assert!(matches!(
            eval(lit(1) / col("b"), &row),
            Err(ExecError::Engine(EngineError::DivisionByZero(_)))
        ));
        let row = [Value::Int(3), Value::Float(0.5), Value::List(vec![])];
        assert_eq!(eval(col("a") * col("b"), &row).unwrap(), Value::Float(1.5));
        assert_eq!(eval(col("a") / lit(2), &row).unwrap(), Value::Float(1.5));
    }

    #[test]
    fn in_list_and_array_contains() {
        let row = [Value::Int(2), Value::Null, Value::from(vec![1, 5])];
        assert_eq!(
            eval(col("a").in_list(vec![lit(1), lit(2)]), &row).unwrap(),
            Value::Bool(true)
        );
        assert_eq!(
            eval(col("a").in_list(vec![lit(1), col("b")]), &row).unwrap(),
            Value::Null
        );
        assert_eq!(
            eval(array_contains(col("tags"), lit(5)), &row).unwrap(),
            Value::Bool(true)
        );
        assert!(matches!(
            eval(array_contains(col("a"), lit(5)), &row),
            Err(ExecError::Query(QueryError::Type(_)))
        ));
    }

    #[test]
    fn case_picks_first_true_branch() {
        let expr = when(col("a").lt(lit(7)), lit("Easy"))
            .when(col("a").gt_eq(lit(11)), lit("Hard"))
            .otherwise(lit("Medium"));
        let band = |a: Value| eval(expr.clone(), &[a, Value::Null, Value::List(vec![])]).unwrap();
        assert_eq!(band(Value::Int(3)), Value::from("Easy"));
        assert_eq!(band(Value::Int(9)), Value::from("Medium"));
        assert_eq!(band(Value::Int(12)), Value::from("Hard"));
        assert_eq!(
            expr.to_string(),
            "CASE WHEN (a < 7) THEN 'Easy' WHEN (a >= 11) THEN 'Hard' ELSE 'Medium' END"
        );
    }

    #[test]
    fn binding_reports_unknown_columns() {
        assert!(matches!(
            col("rating").gt(lit(1)).bind(&schema()),
            Err(QueryError::UnknownColumn { .. })
        ));
    }
}
