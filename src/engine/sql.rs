//! Declarative front end.
//!
//! Supports the `SELECT` subset the analytics need:
//!
//! ```text
//! SELECT [DISTINCT] items FROM table [AS a]
//!   [[INNER] JOIN table [AS b] ON a.x = b.y]...
//!   [WHERE expr] [GROUP BY exprs] [ORDER BY keys] [LIMIT n]
//! ```
//!
//! Statements are lowered to the same [`LogicalPlan`] the dataframe API
//! builds.

use crate::error::QueryError;

use super::expr::{ColumnRef, Expr, NamedExpr};
use super::plan::{AggExpr, AggFunc, LogicalPlan, NamedAgg, SortKey};
use super::value::Value;

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    /// `"quoted"` or `` `quoted` `` identifier, never a keyword.
    Quoted(String),
    Number(String),
    Str(String),
    Symbol(&'static str),
    Eof,
}

const SYMBOLS: [&str; 15] = [
    "<=", ">=", "<>", "!=", "=", "<", ">", "(", ")", ",", ".", "*", "+", "-", "/",
];

const RESERVED: [&str; 24] = [
    "SELECT", "DISTINCT", "FROM", "WHERE", "GROUP", "BY", "ORDER", "LIMIT", "JOIN", "INNER", "ON",
    "AS", "AND", "OR", "NOT", "IS", "NULL", "IN", "BETWEEN", "CASE", "WHEN", "THEN", "ELSE", "END",
];

fn tokenize(sql: &str) -> Result<Vec<(Token, usize)>, QueryError> {
    let chars: Vec<char> = sql.chars().collect();
    let mut out = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        let start = i;
        if c.is_whitespace() || c == ';' {
            i += 1;
            continue;
        }
        if c == '-' && chars.get(i + 1) == Some(&'-') {
            while i < chars.len() && chars[i] != '\n' {
                i += 1;
            }
            continue;
        }
        if c.is_ascii_alphabetic() || c == '_' {
            while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            out.push((Token::Ident(chars[start..i].iter().collect()), start));
            continue;
        }
        if c.is_ascii_digit() {
            while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                i += 1;
            }
            if i < chars.len() && (chars[i] == 'e' || chars[i] == 'E') {
                i += 1;
                if i < chars.len() && (chars[i] == '+' || chars[i] == '-') {
                    i += 1;
                }
                while i < chars.len() && chars[i].is_ascii_digit() {
                    i += 1;
                }
            }
            out.push((Token::Number(chars[start..i].iter().collect()), start));
            continue;
        }
        if c == '\'' || c == '"' || c == '`' {
            let quote = c;
            let mut s = String::new();
            i += 1;
            loop {
                match chars.get(i) {
                    None => {
                        return Err(QueryError::Syntax {
                            position: start,
                            message: "unterminated quoted text".into(),
                        })
                    }
                    Some(&ch) if ch == quote => {
                        if chars.get(i + 1) == Some(&quote) {
                            s.push(quote);
                            i += 2;
                        } else {
                            i += 1;
                            break;
                        }
                    }
                    Some(&ch) => {
                        s.push(ch);
                        i += 1;
                    }
                }
            }
            let token = if quote == '\'' { Token::Str(s) } else { Token::Quoted(s) };
            out.push((token, start));
            continue;
        }
        let rest: String = chars[i..(i + 2).min(chars.len())].iter().collect();
        match SYMBOLS.iter().find(|s| rest.starts_with(**s)) {
            Some(sym) => {
                out.push((Token::Symbol(sym), start));
                i += sym.len();
            }
            None => {
                return Err(QueryError::Syntax {
                    position: start,
                    message: format!("unexpected character `{c}`"),
                })
            }
        }
    }
    out.push((Token::Eof, chars.len()));
    Ok(out)
}

#[derive(Debug, Clone, PartialEq)]
enum SelectItem {
    Wildcard,
    Expr { expr: Expr, alias: Option<String> },
    Agg { agg: AggExpr, alias: Option<String> },
}

struct OrderItem {
    item: SelectItem,
    ascending: bool,
}

struct Join {
    table: String,
    alias: Option<String>,
    left: ColumnRef,
    right: ColumnRef,
}

struct Select {
    distinct: bool,
    items: Vec<SelectItem>,
    table: String,
    alias: Option<String>,
    joins: Vec<Join>,
    selection: Option<Expr>,
    group_by: Vec<Expr>,
    order_by: Vec<OrderItem>,
    limit: Option<usize>,
}

struct Parser {
    tokens: Vec<(Token, usize)>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> &Token {
        &self.tokens[self.pos].0
    }

    fn peek_at(&self, n: usize) -> &Token {
        &self.tokens[(self.pos + n).min(self.tokens.len() - 1)].0
    }

    fn position(&self) -> usize {
        self.tokens[self.pos].1
    }

    fn advance(&mut self) -> Token {
        let t = self.tokens[self.pos].0.clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        t
    }

    fn error<T>(&self, message: impl Into<String>) -> Result<T, QueryError> {
        Err(QueryError::Syntax {
            position: self.position(),
            message: message.into(),
        })
    }

    fn is_keyword(&self, kw: &str) -> bool {
        matches!(self.peek(), Token::Ident(s) if s.eq_ignore_ascii_case(kw))
    }

    fn eat_keyword(&mut self, kw: &str) -> bool {
        if self.is_keyword(kw) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_keyword(&mut self, kw: &str) -> Result<(), QueryError> {
        if self.eat_keyword(kw) {
            Ok(())
        } else {
            self.error(format!("expected {kw}, found {}", describe(self.peek())))
        }
    }

    fn eat_symbol(&mut self, sym: &str) -> bool {
        if matches!(self.peek(), Token::Symbol(s) if *s == sym) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_symbol(&mut self, sym: &str) -> Result<(), QueryError> {
        if self.eat_symbol(sym) {
            Ok(())
        } else {
            self.error(format!("expected `{sym}`, found {}", describe(self.peek())))
        }
    }

    fn identifier(&mut self) -> Result<String, QueryError> {
        match self.peek().clone() {
            Token::Ident(s) if !is_reserved(&s) => {
                self.advance();
                Ok(s)
            }
            Token::Quoted(s) => {
                self.advance();
                Ok(s)
            }
            other => self.error(format!("expected identifier, found {}", describe(&other))),
        }
    }

    /// `AS name` or a bare non-reserved identifier.
    fn alias(&mut self) -> Result<Option<String>, QueryError> {
        if self.eat_keyword("AS") {
            return self.identifier().map(Some);
        }
        match self.peek() {
            Token::Ident(s) if !is_reserved(s) => self.identifier().map(Some),
            Token::Quoted(_) => self.identifier().map(Some),
            _ => Ok(None),
        }
    }

    fn query(&mut self) -> Result<Select, QueryError> {
        self.expect_keyword("SELECT")?;
        let distinct = self.eat_keyword("DISTINCT");
        let mut items = vec![self.select_item()?];
        while self.eat_symbol(",") {
            items.push(self.select_item()?);
        }
        self.expect_keyword("FROM")?;
        let table = self.identifier()?;
        let alias = self.alias()?;

        let mut joins = Vec::new();
        loop {
            let inner = self.eat_keyword("INNER");
            if !self.eat_keyword("JOIN") {
                if inner {
                    return self.error("expected JOIN after INNER");
                }
                break;
            }
            let table = self.identifier()?;
            let alias = self.alias()?;
            self.expect_keyword("ON")?;
            let left = self.column_ref()?;
            self.expect_symbol("=")?;
            let right = self.column_ref()?;
            joins.push(Join {
                table,
                alias,
                left,
                right,
            });
        }

        let selection = if self.eat_keyword("WHERE") {
            Some(self.expr()?)
        } else {
            None
        };

        let mut group_by = Vec::new();
        if self.eat_keyword("GROUP") {
            self.expect_keyword("BY")?;
            group_by.push(self.expr()?);
            while self.eat_symbol(",") {
                group_by.push(self.expr()?);
            }
        }

        let mut order_by = Vec::new();
        if self.eat_keyword("ORDER") {
            self.expect_keyword("BY")?;
            loop {
                let item = self.select_item_inner(false)?;
                let ascending = if self.eat_keyword("DESC") {
                    false
                } else {
                    self.eat_keyword("ASC");
                    true
                };
                order_by.push(OrderItem { item, ascending });
                if !self.eat_symbol(",") {
                    break;
                }
            }
        }

        let limit = if self.eat_keyword("LIMIT") {
            match self.advance() {
                Token::Number(n) => match n.parse::<usize>() {
                    Ok(n) => Some(n),
                    Err(_) => return self.error(format!("invalid LIMIT `{n}`")),
                },
                other => return self.error(format!("expected number after LIMIT, found {}", describe(&other))),
            }
        } else {
            None
        };

        if *self.peek() != Token::Eof {
            return self.error(format!("unexpected {}", describe(self.peek())));
        }
        Ok(Select {
            distinct,
            items,
            table,
            alias,
            joins,
            selection,
            group_by,
            order_by,
            limit,
        })
    }

    fn select_item(&mut self) -> Result<SelectItem, QueryError> {
        if self.eat_symbol("*") {
            return Ok(SelectItem::Wildcard);
        }
        self.select_item_inner(true)
    }

    fn select_item_inner(&mut self, allow_alias: bool) -> Result<SelectItem, QueryError> {
        let agg = match (self.peek(), self.peek_at(1)) {
            (Token::Ident(name), Token::Symbol("(")) => AggFunc::parse(name),
            _ => None,
        };
        let item = match agg {
            Some(func) => {
                self.advance();
                self.expect_symbol("(")?;
                let arg = if func == AggFunc::Count && self.eat_symbol("*") {
                    None
                } else {
                    Some(self.expr()?)
                };
                self.expect_symbol(")")?;
                SelectItem::Agg {
                    agg: AggExpr { func, arg },
                    alias: None,
                }
            }
            None => SelectItem::Expr {
                expr: self.expr()?,
                alias: None,
            },
        };
        if !allow_alias {
            return Ok(item);
        }
        let alias = self.alias()?;
        Ok(match item {
            SelectItem::Agg { agg, .. } => SelectItem::Agg { agg, alias },
            SelectItem::Expr { expr, .. } => SelectItem::Expr { expr, alias },
            SelectItem::Wildcard => SelectItem::Wildcard,
        })
    }

    fn column_ref(&mut self) -> Result<ColumnRef, QueryError> {
        let first = self.identifier()?;
        if self.eat_symbol(".") {
            let name = self.identifier()?;
            Ok(ColumnRef {
                qualifier: Some(first),
                name,
            })
        } else {
            Ok(ColumnRef {
                qualifier: None,
                name: first,
            })
        }
    }

    fn expr(&mut self) -> Result<Expr, QueryError> {
        let mut left = self.and_expr()?;
        while self.eat_keyword("OR") {
            left = left.or(self.and_expr()?);
        }
        Ok(left)
    }

    fn and_expr(&mut self) -> Result<Expr, QueryError> {
        let mut left = self.not_expr()?;
        while self.eat_keyword("AND") {
            left = left.and(self.not_expr()?);
        }
        Ok(left)
    }

    fn not_expr(&mut self) -> Result<Expr, QueryError> {
        if self.eat_keyword("NOT") {
            return Ok(self.not_expr()?.not());
        }
        self.comparison()
    }

    fn comparison(&mut self) -> Result<Expr, QueryError> {
        let left = self.additive()?;
        if self.eat_keyword("IS") {
            let negated = self.eat_keyword("NOT");
            self.expect_keyword("NULL")?;
            return Ok(if negated { left.is_not_null() } else { left.is_null() });
        }
        let negated = self.is_keyword("NOT")
            && matches!(self.peek_at(1), Token::Ident(s) if s.eq_ignore_ascii_case("IN") || s.eq_ignore_ascii_case("BETWEEN"));
        if negated {
            self.advance();
        }
        if self.eat_keyword("IN") {
            self.expect_symbol("(")?;
            let mut list = vec![self.additive()?];
            while self.eat_symbol(",") {
                list.push(self.additive()?);
            }
            self.expect_symbol(")")?;
            return Ok(Expr::InList {
                expr: Box::new(left),
                list,
                negated,
            });
        }
        if self.eat_keyword("BETWEEN") {
            let low = self.additive()?;
            self.expect_keyword("AND")?;
            let high = self.additive()?;
            let between = left.clone().gt_eq(low).and(left.lt_eq(high));
            return Ok(if negated { between.not() } else { between });
        }
        if negated {
            return self.error("expected IN or BETWEEN after NOT");
        }
        let op = match self.peek() {
            Token::Symbol("=") => Expr::eq,
            Token::Symbol("!=") | Token::Symbol("<>") => Expr::not_eq,
            Token::Symbol("<") => Expr::lt,
            Token::Symbol("<=") => Expr::lt_eq,
            Token::Symbol(">") => Expr::gt,
            Token::Symbol(">=") => Expr::gt_eq,
            _ => return Ok(left),
        };
        self.advance();
        let right = self.additive()?;
        Ok(op(left, right))
    }

    fn additive(&mut self) -> Result<Expr, QueryError> {
        let mut left = self.multiplicative()?;
        loop {
            if self.eat_symbol("+") {
                left = left + self.multiplicative()?;
            } else if self.eat_symbol("-") {
                left = left - self.multiplicative()?;
            } else {
                return Ok(left);
            }
        }
    }

    fn multiplicative(&mut self) -> Result<Expr, QueryError> {
        let mut left = self.unary()?;
        loop {
            if self.eat_symbol("*") {
                left = left * self.unary()?;
            } else if self.eat_symbol("/") {
                left = left / self.unary()?;
            } else {
                return Ok(left);
            }
        }
    }

    fn unary(&mut self) -> Result<Expr, QueryError> {
        if self.eat_symbol("-") {
            return Ok(match self.unary()? {
                Expr::Literal(Value::Int(i)) => Expr::Literal(Value::Int(-i)),
                Expr::Literal(Value::Float(f)) => Expr::Literal(Value::Float(-f)),
                other => Expr::Negate(Box::new(other)),
            });
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Expr, QueryError> {
        match self.peek().clone() {
            Token::Number(n) => {
                self.advance();
                if n.contains(['.', 'e', 'E']) {
                    n.parse::<f64>()
                        .map(|f| Expr::Literal(Value::Float(f)))
                        .or_else(|_| self.error(format!("invalid number `{n}`")))
                } else {
                    n.parse::<i64>()
                        .map(|i| Expr::Literal(Value::Int(i)))
                        .or_else(|_| self.error(format!("invalid integer `{n}`")))
                }
            }
            Token::Str(s) => {
                self.advance();
                Ok(Expr::Literal(Value::Str(s)))
            }
            Token::Symbol("(") => {
                self.advance();
                let e = self.expr()?;
                self.expect_symbol(")")?;
                Ok(e)
            }
            Token::Ident(word) if word.eq_ignore_ascii_case("NULL") => {
                self.advance();
                Ok(Expr::Literal(Value::Null))
            }
            Token::Ident(word) if word.eq_ignore_ascii_case("TRUE") || word.eq_ignore_ascii_case("FALSE") => {
                self.advance();
                Ok(Expr::Literal(Value::Bool(word.eq_ignore_ascii_case("TRUE"))))
            }
            Token::Ident(word) if word.eq_ignore_ascii_case("CASE") => {
                self.advance();
                self.case_expr()
            }
            Token::Ident(word) if matches!(self.peek_at(1), Token::Symbol("(")) => {
                if AggFunc::parse(&word).is_some() {
                    return self.error(format!("aggregate `{word}` is only allowed as a select or ORDER BY item"));
                }
                if word.eq_ignore_ascii_case("ARRAY_CONTAINS") {
                    self.advance();
                    self.expect_symbol("(")?;
                    let array = self.expr()?;
                    self.expect_symbol(",")?;
                    let value = self.expr()?;
                    self.expect_symbol(")")?;
                    return Ok(super::expr::array_contains(array, value));
                }
                self.error(format!("unknown function `{word}`"))
            }
            Token::Ident(_) | Token::Quoted(_) => Ok(Expr::Column(self.column_ref()?)),
            other => self.error(format!("expected expression, found {}", describe(&other))),
        }
    }

    fn case_expr(&mut self) -> Result<Expr, QueryError> {
        let mut branches = Vec::new();
        while self.eat_keyword("WHEN") {
            let condition = self.expr()?;
            self.expect_keyword("THEN")?;
            let value = self.expr()?;
            branches.push((condition, value));
        }
        if branches.is_empty() {
            return self.error("CASE needs at least one WHEN");
        }
        let otherwise = if self.eat_keyword("ELSE") {
            Some(Box::new(self.expr()?))
        } else {
            None
        };
        self.expect_keyword("END")?;
        Ok(Expr::Case {
            branches,
            otherwise,
        })
    }
}

fn is_reserved(word: &str) -> bool {
    RESERVED.iter().any(|k| k.eq_ignore_ascii_case(word))
}

fn describe(token: &Token) -> String {
    match token {
        Token::Ident(s) | Token::Quoted(s) => format!("`{s}`"),
        Token::Number(n) => format!("number {n}"),
        Token::Str(s) => format!("'{s}'"),
        Token::Symbol(s) => format!("`{s}`"),
        Token::Eof => "end of input".to_string(),
    }
}

/// A column produced by an earlier plan node, referenced by its exact name.
fn output_column(name: &str) -> Expr {
    Expr::Column(ColumnRef {
        qualifier: None,
        name: name.to_string(),
    })
}

/// Parses a statement into a logical plan.
pub fn parse(sql: &str) -> Result<LogicalPlan, QueryError> {
    let mut parser = Parser {
        tokens: tokenize(sql)?,
        pos: 0,
    };
    let select = parser.query()?;
    lower(select)
}

fn lower(select: Select) -> Result<LogicalPlan, QueryError> {
    let mut plan = LogicalPlan::Scan {
        table: select.table.clone(),
        alias: select.alias.clone(),
    };
    let mut visible = vec![select.alias.clone().unwrap_or_else(|| select.table.clone())];
    for join in select.joins {
        let right_name = join.alias.clone().unwrap_or_else(|| join.table.clone());
        // `ON right.x = left.y` is accepted in either order
        let (left_key, right_key) = match (&join.left.qualifier, &join.right.qualifier) {
            (Some(q), _) if *q == right_name => (join.right, join.left),
            (_, Some(q)) if visible.contains(q) => (join.right, join.left),
            _ => (join.left, join.right),
        };
        plan = LogicalPlan::Join {
            left: Box::new(plan),
            right: Box::new(LogicalPlan::Scan {
                table: join.table,
                alias: join.alias,
            }),
            left_key: Expr::Column(left_key),
            right_key: Expr::Column(right_key),
        };
        visible.push(right_name);
    }

    if let Some(predicate) = select.selection {
        plan = LogicalPlan::Filter {
            input: Box::new(plan),
            predicate,
        };
    }

    let has_wildcard = select.items.contains(&SelectItem::Wildcard);
    if has_wildcard && select.items.len() > 1 {
        return Err(QueryError::Syntax {
            position: 0,
            message: "`*` cannot be combined with other select items".into(),
        });
    }
    let is_aggregate = select.distinct
        || !select.group_by.is_empty()
        || select.items.iter().any(|i| matches!(i, SelectItem::Agg { .. }));

    if is_aggregate {
        if has_wildcard {
            return Err(QueryError::NotGrouped("*".into()));
        }
        return lower_aggregate(
            plan,
            select.items,
            select.group_by,
            select.distinct,
            select.order_by,
            select.limit,
        );
    }

    if !select.order_by.is_empty() {
        let mut keys = Vec::new();
        for o in select.order_by {
            let expr = match o.item {
                SelectItem::Expr { expr, .. } => substitute_alias(expr, &select.items),
                SelectItem::Agg { agg, .. } => return Err(QueryError::NotGrouped(agg.to_string())),
                SelectItem::Wildcard => unreachable_wildcard()?,
            };
            keys.push(SortKey {
                expr,
                ascending: o.ascending,
            });
        }
        plan = LogicalPlan::Sort {
            input: Box::new(plan),
            keys,
        };
    }

    if !has_wildcard {
        let exprs = select
            .items
            .into_iter()
            .map(|item| match item {
                SelectItem::Expr { expr, alias: Some(a) } => expr.alias(&a),
                SelectItem::Expr { expr, alias: None } => NamedExpr::from(expr),
                // filtered out above
                _ => NamedExpr::from(output_column("*")),
            })
            .collect();
        plan = LogicalPlan::Project {
            input: Box::new(plan),
            exprs,
        };
    }

    if let Some(n) = select.limit {
        plan = LogicalPlan::Limit {
            input: Box::new(plan),
            n,
        };
    }
    Ok(plan)
}

fn unreachable_wildcard() -> Result<Expr, QueryError> {
    Err(QueryError::Syntax {
        position: 0,
        message: "`*` is not a valid ORDER BY key".into(),
    })
}

/// `ORDER BY alias` refers to the aliased select expression.
fn substitute_alias(expr: Expr, items: &[SelectItem]) -> Expr {
    if let Expr::Column(ColumnRef { qualifier: None, name }) = &expr {
        for item in items {
            if let SelectItem::Expr {
                expr: aliased,
                alias: Some(a),
            } = item
            {
                if a == name && aliased != &expr {
                    return aliased.clone();
                }
            }
        }
    }
    expr
}

fn lower_aggregate(
    input: LogicalPlan,
    items: Vec<SelectItem>,
    group_by: Vec<Expr>,
    distinct: bool,
    order_by: Vec<OrderItem>,
    limit: Option<usize>,
) -> Result<LogicalPlan, QueryError> {
    let mut group_exprs: Vec<Expr> = group_by
        .into_iter()
        .map(|g| substitute_alias(g, &items))
        .collect();
    if distinct {
        for item in &items {
            if let SelectItem::Expr { expr, .. } = item {
                if !group_exprs.contains(expr) {
                    group_exprs.push(expr.clone());
                }
            }
        }
    }

    let group_named: Vec<NamedExpr> = group_exprs
        .iter()
        .map(|g| {
            let alias = items.iter().find_map(|item| match item {
                SelectItem::Expr { expr, alias: Some(a) } if expr == g => Some(a.clone()),
                _ => None,
            });
            match alias {
                Some(a) => g.clone().alias(&a),
                None => NamedExpr::from(g.clone()),
            }
        })
        .collect();

    let mut aggregates: Vec<NamedAgg> = Vec::new();
    let mut output: Vec<NamedExpr> = Vec::new();
    for item in &items {
        match item {
            SelectItem::Agg { agg, alias } => {
                let name = alias.clone().unwrap_or_else(|| agg.to_string());
                if !aggregates.iter().any(|a| a.name == name) {
                    aggregates.push(agg.clone().alias(&name));
                }
                output.push(output_column(&name).alias(&name));
            }
            SelectItem::Expr { expr, .. } => {
                let pos = group_exprs
                    .iter()
                    .position(|g| g == expr)
                    .ok_or_else(|| QueryError::NotGrouped(expr.to_string()))?;
                let name = group_named[pos].name.clone();
                output.push(output_column(&name).alias(&name));
            }
            SelectItem::Wildcard => return Err(QueryError::NotGrouped("*".into())),
        }
    }

    let mut keys = Vec::new();
    for o in order_by {
        let expr = match o.item {
            SelectItem::Agg { agg, .. } => {
                let name = match aggregates.iter().find(|a| a.agg == agg) {
                    Some(a) => a.name.clone(),
                    None => {
                        let name = format!("__order_{}", aggregates.len());
                        aggregates.push(agg.alias(&name));
                        name
                    }
                };
                output_column(&name)
            }
            SelectItem::Expr { expr, .. } => {
                let expr = substitute_alias(expr, &items);
                if let Some(pos) = group_exprs.iter().position(|g| *g == expr) {
                    output_column(&group_named[pos].name)
                } else if let Expr::Column(ColumnRef { qualifier: None, name }) = &expr {
                    if output.iter().any(|o| &o.name == name) {
                        output_column(name)
                    } else {
                        return Err(QueryError::NotGrouped(expr.to_string()));
                    }
                } else {
                    return Err(QueryError::NotGrouped(expr.to_string()));
                }
            }
            SelectItem::Wildcard => unreachable_wildcard()?,
        };
        keys.push(SortKey {
            expr,
            ascending: o.ascending,
        });
    }

    let mut plan = LogicalPlan::Aggregate {
        input: Box::new(input),
        group_by: group_named,
        aggregates,
    };
    if !keys.is_empty() {
        plan = LogicalPlan::Sort {
            input: Box::new(plan),
            keys,
        };
    }
    plan = LogicalPlan::Project {
        input: Box::new(plan),
        exprs: output,
    };
    if let Some(n) = limit {
        plan = LogicalPlan::Limit {
            input: Box::new(plan),
            n,
        };
    }
    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::expr::{array_contains, col, lit};

    fn filter_of(plan: &LogicalPlan) -> Option<&Expr> {
        match plan {
            LogicalPlan::Filter { predicate, .. } => Some(predicate),
            LogicalPlan::Project { input, .. }
            | LogicalPlan::Sort { input, .. }
            | LogicalPlan::Limit { input, .. }
            | LogicalPlan::Aggregate { input, .. } => filter_of(input),
            _ => None,
        }
    }

    #[test]
    fn where_clause_matches_builder_expression() {
        let plan = parse("SELECT id FROM problems WHERE time_limit < 2.0 AND source = 2").unwrap();
        let expected = col("time_limit").lt(lit(2.0)).and(col("source").eq(lit(2)));
        assert_eq!(filter_of(&plan), Some(&expected));
    }

    #[test]
    fn operator_precedence() {
        let plan = parse("select * from problems where not a = 1 or b between 2 and 3 and c in (1, -2)").unwrap();
        let expected = col("a")
            .eq(lit(1))
            .not()
            .or(col("b")
                .gt_eq(lit(2))
                .and(col("b").lt_eq(lit(3)))
                .and(col("c").in_list(vec![lit(1), lit(-2)])));
        assert_eq!(filter_of(&plan), Some(&expected));
    }

    #[test]
    fn functions_and_null_checks() {
        let plan = parse("SELECT * FROM problems WHERE array_contains(tags, 3) AND cf_rating IS NOT NULL").unwrap();
        let expected = array_contains(col("tags"), lit(3)).and(col("cf_rating").is_not_null());
        assert_eq!(filter_of(&plan), Some(&expected));
    }

    #[test]
    fn group_by_alias_and_order_by_aggregate() {
        let plan = parse(
            "SELECT CASE WHEN difficulty < 7 THEN 'Easy' ELSE 'Hard' END AS band, COUNT(*) AS n \
             FROM problems WHERE difficulty IS NOT NULL GROUP BY band ORDER BY n DESC",
        )
        .unwrap();
        let text = plan.to_string();
        assert!(text.contains("Aggregate: by [CASE WHEN (difficulty < 7) THEN 'Easy' ELSE 'Hard' END AS band] compute [count(*) AS n]"));
        assert!(text.contains("Sort: n DESC"));
    }

    #[test]
    fn join_keys_are_oriented_by_qualifier() {
        let plan = parse(
            "SELECT l.name, s.problem_id FROM solutions s JOIN languages l ON l.id = s.language",
        )
        .unwrap();
        match plan {
            LogicalPlan::Project { input, .. } => match *input {
                LogicalPlan::Join {
                    left_key, right_key, ..
                } => {
                    assert_eq!(left_key, col("s.language"));
                    assert_eq!(right_key, col("l.id"));
                }
                other => panic!("expected join, got {other}"),
            },
            other => panic!("expected projection, got {other}"),
        }
    }

    #[test]
    fn ungrouped_column_is_rejected() {
        assert_eq!(
            parse("SELECT id, COUNT(*) FROM problems GROUP BY source").unwrap_err(),
            QueryError::NotGrouped("id".into())
        );
    }

    #[test]
    fn syntax_errors_carry_position() {
        match parse("SELECT id FROM problems WHERE") {
            Err(QueryError::Syntax { position, .. }) => assert_eq!(position, 29),
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(
            parse("SELECT COUNT(*) + 1 FROM problems"),
            Err(QueryError::Syntax { .. })
        ));
        assert!(matches!(parse("SELECT 'open FROM t"), Err(QueryError::Syntax { .. })));
    }
}
