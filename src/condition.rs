//! Filter DSL.
//!
//! A `Filter` is an ordered mapping from keys to conditions. A column key
//! holds either a plain value (equality) or a `Predicate` built by one of
//! the helpers in this module. The reserved keys `_AND_` and `_OR_` hold a
//! list of nested filters that are combined conjunctively or disjunctively.
//!
//! Filters compile to an `Expr` tree against a reflected table; the
//! statement layer then renders the tree either with bound `?N` parameters
//! or with inline literals.

use crate::core::db::schema::Table;
use crate::core::{Result, SqlmateError};
use crate::value::Value;
use rusqlite::types::Value as SqlValue;
use std::fmt;
use std::sync::Arc;

/// Key that combines nested filters with AND.
pub const AND_KEY: &str = "_AND_";
/// Key that combines nested filters with OR.
pub const OR_KEY: &str = "_OR_";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
}

impl CompareOp {
    pub fn as_str(self) -> &'static str {
        match self {
            CompareOp::Eq => "=",
            CompareOp::NotEq => "!=",
            CompareOp::Lt => "<",
            CompareOp::LtEq => "<=",
            CompareOp::Gt => ">",
            CompareOp::GtEq => ">=",
        }
    }
}

/// A SQL expression over one table.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Column { table: String, name: String },
    Literal(SqlValue),
    Function { name: &'static str, args: Vec<Expr> },
    Compare { left: Box<Expr>, op: CompareOp, right: Box<Expr> },
    Between { expr: Box<Expr>, low: Box<Expr>, high: Box<Expr>, negated: bool },
    InList { expr: Box<Expr>, list: Vec<Expr>, negated: bool },
    Like { expr: Box<Expr>, pattern: Box<Expr>, negated: bool },
    Regexp { expr: Box<Expr>, pattern: Box<Expr>, negated: bool },
    IsNull { expr: Box<Expr>, negated: bool },
    /// `<expr> <fragment>` with the fragment spliced verbatim
    Custom { expr: Box<Expr>, fragment: String },
    Not(Box<Expr>),
    And(Vec<Expr>),
    Or(Vec<Expr>),
}

impl Expr {
    pub fn column(table: &str, name: &str) -> Self {
        Expr::Column {
            table: table.to_string(),
            name: name.to_string(),
        }
    }

    pub fn value(value: impl Into<Value>) -> Self {
        Expr::Literal(value.into().to_sql_value())
    }

    fn compare(&self, op: CompareOp, value: Value) -> Expr {
        Expr::Compare {
            left: Box::new(self.clone()),
            op,
            right: Box::new(Expr::value(value)),
        }
    }

    pub fn eq(&self, value: impl Into<Value>) -> Expr {
        match value.into() {
            Value::Null => self.is_null(),
            v => self.compare(CompareOp::Eq, v),
        }
    }

    pub fn ne(&self, value: impl Into<Value>) -> Expr {
        match value.into() {
            Value::Null => self.is_not_null(),
            v => self.compare(CompareOp::NotEq, v),
        }
    }

    pub fn gt(&self, value: impl Into<Value>) -> Expr {
        self.compare(CompareOp::Gt, value.into())
    }

    pub fn ge(&self, value: impl Into<Value>) -> Expr {
        self.compare(CompareOp::GtEq, value.into())
    }

    pub fn lt(&self, value: impl Into<Value>) -> Expr {
        self.compare(CompareOp::Lt, value.into())
    }

    pub fn le(&self, value: impl Into<Value>) -> Expr {
        self.compare(CompareOp::LtEq, value.into())
    }

    pub fn between(&self, low: impl Into<Value>, high: impl Into<Value>, negated: bool) -> Expr {
        Expr::Between {
            expr: Box::new(self.clone()),
            low: Box::new(Expr::value(low)),
            high: Box::new(Expr::value(high)),
            negated,
        }
    }

    pub fn in_list(&self, values: impl IntoIterator<Item = Value>, negated: bool) -> Expr {
        Expr::InList {
            expr: Box::new(self.clone()),
            list: values.into_iter().map(Expr::value).collect(),
            negated,
        }
    }

    pub fn like(&self, pattern: impl Into<String>, negated: bool) -> Expr {
        Expr::Like {
            expr: Box::new(self.clone()),
            pattern: Box::new(Expr::value(pattern.into())),
            negated,
        }
    }

    pub fn regexp(&self, pattern: impl Into<String>, negated: bool) -> Expr {
        Expr::Regexp {
            expr: Box::new(self.clone()),
            pattern: Box::new(Expr::value(pattern.into())),
            negated,
        }
    }

    pub fn is_null(&self) -> Expr {
        Expr::IsNull {
            expr: Box::new(self.clone()),
            negated: false,
        }
    }

    pub fn is_not_null(&self) -> Expr {
        Expr::IsNull {
            expr: Box::new(self.clone()),
            negated: true,
        }
    }

    /// `IFNULL(<expr>, <fallback>)`
    pub fn if_null(&self, fallback: impl Into<Value>) -> Expr {
        Expr::Function {
            name: "IFNULL",
            args: vec![self.clone(), Expr::value(fallback)],
        }
    }

    pub fn not(self) -> Expr {
        Expr::Not(Box::new(self))
    }

    pub fn or(self, other: Expr) -> Expr {
        Expr::Or(vec![self, other])
    }

    /// Renders this expression into `w`.
    pub fn write(&self, w: &mut SqlWriter) {
        match self {
            Expr::Column { table, name } => {
                w.push_ident(table);
                w.push(".");
                w.push_ident(name);
            }
            Expr::Literal(v) => w.push_value(v.clone()),
            Expr::Function { name, args } => {
                w.push(name);
                w.push("(");
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        w.push(", ");
                    }
                    arg.write(w);
                }
                w.push(")");
            }
            Expr::Compare { left, op, right } => {
                left.write(w);
                w.push(" ");
                w.push(op.as_str());
                w.push(" ");
                right.write(w);
            }
            Expr::Between {
                expr,
                low,
                high,
                negated,
            } => {
                expr.write(w);
                w.push(if *negated { " NOT BETWEEN " } else { " BETWEEN " });
                low.write(w);
                w.push(" AND ");
                high.write(w);
            }
            Expr::InList {
                expr,
                list,
                negated,
            } => {
                expr.write(w);
                w.push(if *negated { " NOT IN (" } else { " IN (" });
                for (i, item) in list.iter().enumerate() {
                    if i > 0 {
                        w.push(", ");
                    }
                    item.write(w);
                }
                w.push(")");
            }
            Expr::Like {
                expr,
                pattern,
                negated,
            } => {
                expr.write(w);
                w.push(if *negated { " NOT LIKE " } else { " LIKE " });
                pattern.write(w);
            }
            Expr::Regexp {
                expr,
                pattern,
                negated,
            } => {
                expr.write(w);
                w.push(if *negated { " NOT REGEXP " } else { " REGEXP " });
                pattern.write(w);
            }
            Expr::IsNull { expr, negated } => {
                expr.write(w);
                w.push(if *negated { " IS NOT NULL" } else { " IS NULL" });
            }
            Expr::Custom { expr, fragment } => {
                expr.write(w);
                w.push(" ");
                w.push(fragment);
            }
            Expr::Not(inner) => {
                w.push("NOT ");
                inner.write_grouped(w);
            }
            Expr::And(parts) => write_joined(w, parts, " AND ", "1"),
            Expr::Or(parts) => write_joined(w, parts, " OR ", "0"),
        }
    }

    fn write_grouped(&self, w: &mut SqlWriter) {
        match self {
            Expr::Column { .. } | Expr::Literal(_) | Expr::Function { .. } => self.write(w),
            _ => {
                w.push("(");
                self.write(w);
                w.push(")");
            }
        }
    }
}

fn write_joined(w: &mut SqlWriter, parts: &[Expr], sep: &str, empty: &str) {
    if parts.is_empty() {
        w.push(empty);
        return;
    }
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            w.push(sep);
        }
        part.write_grouped(w);
    }
}

/// Accumulates SQL text and, in parameterized mode, its bound values.
#[derive(Debug, Default)]
pub struct SqlWriter {
    sql: String,
    params: Vec<SqlValue>,
    inline: bool,
}

impl SqlWriter {
    /// Values become `?N` placeholders.
    pub fn parameterized() -> Self {
        SqlWriter::default()
    }

    /// Values are rendered as SQL literals.
    pub fn inline() -> Self {
        SqlWriter {
            inline: true,
            ..SqlWriter::default()
        }
    }

    pub fn push(&mut self, sql: &str) {
        self.sql.push_str(sql);
    }

    pub fn push_ident(&mut self, ident: &str) {
        self.sql.push_str(&quote_ident(ident));
    }

    pub fn push_value(&mut self, value: SqlValue) {
        if self.inline {
            self.sql.push_str(&sql_literal(&value));
        } else {
            self.params.push(value);
            self.sql.push_str(&format!("?{}", self.params.len()));
        }
    }

    pub fn finish(self) -> (String, Vec<SqlValue>) {
        (self.sql, self.params)
    }
}

/// Double-quotes an identifier.
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Renders a storage value as a SQL literal.
pub fn sql_literal(value: &SqlValue) -> String {
    match value {
        SqlValue::Null => "NULL".to_string(),
        SqlValue::Integer(i) => i.to_string(),
        SqlValue::Real(f) if f.is_finite() => format!("{:?}", f),
        SqlValue::Real(_) => "NULL".to_string(),
        SqlValue::Text(s) => format!("'{}'", s.replace('\'', "''")),
        SqlValue::Blob(b) => {
            let hex: String = b.iter().map(|byte| format!("{:02X}", byte)).collect();
            format!("X'{}'", hex)
        }
    }
}

/// A function from a column expression to a boolean expression.
#[derive(Clone)]
pub struct Predicate(Arc<dyn Fn(&Expr) -> Expr + Send + Sync>);

impl Predicate {
    pub fn new(f: impl Fn(&Expr) -> Expr + Send + Sync + 'static) -> Self {
        Predicate(Arc::new(f))
    }

    pub fn apply(&self, column: &Expr) -> Expr {
        (self.0)(column)
    }
}

impl fmt::Debug for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Predicate(..)")
    }
}

/// The value side of a filter entry.
#[derive(Debug, Clone)]
pub enum Condition {
    /// Column equals the value (`IS NULL` for a null value)
    Equality(Value),
    /// Column satisfies the predicate
    Predicate(Predicate),
    /// All nested filters hold; only valid under `_AND_`
    And(Vec<Filter>),
    /// Any nested filter holds; only valid under `_OR_`
    Or(Vec<Filter>),
}

impl From<Predicate> for Condition {
    fn from(p: Predicate) -> Self {
        Condition::Predicate(p)
    }
}

impl From<Value> for Condition {
    fn from(v: Value) -> Self {
        Condition::Equality(v)
    }
}

macro_rules! condition_from_value {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for Condition {
                fn from(v: $ty) -> Self {
                    Condition::Equality(Value::from(v))
                }
            }
        )*
    };
}

condition_from_value!(
    bool,
    i32,
    i64,
    u32,
    f64,
    &str,
    String,
    chrono::NaiveDateTime,
    chrono::NaiveDate,
    uuid::Uuid,
);

/// An ordered mapping of keys to conditions.
#[derive(Debug, Clone, Default)]
pub struct Filter {
    entries: Vec<(String, Condition)>,
}

impl Filter {
    pub fn new() -> Self {
        Filter::default()
    }

    /// Adds an entry under `key`, which is a column name or a reserved key.
    pub fn with(mut self, key: impl Into<String>, condition: impl Into<Condition>) -> Self {
        self.entries.push((key.into(), condition.into()));
        self
    }

    pub fn and(self, filters: Vec<Filter>) -> Self {
        self.with(AND_KEY, Condition::And(filters))
    }

    pub fn or(self, filters: Vec<Filter>) -> Self {
        self.with(OR_KEY, Condition::Or(filters))
    }

    pub fn entries(&self) -> &[(String, Condition)] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Builds a filter from a JSON object.
    ///
    /// Scalars become equality conditions; `_AND_`/`_OR_` must map to an
    /// array of objects.
    pub fn from_json(json: &serde_json::Value) -> Result<Self> {
        let object = json.as_object().ok_or_else(|| {
            SqlmateError::InvalidCondition(format!("expected a JSON object, got {}", json))
        })?;

        let mut filter = Filter::new();
        for (key, value) in object {
            if key == AND_KEY || key == OR_KEY {
                let items = value.as_array().ok_or_else(|| {
                    SqlmateError::InvalidCondition(format!("'{}' expects an array of objects", key))
                })?;
                let nested = items.iter().map(Filter::from_json).collect::<Result<Vec<_>>>()?;
                let condition = if key == AND_KEY {
                    Condition::And(nested)
                } else {
                    Condition::Or(nested)
                };
                filter = filter.with(key.as_str(), condition);
            } else if value.is_array() || value.is_object() {
                return Err(SqlmateError::InvalidCondition(format!(
                    "value for '{}' must be a scalar, got {}",
                    key, value
                )));
            } else {
                filter = filter.with(key.as_str(), Value::from_json(value));
            }
        }
        Ok(filter)
    }
}

/// Compiles a top-level filter into a WHERE expression.
///
/// Every top-level entry is ANDed. An empty top-level filter yields `None`
/// (no WHERE clause); nested filters must not be empty.
///
/// # Errors
///
/// `SqlmateError::InvalidCondition` for malformed shapes and
/// `SqlmateError::UnknownColumn` for keys the table doesn't have.
pub fn where_clause(table: &Table, filter: &Filter) -> Result<Option<Expr>> {
    if filter.is_empty() {
        return Ok(None);
    }
    compile_filter(table, filter).map(Some)
}

fn compile_filter(table: &Table, filter: &Filter) -> Result<Expr> {
    if filter.is_empty() {
        return Err(SqlmateError::InvalidCondition(
            "nested condition mapping is empty".to_string(),
        ));
    }
    let mut parts = filter
        .entries
        .iter()
        .map(|(key, condition)| compile_entry(table, key, condition))
        .collect::<Result<Vec<_>>>()?;
    Ok(if parts.len() == 1 {
        parts.remove(0)
    } else {
        Expr::And(parts)
    })
}

fn compile_entry(table: &Table, key: &str, condition: &Condition) -> Result<Expr> {
    let reserved = key == AND_KEY || key == OR_KEY;
    match condition {
        Condition::And(filters) if key == AND_KEY => compile_nested(table, key, filters).map(Expr::And),
        Condition::Or(filters) if key == OR_KEY => compile_nested(table, key, filters).map(Expr::Or),
        Condition::And(_) | Condition::Or(_) => Err(SqlmateError::InvalidCondition(format!(
            "nested condition lists must be keyed by '{}' or '{}' to match their combinator, found key '{}'",
            AND_KEY, OR_KEY, key
        ))),
        _ if reserved => Err(SqlmateError::InvalidCondition(format!(
            "'{}' expects a list of nested condition mappings",
            key
        ))),
        Condition::Equality(value) => Ok(column_expr(table, key)?.eq(value.clone())),
        Condition::Predicate(predicate) => Ok(predicate.apply(&column_expr(table, key)?)),
    }
}

fn compile_nested(table: &Table, key: &str, filters: &[Filter]) -> Result<Vec<Expr>> {
    if filters.is_empty() {
        return Err(SqlmateError::InvalidCondition(format!(
            "'{}' requires at least one nested condition mapping",
            key
        )));
    }
    filters.iter().map(|f| compile_filter(table, f)).collect()
}

/// Qualified column reference, checked against the table.
pub fn column_expr(table: &Table, name: &str) -> Result<Expr> {
    if table.column(name).is_none() {
        return Err(SqlmateError::UnknownColumn {
            table: table.name.clone(),
            column: name.to_string(),
        });
    }
    Ok(Expr::column(&table.name, name))
}

// Predicate helpers

/// `col > value` (or `>=`), negated to `NOT (...)`.
pub fn greater_than(value: impl Into<Value>, or_equal: bool, negate: bool) -> Predicate {
    let value = value.into();
    Predicate::new(move |col| {
        let e = if or_equal {
            col.ge(value.clone())
        } else {
            col.gt(value.clone())
        };
        maybe_not(e, negate)
    })
}

/// `col < value` (or `<=`), negated to `NOT (...)`.
pub fn less_than(value: impl Into<Value>, or_equal: bool, negate: bool) -> Predicate {
    let value = value.into();
    Predicate::new(move |col| {
        let e = if or_equal {
            col.le(value.clone())
        } else {
            col.lt(value.clone())
        };
        maybe_not(e, negate)
    })
}

/// Equality or inequality.
///
/// `include_null` defaults to `negate`: a not-equal filter also matches
/// NULL rows unless told otherwise. Including NULLs compares
/// `IFNULL(col, '')`.
pub fn equal_to(value: impl Into<Value>, negate: bool, include_null: Option<bool>) -> Predicate {
    let value = value.into();
    let include_null = include_null.unwrap_or(negate);
    if value.is_null() {
        return null(negate);
    }
    Predicate::new(move |col| {
        let target = if include_null {
            col.if_null("")
        } else {
            col.clone()
        };
        if negate {
            target.ne(value.clone())
        } else {
            target.eq(value.clone())
        }
    })
}

/// Inclusive range; the bounds are ordered before use.
pub fn between(first: impl Into<Value>, second: impl Into<Value>, negate: bool) -> Predicate {
    let (first, second) = (first.into(), second.into());
    let (low, high) = if first > second {
        (second, first)
    } else {
        (first, second)
    };
    Predicate::new(move |col| col.between(low.clone(), high.clone(), negate))
}

/// Membership test.
///
/// `include_null` defaults to `negate`; when set, NULL rows also match.
pub fn is_in<V: Into<Value>>(
    values: impl IntoIterator<Item = V>,
    negate: bool,
    include_null: Option<bool>,
) -> Predicate {
    let values: Vec<Value> = values.into_iter().map(Into::into).collect();
    let include_null = include_null.unwrap_or(negate);
    Predicate::new(move |col| {
        let membership = col.in_list(values.clone(), negate);
        if include_null {
            membership.or(col.is_null())
        } else {
            membership
        }
    })
}

/// SQL `LIKE` with a caller-supplied pattern.
pub fn like(pattern: impl Into<String>, negate: bool) -> Predicate {
    let pattern = pattern.into();
    Predicate::new(move |col| col.like(pattern.clone(), negate))
}

pub fn starts_with(prefix: impl Into<String>, negate: bool) -> Predicate {
    like(format!("{}%", prefix.into()), negate)
}

pub fn ends_with(suffix: impl Into<String>, negate: bool) -> Predicate {
    like(format!("%{}", suffix.into()), negate)
}

pub fn contains(needle: impl Into<String>, negate: bool) -> Predicate {
    like(format!("%{}%", needle.into()), negate)
}

/// Regular-expression match through the `regexp()` SQL function.
pub fn regex(pattern: impl Into<String>, negate: bool) -> Predicate {
    let pattern = pattern.into();
    Predicate::new(move |col| col.regexp(pattern.clone(), negate))
}

/// `IS NULL`, or `IS NOT NULL` when negated.
pub fn null(negate: bool) -> Predicate {
    Predicate::new(move |col| {
        if negate {
            col.is_not_null()
        } else {
            col.is_null()
        }
    })
}

/// Negates another predicate.
pub fn not_(predicate: Predicate) -> Predicate {
    Predicate::new(move |col| predicate.apply(col).not())
}

pub fn after(value: impl Into<Value>, inclusive: bool, negate: bool) -> Predicate {
    greater_than(value, inclusive, negate)
}

pub fn before(value: impl Into<Value>, inclusive: bool, negate: bool) -> Predicate {
    less_than(value, inclusive, negate)
}

/// Matches timestamps falling on the given calendar day.
pub fn on_day(day: impl Into<Value>, negate: bool) -> Predicate {
    let day = match day.into() {
        Value::Timestamp(ts) => Value::Date(ts.date()),
        other => other,
    };
    Predicate::new(move |col| {
        let date = Expr::Function {
            name: "DATE",
            args: vec![col.clone()],
        };
        if negate {
            date.ne(day.clone())
        } else {
            date.eq(day.clone())
        }
    })
}

/// Appends a raw SQL fragment after the column, e.g. `"% 2 = 0"`.
pub fn custom(fragment: impl Into<String>) -> Predicate {
    let fragment = fragment.into();
    Predicate::new(move |col| Expr::Custom {
        expr: Box::new(col.clone()),
        fragment: fragment.clone(),
    })
}

fn maybe_not(expr: Expr, negate: bool) -> Expr {
    if negate {
        expr.not()
    } else {
        expr
    }
}
