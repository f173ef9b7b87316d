//! Statement construction.
//!
//! Statements are built against a reflected `Table`, so every column they
//! name has been checked. `compile` produces SQL with `?N` placeholders and
//! the values to bind; `textualize` renders the same statement with inline
//! literals for display and logging.

use crate::condition::{column_expr, where_clause, Expr, Filter, SqlWriter};
use crate::core::db::query::{Params, StatementType};
use crate::core::db::schema::Table;
use crate::core::{Result, SqlmateError};
use crate::value::CoercedRecord;
use rusqlite::types::Value as SqlValue;
use std::sync::Arc;

/// A statement ready for execution.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledQuery {
    pub sql: String,
    pub params: Params,
    pub kind: StatementType,
}

impl CompiledQuery {
    /// Wraps caller-supplied SQL, classifying it by parsing.
    pub fn text(sql: &str, params: Params) -> Self {
        CompiledQuery {
            sql: sql.to_string(),
            params,
            kind: StatementType::classify(sql),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    #[default]
    Asc,
    Desc,
}

impl Direction {
    fn as_str(self) -> &'static str {
        match self {
            Direction::Asc => "ASC",
            Direction::Desc => "DESC",
        }
    }
}

/// Projection and paging options for a select.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SelectOptions {
    /// Columns to return; all columns when `None`
    pub columns: Option<Vec<String>>,
    pub distinct: bool,
    pub order_by: Option<String>,
    /// Sort descending instead of ascending
    pub reverse: bool,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

impl SelectOptions {
    pub fn new() -> Self {
        SelectOptions::default()
    }

    pub fn columns<S: Into<String>>(mut self, columns: impl IntoIterator<Item = S>) -> Self {
        self.columns = Some(columns.into_iter().map(Into::into).collect());
        self
    }

    pub fn distinct(mut self) -> Self {
        self.distinct = true;
        self
    }

    pub fn order_by(mut self, column: impl Into<String>) -> Self {
        self.order_by = Some(column.into());
        self
    }

    pub fn reverse(mut self, reverse: bool) -> Self {
        self.reverse = reverse;
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Select {
    table: Arc<Table>,
    columns: Vec<String>,
    distinct: bool,
    filter: Option<Expr>,
    order_by: Option<(String, Direction)>,
    limit: Option<u64>,
    offset: Option<u64>,
}

impl Select {
    /// Builds a select from a filter and options.
    ///
    /// # Errors
    ///
    /// `SqlmateError::UnknownColumn` for a projection or ordering column the
    /// table doesn't have, plus any error from compiling the filter.
    pub fn build(table: Arc<Table>, filter: &Filter, options: &SelectOptions) -> Result<Self> {
        let columns = match &options.columns {
            Some(columns) => {
                for c in columns {
                    column_expr(&table, c)?;
                }
                columns.clone()
            }
            None => Vec::new(),
        };
        let order_by = match &options.order_by {
            Some(c) => {
                column_expr(&table, c)?;
                let direction = if options.reverse {
                    Direction::Desc
                } else {
                    Direction::Asc
                };
                Some((c.clone(), direction))
            }
            None => None,
        };
        let filter = where_clause(&table, filter)?;

        Ok(Select {
            table,
            columns,
            distinct: options.distinct,
            filter,
            order_by,
            limit: options.limit,
            offset: options.offset,
        })
    }

    fn write(&self, w: &mut SqlWriter) {
        w.push("SELECT ");
        if self.distinct {
            w.push("DISTINCT ");
        }
        if self.columns.is_empty() {
            w.push("*");
        } else {
            for (i, c) in self.columns.iter().enumerate() {
                if i > 0 {
                    w.push(", ");
                }
                Expr::column(&self.table.name, c).write(w);
            }
        }
        w.push(" FROM ");
        w.push_ident(&self.table.name);
        write_where(w, &self.filter);
        if let Some((column, direction)) = &self.order_by {
            w.push(" ORDER BY ");
            Expr::column(&self.table.name, column).write(w);
            w.push(" ");
            w.push(direction.as_str());
        }
        match (self.limit, self.offset) {
            (Some(limit), Some(offset)) => w.push(&format!(" LIMIT {} OFFSET {}", limit, offset)),
            (Some(limit), None) => w.push(&format!(" LIMIT {}", limit)),
            (None, Some(offset)) => w.push(&format!(" LIMIT -1 OFFSET {}", offset)),
            (None, None) => {}
        }
    }
}

/// How an insert reacts to a unique-key conflict.
#[derive(Debug, Clone, PartialEq)]
enum OnConflict {
    Fail,
    /// One `ON CONFLICT` clause per unique key, updating these columns
    Update { keys: Vec<Vec<String>>, columns: Vec<String> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Insert {
    table: Arc<Table>,
    columns: Vec<String>,
    rows: Vec<CoercedRecord>,
    on_conflict: OnConflict,
}

impl Insert {
    /// Builds a multi-row insert. Every record must have the same keys.
    pub fn build(table: Arc<Table>, rows: Vec<CoercedRecord>) -> Result<Self> {
        let columns = common_columns(&table, &rows)?;
        Ok(Insert {
            table,
            columns,
            rows,
            on_conflict: OnConflict::Fail,
        })
    }

    /// Builds an insert that updates existing rows on a unique-key conflict.
    ///
    /// `update_keys` defaults to every column of the table. Columns that
    /// aren't in the inserted records are skipped, since `excluded` would
    /// only hold their defaults.
    ///
    /// # Errors
    ///
    /// `SqlmateError::Query` when the table has no primary key or unique
    /// index to conflict on.
    pub fn upsert(table: Arc<Table>, rows: Vec<CoercedRecord>, update_keys: Option<Vec<String>>) -> Result<Self> {
        let columns = common_columns(&table, &rows)?;
        let keys = table.unique_keys();
        if keys.is_empty() {
            return Err(SqlmateError::Query(format!(
                "table '{}' has no primary key or unique index to upsert on",
                table.name
            )));
        }
        let requested = match update_keys {
            Some(keys) => {
                for k in &keys {
                    column_expr(&table, k)?;
                }
                keys
            }
            None => table.column_names().map(str::to_string).collect(),
        };
        let update_columns = requested
            .into_iter()
            .filter(|c| columns.contains(c))
            .collect();

        Ok(Insert {
            table,
            columns,
            rows,
            on_conflict: OnConflict::Update {
                keys,
                columns: update_columns,
            },
        })
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    fn write(&self, w: &mut SqlWriter) {
        w.push("INSERT INTO ");
        w.push_ident(&self.table.name);
        w.push(" (");
        write_ident_list(w, &self.columns);
        w.push(") VALUES ");
        for (i, row) in self.rows.iter().enumerate() {
            if i > 0 {
                w.push(", ");
            }
            w.push("(");
            for (j, column) in self.columns.iter().enumerate() {
                if j > 0 {
                    w.push(", ");
                }
                w.push_value(row.get(column).cloned().unwrap_or(SqlValue::Null));
            }
            w.push(")");
        }

        if let OnConflict::Update { keys, columns } = &self.on_conflict {
            for key in keys {
                w.push(" ON CONFLICT (");
                write_ident_list(w, key);
                w.push(")");
                if columns.is_empty() {
                    w.push(" DO NOTHING");
                    continue;
                }
                w.push(" DO UPDATE SET ");
                for (i, column) in columns.iter().enumerate() {
                    if i > 0 {
                        w.push(", ");
                    }
                    w.push_ident(column);
                    w.push(" = excluded.");
                    w.push_ident(column);
                }
            }
        }
    }
}

fn common_columns(table: &Table, rows: &[CoercedRecord]) -> Result<Vec<String>> {
    let first = rows
        .first()
        .ok_or_else(|| SqlmateError::Query("no records to write".to_string()))?;
    let columns: Vec<String> = first.keys().cloned().collect();
    if columns.is_empty() {
        return Err(SqlmateError::Query("records have no columns".to_string()));
    }
    for column in &columns {
        column_expr(table, column)?;
    }
    for (i, row) in rows.iter().enumerate().skip(1) {
        if !row.keys().eq(columns.iter()) {
            return Err(SqlmateError::Query(format!(
                "record {} has different columns than the first record",
                i
            )));
        }
    }
    Ok(columns)
}

#[derive(Debug, Clone, PartialEq)]
pub struct Update {
    table: Arc<Table>,
    assignments: CoercedRecord,
    filter: Option<Expr>,
}

impl Update {
    pub fn build(table: Arc<Table>, assignments: CoercedRecord, filter: &Filter) -> Result<Self> {
        if assignments.is_empty() {
            return Err(SqlmateError::Query("update needs at least one column".to_string()));
        }
        for column in assignments.keys() {
            column_expr(&table, column)?;
        }
        let filter = where_clause(&table, filter)?;
        Ok(Update {
            table,
            assignments,
            filter,
        })
    }

    fn write(&self, w: &mut SqlWriter) {
        w.push("UPDATE ");
        w.push_ident(&self.table.name);
        w.push(" SET ");
        for (i, (column, value)) in self.assignments.iter().enumerate() {
            if i > 0 {
                w.push(", ");
            }
            w.push_ident(column);
            w.push(" = ");
            w.push_value(value.clone());
        }
        write_where(w, &self.filter);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Delete {
    table: Arc<Table>,
    filter: Option<Expr>,
}

impl Delete {
    /// An empty filter deletes every row.
    pub fn build(table: Arc<Table>, filter: &Filter) -> Result<Self> {
        let filter = where_clause(&table, filter)?;
        Ok(Delete { table, filter })
    }

    fn write(&self, w: &mut SqlWriter) {
        w.push("DELETE FROM ");
        w.push_ident(&self.table.name);
        write_where(w, &self.filter);
    }
}

fn write_where(w: &mut SqlWriter, filter: &Option<Expr>) {
    if let Some(expr) = filter {
        w.push(" WHERE ");
        expr.write(w);
    }
}

fn write_ident_list(w: &mut SqlWriter, idents: &[String]) {
    for (i, ident) in idents.iter().enumerate() {
        if i > 0 {
            w.push(", ");
        }
        w.push_ident(ident);
    }
}

/// Any statement the client can execute.
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    Select(Select),
    Insert(Insert),
    Update(Update),
    Delete(Delete),
    /// Caller-supplied SQL
    Text { sql: String, params: Params },
}

impl Statement {
    pub fn kind(&self) -> StatementType {
        match self {
            Statement::Select(_) => StatementType::Select,
            Statement::Insert(_) => StatementType::Insert,
            Statement::Update(_) => StatementType::Update,
            Statement::Delete(_) => StatementType::Delete,
            Statement::Text { sql, .. } => StatementType::classify(sql),
        }
    }

    /// SQL with `?N` placeholders plus the values to bind.
    pub fn compile(&self) -> CompiledQuery {
        if let Statement::Text { sql, params } = self {
            return CompiledQuery::text(sql, params.clone());
        }
        let mut w = SqlWriter::parameterized();
        self.write(&mut w);
        let (sql, values) = w.finish();
        let params = if values.is_empty() {
            Params::None
        } else {
            Params::Positional(values)
        };
        CompiledQuery {
            sql,
            params,
            kind: self.kind(),
        }
    }

    /// SQL with values rendered inline. Caller-supplied SQL is returned as is.
    pub fn textualize(&self) -> String {
        if let Statement::Text { sql, .. } = self {
            return sql.clone();
        }
        let mut w = SqlWriter::inline();
        self.write(&mut w);
        w.finish().0
    }

    fn write(&self, w: &mut SqlWriter) {
        match self {
            Statement::Select(s) => s.write(w),
            Statement::Insert(s) => s.write(w),
            Statement::Update(s) => s.write(w),
            Statement::Delete(s) => s.write(w),
            Statement::Text { sql, .. } => w.push(sql),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::{equal_to, greater_than};
    use crate::core::db::schema::{Column, Index};

    fn table() -> Arc<Table> {
        let column = |name: &str, type_name: &str, pk: u32| Column {
            name: name.to_string(),
            type_name: type_name.to_string(),
            notnull: pk > 0,
            pk,
            dflt_value: None,
        };
        Arc::new(Table {
            name: "items".to_string(),
            columns: vec![
                column("id", "INTEGER", 1),
                column("sku", "VARCHAR(32)", 0),
                column("qty", "INTEGER", 0),
            ],
            indexes: vec![Index {
                name: "idx_items_sku".to_string(),
                unique: true,
                columns: vec!["sku".to_string()],
            }],
            foreign_keys: Vec::new(),
        })
    }

    fn record(pairs: &[(&str, SqlValue)]) -> CoercedRecord {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn test_select_compile_and_textualize() {
        let filter = Filter::new().with("qty", greater_than(5, false, false));
        let options = SelectOptions::new()
            .columns(["id", "sku"])
            .order_by("id")
            .reverse(true)
            .limit(10)
            .offset(20);
        let stmt = Statement::Select(Select::build(table(), &filter, &options).unwrap());

        let compiled = stmt.compile();
        assert_eq!(
            compiled.sql,
            "SELECT \"items\".\"id\", \"items\".\"sku\" FROM \"items\" WHERE \"items\".\"qty\" > ?1 \
             ORDER BY \"items\".\"id\" DESC LIMIT 10 OFFSET 20"
        );
        assert_eq!(compiled.params, Params::Positional(vec![SqlValue::Integer(5)]));
        assert_eq!(compiled.kind, StatementType::Select);
        assert!(stmt.textualize().contains("\"items\".\"qty\" > 5"));
    }

    #[test]
    fn test_select_all_distinct() {
        let stmt = Statement::Select(
            Select::build(table(), &Filter::new(), &SelectOptions::new().distinct().offset(3)).unwrap(),
        );
        assert_eq!(stmt.textualize(), "SELECT DISTINCT * FROM \"items\" LIMIT -1 OFFSET 3");
        assert_eq!(stmt.compile().params, Params::None);
    }

    #[test]
    fn test_select_rejects_unknown_columns() {
        let bad = SelectOptions::new().columns(["nope"]);
        assert!(matches!(
            Select::build(table(), &Filter::new(), &bad),
            Err(SqlmateError::UnknownColumn { .. })
        ));
        let bad_order = SelectOptions::new().order_by("nope");
        assert!(Select::build(table(), &Filter::new(), &bad_order).is_err());
    }

    #[test]
    fn test_multi_row_insert() {
        let rows = vec![
            record(&[("sku", SqlValue::Text("a".into())), ("qty", SqlValue::Integer(1))]),
            record(&[("sku", SqlValue::Text("b".into())), ("qty", SqlValue::Integer(2))]),
        ];
        let stmt = Statement::Insert(Insert::build(table(), rows).unwrap());
        let compiled = stmt.compile();
        assert_eq!(
            compiled.sql,
            "INSERT INTO \"items\" (\"qty\", \"sku\") VALUES (?1, ?2), (?3, ?4)"
        );
        assert_eq!(compiled.params.len(), 4);
        assert_eq!(
            stmt.textualize(),
            "INSERT INTO \"items\" (\"qty\", \"sku\") VALUES (1, 'a'), (2, 'b')"
        );
    }

    #[test]
    fn test_insert_requires_matching_keys() {
        let rows = vec![
            record(&[("sku", SqlValue::Text("a".into()))]),
            record(&[("qty", SqlValue::Integer(2))]),
        ];
        assert!(matches!(Insert::build(table(), rows), Err(SqlmateError::Query(_))));
        assert!(matches!(Insert::build(table(), vec![]), Err(SqlmateError::Query(_))));
    }

    #[test]
    fn test_upsert_clause_per_unique_key() {
        let rows = vec![record(&[
            ("id", SqlValue::Integer(1)),
            ("sku", SqlValue::Text("a".into())),
            ("qty", SqlValue::Integer(3)),
        ])];
        let stmt = Statement::Insert(Insert::upsert(table(), rows.clone(), None).unwrap());
        let sql = stmt.textualize();
        assert!(sql.contains(
            "ON CONFLICT (\"id\") DO UPDATE SET \"id\" = excluded.\"id\", \"sku\" = excluded.\"sku\", \"qty\" = excluded.\"qty\""
        ));
        assert!(sql.contains("ON CONFLICT (\"sku\") DO UPDATE SET"));

        let only_qty = Statement::Insert(Insert::upsert(table(), rows, Some(vec!["qty".to_string()])).unwrap());
        assert!(only_qty
            .textualize()
            .ends_with("ON CONFLICT (\"sku\") DO UPDATE SET \"qty\" = excluded.\"qty\""));
    }

    #[test]
    fn test_update_and_delete() {
        let filter = Filter::new().with("sku", equal_to("a", false, None));
        let update = Statement::Update(
            Update::build(table(), record(&[("qty", SqlValue::Integer(9))]), &filter).unwrap(),
        );
        assert_eq!(
            update.textualize(),
            "UPDATE \"items\" SET \"qty\" = 9 WHERE \"items\".\"sku\" = 'a'"
        );
        assert!(Update::build(table(), CoercedRecord::new(), &filter).is_err());

        let delete = Statement::Delete(Delete::build(table(), &Filter::new()).unwrap());
        assert_eq!(delete.textualize(), "DELETE FROM \"items\"");
        assert_eq!(delete.compile().kind, StatementType::Delete);
    }

    #[test]
    fn test_text_statement_passthrough() {
        let stmt = Statement::Text {
            sql: "SELECT 1".to_string(),
            params: Params::None,
        };
        assert_eq!(stmt.textualize(), "SELECT 1");
        assert_eq!(stmt.compile().kind, StatementType::Select);
    }
}
