/// Query Execution Module
///
/// Runs one compiled statement on one connection and collects the raw result
/// set. Everything above this layer (concurrency limits, timeouts, response
/// objects) lives in the client; this module only talks to SQLite.

use crate::core::{Result, SqlmateError};
use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, ErrorCode, Statement};
use sqlparser::ast::Statement as AstStatement;
use sqlparser::dialect::SQLiteDialect;
use sqlparser::parser::Parser;
use tracing::{debug, trace};

/// Parameters bound to a compiled statement.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Params {
    #[default]
    None,
    /// Bound to `?1`, `?2`, ... in order
    Positional(Vec<SqlValue>),
    /// Bound by name; a missing `:` prefix is added
    Named(Vec<(String, SqlValue)>),
}

impl Params {
    pub fn named<K: Into<String>, V: Into<SqlValue>>(pairs: impl IntoIterator<Item = (K, V)>) -> Self {
        Params::Named(pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }

    pub fn len(&self) -> usize {
        match self {
            Params::None => 0,
            Params::Positional(values) => values.len(),
            Params::Named(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The unprocessed result of one statement.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawResult {
    /// Column names from the result set (empty for plain mutations)
    pub columns: Vec<String>,
    /// Declared column types, where SQLite knows them
    pub decl_types: Vec<Option<String>>,
    /// Row data as SQLite storage values
    pub rows: Vec<Vec<SqlValue>>,
    /// Rows changed by a mutation
    pub rows_affected: u64,
    /// Rowid of the last inserted row, for inserts
    pub last_insert_id: Option<i64>,
}

/// Executes statements on a borrowed connection.
pub struct QueryExecutor<'a> {
    connection: &'a Connection,
}

impl<'a> QueryExecutor<'a> {
    /// Creates a new QueryExecutor for the given connection
    pub fn new(connection: &'a Connection) -> Self {
        QueryExecutor { connection }
    }

    /// Executes one statement and collects its result.
    ///
    /// # Arguments
    ///
    /// * `sql` - The statement text with `?N` or `:name` placeholders
    /// * `params` - Values bound to the placeholders
    /// * `kind` - Classification used to decide on transaction wrapping
    /// * `auto_commit` - Whether a mutation's transaction is committed
    ///
    /// Mutations run inside a transaction that is committed only when
    /// `auto_commit` is set and rolled back otherwise. Other statements run
    /// as-is.
    ///
    /// # Errors
    ///
    /// Returns `SqlmateError::Database` for any SQLite failure and
    /// `SqlmateError::Query` when the parameters don't match the statement.
    pub fn execute(
        &self,
        sql: &str,
        params: &Params,
        kind: StatementType,
        auto_commit: bool,
    ) -> Result<RawResult> {
        trace!(%sql, params = params.len(), ?kind, "executing statement");
        if kind.is_mutation() {
            let tx = self.connection.unchecked_transaction()?;
            let raw = run_statement(&tx, sql, params, kind)?;
            if auto_commit {
                tx.commit()?;
            } else {
                debug!("rolling back uncommitted mutation");
                tx.rollback()?;
            }
            Ok(raw)
        } else {
            run_statement(self.connection, sql, params, kind)
        }
    }
}

fn run_statement(conn: &Connection, sql: &str, params: &Params, kind: StatementType) -> Result<RawResult> {
    let mut stmt = conn.prepare(sql)?;
    bind_params(&mut stmt, params)?;

    let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
    let decl_types: Vec<Option<String>> = stmt
        .columns()
        .iter()
        .map(|c| c.decl_type().map(String::from))
        .collect();
    let column_count = columns.len();

    let mut rows = Vec::new();
    if column_count == 0 {
        stmt.raw_execute()?;
    } else {
        let mut cursor = stmt.raw_query();
        while let Some(row) = cursor.next()? {
            let mut values = Vec::with_capacity(column_count);
            for i in 0..column_count {
                values.push(row.get::<_, SqlValue>(i)?);
            }
            rows.push(values);
        }
    }

    let rows_affected = if kind.is_mutation() { conn.changes() as u64 } else { 0 };
    let last_insert_id = (kind == StatementType::Insert).then(|| conn.last_insert_rowid());

    Ok(RawResult {
        columns,
        decl_types,
        rows,
        rows_affected,
        last_insert_id,
    })
}

fn bind_params(stmt: &mut Statement<'_>, params: &Params) -> Result<()> {
    let expected = stmt.parameter_count();
    match params {
        Params::None => {
            if expected != 0 {
                return Err(SqlmateError::Query(format!(
                    "statement expects {} parameters, none given",
                    expected
                )));
            }
        }
        Params::Positional(values) => {
            if values.len() != expected {
                return Err(SqlmateError::Query(format!(
                    "statement expects {} parameters, {} given",
                    expected,
                    values.len()
                )));
            }
            for (i, value) in values.iter().enumerate() {
                stmt.raw_bind_parameter(i + 1, value)?;
            }
        }
        Params::Named(values) => {
            for (name, value) in values {
                let key = if name.starts_with([':', '@', '$']) {
                    name.clone()
                } else {
                    format!(":{}", name)
                };
                let index = stmt.parameter_index(&key)?.ok_or_else(|| {
                    SqlmateError::Query(format!("statement has no parameter named '{}'", key))
                })?;
                stmt.raw_bind_parameter(index, value)?;
            }
        }
    }
    Ok(())
}

/// Message fragments marking a connection that can no longer be trusted.
const FATAL_SIGNATURES: &[&str] = &[
    "packet sequence number wrong",
    "commands out of sync",
    "lost connection",
    "can't connect",
    "database disk image is malformed",
    "file is not a database",
];

/// Whether `err` means the connection must be invalidated rather than pooled.
pub fn is_fatal_protocol_error(err: &SqlmateError) -> bool {
    if let Some(rusqlite::Error::SqliteFailure(failure, _)) = err.as_sqlite() {
        if matches!(
            failure.code,
            ErrorCode::DatabaseCorrupt
                | ErrorCode::NotADatabase
                | ErrorCode::SystemIoFailure
                | ErrorCode::CannotOpen
                | ErrorCode::ApiMisuse
        ) {
            return true;
        }
    }
    let msg = err.to_string().to_lowercase();
    FATAL_SIGNATURES.iter().any(|sig| msg.contains(sig))
}

/// Represents different SQL statement types for introspection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementType {
    /// SELECT statement
    Select,
    /// INSERT or REPLACE statement
    Insert,
    /// UPDATE statement
    Update,
    /// DELETE statement
    Delete,
    /// CREATE statement
    Create,
    /// DROP statement
    Drop,
    /// ALTER statement
    Alter,
    /// BEGIN/COMMIT/ROLLBACK transaction commands
    Transaction,
    /// Other statement types
    Other,
}

impl StatementType {
    /// Classifies a statement, parsing it when possible.
    ///
    /// Falls back to keyword classification for SQLite syntax the parser
    /// doesn't know (PRAGMA, upserts, ...).
    pub fn classify(sql: &str) -> Self {
        match Parser::parse_sql(&SQLiteDialect {}, sql) {
            Ok(statements) => match statements.first() {
                Some(AstStatement::Query(_)) => StatementType::Select,
                Some(AstStatement::Insert { .. }) => StatementType::Insert,
                Some(AstStatement::Update { .. }) => StatementType::Update,
                Some(AstStatement::Delete { .. }) => StatementType::Delete,
                _ => Self::from_sql(sql),
            },
            Err(_) => Self::from_sql(sql),
        }
    }

    /// Determines the statement type from its leading keyword
    pub fn from_sql(sql: &str) -> Self {
        let sql_upper = sql.trim().to_uppercase();

        if sql_upper.starts_with("SELECT") || sql_upper.starts_with("VALUES") {
            StatementType::Select
        } else if sql_upper.starts_with("INSERT") || sql_upper.starts_with("REPLACE") {
            StatementType::Insert
        } else if sql_upper.starts_with("UPDATE") {
            StatementType::Update
        } else if sql_upper.starts_with("DELETE") {
            StatementType::Delete
        } else if sql_upper.starts_with("CREATE") {
            StatementType::Create
        } else if sql_upper.starts_with("DROP") {
            StatementType::Drop
        } else if sql_upper.starts_with("ALTER") {
            StatementType::Alter
        } else if sql_upper == "BEGIN"
            || sql_upper == "COMMIT"
            || sql_upper == "ROLLBACK"
            || sql_upper.starts_with("BEGIN TRANSACTION")
            || sql_upper.starts_with("COMMIT TRANSACTION")
            || sql_upper.starts_with("ROLLBACK TRANSACTION")
        {
            StatementType::Transaction
        } else {
            StatementType::Other
        }
    }

    pub fn is_select(self) -> bool {
        self == StatementType::Select
    }

    /// Statements that change data or schema and are committed explicitly.
    pub fn is_mutation(self) -> bool {
        matches!(
            self,
            StatementType::Insert
                | StatementType::Update
                | StatementType::Delete
                | StatementType::Create
                | StatementType::Drop
                | StatementType::Alter
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    fn setup_test_table(conn: &Connection) {
        conn.execute_batch(
            "
            CREATE TABLE test (
                id INTEGER PRIMARY KEY,
                name TEXT,
                value REAL,
                active BOOLEAN DEFAULT 1
            );
            INSERT INTO test (name, value) VALUES ('Alice', 123.45);
            INSERT INTO test (name, value) VALUES ('Bob', 678.90);
            INSERT INTO test (name, value) VALUES (NULL, NULL);
        ",
        )
        .unwrap();
    }

    #[test]
    fn test_query_execution() {
        let conn = Connection::open_in_memory().unwrap();
        setup_test_table(&conn);

        let executor = QueryExecutor::new(&conn);
        let result = executor
            .execute("SELECT * FROM test ORDER BY id", &Params::None, StatementType::Select, false)
            .unwrap();

        assert_eq!(result.columns, vec!["id", "name", "value", "active"]);
        assert_eq!(result.decl_types[3].as_deref(), Some("BOOLEAN"));
        assert_eq!(result.rows.len(), 3);
        assert_eq!(result.rows[0][1], SqlValue::Text("Alice".to_string()));
        assert_eq!(result.rows[2][1], SqlValue::Null);
    }

    #[test]
    fn test_named_and_positional_params() {
        let conn = Connection::open_in_memory().unwrap();
        setup_test_table(&conn);
        let executor = QueryExecutor::new(&conn);

        let named = Params::named([("name", "Bob".to_string())]);
        let result = executor
            .execute("SELECT id FROM test WHERE name = :name", &named, StatementType::Select, false)
            .unwrap();
        assert_eq!(result.rows, vec![vec![SqlValue::Integer(2)]]);

        let positional = Params::Positional(vec![SqlValue::Integer(1)]);
        let result = executor
            .execute("SELECT name FROM test WHERE id = ?1", &positional, StatementType::Select, false)
            .unwrap();
        assert_eq!(result.rows, vec![vec![SqlValue::Text("Alice".to_string())]]);

        let err = executor
            .execute("SELECT name FROM test WHERE id = ?1", &Params::None, StatementType::Select, false)
            .unwrap_err();
        assert!(err.to_string().contains("expects 1 parameters"));
    }

    #[test]
    fn test_mutation_commit_and_rollback() {
        let conn = Connection::open_in_memory().unwrap();
        setup_test_table(&conn);
        let executor = QueryExecutor::new(&conn);

        let result = executor
            .execute("DELETE FROM test WHERE name IS NULL", &Params::None, StatementType::Delete, false)
            .unwrap();
        assert_eq!(result.rows_affected, 1);
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM test", [], |r| r.get(0)).unwrap();
        assert_eq!(count, 3, "uncommitted delete must roll back");

        let result = executor
            .execute("INSERT INTO test (name) VALUES ('Cara')", &Params::None, StatementType::Insert, true)
            .unwrap();
        assert_eq!(result.rows_affected, 1);
        assert_eq!(result.last_insert_id, Some(4));
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM test", [], |r| r.get(0)).unwrap();
        assert_eq!(count, 4);
    }

    #[test]
    fn test_query_error_handling() {
        let conn = Connection::open_in_memory().unwrap();
        let executor = QueryExecutor::new(&conn);
        let result = executor.execute(
            "SELECT * FROM nonexistent_table",
            &Params::None,
            StatementType::Select,
            false,
        );
        match result {
            Err(SqlmateError::Database(e)) => assert!(e.to_string().contains("no such table")),
            other => panic!("Expected Database error, got {:?}", other),
        }
    }

    #[test]
    fn test_statement_type_classification() {
        assert_eq!(StatementType::from_sql("SELECT * FROM users"), StatementType::Select);
        assert_eq!(StatementType::from_sql("INSERT INTO users VALUES (1, 'test')"), StatementType::Insert);
        assert_eq!(StatementType::from_sql("UPDATE users SET name = 'new'"), StatementType::Update);
        assert_eq!(StatementType::from_sql("DELETE FROM users WHERE id = 1"), StatementType::Delete);
        assert_eq!(StatementType::from_sql("CREATE TABLE test (id INTEGER)"), StatementType::Create);
        assert_eq!(StatementType::from_sql("DROP TABLE test"), StatementType::Drop);
        assert_eq!(StatementType::from_sql("BEGIN"), StatementType::Transaction);
        assert_eq!(StatementType::from_sql("PRAGMA foreign_keys = ON"), StatementType::Other);
    }

    #[test]
    fn test_classify_parses_common_table_expressions() {
        let sql = "WITH recent AS (SELECT * FROM users) SELECT * FROM recent";
        assert_eq!(StatementType::from_sql(sql), StatementType::Other);
        assert_eq!(StatementType::classify(sql), StatementType::Select);
        assert!(StatementType::classify("PRAGMA table_info('users')") == StatementType::Other);
        assert!(StatementType::classify("DELETE FROM users").is_mutation());
    }

    #[test]
    fn test_fatal_protocol_classification() {
        let err = SqlmateError::Query("Commands out of sync; you can't run this command now".to_string());
        assert!(is_fatal_protocol_error(&err));

        let corrupt = SqlmateError::Database(rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(11), // SQLITE_CORRUPT
            None,
        ));
        assert!(is_fatal_protocol_error(&corrupt));

        let ordinary = SqlmateError::Query("no such table: users".to_string());
        assert!(!is_fatal_protocol_error(&ordinary));
    }
}
