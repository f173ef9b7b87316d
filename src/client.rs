//! The asynchronous client.
//!
//! `Client` ties the layers together: it owns one engine per database,
//! caches reflected tables and catalog metadata, limits how many
//! statements run at once, enforces the execution deadline and raises
//! events on failures.

use crate::coerce;
use crate::condition::Filter;
use crate::config::{ClientOptions, Config};
use crate::core::db::auth::Authorization;
use crate::core::db::engine::{Engine, EngineConfig, EngineManager};
use crate::core::db::query::{is_fatal_protocol_error, Params, QueryExecutor};
use crate::core::db::schema::Table;
use crate::core::{Result, SqlmateError};
use crate::events::{EventHandlers, HandlerResult, QueryErrorEvent};
use crate::pages::{SelectPages, WriteMode, WritePages};
use crate::response::Response;
use crate::schema_cache::{self, ColumnMetadataMap, TableHandle, HEADER_INFO_QUERY};
use crate::statement::{CompiledQuery, Delete, Insert, Select, SelectOptions, Statement, Update};
use crate::value::{CoercedRecord, Record};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

/// Minimum deadline for catalog queries, in seconds.
const SCHEMA_QUERY_TIMEOUT_FLOOR: u64 = 60;

type CacheKey = (String, String);

/// Builder for `Client`.
pub struct ClientBuilder {
    auth: Authorization,
    options: ClientOptions,
    engine: EngineConfig,
    events: EventHandlers,
}

impl ClientBuilder {
    pub fn options(mut self, options: ClientOptions) -> Self {
        self.options = options;
        self
    }

    pub fn max_db_concurrency(mut self, limit: usize) -> Self {
        self.options.max_db_concurrency = limit;
        self
    }

    /// Per-statement deadline in seconds.
    pub fn db_exec_timeout(mut self, seconds: u64) -> Self {
        self.options.db_exec_timeout = seconds;
        self
    }

    pub fn ignore_event_errors(mut self, ignore: bool) -> Self {
        self.options.ignore_event_errors = ignore;
        self
    }

    pub fn auto_raise_errors(mut self, raise: bool) -> Self {
        self.options.auto_raise_errors = raise;
        self
    }

    pub fn debug(mut self, debug: bool) -> Self {
        self.options.debug = debug;
        self
    }

    pub fn engine_config(mut self, config: EngineConfig) -> Self {
        self.engine = config;
        self
    }

    pub fn on_new_table<F>(mut self, handler: F) -> Self
    where
        F: Fn(&TableHandle) -> HandlerResult + Send + Sync + 'static,
    {
        self.events = self.events.on_new_table(handler);
        self
    }

    pub fn on_query_error<F>(mut self, handler: F) -> Self
    where
        F: Fn(&QueryErrorEvent<'_>) -> HandlerResult + Send + Sync + 'static,
    {
        self.events = self.events.on_query_error(handler);
        self
    }

    pub fn build(self) -> Client {
        let database = self.auth.default_database().to_string();
        let permits = self.options.effective_concurrency();
        Client {
            engines: EngineManager::new(self.auth, self.engine),
            database,
            semaphore: Arc::new(Semaphore::new(permits)),
            options: self.options,
            tables: RwLock::new(HashMap::new()),
            header_info: RwLock::new(HashMap::new()),
            events: self.events,
        }
    }
}

/// Schema-aware SQLite client.
pub struct Client {
    engines: EngineManager,
    database: String,
    options: ClientOptions,
    semaphore: Arc<Semaphore>,
    tables: RwLock<HashMap<CacheKey, TableHandle>>,
    header_info: RwLock<HashMap<CacheKey, Arc<ColumnMetadataMap>>>,
    events: EventHandlers,
}

impl Client {
    /// A client with default options.
    pub fn new(auth: Authorization) -> Self {
        Self::builder(auth).build()
    }

    pub fn builder(auth: Authorization) -> ClientBuilder {
        ClientBuilder {
            auth,
            options: ClientOptions::default(),
            engine: EngineConfig::default(),
            events: EventHandlers::default(),
        }
    }

    /// A client configured from `SQLMATE_*` environment variables.
    pub fn env() -> Result<Self> {
        Ok(Self::new(Authorization::env()?))
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        config.validate()?;
        Ok(Self::builder(config.auth.authorization()?)
            .options(config.client.clone())
            .engine_config(config.engine.clone())
            .build())
    }

    /// The default database.
    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn auth(&self) -> &Authorization {
        self.engines.auth()
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    pub fn max_db_concurrency(&self) -> usize {
        self.options.effective_concurrency()
    }

    /// Replaces the concurrency limit; 0 restores the default.
    ///
    /// Statements already waiting keep the old limit.
    pub fn set_max_db_concurrency(&mut self, limit: usize) {
        self.options.max_db_concurrency = limit;
        self.semaphore = Arc::new(Semaphore::new(self.options.effective_concurrency()));
    }

    /// Per-statement deadline.
    pub fn exec_timeout(&self) -> Duration {
        Duration::from_secs(self.options.db_exec_timeout)
    }

    /// Deadline for catalog queries: at least a minute, and at least twice
    /// the statement deadline.
    pub fn schema_timeout(&self) -> Duration {
        Duration::from_secs(
            SCHEMA_QUERY_TIMEOUT_FLOOR.max(self.options.db_exec_timeout.saturating_mul(2)),
        )
    }

    /// The engine for `database`, created on first use.
    pub fn engine(&self, database: &str) -> Arc<Engine> {
        self.engines.get_engine(self.resolve_db(database))
    }

    /// Disposes every engine's pool. Engines are recreated on next use.
    pub fn kill_engines(&self) {
        info!(engines = self.engines.engine_count(), "disposing all engines");
        self.engines.dispose_all();
    }

    fn resolve_db<'a>(&'a self, database: &'a str) -> &'a str {
        if database.is_empty() {
            &self.database
        } else {
            database
        }
    }

    fn new_response(&self, database: &str, query: Option<String>) -> Response {
        Response::new(Some(database), query, self.options.auto_raise_errors)
    }

    /// Runs `query` on an engine, filling in `response`.
    ///
    /// Waits for a concurrency permit, checks out a connection and runs the
    /// statement on the blocking pool under `timeout` (the client deadline
    /// when `None`). On timeout the statement is interrupted. A connection
    /// that failed with a fatal protocol error is invalidated instead of
    /// being returned to its pool. On any failure the response is marked
    /// failed and the error is returned.
    pub async fn execute_into(
        &self,
        response: &mut Response,
        engine: &Arc<Engine>,
        query: &CompiledQuery,
        auto_commit: bool,
        timeout: Option<Duration>,
    ) -> Result<()> {
        let result = self.execute_inner(engine, query, auto_commit, timeout).await;
        match result {
            Ok(raw) => response.receive(raw),
            Err(err) => {
                response.fail(&err);
                Err(err)
            }
        }
    }

    async fn execute_inner(
        &self,
        engine: &Arc<Engine>,
        query: &CompiledQuery,
        auto_commit: bool,
        timeout: Option<Duration>,
    ) -> Result<crate::core::db::query::RawResult> {
        let deadline = timeout.unwrap_or_else(|| self.exec_timeout());
        let _permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|e| SqlmateError::Internal(e.to_string()))?;

        let checkout_engine = Arc::clone(engine);
        let conn = tokio::task::spawn_blocking(move || checkout_engine.checkout()).await??;
        let canceller = conn.canceller()?;

        if self.options.debug {
            debug!(database = engine.database(), sql = %query.sql, "executing");
        }

        let sql = query.sql.clone();
        let params = query.params.clone();
        let kind = query.kind;
        let task = tokio::task::spawn_blocking(move || {
            let result = conn
                .connection()
                .and_then(|c| QueryExecutor::new(c).execute(&sql, &params, kind, auto_commit));
            (conn, result)
        });

        let (conn, result) = match tokio::time::timeout(deadline, task).await {
            Ok(joined) => joined?,
            Err(_) => {
                let interrupted = canceller.cancel();
                warn!(
                    database = engine.database(),
                    seconds = deadline.as_secs_f64(),
                    interrupted,
                    "statement timed out"
                );
                return Err(SqlmateError::Timeout {
                    seconds: deadline.as_secs_f64(),
                });
            }
        };

        match result {
            Ok(raw) => Ok(raw),
            Err(err) => {
                if is_fatal_protocol_error(&err) {
                    warn!(database = engine.database(), error = %err, "invalidating connection");
                    conn.invalidate();
                }
                Err(err)
            }
        }
    }

    /// Runs a compiled statement and returns its response.
    pub async fn execute(
        &self,
        database: &str,
        query: &CompiledQuery,
        auto_commit: bool,
        timeout: Option<Duration>,
    ) -> Result<Response> {
        let database = self.resolve_db(database);
        let engine = self.engine(database);
        let mut response = self.new_response(database, Some(query.sql.clone()));
        self.execute_into(&mut response, &engine, query, auto_commit, timeout)
            .await?;
        Ok(response)
    }

    /// Runs caller-supplied SQL.
    ///
    /// Non-select statements are committed. Failures raise `on_query_error`
    /// once before the error is returned.
    pub async fn run(
        &self,
        query: &str,
        database: Option<&str>,
        params: Params,
        timeout: Option<Duration>,
    ) -> Result<Response> {
        let database = self.resolve_db(database.unwrap_or(""));
        let compiled = CompiledQuery::text(query, params);
        let auto_commit = !compiled.kind.is_select();
        let engine = self.engine(database);
        let mut response = self.new_response(database, Some(compiled.sql.clone()));

        let outcome = self
            .execute_into(&mut response, &engine, &compiled, auto_commit, timeout)
            .await;
        self.finish("run", response, outcome)
    }

    fn finish(&self, operation: &'static str, mut response: Response, outcome: Result<()>) -> Result<Response> {
        match outcome {
            Ok(()) => Ok(response),
            Err(err) => {
                if response.error_info.is_none() {
                    response.fail(&err);
                }
                error!(
                    operation,
                    database = response.database.as_deref().unwrap_or(""),
                    error = %err,
                    "an error occurred running a query"
                );
                self.notify_query_error(&err, &response)?;
                Err(err)
            }
        }
    }

    fn notify_query_error(&self, err: &SqlmateError, response: &Response) -> Result<()> {
        let event = QueryErrorEvent::new(err, response);
        self.events.query_error(&event, self.options.ignore_event_errors)
    }

    /// Reflects `table` or returns the cached handle.
    ///
    /// The first reflection of a table raises `on_new_table`. An expired
    /// handle is reflected again without raising the event.
    pub async fn get_table(&self, database: &str, table: &str) -> Result<Arc<Table>> {
        let database = self.resolve_db(database);
        let key = (database.to_string(), table.to_string());
        let cached = read(&self.tables).get(&key).cloned();

        match cached {
            Some(handle) if !handle.expired => Ok(handle.table),
            Some(_) => {
                let handle = TableHandle::new(database, self.reflect(database, table).await?);
                debug!(database, table, "reloaded expired table");
                write(&self.tables).insert(key, handle.clone());
                Ok(handle.table)
            }
            None => {
                let handle = TableHandle::new(database, self.reflect(database, table).await?);
                let handle = {
                    let mut tables = write(&self.tables);
                    tables.entry(key).or_insert(handle).clone()
                };
                debug!(database, table, "loaded table");
                self.events
                    .new_table(&handle, self.options.ignore_event_errors)?;
                Ok(handle.table)
            }
        }
    }

    async fn reflect(&self, database: &str, table: &str) -> Result<Table> {
        let engine = self.engine(database);
        let db = database.to_string();
        let name = table.to_string();
        let task = tokio::task::spawn_blocking(move || {
            let conn = engine.checkout()?;
            Table::reflect(conn.connection()?, &db, &name)
        });
        match tokio::time::timeout(self.schema_timeout(), task).await {
            Ok(joined) => joined?,
            Err(_) => Err(SqlmateError::Timeout {
                seconds: self.schema_timeout().as_secs_f64(),
            }),
        }
    }

    /// Marks a table handle stale and drops its catalog metadata.
    pub fn expire_table(&self, database: &str, table: &str) {
        let key = (self.resolve_db(database).to_string(), table.to_string());
        if let Some(handle) = write(&self.tables).get_mut(&key) {
            handle.expired = true;
        }
        write(&self.header_info).remove(&key);
    }

    /// Reflects tables up front so later calls hit the cache.
    pub async fn preload_tables(&self, tables: &[(&str, &str)]) -> Result<()> {
        for (database, table) in tables {
            self.get_table(database, table).await?;
        }
        Ok(())
    }

    /// Catalog metadata for `table`, cached per `(database, table)`.
    ///
    /// # Errors
    ///
    /// `SqlmateError::SchemaQuery` when the catalog query fails or returns
    /// no columns; `SqlmateError::UnknownType` for an unregistered type.
    pub async fn get_header_info(&self, database: &str, table: &str) -> Result<Arc<ColumnMetadataMap>> {
        let database = self.resolve_db(database);
        let key = (database.to_string(), table.to_string());
        if let Some(cached) = read(&self.header_info).get(&key) {
            return Ok(Arc::clone(cached));
        }

        let params = Params::named([
            ("table_name", table.to_string()),
            ("schema", "main".to_string()),
        ]);
        let schema_error = |source: Option<SqlmateError>| SqlmateError::SchemaQuery {
            database: database.to_string(),
            table: table.to_string(),
            source: source.map(Box::new),
        };
        let response = self
            .run(HEADER_INFO_QUERY, Some(database), params, Some(self.schema_timeout()))
            .await
            .map_err(|e| schema_error(Some(e)))?;
        if !response.successful || response.is_empty() {
            return Err(schema_error(None));
        }

        let parsed = Arc::new(schema_cache::parse_header_rows(response.rows())?);
        let mut cache = write(&self.header_info);
        Ok(Arc::clone(cache.entry(key).or_insert(parsed)))
    }

    /// The cached catalog metadata, if any, without querying.
    pub fn header_info_cached(&self, database: &str, table: &str) -> Option<Arc<ColumnMetadataMap>> {
        let key = (self.resolve_db(database).to_string(), table.to_string());
        read(&self.header_info).get(&key).cloned()
    }

    /// Coerces records for `table_name`.
    ///
    /// With a reflected `table`, metadata is derived from it directly and
    /// unknown types are treated as text. Otherwise the catalog is queried
    /// (once per table) and unknown types are an error.
    pub async fn correct_types(
        &self,
        database: &str,
        table_name: &str,
        records: Vec<Record>,
        table: Option<&Table>,
    ) -> Result<Vec<CoercedRecord>> {
        let coldata = match table {
            Some(table) => Arc::new(schema_cache::derive_from_table(table)),
            None => self.get_header_info(database, table_name).await?,
        };
        coerce::correct_types(records, &coldata)
    }

    async fn run_statement(&self, response: &mut Response, database: &str, statement: &Statement) -> Result<()> {
        let compiled = statement.compile();
        response.query = Some(compiled.sql.clone());
        let engine = self.engine(database);
        let auto_commit = compiled.kind.is_mutation();
        self.execute_into(response, &engine, &compiled, auto_commit, None)
            .await
    }

    async fn select_statement(
        &self,
        database: &str,
        table: &str,
        filter: &Filter,
        options: &SelectOptions,
    ) -> Result<Statement> {
        let table = self.get_table(database, table).await?;
        Ok(Statement::Select(Select::build(table, filter, options)?))
    }

    async fn insert_statement(&self, database: &str, table: &str, records: Vec<Record>) -> Result<Statement> {
        let table = self.get_table(database, table).await?;
        let rows = self.correct_types(database, &table.name, records, Some(&table)).await?;
        Ok(Statement::Insert(Insert::build(table, rows)?))
    }

    async fn upsert_statement(
        &self,
        database: &str,
        table: &str,
        records: Vec<Record>,
        update_keys: Option<Vec<String>>,
    ) -> Result<Statement> {
        let table = self.get_table(database, table).await?;
        let rows = self.correct_types(database, &table.name, records, Some(&table)).await?;
        Ok(Statement::Insert(Insert::upsert(table, rows, update_keys)?))
    }

    async fn update_statement(&self, database: &str, table: &str, values: Record, filter: &Filter) -> Result<Statement> {
        let table = self.get_table(database, table).await?;
        let mut rows = self
            .correct_types(database, &table.name, vec![values], Some(&table))
            .await?;
        let assignments = rows.pop().unwrap_or_default();
        Ok(Statement::Update(Update::build(table, assignments, filter)?))
    }

    async fn delete_statement(&self, database: &str, table: &str, filter: &Filter) -> Result<Statement> {
        let table = self.get_table(database, table).await?;
        Ok(Statement::Delete(Delete::build(table, filter)?))
    }

    /// Selects rows matching `filter`.
    pub async fn select(
        &self,
        database: &str,
        table: &str,
        filter: &Filter,
        options: &SelectOptions,
    ) -> Result<Response> {
        let database = self.resolve_db(database);
        let mut response = self.new_response(database, None);
        let outcome = async {
            let statement = self.select_statement(database, table, filter, options).await?;
            self.run_statement(&mut response, database, &statement).await
        }
        .await;
        self.finish("select", response, outcome)
    }

    /// The select statement as SQL text with inline values.
    pub async fn select_sql(
        &self,
        database: &str,
        table: &str,
        filter: &Filter,
        options: &SelectOptions,
    ) -> Result<String> {
        let database = self.resolve_db(database);
        Ok(self
            .select_statement(database, table, filter, options)
            .await?
            .textualize())
    }

    /// Inserts records in one multi-row statement. Values are coerced to
    /// their columns' types first.
    pub async fn insert(&self, database: &str, table: &str, records: Vec<Record>) -> Result<Response> {
        let database = self.resolve_db(database);
        let mut response = self.new_response(database, None);
        let outcome = async {
            let statement = self.insert_statement(database, table, records).await?;
            self.run_statement(&mut response, database, &statement).await
        }
        .await;
        self.finish("insert", response, outcome)
    }

    pub async fn insert_sql(&self, database: &str, table: &str, records: Vec<Record>) -> Result<String> {
        let database = self.resolve_db(database);
        Ok(self.insert_statement(database, table, records).await?.textualize())
    }

    /// Inserts records, updating `update_keys` (all columns by default) of
    /// rows that conflict on any unique key.
    pub async fn upsert(
        &self,
        database: &str,
        table: &str,
        records: Vec<Record>,
        update_keys: Option<Vec<String>>,
    ) -> Result<Response> {
        let database = self.resolve_db(database);
        let mut response = self.new_response(database, None);
        let outcome = async {
            let statement = self
                .upsert_statement(database, table, records, update_keys)
                .await?;
            self.run_statement(&mut response, database, &statement).await
        }
        .await;
        self.finish("upsert", response, outcome)
    }

    pub async fn upsert_sql(
        &self,
        database: &str,
        table: &str,
        records: Vec<Record>,
        update_keys: Option<Vec<String>>,
    ) -> Result<String> {
        let database = self.resolve_db(database);
        Ok(self
            .upsert_statement(database, table, records, update_keys)
            .await?
            .textualize())
    }

    /// Sets `values` on every row matching `filter`.
    pub async fn update(&self, database: &str, table: &str, values: Record, filter: &Filter) -> Result<Response> {
        let database = self.resolve_db(database);
        let mut response = self.new_response(database, None);
        let outcome = async {
            let statement = self.update_statement(database, table, values, filter).await?;
            self.run_statement(&mut response, database, &statement).await
        }
        .await;
        self.finish("update", response, outcome)
    }

    pub async fn update_sql(&self, database: &str, table: &str, values: Record, filter: &Filter) -> Result<String> {
        let database = self.resolve_db(database);
        Ok(self
            .update_statement(database, table, values, filter)
            .await?
            .textualize())
    }

    /// Deletes rows matching `filter`; an empty filter deletes every row.
    pub async fn delete(&self, database: &str, table: &str, filter: &Filter) -> Result<Response> {
        let database = self.resolve_db(database);
        let mut response = self.new_response(database, None);
        let outcome = async {
            let statement = self.delete_statement(database, table, filter).await?;
            self.run_statement(&mut response, database, &statement).await
        }
        .await;
        self.finish("delete", response, outcome)
    }

    pub async fn delete_sql(&self, database: &str, table: &str, filter: &Filter) -> Result<String> {
        let database = self.resolve_db(database);
        Ok(self.delete_statement(database, table, filter).await?.textualize())
    }

    /// Deletes every row of `table`.
    pub async fn clear_table(&self, database: &str, table: &str) -> Result<Response> {
        self.delete(database, table, &Filter::new()).await
    }

    pub async fn clear_table_sql(&self, database: &str, table: &str) -> Result<String> {
        self.delete_sql(database, table, &Filter::new()).await
    }

    /// Pages through a select, `page_size` rows at a time.
    pub fn select_pages(
        &self,
        database: &str,
        table: &str,
        filter: Filter,
        options: SelectOptions,
        page_size: usize,
    ) -> SelectPages<'_> {
        SelectPages::new(self, self.resolve_db(database), table, filter, options, page_size)
    }

    /// Inserts records `page_size` at a time.
    pub fn insert_pages(&self, database: &str, table: &str, records: Vec<Record>, page_size: usize) -> WritePages<'_> {
        WritePages::new(
            self,
            self.resolve_db(database),
            table,
            records,
            WriteMode::Insert,
            page_size,
        )
    }

    /// Upserts records `page_size` at a time.
    pub fn upsert_pages(
        &self,
        database: &str,
        table: &str,
        records: Vec<Record>,
        update_keys: Option<Vec<String>>,
        page_size: usize,
    ) -> WritePages<'_> {
        WritePages::new(
            self,
            self.resolve_db(database),
            table,
            records,
            WriteMode::Upsert { update_keys },
            page_size,
        )
    }
}

impl fmt::Display for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<sqlmate client ({})>",
            self.auth().username().unwrap_or("anonymous")
        )
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("database", &self.database)
            .field("options", &self.options)
            .field("engines", &self.engines)
            .field("events", &self.events)
            .finish()
    }
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::ClientFixture;
    use crate::value::Value;

    #[tokio::test]
    async fn test_table_cache_and_expiry() {
        let fixture = ClientFixture::with_sample_schema().await;
        let client = &fixture.client;

        let first = client.get_table("", "users").await.unwrap();
        let second = client.get_table("main", "users").await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        client.expire_table("main", "users");
        let third = client.get_table("main", "users").await.unwrap();
        assert!(!Arc::ptr_eq(&first, &third));
        assert_eq!(first.as_ref(), third.as_ref());
    }

    #[tokio::test]
    async fn test_expire_drops_header_info() {
        let fixture = ClientFixture::with_sample_schema().await;
        let client = &fixture.client;

        client.get_header_info("main", "users").await.unwrap();
        assert!(client.header_info_cached("main", "users").is_some());
        client.expire_table("main", "users");
        assert!(client.header_info_cached("main", "users").is_none());
    }

    #[tokio::test]
    async fn test_textual_statements() {
        let fixture = ClientFixture::with_sample_schema().await;
        let client = &fixture.client;

        let mut record = Record::new();
        record.insert("name".to_string(), Value::from("Zoë"));
        let sql = client.insert_sql("main", "users", vec![record]).await.unwrap();
        assert_eq!(sql, "INSERT INTO \"users\" (\"name\") VALUES ('Zoë')");

        let sql = client.clear_table_sql("main", "users").await.unwrap();
        assert_eq!(sql, "DELETE FROM \"users\"");

        // Nothing ran
        let rows = client.select("main", "users", &Filter::new(), &SelectOptions::new()).await.unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn test_caller_errors_surface_unchanged() {
        let fixture = ClientFixture::with_sample_schema().await;
        let client = &fixture.client;

        let bad_filter = Filter::new().with("nickname", "x");
        crate::assert_sqlmate_error!(
            client.delete("main", "users", &bad_filter).await,
            UnknownColumn,
            "delete with unknown filter column"
        );

        let mut values = Record::new();
        values.insert("ghost".to_string(), Value::Int(1));
        crate::assert_sqlmate_error!(
            client.update("main", "users", values, &Filter::new()).await,
            MissingColumn,
            "update of a column the table lacks"
        );

        crate::assert_sqlmate_error!(
            client.upsert("main", "tags", vec![Record::from([("label".to_string(), Value::from("a"))])], None).await,
            Query,
            "upsert on a table without unique keys"
        );
    }

    #[tokio::test]
    async fn test_concurrency_setting() {
        let mut fixture = ClientFixture::with_sample_schema().await;
        assert_eq!(fixture.client.max_db_concurrency(), 10);
        fixture.client.set_max_db_concurrency(2);
        assert_eq!(fixture.client.max_db_concurrency(), 2);
        fixture.client.set_max_db_concurrency(0);
        assert_eq!(fixture.client.max_db_concurrency(), 10);
    }

    #[tokio::test]
    async fn test_schema_timeout_floor() {
        let fixture = ClientFixture::with_sample_schema().await;
        assert_eq!(fixture.client.schema_timeout(), Duration::from_secs(60));

        let slow = Client::builder(fixture.client.auth().clone())
            .db_exec_timeout(45)
            .build();
        assert_eq!(slow.schema_timeout(), Duration::from_secs(90));
    }

    #[tokio::test]
    async fn test_display() {
        let fixture = ClientFixture::with_sample_schema().await;
        assert_eq!(fixture.client.to_string(), "<sqlmate client (anonymous)>");
    }
}
