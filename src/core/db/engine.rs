/// Engine Management Module
///
/// One `Engine` per database name owns a small pool of SQLite connections.
/// Connections are opened with the crate's pragmas and SQL functions,
/// recycled after `pool_recycle` seconds, and dropped instead of pooled when
/// the caller invalidates them.

use crate::core::db::auth::{Authorization, ConnectionTarget};
use crate::core::{Result, SqlmateError};
use regex::Regex;
use rusqlite::functions::FunctionFlags;
use rusqlite::types::ValueRef;
use rusqlite::{Connection, InterruptHandle, OpenFlags};
use serde::Deserialize;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Pool settings shared by every engine of a manager.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum idle connections kept per engine
    pub pool_size: usize,
    /// Seconds after which a pooled connection is closed instead of reused
    pub pool_recycle: u64,
    /// How long SQLite waits on a locked database before failing
    pub busy_timeout_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            pool_size: 5,
            pool_recycle: 3600,
            busy_timeout_ms: 5000,
        }
    }
}

impl EngineConfig {
    fn recycle(&self) -> Duration {
        Duration::from_secs(self.pool_recycle)
    }
}

/// Counters describing an engine's pool activity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineStats {
    pub connections_opened: u64,
    pub connections_closed: u64,
    pub invalidated: u64,
    pub recycled: u64,
    pub idle: usize,
}

struct IdleConnection {
    conn: Connection,
    created_at: Instant,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Connection source for a single database.
pub struct Engine {
    database: String,
    target: ConnectionTarget,
    config: EngineConfig,
    idle: Mutex<VecDeque<IdleConnection>>,
    /// Keeps shared in-memory databases alive between checkouts
    anchor: Mutex<Option<Connection>>,
    disposed: AtomicBool,
    stats: Mutex<EngineStats>,
}

impl Engine {
    pub fn new(database: &str, target: ConnectionTarget, config: EngineConfig) -> Self {
        Engine {
            database: database.to_string(),
            target,
            config,
            idle: Mutex::new(VecDeque::new()),
            anchor: Mutex::new(None),
            disposed: AtomicBool::new(false),
            stats: Mutex::new(EngineStats::default()),
        }
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn target(&self) -> &ConnectionTarget {
        &self.target
    }

    /// Takes a connection from the pool, opening a new one when none is reusable.
    ///
    /// Blocking: call it from a blocking context.
    pub fn checkout(self: &Arc<Self>) -> Result<PooledConnection> {
        if self.disposed.load(Ordering::Acquire) {
            return Err(SqlmateError::Query(format!(
                "engine for '{}' has been disposed",
                self.database
            )));
        }

        if self.target.in_memory {
            let mut anchor = lock(&self.anchor);
            if anchor.is_none() {
                *anchor = Some(self.open()?);
            }
        }

        loop {
            let candidate = lock(&self.idle).pop_front();
            match candidate {
                Some(idle) if idle.created_at.elapsed() > self.config.recycle() => {
                    debug!(database = %self.database, "recycling pooled connection");
                    let mut stats = lock(&self.stats);
                    stats.recycled += 1;
                    stats.connections_closed += 1;
                }
                Some(idle) => {
                    return Ok(PooledConnection::new(Arc::clone(self), idle.conn, idle.created_at));
                }
                None => break,
            }
        }

        let conn = self.open()?;
        Ok(PooledConnection::new(Arc::clone(self), conn, Instant::now()))
    }

    /// Opens a fresh connection with pragmas and SQL functions installed.
    fn open(&self) -> Result<Connection> {
        let mut flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        if self.target.uri {
            flags |= OpenFlags::SQLITE_OPEN_URI;
        } else if let Some(parent) = std::path::Path::new(&self.target.location).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open_with_flags(&self.target.location, flags)?;
        conn.busy_timeout(Duration::from_millis(self.config.busy_timeout_ms))?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        if !self.target.in_memory {
            let mode: String =
                conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
            debug!(database = %self.database, journal_mode = %mode, "journal mode set");
        }
        register_functions(&conn)?;

        lock(&self.stats).connections_opened += 1;
        info!(database = %self.database, location = %self.target.location, "opened connection");
        Ok(conn)
    }

    fn release(&self, conn: Connection, created_at: Instant) {
        let keep = !self.disposed.load(Ordering::Acquire)
            && created_at.elapsed() <= self.config.recycle();
        let mut idle = lock(&self.idle);
        if keep && idle.len() < self.config.pool_size {
            idle.push_back(IdleConnection { conn, created_at });
        } else {
            drop(idle);
            drop(conn);
            lock(&self.stats).connections_closed += 1;
        }
    }

    fn discard(&self, conn: Connection) {
        warn!(database = %self.database, "invalidating connection");
        drop(conn);
        let mut stats = lock(&self.stats);
        stats.invalidated += 1;
        stats.connections_closed += 1;
    }

    /// Closes every pooled connection and refuses further checkouts.
    pub fn dispose(&self) {
        self.disposed.store(true, Ordering::Release);
        let drained: Vec<IdleConnection> = lock(&self.idle).drain(..).collect();
        let closed = drained.len() as u64;
        drop(drained);
        lock(&self.anchor).take();
        lock(&self.stats).connections_closed += closed;
        debug!(database = %self.database, closed, "engine disposed");
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    pub fn idle_connections(&self) -> usize {
        lock(&self.idle).len()
    }

    pub fn stats(&self) -> EngineStats {
        let mut stats = lock(&self.stats).clone();
        stats.idle = self.idle_connections();
        stats
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("database", &self.database)
            .field("location", &self.target.location)
            .field("idle", &self.idle_connections())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

/// A connection checked out of an engine.
///
/// Dropping it returns the connection to the pool; `invalidate` closes it
/// instead, as does dropping it after a `StatementCanceller` fired.
pub struct PooledConnection {
    engine: Arc<Engine>,
    conn: Option<Connection>,
    created_at: Instant,
    cancel: Arc<Mutex<CancelState>>,
}

#[derive(Default)]
struct CancelState {
    released: bool,
    cancelled: bool,
}

impl PooledConnection {
    fn new(engine: Arc<Engine>, conn: Connection, created_at: Instant) -> Self {
        PooledConnection {
            engine,
            conn: Some(conn),
            created_at,
            cancel: Arc::new(Mutex::new(CancelState::default())),
        }
    }

    pub fn connection(&self) -> Result<&Connection> {
        self.conn
            .as_ref()
            .ok_or_else(|| SqlmateError::Internal("connection already released".to_string()))
    }

    /// A handle that interrupts this connection's running statement and
    /// keeps the connection out of the pool afterwards.
    pub fn canceller(&self) -> Result<StatementCanceller> {
        Ok(StatementCanceller {
            interrupt: self.connection()?.get_interrupt_handle(),
            state: Arc::clone(&self.cancel),
        })
    }

    /// Closes the connection rather than returning it to the pool.
    pub fn invalidate(mut self) {
        if let Some(conn) = self.conn.take() {
            self.engine.discard(conn);
        }
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        let cancelled = {
            let mut state = lock(&self.cancel);
            state.released = true;
            state.cancelled
        };
        if let Some(conn) = self.conn.take() {
            if cancelled {
                self.engine.discard(conn);
            } else {
                self.engine.release(conn, self.created_at);
            }
        }
    }
}

/// Cancels the statement running on one checked-out connection.
pub struct StatementCanceller {
    interrupt: InterruptHandle,
    state: Arc<Mutex<CancelState>>,
}

impl StatementCanceller {
    /// Interrupts the connection and marks it invalid. Returns `false`
    /// without interrupting when the connection was already released.
    pub fn cancel(&self) -> bool {
        let mut state = lock(&self.state);
        if state.released {
            return false;
        }
        state.cancelled = true;
        self.interrupt.interrupt();
        true
    }
}

/// Owns one engine per database name.
pub struct EngineManager {
    auth: Authorization,
    config: EngineConfig,
    engines: Mutex<HashMap<String, Arc<Engine>>>,
}

impl EngineManager {
    pub fn new(auth: Authorization, config: EngineConfig) -> Self {
        EngineManager {
            auth,
            config,
            engines: Mutex::new(HashMap::new()),
        }
    }

    pub fn auth(&self) -> &Authorization {
        &self.auth
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Returns the engine for `database`, creating it on first use.
    pub fn get_engine(&self, database: &str) -> Arc<Engine> {
        let mut engines = lock(&self.engines);
        if let Some(engine) = engines.get(database) {
            if !engine.is_disposed() {
                return Arc::clone(engine);
            }
        }
        debug!(database, uri = %self.auth.uri(database), "creating engine");
        let engine = Arc::new(Engine::new(
            database,
            self.auth.target(database),
            self.config.clone(),
        ));
        engines.insert(database.to_string(), Arc::clone(&engine));
        engine
    }

    /// Disposes every engine; later calls to `get_engine` start fresh pools.
    pub fn dispose_all(&self) {
        let engines: Vec<Arc<Engine>> = lock(&self.engines).drain().map(|(_, e)| e).collect();
        for engine in engines {
            engine.dispose();
        }
    }

    pub fn engine_count(&self) -> usize {
        lock(&self.engines).len()
    }
}

impl std::fmt::Debug for EngineManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineManager")
            .field("auth", &self.auth)
            .field("config", &self.config)
            .field("engines", &self.engine_count())
            .finish()
    }
}

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Installs `regexp(pattern, text)` so `text REGEXP pattern` works. The
/// compiled pattern is kept as auxiliary data for the rest of the statement.
fn register_functions(conn: &Connection) -> Result<()> {
    conn.create_scalar_function(
        "regexp",
        2,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            let re: Arc<Regex> =
                ctx.get_or_create_aux(0, |pattern| -> std::result::Result<Regex, BoxError> {
                    Ok(Regex::new(pattern.as_str()?)?)
                })?;
            let text = match ctx.get_raw(1) {
                ValueRef::Null => return Ok(None),
                ValueRef::Integer(i) => i.to_string(),
                ValueRef::Real(f) => f.to_string(),
                ValueRef::Text(t) | ValueRef::Blob(t) => String::from_utf8_lossy(t).into_owned(),
            };
            Ok(Some(re.is_match(&text)))
        },
    )?;
    Ok(())
}
