/// Authorization Module
///
/// Describes where databases live and how to open them. An `Authorization`
/// is immutable once built; every engine derives its connection target from
/// it.

use crate::core::{Result, SqlmateError};
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};

/// Which SQLite flavour backs each database name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Driver {
    /// One file per database under the host directory
    Sqlite,
    /// Shared-cache in-memory database, kept alive by its engine
    Memory,
}

impl Driver {
    /// Parses a driver name as used in configuration and environment variables.
    pub fn parse(name: &str) -> Result<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "sqlite" | "sqlite3" | "file" => Ok(Driver::Sqlite),
            "memory" | ":memory:" => Ok(Driver::Memory),
            other => Err(SqlmateError::Config(format!("unknown driver '{}'", other))),
        }
    }
}

/// Where a connection is opened from, resolved for one database name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionTarget {
    /// Path or `file:` URI handed to SQLite
    pub location: String,
    /// Whether `location` must be opened with URI parsing enabled
    pub uri: bool,
    /// Whether the database disappears when its last connection closes
    pub in_memory: bool,
}

/// Credentials and location used to build connection targets.
#[derive(Clone, PartialEq, Eq)]
pub struct Authorization {
    username: Option<String>,
    host: PathBuf,
    default_database: String,
    driver: Driver,
}

impl Authorization {
    pub fn new(
        username: Option<String>,
        host: impl Into<PathBuf>,
        default_database: impl Into<String>,
        driver: Driver,
    ) -> Self {
        Authorization {
            username,
            host: host.into(),
            default_database: default_database.into(),
            driver,
        }
    }

    /// File-backed databases stored as `<dir>/<database>.sqlite3`.
    pub fn sqlite(dir: impl Into<PathBuf>, default_database: impl Into<String>) -> Self {
        Self::new(None, dir, default_database, Driver::Sqlite)
    }

    /// Shared in-memory databases, one per database name.
    pub fn memory(default_database: impl Into<String>) -> Self {
        Self::new(None, PathBuf::new(), default_database, Driver::Memory)
    }

    /// Builds an authorization from `SQLMATE_*` environment variables.
    ///
    /// `SQLMATE_DATABASE` is required. `SQLMATE_DRIVER` defaults to `sqlite`
    /// and `SQLMATE_HOST` to the platform data directory.
    pub fn env() -> Result<Self> {
        Self::env_with_database(None)
    }

    /// Like `env`, with `database` taking precedence over `SQLMATE_DATABASE`.
    pub fn env_with_database(database: Option<&str>) -> Result<Self> {
        let default_database = match database {
            Some(name) => name.to_string(),
            None => std::env::var("SQLMATE_DATABASE")
                .map_err(|_| SqlmateError::Config("SQLMATE_DATABASE is not set".to_string()))?,
        };
        let driver = match std::env::var("SQLMATE_DRIVER") {
            Ok(name) => Driver::parse(&name)?,
            Err(_) => Driver::Sqlite,
        };
        let host = match std::env::var("SQLMATE_HOST") {
            Ok(host) => PathBuf::from(host),
            Err(_) => default_host()?,
        };
        let username = std::env::var("SQLMATE_USERNAME").ok();
        Ok(Self::new(username, host, default_database, driver))
    }

    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    pub fn host(&self) -> &Path {
        &self.host
    }

    pub fn default_database(&self) -> &str {
        &self.default_database
    }

    pub fn driver(&self) -> Driver {
        self.driver
    }

    /// Resolves the connection target for `database`.
    pub fn target(&self, database: &str) -> ConnectionTarget {
        match self.driver {
            Driver::Sqlite => ConnectionTarget {
                location: self
                    .host
                    .join(format!("{}.sqlite3", database))
                    .to_string_lossy()
                    .into_owned(),
                uri: false,
                in_memory: false,
            },
            Driver::Memory => ConnectionTarget {
                location: format!("file:{}?mode=memory&cache=shared", database),
                uri: true,
                in_memory: true,
            },
        }
    }

    /// Connection URI for `database`, suitable for logs and diagnostics.
    pub fn uri(&self, database: &str) -> String {
        let user = self
            .username
            .as_deref()
            .map(|u| format!("{}@", u))
            .unwrap_or_default();
        format!("sqlite://{}{}", user, self.target(database).location)
    }
}

impl fmt::Debug for Authorization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Authorization")
            .field("username", &self.username)
            .field("host", &self.host)
            .field("default_database", &self.default_database)
            .field("driver", &self.driver)
            .finish()
    }
}

/// Default host directory: `<data_local_dir>/sqlmate`.
pub fn default_host() -> Result<PathBuf> {
    dirs::data_local_dir()
        .map(|dir| dir.join("sqlmate"))
        .ok_or_else(|| SqlmateError::Config("no local data directory on this platform".to_string()))
}
