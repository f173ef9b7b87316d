use crate::core::db::auth::{default_host, Authorization, Driver};
use crate::core::db::engine::EngineConfig;
use crate::core::{Result, SqlmateError};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

/// Default number of statements allowed to run at once.
pub const DB_CONCURRENCY_DEFAULT: usize = 10;
/// Default per-statement deadline in seconds.
pub const DB_EXECUTE_TIMEOUT_DEFAULT: u64 = 30;

/// Top-level configuration structure parsed from a TOML file.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    pub client: ClientOptions,
    pub engine: EngineConfig,
    pub auth: AuthConfig,
}

/// Client behaviour.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ClientOptions {
    /// Maximum statements in flight; 0 means the default
    pub max_db_concurrency: usize,
    /// Per-statement deadline in seconds
    pub db_exec_timeout: u64,
    /// Log event handler failures instead of returning them
    pub ignore_event_errors: bool,
    /// Fail a response whose values don't decode, instead of keeping them raw
    pub auto_raise_errors: bool,
    /// Log every statement at debug level
    pub debug: bool,
}

impl Default for ClientOptions {
    fn default() -> Self {
        ClientOptions {
            max_db_concurrency: DB_CONCURRENCY_DEFAULT,
            db_exec_timeout: DB_EXECUTE_TIMEOUT_DEFAULT,
            ignore_event_errors: false,
            auto_raise_errors: false,
            debug: false,
        }
    }
}

impl ClientOptions {
    /// Concurrency limit with 0 mapped to the default.
    pub fn effective_concurrency(&self) -> usize {
        if self.max_db_concurrency == 0 {
            DB_CONCURRENCY_DEFAULT
        } else {
            self.max_db_concurrency
        }
    }
}

/// Where databases live.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub driver: Driver,
    /// Directory holding database files; the platform data directory when unset
    pub host: Option<PathBuf>,
    pub default_database: String,
    pub username: Option<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        AuthConfig {
            driver: Driver::Sqlite,
            host: None,
            default_database: "main".to_string(),
            username: None,
        }
    }
}

impl AuthConfig {
    pub fn authorization(&self) -> Result<Authorization> {
        let host = match (&self.host, self.driver) {
            (Some(host), _) => host.clone(),
            (None, Driver::Memory) => PathBuf::new(),
            (None, Driver::Sqlite) => default_host()?,
        };
        Ok(Authorization::new(
            self.username.clone(),
            host,
            self.default_database.clone(),
            self.driver,
        ))
    }
}

impl Config {
    /// Checks values serde can't.
    pub fn validate(&self) -> Result<()> {
        if self.auth.default_database.trim().is_empty() {
            return Err(SqlmateError::Config("auth.default_database must not be empty".to_string()));
        }
        if self.client.db_exec_timeout == 0 {
            return Err(SqlmateError::Config("client.db_exec_timeout must be at least 1 second".to_string()));
        }
        Ok(())
    }
}

/// Parses and validates configuration from TOML text.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content)?;
    config.validate()?;
    Ok(config)
}

/// Loads configuration from a TOML file at the given path.
///
/// # Arguments
///
/// * `path` - The file path to the TOML configuration file.
///
/// # Example
///
/// ```no_run
/// let config = sqlmate::config::load_config("sqlmate.toml").expect("Failed to load config");
/// println!("{:?}", config);
/// ```
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let content = fs::read_to_string(path)?;
    parse_config(&content)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_CONFIG: &str = r#"
[client]
max_db_concurrency = 4
db_exec_timeout = 5
auto_raise_errors = true

[engine]
pool_size = 2

[auth]
driver = "sqlite"
host = "/tmp/sqlmate-data"
default_database = "shop"
username = "app"
"#;

    #[test]
    fn test_load_config_from_str() {
        let config = parse_config(SAMPLE_CONFIG).expect("Failed to parse sample config");
        assert_eq!(config.client.max_db_concurrency, 4);
        assert_eq!(config.client.db_exec_timeout, 5);
        assert!(config.client.auto_raise_errors);
        assert!(!config.client.ignore_event_errors);
        assert_eq!(config.engine.pool_size, 2);
        assert_eq!(config.engine.pool_recycle, 3600);

        let auth = config.auth.authorization().unwrap();
        assert_eq!(auth.default_database(), "shop");
        assert_eq!(auth.username(), Some("app"));
        assert_eq!(auth.host(), Path::new("/tmp/sqlmate-data"));
    }

    #[test]
    fn test_defaults() {
        let config = parse_config("").unwrap();
        assert_eq!(config.client, ClientOptions::default());
        assert_eq!(config.client.effective_concurrency(), DB_CONCURRENCY_DEFAULT);
        assert_eq!(config.auth.default_database, "main");

        let zero = ClientOptions {
            max_db_concurrency: 0,
            ..ClientOptions::default()
        };
        assert_eq!(zero.effective_concurrency(), 10);
    }

    #[test]
    fn test_invalid_config() {
        match parse_config("[client]\ndb_exec_timeout = 0\n") {
            Err(SqlmateError::Config(msg)) => assert!(msg.contains("db_exec_timeout")),
            other => panic!("Expected Config error, got {:?}", other),
        }
        assert!(matches!(parse_config("[auth]\ndriver = \"oracle\"\n"), Err(SqlmateError::Config(_))));
    }

    #[test]
    fn test_memory_driver_needs_no_host() {
        let config = parse_config("[auth]\ndriver = \"memory\"\ndefault_database = \"scratch\"\n").unwrap();
        let auth = config.auth.authorization().unwrap();
        assert_eq!(auth.driver(), Driver::Memory);
        assert!(auth.target("scratch").in_memory);
    }
}
