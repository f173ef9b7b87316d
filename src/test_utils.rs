/// # Test Utilities Module
///
/// Fixtures for unit tests: a client over a temporary directory with a
/// standard schema, record builders, and error assertions.

use crate::client::Client;
use crate::core::db::auth::Authorization;
use crate::value::{Record, Value};
use rusqlite::Connection;
use tempfile::TempDir;

/// Standard schema used across unit tests.
pub const STANDARD_SCHEMA: &str = "
    CREATE TABLE users (
        id INTEGER PRIMARY KEY,
        name VARCHAR(64) NOT NULL,
        email TEXT UNIQUE,
        age INTEGER,
        status TEXT,
        active BOOLEAN DEFAULT 1,
        bio TINYTEXT,
        created_at DATETIME
    );

    CREATE TABLE tags (
        label TEXT NOT NULL
    );

    CREATE INDEX idx_users_age ON users (age);
";

/// A client whose default database lives in a temporary directory.
pub struct ClientFixture {
    pub dir: TempDir,
    pub client: Client,
}

impl ClientFixture {
    /// Empty database named `main`.
    pub fn new() -> Self {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let client = Client::new(Authorization::sqlite(dir.path(), "main"));
        ClientFixture { dir, client }
    }

    /// Database `main` with `STANDARD_SCHEMA` and no rows.
    pub async fn with_sample_schema() -> Self {
        let fixture = Self::new();
        fixture.execute_batch(STANDARD_SCHEMA);
        fixture
    }

    /// Runs SQL directly against the default database file.
    pub fn execute_batch(&self, sql: &str) {
        let location = self.client.auth().target("main").location;
        let conn = Connection::open(location).expect("Failed to open fixture database");
        conn.execute_batch(sql).expect("Failed to run fixture SQL");
    }
}

/// A `users` record with a name and optional age.
pub fn user_record(name: &str, age: Option<i64>) -> Record {
    let mut record = Record::new();
    record.insert("name".to_string(), Value::from(name));
    record.insert("age".to_string(), Value::from(age));
    record
}

#[macro_export]
macro_rules! assert_sqlmate_error {
    ($result:expr, $variant:ident, $context:expr) => {
        match $result {
            Err($crate::core::SqlmateError::$variant { .. }) => {}
            Ok(_) => panic!("Expected {} error but got Ok in {}", stringify!($variant), $context),
            Err(other) => panic!("Expected {} but got {:?} in {}", stringify!($variant), other, $context),
        }
    };
}
