/// Database Module
///
/// This module wraps the underlying SQLite client, organized into focused
/// submodules:
///
/// ## Architecture
///
/// - **Authorization** (`auth.rs`): Driver choice, host directory and default database
/// - **Engines** (`engine.rs`): Per-database connection pools with recycle and invalidation
/// - **Schema Reflection** (`schema.rs`): Reflected table definitions from PRAGMA introspection
/// - **Query Execution** (`query.rs`): Statement classification and raw execution on one connection
///
/// ## Error Handling
///
/// All database operations use the standardized `SqlmateError` type for consistent error propagation.
pub mod auth;
pub mod engine;
pub mod query;
pub mod schema;

pub use auth::*;
pub use engine::*;
pub use query::*;
pub use schema::*;
