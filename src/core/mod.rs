/// Core Module for sqlmate
///
/// This module contains the engine-facing infrastructure: authorization,
/// connection pooling, table reflection and raw statement execution, plus the
/// shared error type.

pub mod db;
pub mod error;

// Re-export commonly used types for convenience
pub use error::{Result, SqlmateError};
