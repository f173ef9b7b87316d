// Core infrastructure modules
pub mod core;

// Value model and coercion
pub mod coerce;
pub mod schema_cache;
pub mod types;
pub mod value;

// Statement building and results
pub mod condition;
pub mod response;
pub mod statement;

// Client surface
pub mod blocking;
pub mod client;
pub mod config;
pub mod events;
pub mod pages;

#[cfg(test)]
mod test_utils;

pub use crate::blocking::BlockingClient;
pub use crate::client::{Client, ClientBuilder};
pub use crate::condition::{Condition, Filter, Predicate};
pub use crate::config::{ClientOptions, Config};
pub use crate::core::db::auth::{Authorization, Driver};
pub use crate::core::db::query::Params;
pub use crate::core::{Result, SqlmateError};
pub use crate::response::{Response, Row};
pub use crate::statement::SelectOptions;
pub use crate::value::{Record, Value};
