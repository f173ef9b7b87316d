//! Column metadata used for write coercion.
//!
//! Metadata comes from one of two places: a catalog query against
//! `pragma_table_info` (strict: unknown declared types are an error), or a
//! reflected `Table` handle already in memory (lenient: unknown types fall
//! back to plain text). The client caches the catalog form per
//! `(database, table)`.

use crate::core::db::schema::Table;
use crate::core::{Result, SqlmateError};
use crate::response::Row;
use crate::types::{self, CoercionDescriptor, DeclaredType, TypeKind, FALLBACK_TYPE};
use crate::value::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Catalog query for one table's column metadata.
///
/// Bound with `:table_name` and `:schema`. Column names mirror the
/// information-schema fields the metadata is built from.
pub const HEADER_INFO_QUERY: &str = "SELECT name AS COLUMN_NAME, \
     CASE WHEN \"notnull\" = 0 THEN 'YES' ELSE 'NO' END AS IS_NULLABLE, \
     type AS COLUMN_TYPE \
     FROM pragma_table_info(:table_name, :schema) ORDER BY cid";

/// Metadata for one column.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnMeta {
    /// Coercion descriptor for the column's base type
    pub data_type: &'static CoercionDescriptor,
    pub is_nullable: bool,
    /// Full declaration, normalized (e.g. `VARCHAR(64)`)
    pub column_type: String,
    /// Declared length for sized text and binary types
    pub character_maximum_length: Option<u64>,
    pub numeric_precision: Option<u32>,
    pub numeric_scale: Option<u32>,
    /// Members of an `ENUM(...)` declaration
    pub enum_values: Vec<String>,
    pub unsigned: bool,
}

/// Column name to metadata.
pub type ColumnMetadataMap = HashMap<String, ColumnMeta>;

impl ColumnMeta {
    /// Builds metadata from a declared type, failing on unknown types.
    pub fn from_declared(declared: &str, is_nullable: bool) -> Result<Self> {
        let parsed = DeclaredType::parse(declared);
        let descriptor = types::resolve(&parsed.base)?;
        Ok(Self::build(descriptor, parsed, is_nullable))
    }

    /// Builds metadata from a declared type, treating unknown types as text.
    pub fn from_declared_lenient(declared: &str, is_nullable: bool) -> Self {
        let parsed = DeclaredType::parse(declared);
        let descriptor = match types::registry().get(&parsed.base) {
            Some(descriptor) => descriptor,
            None => {
                debug!(declared, "unknown column type, coercing as {}", FALLBACK_TYPE);
                &types::FALLBACK_DESCRIPTOR
            }
        };
        Self::build(descriptor, parsed, is_nullable)
    }

    fn build(descriptor: &'static CoercionDescriptor, parsed: DeclaredType, is_nullable: bool) -> Self {
        let character_maximum_length = if descriptor.takes_length() {
            parsed.length()
        } else {
            None
        };
        let (numeric_precision, numeric_scale) = if descriptor.kind == TypeKind::Decimal {
            parsed.precision_scale()
        } else {
            (None, None)
        };
        let enum_values = if descriptor.kind == TypeKind::Enum {
            parsed.args.clone()
        } else {
            Vec::new()
        };

        ColumnMeta {
            data_type: descriptor,
            is_nullable,
            column_type: parsed.normalized,
            character_maximum_length,
            numeric_precision,
            numeric_scale,
            enum_values,
            unsigned: parsed.unsigned,
        }
    }

    /// Effective maximum length: the declared one, else the type's default.
    pub fn max_length(&self) -> Option<u64> {
        self.character_maximum_length
            .or(self.data_type.default_length)
    }
}

/// Builds metadata from the rows of `HEADER_INFO_QUERY`.
///
/// # Errors
///
/// Returns `SqlmateError::UnknownType` for a declared type the registry
/// doesn't know and `SqlmateError::Query` for a malformed catalog row.
pub fn parse_header_rows(rows: &[Row]) -> Result<ColumnMetadataMap> {
    let mut map = ColumnMetadataMap::with_capacity(rows.len());
    for row in rows {
        let name = text_field(row, "COLUMN_NAME")?;
        let nullable = text_field(row, "IS_NULLABLE")? == "YES";
        let declared = match row.get("COLUMN_TYPE") {
            Some(Value::Text(t)) => t.clone(),
            Some(Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        };
        map.insert(name, ColumnMeta::from_declared(&declared, nullable)?);
    }
    Ok(map)
}

fn text_field(row: &Row, field: &str) -> Result<String> {
    match row.get(field) {
        Some(Value::Text(s)) => Ok(s.clone()),
        other => Err(SqlmateError::Query(format!(
            "catalog row has no text field {} (got {:?})",
            field, other
        ))),
    }
}

/// Derives metadata from a reflected table without touching the catalog.
pub fn derive_from_table(table: &Table) -> ColumnMetadataMap {
    table
        .columns
        .iter()
        .map(|c| {
            (
                c.name.clone(),
                ColumnMeta::from_declared_lenient(&c.type_name, c.nullable()),
            )
        })
        .collect()
}

/// A cached, reflected table.
#[derive(Debug, Clone)]
pub struct TableHandle {
    pub database: String,
    pub table: Arc<Table>,
    /// Set by `Client::expire_table`; the next lookup reflects again
    pub expired: bool,
}

impl TableHandle {
    pub fn new(database: &str, table: Table) -> Self {
        TableHandle {
            database: database.to_string(),
            table: Arc::new(table),
            expired: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.table.name
    }
}
