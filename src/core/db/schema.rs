/// Schema Reflection Module
///
/// Reflects a single table's definition (columns, key constraints, indexes
/// and foreign keys) through SQLite's PRAGMA introspection. The resulting
/// `Table` is what the client caches as a table handle.

use crate::core::{Result, SqlmateError};
use rusqlite::{Connection, Row};

/// Represents a foreign key relationship
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKey {
    /// The table this foreign key references
    pub referenced_table: String,
    /// The column in this table that is the foreign key
    pub from_column: String,
    /// The referenced column in the foreign table
    pub to_column: String,
}

/// Represents a table column with its declared metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    /// Column name
    pub name: String,
    /// Declared type exactly as written in the DDL (e.g., "VARCHAR(64)", "TINYTEXT")
    pub type_name: String,
    /// Whether the column rejects NULL values
    pub notnull: bool,
    /// Position in the primary key (0 when not part of it)
    pub pk: u32,
    /// Default value expression (if any)
    pub dflt_value: Option<String>,
}

impl Column {
    /// Creates a Column from a PRAGMA table_info result row
    fn from_pragma_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Column {
            name: row.get(1)?,
            type_name: row.get(2)?,
            notnull: row.get(3)?,
            dflt_value: row.get(4)?,
            pk: row.get(5)?,
        })
    }

    pub fn is_primary_key(&self) -> bool {
        self.pk > 0
    }

    pub fn nullable(&self) -> bool {
        !self.notnull
    }
}

/// Represents a table index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Index {
    /// Index name
    pub name: String,
    /// Whether this is a UNIQUE index
    pub unique: bool,
    /// Column names that make up this index
    pub columns: Vec<String>,
}

impl Index {
    /// Creates an Index from PRAGMA index_info results
    fn from_pragma_info(conn: &Connection, index_name: String, unique: bool) -> Result<Self> {
        let mut stmt = conn.prepare("SELECT name FROM pragma_index_info(?1) ORDER BY seqno")?;
        let columns = stmt
            .query_map([&index_name], |row| row.get::<_, Option<String>>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?
            .into_iter()
            .flatten()
            .collect();

        Ok(Index {
            name: index_name,
            unique,
            columns,
        })
    }
}

/// A reflected table definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Table {
    /// Table name
    pub name: String,
    /// Columns in declaration order
    pub columns: Vec<Column>,
    /// Indexes defined on this table
    pub indexes: Vec<Index>,
    /// Foreign key relationships
    pub foreign_keys: Vec<ForeignKey>,
}

impl Table {
    /// Reflects `table_name` from the connection's main schema.
    ///
    /// # Errors
    ///
    /// Returns `SqlmateError::NoSuchTable` when PRAGMA introspection reports
    /// no columns, which is how SQLite signals a missing table.
    pub fn reflect(conn: &Connection, database: &str, table_name: &str) -> Result<Self> {
        let columns = get_table_columns(conn, table_name)?;
        if columns.is_empty() {
            return Err(SqlmateError::NoSuchTable {
                database: database.to_string(),
                table: table_name.to_string(),
            });
        }
        let indexes = get_table_indexes(conn, table_name)?;
        let foreign_keys = get_table_foreign_keys(conn, table_name)?;

        Ok(Table {
            name: table_name.to_string(),
            columns,
            indexes,
            foreign_keys,
        })
    }

    /// Looks up a column by name.
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    /// Primary key columns in key order; empty for rowid-only tables.
    pub fn primary_key(&self) -> Vec<String> {
        let mut pk: Vec<&Column> = self.columns.iter().filter(|c| c.is_primary_key()).collect();
        pk.sort_by_key(|c| c.pk);
        pk.into_iter().map(|c| c.name.clone()).collect()
    }

    /// Every column set that uniquely identifies a row: the primary key
    /// first, then each unique index not identical to it.
    pub fn unique_keys(&self) -> Vec<Vec<String>> {
        let mut keys = Vec::new();
        let pk = self.primary_key();
        if !pk.is_empty() {
            keys.push(pk);
        }
        for index in self.indexes.iter().filter(|i| i.unique && !i.columns.is_empty()) {
            if !keys.contains(&index.columns) {
                keys.push(index.columns.clone());
            }
        }
        keys
    }
}

/// Helper function to retrieve column information for a specific table
fn get_table_columns(conn: &Connection, table_name: &str) -> Result<Vec<Column>> {
    let mut stmt = conn.prepare("SELECT * FROM pragma_table_info(?1)")?;
    let columns = stmt
        .query_map([table_name], |row| Column::from_pragma_row(row))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(columns)
}

/// Helper function to retrieve index information for a specific table
fn get_table_indexes(conn: &Connection, table_name: &str) -> Result<Vec<Index>> {
    let mut stmt = conn.prepare("SELECT name, \"unique\" FROM pragma_index_list(?1)")?;
    let index_rows = stmt
        .query_map([table_name], |row| {
            Ok((
                row.get::<_, String>(0)?, // index name
                row.get::<_, bool>(1)?,   // unique
            ))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    index_rows
        .into_iter()
        .map(|(index_name, unique)| Index::from_pragma_info(conn, index_name, unique))
        .collect()
}

/// Helper function to retrieve foreign key information for a specific table
fn get_table_foreign_keys(conn: &Connection, table_name: &str) -> Result<Vec<ForeignKey>> {
    let mut stmt = conn.prepare("SELECT \"table\", \"from\", \"to\" FROM pragma_foreign_key_list(?1)")?;
    let foreign_keys = stmt
        .query_map([table_name], |row| {
            Ok(ForeignKey {
                referenced_table: row.get(0)?,
                from_column: row.get(1)?,
                to_column: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(foreign_keys)
}
