//! Column type registry.
//!
//! Maps declared column types (`VARCHAR(64)`, `TINYTEXT`, `INT UNSIGNED`,
//! `ENUM('a','b')`, ...) to the coercion descriptor used when writing values.
//! Type names follow the MySQL vocabulary, with PostgreSQL spellings and
//! SQLite affinity names registered as aliases.

use crate::core::{Result, SqlmateError};
use once_cell::sync::Lazy;
use std::collections::HashMap;

/// How values for a column are converted before binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeKind {
    /// Whole numbers within an inclusive signed range
    Integer { min: i64, max: i64 },
    Boolean,
    Float,
    /// Fixed-point numbers, rounded to the declared scale
    Decimal,
    /// Character data truncated to the column's length
    Text,
    /// Byte data truncated to the column's length
    Binary,
    Date,
    Time,
    DateTime,
    Year,
    /// Text stored as a JSON document
    Json,
    /// Text restricted to the declared members
    Enum,
    Uuid,
    /// No declared type; values pass through by storage class
    Any,
}

/// Registry entry for one canonical type name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoercionDescriptor {
    pub name: &'static str,
    pub kind: TypeKind,
    /// Maximum length in characters (text) or bytes (binary) when the
    /// declaration doesn't give one
    pub default_length: Option<u64>,
}

impl CoercionDescriptor {
    const fn new(name: &'static str, kind: TypeKind, default_length: Option<u64>) -> Self {
        CoercionDescriptor {
            name,
            kind,
            default_length,
        }
    }

    pub fn is_textual(&self) -> bool {
        matches!(self.kind, TypeKind::Text | TypeKind::Json | TypeKind::Enum)
    }

    /// Whether a parenthesized argument on this type is a length.
    pub fn takes_length(&self) -> bool {
        matches!(self.kind, TypeKind::Text | TypeKind::Binary)
    }
}

/// Lengths of the MySQL text and blob classes.
pub const TINY_LENGTH: u64 = 255;
pub const REGULAR_LENGTH: u64 = 65_535;
pub const MEDIUM_LENGTH: u64 = 16_777_215;
pub const LONG_LENGTH: u64 = 4_294_967_295;

/// Descriptor name used when a table-derived column's type is unknown.
pub const FALLBACK_TYPE: &str = "STR";

/// Unbounded text, used for table-derived columns of unknown type.
pub static FALLBACK_DESCRIPTOR: CoercionDescriptor =
    CoercionDescriptor::new(FALLBACK_TYPE, TypeKind::Text, None);

const BUILTIN: &[CoercionDescriptor] = &[
    CoercionDescriptor::new("TINYINT", TypeKind::Integer { min: -128, max: 127 }, None),
    CoercionDescriptor::new("SMALLINT", TypeKind::Integer { min: -32_768, max: 32_767 }, None),
    CoercionDescriptor::new(
        "MEDIUMINT",
        TypeKind::Integer {
            min: -8_388_608,
            max: 8_388_607,
        },
        None,
    ),
    CoercionDescriptor::new(
        "INT",
        TypeKind::Integer {
            min: i32::MIN as i64,
            max: i32::MAX as i64,
        },
        None,
    ),
    CoercionDescriptor::new(
        "BIGINT",
        TypeKind::Integer {
            min: i64::MIN,
            max: i64::MAX,
        },
        None,
    ),
    // SQLite's INTEGER is 64-bit and backs rowid primary keys
    CoercionDescriptor::new(
        "INTEGER",
        TypeKind::Integer {
            min: i64::MIN,
            max: i64::MAX,
        },
        None,
    ),
    CoercionDescriptor::new("BOOL", TypeKind::Boolean, None),
    CoercionDescriptor::new("FLOAT", TypeKind::Float, None),
    CoercionDescriptor::new("DOUBLE", TypeKind::Float, None),
    CoercionDescriptor::new("DECIMAL", TypeKind::Decimal, None),
    CoercionDescriptor::new("CHAR", TypeKind::Text, Some(TINY_LENGTH)),
    CoercionDescriptor::new("VARCHAR", TypeKind::Text, Some(TINY_LENGTH)),
    CoercionDescriptor::new("TINYTEXT", TypeKind::Text, Some(TINY_LENGTH)),
    CoercionDescriptor::new("TEXT", TypeKind::Text, Some(REGULAR_LENGTH)),
    CoercionDescriptor::new("MEDIUMTEXT", TypeKind::Text, Some(MEDIUM_LENGTH)),
    CoercionDescriptor::new("LONGTEXT", TypeKind::Text, Some(LONG_LENGTH)),
    CoercionDescriptor::new(FALLBACK_TYPE, TypeKind::Text, None),
    CoercionDescriptor::new("JSON", TypeKind::Json, Some(LONG_LENGTH)),
    CoercionDescriptor::new("BINARY", TypeKind::Binary, Some(TINY_LENGTH)),
    CoercionDescriptor::new("VARBINARY", TypeKind::Binary, Some(TINY_LENGTH)),
    CoercionDescriptor::new("TINYBLOB", TypeKind::Binary, Some(TINY_LENGTH)),
    CoercionDescriptor::new("BLOB", TypeKind::Binary, Some(REGULAR_LENGTH)),
    CoercionDescriptor::new("MEDIUMBLOB", TypeKind::Binary, Some(MEDIUM_LENGTH)),
    CoercionDescriptor::new("LONGBLOB", TypeKind::Binary, Some(LONG_LENGTH)),
    CoercionDescriptor::new("DATE", TypeKind::Date, None),
    CoercionDescriptor::new("TIME", TypeKind::Time, None),
    CoercionDescriptor::new("DATETIME", TypeKind::DateTime, None),
    CoercionDescriptor::new("TIMESTAMP", TypeKind::DateTime, None),
    CoercionDescriptor::new("YEAR", TypeKind::Year, None),
    CoercionDescriptor::new("ENUM", TypeKind::Enum, None),
    CoercionDescriptor::new("UUID", TypeKind::Uuid, None),
    CoercionDescriptor::new("ANY", TypeKind::Any, None),
];

const ALIASES: &[(&str, &str)] = &[
    ("INT2", "SMALLINT"),
    ("INT4", "INT"),
    ("INT8", "BIGINT"),
    ("SERIAL", "INT"),
    ("BIGSERIAL", "BIGINT"),
    ("UNSIGNED BIG INT", "BIGINT"),
    ("BOOLEAN", "BOOL"),
    ("BIT", "BOOL"),
    ("REAL", "DOUBLE"),
    ("DOUBLE PRECISION", "DOUBLE"),
    ("FLOAT4", "FLOAT"),
    ("FLOAT8", "DOUBLE"),
    ("NUMERIC", "DECIMAL"),
    ("DEC", "DECIMAL"),
    ("CHARACTER", "CHAR"),
    ("NCHAR", "CHAR"),
    ("NATIVE CHARACTER", "CHAR"),
    ("CHARACTER VARYING", "VARCHAR"),
    ("VARYING CHARACTER", "VARCHAR"),
    ("NVARCHAR", "VARCHAR"),
    ("VARCHAR2", "VARCHAR"),
    ("CLOB", "LONGTEXT"),
    ("JSONB", "JSON"),
    ("BYTEA", "LONGBLOB"),
    ("TIMESTAMP WITHOUT TIME ZONE", "TIMESTAMP"),
    ("TIMESTAMP WITH TIME ZONE", "TIMESTAMP"),
    ("TIMESTAMPTZ", "TIMESTAMP"),
    ("TIME WITHOUT TIME ZONE", "TIME"),
    ("STRING", FALLBACK_TYPE),
];

/// Lookup table from canonical names and aliases to descriptors.
pub struct TypeRegistry {
    types: HashMap<&'static str, &'static CoercionDescriptor>,
}

static REGISTRY: Lazy<TypeRegistry> = Lazy::new(TypeRegistry::builtin);

impl TypeRegistry {
    fn builtin() -> Self {
        let mut types: HashMap<&'static str, &'static CoercionDescriptor> =
            BUILTIN.iter().map(|d| (d.name, d)).collect();
        for (alias, canonical) in ALIASES {
            if let Some(descriptor) = types.get(canonical).copied() {
                types.insert(*alias, descriptor);
            }
        }
        TypeRegistry { types }
    }

    /// Looks up a base type name (already stripped of arguments).
    pub fn get(&self, name: &str) -> Option<&'static CoercionDescriptor> {
        self.types.get(normalize(name).as_str()).copied()
    }

    /// Like `get`, but an unknown name is an error.
    pub fn resolve(&self, name: &str) -> Result<&'static CoercionDescriptor> {
        self.get(name)
            .ok_or_else(|| SqlmateError::UnknownType(name.trim().to_string()))
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

/// The process-wide registry.
pub fn registry() -> &'static TypeRegistry {
    &REGISTRY
}

/// Resolves a base type name against the process-wide registry.
pub fn resolve(name: &str) -> Result<&'static CoercionDescriptor> {
    registry().resolve(name)
}

fn normalize(name: &str) -> String {
    name.split_whitespace()
        .map(|word| word.to_ascii_uppercase())
        .collect::<Vec<_>>()
        .join(" ")
}

/// A declared column type split into its parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeclaredType {
    /// Upper-cased base name without arguments or modifiers
    pub base: String,
    /// Parenthesized arguments; quoted members are unquoted
    pub args: Vec<String>,
    pub unsigned: bool,
    /// The full declaration, upper-cased with whitespace collapsed
    pub normalized: String,
}

impl DeclaredType {
    /// Splits a declaration such as `varchar(64)`, `INT(11) UNSIGNED` or
    /// `enum('on','off')`. An empty declaration yields base `ANY`.
    pub fn parse(declared: &str) -> Self {
        let declared = declared.trim();
        let (head, args, tail) = match declared.find('(') {
            Some(open) => {
                let close = matching_paren(declared, open).unwrap_or(declared.len());
                let inner = &declared[open + 1..close.min(declared.len())];
                let tail = declared.get(close + 1..).unwrap_or("");
                (&declared[..open], split_args(inner), tail)
            }
            None => (declared, Vec::new(), ""),
        };

        let mut unsigned = false;
        let words: Vec<String> = head
            .split_whitespace()
            .chain(tail.split_whitespace())
            .map(str::to_ascii_uppercase)
            .filter(|word| match word.as_str() {
                "UNSIGNED" => {
                    unsigned = true;
                    false
                }
                "SIGNED" | "ZEROFILL" => false,
                _ => true,
            })
            .collect();

        let base = if words.is_empty() {
            "ANY".to_string()
        } else {
            words.join(" ")
        };

        DeclaredType {
            base,
            args,
            unsigned,
            normalized: normalize_declaration(declared),
        }
    }

    /// First argument as a number, e.g. the 64 in `VARCHAR(64)`.
    pub fn length(&self) -> Option<u64> {
        self.args.first().and_then(|a| a.parse().ok())
    }

    /// Precision and scale of `DECIMAL(p,s)`.
    pub fn precision_scale(&self) -> (Option<u32>, Option<u32>) {
        let precision = self.args.first().and_then(|a| a.parse().ok());
        let scale = self.args.get(1).and_then(|a| a.parse().ok());
        (precision, scale)
    }
}

fn normalize_declaration(declared: &str) -> String {
    // Quoted enum members keep their case
    let mut out = String::with_capacity(declared.len());
    let mut in_quote = false;
    let mut last_space = false;
    for ch in declared.chars() {
        if ch == '\'' {
            in_quote = !in_quote;
        }
        if !in_quote && ch.is_whitespace() {
            if !last_space {
                out.push(' ');
            }
            last_space = true;
            continue;
        }
        last_space = false;
        out.push(if in_quote { ch } else { ch.to_ascii_uppercase() });
    }
    out.trim().to_string()
}

fn matching_paren(s: &str, open: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_quote = false;
    for (i, ch) in s.char_indices().skip_while(|(i, _)| *i < open) {
        match ch {
            '\'' => in_quote = !in_quote,
            '(' if !in_quote => depth += 1,
            ')' if !in_quote => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

fn split_args(inner: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut chars = inner.chars().peekable();
    let mut in_quote = false;
    let mut quoted = false;

    while let Some(ch) = chars.next() {
        match ch {
            '\'' if in_quote && chars.peek() == Some(&'\'') => {
                chars.next();
                current.push('\'');
            }
            '\'' => {
                if !in_quote && current.trim().is_empty() {
                    current.clear();
                }
                in_quote = !in_quote;
                quoted = true;
            }
            ',' if !in_quote => {
                args.push(finish_arg(&mut current, quoted));
                quoted = false;
            }
            _ => current.push(ch),
        }
    }
    if !current.trim().is_empty() || quoted {
        args.push(finish_arg(&mut current, quoted));
    }
    args
}

fn finish_arg(current: &mut String, quoted: bool) -> String {
    let arg = std::mem::take(current);
    if quoted {
        arg
    } else {
        arg.trim().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_class_lengths() {
        assert_eq!(resolve("tinytext").unwrap().default_length, Some(255));
        assert_eq!(resolve("TEXT").unwrap().default_length, Some(65_535));
        assert_eq!(resolve("MediumText").unwrap().default_length, Some(16_777_215));
        assert_eq!(resolve("LONGTEXT").unwrap().default_length, Some(4_294_967_295));
        assert_eq!(resolve("VARCHAR").unwrap().default_length, Some(255));
        assert_eq!(resolve("JSON").unwrap().default_length, Some(4_294_967_295));
    }

    #[test]
    fn test_aliases_share_descriptors() {
        assert_eq!(resolve("character varying").unwrap().name, "VARCHAR");
        assert_eq!(resolve("BOOLEAN").unwrap().name, "BOOL");
        assert_eq!(resolve("double  precision").unwrap().name, "DOUBLE");
        assert_eq!(resolve("timestamp with time zone").unwrap().name, "TIMESTAMP");
        assert_eq!(resolve("NUMERIC").unwrap().kind, TypeKind::Decimal);
    }

    #[test]
    fn test_unknown_type() {
        match resolve("GEOMETRY") {
            Err(SqlmateError::UnknownType(name)) => assert_eq!(name, "GEOMETRY"),
            other => panic!("Expected UnknownType, got {:?}", other),
        }
        assert!(registry().get("GEOMETRY").is_none());
    }

    #[test]
    fn test_parse_simple_and_sized() {
        let t = DeclaredType::parse("varchar(64)");
        assert_eq!(t.base, "VARCHAR");
        assert_eq!(t.length(), Some(64));
        assert_eq!(t.normalized, "VARCHAR(64)");

        let t = DeclaredType::parse("DECIMAL(10, 2)");
        assert_eq!(t.precision_scale(), (Some(10), Some(2)));

        let t = DeclaredType::parse("character varying (20)");
        assert_eq!(t.base, "CHARACTER VARYING");
        assert_eq!(t.length(), Some(20));
    }

    #[test]
    fn test_parse_modifiers() {
        let t = DeclaredType::parse("int(11) unsigned");
        assert_eq!(t.base, "INT");
        assert!(t.unsigned);

        let t = DeclaredType::parse("BIGINT UNSIGNED ZEROFILL");
        assert_eq!(t.base, "BIGINT");
        assert!(t.unsigned);

        let t = DeclaredType::parse("");
        assert_eq!(t.base, "ANY");
        assert!(t.args.is_empty());
    }

    #[test]
    fn test_parse_enum_members() {
        let t = DeclaredType::parse("ENUM('on', 'off','it''s')");
        assert_eq!(t.base, "ENUM");
        assert_eq!(t.args, vec!["on", "off", "it's"]);
        assert_eq!(t.normalized, "ENUM('on', 'off','it''s')");

        let t = DeclaredType::parse("enum('', 'x')");
        assert_eq!(t.args, vec!["", "x"]);
    }
}
