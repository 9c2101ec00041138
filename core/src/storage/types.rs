//! Type registry: the closed set of column types a table may declare and
//! the physical SQLite column types they map to.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{DynaError, DynaResult};
use crate::storage::{Column, ColumnDefinition};

/// Logical column type, as named in a [`ColumnDefinition`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColumnType {
    Integer,
    String,
    Boolean,
    Float,
    DateTime,
    Json,
}

impl ColumnType {
    pub const ALL: [ColumnType; 6] = [
        ColumnType::Integer,
        ColumnType::String,
        ColumnType::Boolean,
        ColumnType::Float,
        ColumnType::DateTime,
        ColumnType::Json,
    ];

    pub fn tag(&self) -> &'static str {
        match self {
            ColumnType::Integer => "Integer",
            ColumnType::String => "String",
            ColumnType::Boolean => "Boolean",
            ColumnType::Float => "Float",
            ColumnType::DateTime => "DateTime",
            ColumnType::Json => "Json",
        }
    }

    /// Look a tag up in the registry. Matching ignores ASCII case, so both
    /// `Json` and `JSON` resolve.
    pub fn from_tag(tag: &str) -> DynaResult<ColumnType> {
        ColumnType::ALL
            .into_iter()
            .find(|t| t.tag().eq_ignore_ascii_case(tag.trim()))
            .ok_or_else(|| DynaError::UnsupportedType(tag.to_string()))
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Native column type as written in DDL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhysicalType {
    Integer,
    Varchar(Option<u32>),
    Boolean,
    Float,
    DateTime,
    Json,
}

impl PhysicalType {
    pub fn column_type(&self) -> ColumnType {
        match self {
            PhysicalType::Integer => ColumnType::Integer,
            PhysicalType::Varchar(_) => ColumnType::String,
            PhysicalType::Boolean => ColumnType::Boolean,
            PhysicalType::Float => ColumnType::Float,
            PhysicalType::DateTime => ColumnType::DateTime,
            PhysicalType::Json => ColumnType::Json,
        }
    }

    pub fn length(&self) -> Option<u32> {
        match self {
            PhysicalType::Varchar(len) => *len,
            _ => None,
        }
    }

    pub fn to_ddl(&self) -> String {
        match self {
            PhysicalType::Integer => "INTEGER".to_string(),
            PhysicalType::Varchar(Some(len)) => format!("VARCHAR({})", len),
            PhysicalType::Varchar(None) => "VARCHAR".to_string(),
            PhysicalType::Boolean => "BOOLEAN".to_string(),
            PhysicalType::Float => "FLOAT".to_string(),
            PhysicalType::DateTime => "DATETIME".to_string(),
            PhysicalType::Json => "JSON".to_string(),
        }
    }

    /// Map a declared type read back from the engine. Tables created by
    /// other tools may carry any declared type; anything unrecognized is
    /// treated as text.
    pub fn from_declared(declared: &str) -> PhysicalType {
        let upper = declared.trim().to_ascii_uppercase();
        let (base, arg) = match upper.split_once('(') {
            Some((base, rest)) => (base.trim(), rest.trim_end_matches(')').trim()),
            None => (upper.as_str(), ""),
        };

        match base {
            "INTEGER" | "INT" | "BIGINT" | "SMALLINT" | "TINYINT" => PhysicalType::Integer,
            "BOOLEAN" | "BOOL" => PhysicalType::Boolean,
            "FLOAT" | "REAL" | "DOUBLE" | "DOUBLE PRECISION" | "NUMERIC" | "DECIMAL" => {
                PhysicalType::Float
            }
            "DATETIME" | "TIMESTAMP" | "DATE" => PhysicalType::DateTime,
            "JSON" => PhysicalType::Json,
            "VARCHAR" | "CHARACTER VARYING" | "CHAR" | "NVARCHAR" => {
                PhysicalType::Varchar(arg.parse().ok().filter(|len| *len > 0))
            }
            _ => PhysicalType::Varchar(None),
        }
    }
}

impl fmt::Display for PhysicalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_ddl())
    }
}

/// Resolve a type tag to its physical type, without length information.
pub fn resolve(type_tag: &str) -> DynaResult<PhysicalType> {
    Ok(match ColumnType::from_tag(type_tag)? {
        ColumnType::Integer => PhysicalType::Integer,
        ColumnType::String => PhysicalType::Varchar(None),
        ColumnType::Boolean => PhysicalType::Boolean,
        ColumnType::Float => PhysicalType::Float,
        ColumnType::DateTime => PhysicalType::DateTime,
        ColumnType::Json => PhysicalType::Json,
    })
}

/// Build the physical column for a definition. `length` only applies to
/// String columns; constraint flags pass through untouched.
pub fn build_column(def: &ColumnDefinition) -> DynaResult<Column> {
    if def.name.trim().is_empty() {
        return Err(DynaError::InvalidSchema("column name must not be empty".into()));
    }

    let physical = match resolve(&def.type_tag)? {
        PhysicalType::Varchar(_) => PhysicalType::Varchar(def.length.filter(|len| *len > 0)),
        other => other,
    };

    let default = match &def.default {
        Some(value) => Some(value.clone().coerce(physical.column_type()).map_err(|reason| {
            DynaError::InvalidSchema(format!("default for column '{}': {}", def.name, reason))
        })?),
        None => None,
    };

    Ok(Column {
        name: def.name.clone(),
        physical,
        primary_key: def.primary_key,
        nullable: def.nullable,
        unique: def.unique,
        autoincrement: def.autoincrement,
        default: default.filter(|v| !v.is_null()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Value;

    fn def(name: &str, tag: &str) -> ColumnDefinition {
        ColumnDefinition::new(name, tag)
    }

    #[test]
    fn test_resolve_registry_tags() {
        assert_eq!(resolve("Integer").unwrap(), PhysicalType::Integer);
        assert_eq!(resolve("JSON").unwrap(), PhysicalType::Json);
        assert_eq!(resolve("datetime").unwrap(), PhysicalType::DateTime);
        assert_eq!(
            resolve("Decimal"),
            Err(DynaError::UnsupportedType("Decimal".into()))
        );
    }

    #[test]
    fn test_length_applies_to_strings_only() {
        let name = build_column(&def("name", "String").with_length(50)).unwrap();
        assert_eq!(name.physical.to_ddl(), "VARCHAR(50)");

        let age = build_column(&def("age", "Integer").with_length(50)).unwrap();
        assert_eq!(age.physical, PhysicalType::Integer);
        assert_eq!(age.physical.length(), None);
    }

    #[test]
    fn test_flags_pass_through() {
        let mut d = def("id", "Integer").primary_key().autoincrement();
        d.unique = true;
        let col = build_column(&d).unwrap();
        assert!(col.primary_key);
        assert!(col.autoincrement);
        assert!(col.unique);
        assert!(col.nullable);
    }

    #[test]
    fn test_default_is_coerced_to_column_type() {
        let col = build_column(&def("active", "Boolean").with_default(Value::Integer(1))).unwrap();
        assert_eq!(col.default, Some(Value::Boolean(true)));

        let err = build_column(&def("active", "Boolean").with_default(Value::from("yes")));
        assert!(matches!(err, Err(DynaError::InvalidSchema(_))));
    }

    #[test]
    fn test_declared_types_read_back() {
        assert_eq!(
            PhysicalType::from_declared("varchar(50)"),
            PhysicalType::Varchar(Some(50))
        );
        assert_eq!(PhysicalType::from_declared("BOOLEAN"), PhysicalType::Boolean);
        assert_eq!(PhysicalType::from_declared("blob"), PhysicalType::Varchar(None));
        assert_eq!(PhysicalType::from_declared(""), PhysicalType::Varchar(None));
    }
}
