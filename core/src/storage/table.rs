//! Column definitions and resolved table schemas

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::{DynaError, DynaResult};
use crate::storage::types::build_column;
use crate::storage::{ColumnType, PhysicalType, Value};

/// A column as declared by a caller in a create-table request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDefinition {
    pub name: String,
    #[serde(rename = "type")]
    pub type_tag: String,
    #[serde(default)]
    pub primary_key: bool,
    #[serde(default = "default_nullable")]
    pub nullable: bool,
    #[serde(default)]
    pub unique: bool,
    #[serde(default)]
    pub autoincrement: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<u32>,
}

fn default_nullable() -> bool {
    true
}

impl ColumnDefinition {
    pub fn new(name: impl Into<String>, type_tag: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_tag: type_tag.into(),
            primary_key: false,
            nullable: true,
            unique: false,
            autoincrement: false,
            default: None,
            length: None,
        }
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn autoincrement(mut self) -> Self {
        self.autoincrement = true;
        self
    }

    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn with_length(mut self, length: u32) -> Self {
        self.length = Some(length);
        self
    }
}

/// A physical column, either built from a [`ColumnDefinition`] or
/// reflected from the storage engine.
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub physical: PhysicalType,
    pub primary_key: bool,
    pub nullable: bool,
    pub unique: bool,
    pub autoincrement: bool,
    pub default: Option<Value>,
}

impl Column {
    pub fn column_type(&self) -> ColumnType {
        self.physical.column_type()
    }

    pub fn to_definition(&self) -> ColumnDefinition {
        ColumnDefinition {
            name: self.name.clone(),
            type_tag: self.column_type().tag().to_string(),
            primary_key: self.primary_key,
            nullable: self.nullable,
            unique: self.unique,
            autoincrement: self.autoincrement,
            default: self.default.clone(),
            length: self.physical.length(),
        }
    }
}

/// The resolved shape of one table: its ordered columns plus a name lookup.
#[derive(Debug, Clone, PartialEq)]
pub struct TableSchema {
    pub name: String,
    columns: Vec<Column>,
    positions: HashMap<String, usize>,
}

impl TableSchema {
    /// Assemble a schema from already-built columns.
    pub fn new(name: impl Into<String>, columns: Vec<Column>) -> DynaResult<Self> {
        let name = name.into();
        validate_table_name(&name)?;

        if columns.is_empty() {
            return Err(DynaError::InvalidSchema(
                "columns must be provided and not empty".into(),
            ));
        }

        // SQLite compares identifiers case-insensitively.
        let mut seen = HashSet::with_capacity(columns.len());
        let mut positions = HashMap::with_capacity(columns.len());
        for (idx, column) in columns.iter().enumerate() {
            if !seen.insert(column.name.to_ascii_lowercase()) {
                return Err(DynaError::InvalidSchema(format!(
                    "duplicate column name '{}'",
                    column.name
                )));
            }
            positions.insert(column.name.clone(), idx);
        }

        Ok(Self {
            name,
            columns,
            positions,
        })
    }

    /// Build a schema from caller definitions through the type registry.
    pub fn from_definitions(name: &str, definitions: &[ColumnDefinition]) -> DynaResult<Self> {
        let columns = definitions
            .iter()
            .map(build_column)
            .collect::<DynaResult<Vec<_>>>()?;
        Self::new(name, columns)
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.positions.get(name).map(|&idx| &self.columns[idx])
    }

    /// Like [`TableSchema::column`], but a miss is an `UnknownColumn` error.
    pub fn require(&self, name: &str) -> DynaResult<&Column> {
        self.column(name)
            .ok_or_else(|| DynaError::unknown_column(&self.name, name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.positions.contains_key(name)
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    pub fn primary_key(&self) -> Vec<&Column> {
        self.columns.iter().filter(|c| c.primary_key).collect()
    }

    /// The column that gets an `AUTOINCREMENT` key, if any. SQLite only
    /// supports it on a single INTEGER PRIMARY KEY column.
    pub fn autoincrement_column(&self) -> Option<&Column> {
        match self.primary_key().as_slice() {
            [pk] if pk.autoincrement && pk.column_type() == ColumnType::Integer => Some(pk),
            _ => None,
        }
    }
}

fn validate_table_name(name: &str) -> DynaResult<()> {
    if name.trim().is_empty() {
        return Err(DynaError::InvalidSchema("table name must not be empty".into()));
    }
    if name.to_ascii_lowercase().starts_with("sqlite_") {
        return Err(DynaError::InvalidSchema(format!(
            "table name '{}' uses the reserved prefix 'sqlite_'",
            name
        )));
    }
    Ok(())
}
