//! DDL rendering and schema reflection against SQLite

use rusqlite::{Connection, params};
use tracing::debug;

use crate::error::DynaResult;
use crate::storage::{Column, ColumnType, PhysicalType, TableSchema, Value};

/// Quote an identifier for SQLite, doubling any embedded quotes.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Render `CREATE TABLE` for a schema.
///
/// A sole INTEGER primary key is declared inline so it becomes the rowid
/// alias; every other primary key is a table constraint. There is no
/// `IF NOT EXISTS`: a racing create must fail with "already exists".
pub fn create_table_sql(schema: &TableSchema) -> String {
    let pk = schema.primary_key();
    let rowid_key = match pk.as_slice() {
        [only] if only.column_type() == ColumnType::Integer => Some(only.name.as_str()),
        _ => None,
    };
    let autoinc = schema.autoincrement_column().map(|c| c.name.as_str());

    for col in schema.columns() {
        if col.autoincrement && autoinc != Some(col.name.as_str()) {
            debug!(
                table = %schema.name,
                column = %col.name,
                "autoincrement ignored, column is not a sole integer primary key"
            );
        }
    }

    let mut parts: Vec<String> = schema
        .columns()
        .iter()
        .map(|col| {
            let mut def = format!("{} {}", quote_ident(&col.name), col.physical.to_ddl());
            if rowid_key == Some(col.name.as_str()) {
                def.push_str(" PRIMARY KEY");
                if autoinc.is_some() {
                    def.push_str(" AUTOINCREMENT");
                }
            } else {
                if col.primary_key || !col.nullable {
                    def.push_str(" NOT NULL");
                }
                if col.unique {
                    def.push_str(" UNIQUE");
                }
            }
            if let Some(default) = &col.default {
                def.push_str(" DEFAULT ");
                def.push_str(&default.to_sql_literal());
            }
            def
        })
        .collect();

    if rowid_key.is_none() && !pk.is_empty() {
        let keys: Vec<String> = pk.iter().map(|c| quote_ident(&c.name)).collect();
        parts.push(format!("PRIMARY KEY ({})", keys.join(", ")));
    }

    format!(
        "CREATE TABLE {} (\n  {}\n)",
        quote_ident(&schema.name),
        parts.join(",\n  ")
    )
}

pub fn drop_table_sql(name: &str) -> String {
    format!("DROP TABLE {}", quote_ident(name))
}

/// Read every user table definition, ordered by name.
pub fn reflect_tables(conn: &Connection) -> DynaResult<Vec<TableSchema>> {
    let mut stmt = conn.prepare(
        "SELECT name, COALESCE(sql, '') FROM sqlite_master \
         WHERE type = 'table' AND name NOT LIKE 'sqlite\\_%' ESCAPE '\\' \
         ORDER BY name",
    )?;
    let tables = stmt
        .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;

    let mut schemas = Vec::with_capacity(tables.len());
    for (name, sql) in tables {
        schemas.push(reflect_table(conn, &name, &sql)?);
    }
    debug!(count = schemas.len(), "reflected tables");
    Ok(schemas)
}

fn reflect_table(conn: &Connection, name: &str, create_sql: &str) -> DynaResult<TableSchema> {
    let mut stmt = conn.prepare(
        "SELECT name, type, \"notnull\", dflt_value, pk FROM pragma_table_info(?1) ORDER BY cid",
    )?;
    let mut columns = stmt
        .query_map(params![name], |row| {
            let declared: String = row.get(1)?;
            let physical = PhysicalType::from_declared(&declared);
            let default: Option<String> = row.get(3)?;
            Ok(Column {
                name: row.get(0)?,
                physical,
                primary_key: row.get::<_, i64>(4)? > 0,
                nullable: row.get::<_, i64>(2)? == 0,
                unique: false,
                autoincrement: false,
                default: default.and_then(|text| parse_default(&text, physical.column_type())),
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    for column_name in unique_columns(conn, name)? {
        if let Some(col) = columns.iter_mut().find(|c| c.name == column_name) {
            col.unique = true;
        }
    }

    let pk: Vec<usize> = columns
        .iter()
        .enumerate()
        .filter(|(_, c)| c.primary_key)
        .map(|(i, _)| i)
        .collect();
    if let [only] = pk.as_slice() {
        let col = &mut columns[*only];
        if col.column_type() == ColumnType::Integer {
            // rowid alias: NOT NULL in practice even if not declared
            col.nullable = false;
            col.autoincrement = create_sql.to_ascii_uppercase().contains("AUTOINCREMENT");
        }
    }
    for idx in pk {
        columns[idx].nullable = false;
    }

    TableSchema::new(name, columns)
}

/// Columns carrying a single-column UNIQUE constraint or unique index.
fn unique_columns(conn: &Connection, table: &str) -> DynaResult<Vec<String>> {
    let mut list = conn.prepare("SELECT name, \"unique\", origin FROM pragma_index_list(?1)")?;
    let indexes = list
        .query_map(params![table], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)? != 0,
                row.get::<_, String>(2)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut info = conn.prepare("SELECT name FROM pragma_index_info(?1)")?;
    let mut unique = Vec::new();
    for (index, is_unique, origin) in indexes {
        if !is_unique || origin == "pk" {
            continue;
        }
        let cols = info
            .query_map(params![index], |row| row.get::<_, Option<String>>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        if let [Some(col)] = cols.as_slice() {
            unique.push(col.clone());
        }
    }
    Ok(unique)
}

/// Turn a stored `dflt_value` expression back into a value. Expressions that
/// are not plain literals are kept as their text.
fn parse_default(text: &str, column_type: ColumnType) -> Option<Value> {
    let text = text.trim();
    if text.eq_ignore_ascii_case("NULL") {
        return None;
    }

    let raw = if text.len() >= 2 && text.starts_with('\'') && text.ends_with('\'') {
        let inner = text[1..text.len() - 1].replace("''", "'");
        if column_type == ColumnType::Json {
            return Some(match serde_json::from_str(&inner) {
                Ok(json) => Value::Json(json),
                Err(_) => Value::String(inner),
            });
        }
        Value::String(inner)
    } else if let Ok(i) = text.parse::<i64>() {
        Value::Integer(i)
    } else if let Ok(f) = text.parse::<f64>() {
        Value::Float(f)
    } else if text.eq_ignore_ascii_case("TRUE") {
        Value::Boolean(true)
    } else if text.eq_ignore_ascii_case("FALSE") {
        Value::Boolean(false)
    } else {
        Value::String(text.to_string())
    };

    Some(raw.clone().coerce(column_type).unwrap_or(raw))
}
