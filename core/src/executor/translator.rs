//! Query translator: turns generic, data-shaped criteria into statement
//! fragments scoped to one resolved table.
//!
//! Every builder is pure. Field names are checked against the table's
//! columns and values are coerced to the column type before anything is
//! sent to the engine.

use std::collections::HashSet;
use std::fmt;

use tracing::debug;

use crate::error::{DynaError, DynaResult};
use crate::executor::sql::SqlBuilder;
use crate::executor::{Assignments, Criteria};
use crate::storage::{Column, TableSchema, Value};

fn coerce_for(column: &Column, value: Value) -> DynaResult<Value> {
    value
        .coerce(column.column_type())
        .map_err(|reason| DynaError::InvalidValue {
            column: column.name.clone(),
            reason,
        })
}

/// Conjunction of equality constraints. Empty matches every row.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Filter {
    conditions: Vec<(String, Value)>,
}

impl Filter {
    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.conditions.len()
    }

    /// Append ` WHERE ...`, or nothing for an empty filter.
    pub fn write_to(&self, sql: &mut SqlBuilder) {
        if self.conditions.is_empty() {
            return;
        }
        sql.push(" WHERE ");
        sql.push_list(&self.conditions, " AND ", |s, (column, value)| {
            s.push_ident(column);
            if value.is_null() {
                s.push(" IS NULL");
            } else {
                s.push(" = ").push_param(value.clone());
            }
        });
    }
}

/// Result columns, in output order.
#[derive(Debug, Clone, PartialEq)]
pub struct Projection {
    columns: Vec<Column>,
}

impl Projection {
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn write_to(&self, sql: &mut SqlBuilder) {
        sql.push_list(&self.columns, ", ", |s, column| {
            s.push_ident(&column.name);
        });
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    /// Exactly `asc` or `desc`.
    pub fn parse(direction: &str) -> DynaResult<Self> {
        match direction {
            "asc" => Ok(SortDirection::Asc),
            "desc" => Ok(SortDirection::Desc),
            other => Err(DynaError::InvalidSortDirection(other.to_string())),
        }
    }
}

impl fmt::Display for SortDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        })
    }
}

/// Ordering keys; the first key has the highest precedence.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Ordering {
    keys: Vec<(String, SortDirection)>,
}

impl Ordering {
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn write_to(&self, sql: &mut SqlBuilder) {
        if self.keys.is_empty() {
            return;
        }
        sql.push(" ORDER BY ");
        sql.push_list(&self.keys, ", ", |s, (column, direction)| {
            s.push_ident(column).push(" ").push(&direction.to_string());
        });
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Pagination {
    pub offset: u64,
    /// `None` is unbounded
    pub limit: Option<u64>,
}

impl Pagination {
    pub fn write_to(&self, sql: &mut SqlBuilder) {
        match (self.limit, self.offset) {
            (None, 0) => {}
            (limit, offset) => {
                // SQLite only accepts OFFSET after LIMIT; -1 means no limit
                let limit = limit.map_or(-1, |l| i64::try_from(l).unwrap_or(i64::MAX));
                sql.push(" LIMIT ").push_param(Value::Integer(limit));
                if offset > 0 {
                    let offset = i64::try_from(offset).unwrap_or(i64::MAX);
                    sql.push(" OFFSET ").push_param(Value::Integer(offset));
                }
            }
        }
    }
}

/// Column assignments for an update, in column name order.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateSet {
    assignments: Vec<(String, Value)>,
}

impl UpdateSet {
    pub fn len(&self) -> usize {
        self.assignments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assignments.is_empty()
    }

    pub fn write_to(&self, sql: &mut SqlBuilder) {
        sql.push(" SET ");
        sql.push_list(&self.assignments, ", ", |s, (column, value)| {
            s.push_ident(column).push(" = ").push_param(value.clone());
        });
    }
}

pub fn build_filter(schema: &TableSchema, criteria: &Criteria) -> DynaResult<Filter> {
    let conditions = criteria
        .iter()
        .map(|(field, value)| {
            let column = schema.require(field)?;
            Ok((column.name.clone(), coerce_for(column, value.clone())?))
        })
        .collect::<DynaResult<Vec<_>>>()?;

    debug!(table = %schema.name, conditions = conditions.len(), "filter built");
    Ok(Filter { conditions })
}

/// Absent or empty selects every column in table order. Repeated names
/// keep their first position.
pub fn build_projection(
    schema: &TableSchema,
    projection: Option<&[String]>,
) -> DynaResult<Projection> {
    let requested = match projection {
        Some(fields) if !fields.is_empty() => fields,
        _ => {
            return Ok(Projection {
                columns: schema.columns().to_vec(),
            });
        }
    };

    let mut seen = HashSet::with_capacity(requested.len());
    let mut columns = Vec::with_capacity(requested.len());
    for field in requested {
        let column = schema.require(field)?;
        if seen.insert(field.as_str()) {
            columns.push(column.clone());
        }
    }
    Ok(Projection { columns })
}

pub fn build_sort(schema: &TableSchema, sort: &[(String, String)]) -> DynaResult<Ordering> {
    let keys = sort
        .iter()
        .map(|(field, direction)| {
            let column = schema.require(field)?;
            Ok((column.name.clone(), SortDirection::parse(direction)?))
        })
        .collect::<DynaResult<Vec<_>>>()?;
    Ok(Ordering { keys })
}

/// `limit = 0` is unbounded and `skip = 0` applies no offset.
pub fn build_pagination(skip: i64, limit: i64) -> DynaResult<Pagination> {
    if skip < 0 {
        return Err(DynaError::InvalidPagination(format!(
            "skip must be >= 0, got {}",
            skip
        )));
    }
    if limit < 0 {
        return Err(DynaError::InvalidPagination(format!(
            "limit must be >= 0, got {}",
            limit
        )));
    }

    Ok(Pagination {
        offset: skip as u64,
        limit: (limit > 0).then_some(limit as u64),
    })
}

pub fn build_update_set(schema: &TableSchema, payload: &Assignments) -> DynaResult<UpdateSet> {
    if payload.is_empty() {
        return Err(DynaError::EmptyUpdate);
    }

    let assignments = payload
        .iter()
        .map(|(field, value)| {
            let column = schema.require(field)?;
            Ok((column.name.clone(), coerce_for(column, value.clone())?))
        })
        .collect::<DynaResult<Vec<_>>>()?;
    Ok(UpdateSet { assignments })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::ColumnDefinition;
    use pretty_assertions::assert_eq;

    fn people() -> TableSchema {
        TableSchema::from_definitions(
            "people",
            &[
                ColumnDefinition::new("id", "Integer").primary_key().autoincrement(),
                ColumnDefinition::new("name", "String"),
                ColumnDefinition::new("age", "Integer"),
                ColumnDefinition::new("active", "Boolean"),
            ],
        )
        .unwrap()
    }

    fn criteria(pairs: &[(&str, Value)]) -> Criteria {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn render(f: impl FnOnce(&mut SqlBuilder)) -> SqlBuilder {
        let mut sql = SqlBuilder::new("");
        f(&mut sql);
        sql
    }

    #[test]
    fn test_filter_is_anded_and_coerced() {
        let filter = build_filter(
            &people(),
            &criteria(&[("active", Value::Integer(1)), ("name", Value::Null)]),
        )
        .unwrap();
        let sql = render(|s| filter.write_to(s));

        assert_eq!(sql.sql(), " WHERE \"active\" = ? AND \"name\" IS NULL");
        assert_eq!(sql.params(), &[Value::Boolean(true)]);
    }

    #[test]
    fn test_empty_filter_matches_all() {
        let filter = build_filter(&people(), &Criteria::new()).unwrap();
        assert!(filter.is_empty());
        assert_eq!(render(|s| filter.write_to(s)).sql(), "");
    }

    #[test]
    fn test_filter_rejects_unknown_and_mistyped_fields() {
        assert_eq!(
            build_filter(&people(), &criteria(&[("nick", Value::from("x"))])),
            Err(DynaError::unknown_column("people", "nick"))
        );
        assert!(matches!(
            build_filter(&people(), &criteria(&[("age", Value::from("ten"))])),
            Err(DynaError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_projection_order_and_duplicates() {
        let fields: Vec<String> = ["age", "name", "age"].iter().map(|s| s.to_string()).collect();
        let projection = build_projection(&people(), Some(fields.as_slice())).unwrap();
        assert_eq!(
            render(|s| projection.write_to(s)).sql(),
            "\"age\", \"name\""
        );

        let all = build_projection(&people(), Some(&[][..])).unwrap();
        assert_eq!(all.columns().len(), 4);

        let bad = vec!["nope".to_string()];
        assert!(build_projection(&people(), Some(bad.as_slice())).is_err());
    }

    #[test]
    fn test_sort_directions() {
        let sort = vec![
            ("age".to_string(), "asc".to_string()),
            ("name".to_string(), "desc".to_string()),
        ];
        let ordering = build_sort(&people(), &sort).unwrap();
        assert_eq!(
            render(|s| ordering.write_to(s)).sql(),
            " ORDER BY \"age\" ASC, \"name\" DESC"
        );

        let upper = vec![("age".to_string(), "ASC".to_string())];
        assert_eq!(
            build_sort(&people(), &upper),
            Err(DynaError::InvalidSortDirection("ASC".into()))
        );

        let unknown = vec![("height".to_string(), "asc".to_string())];
        assert_eq!(
            build_sort(&people(), &unknown),
            Err(DynaError::unknown_column("people", "height"))
        );
    }

    #[test]
    fn test_pagination_bounds() {
        assert!(matches!(
            build_pagination(-1, 0),
            Err(DynaError::InvalidPagination(_))
        ));
        assert!(build_pagination(0, -5).is_err());

        let none = build_pagination(0, 0).unwrap();
        assert_eq!(render(|s| none.write_to(s)).sql(), "");

        let window = build_pagination(2, 3).unwrap();
        let sql = render(|s| window.write_to(s));
        assert_eq!(sql.sql(), " LIMIT ? OFFSET ?");
        assert_eq!(sql.params(), &[Value::Integer(3), Value::Integer(2)]);

        let skip_only = build_pagination(4, 0).unwrap();
        let sql = render(|s| skip_only.write_to(s));
        assert_eq!(sql.params(), &[Value::Integer(-1), Value::Integer(4)]);
    }

    #[test]
    fn test_update_set() {
        assert_eq!(
            build_update_set(&people(), &Assignments::new()),
            Err(DynaError::EmptyUpdate)
        );

        let set = build_update_set(&people(), &criteria(&[("age", Value::Float(41.0))])).unwrap();
        let sql = render(|s| set.write_to(s));
        assert_eq!(sql.sql(), " SET \"age\" = ?");
        assert_eq!(sql.params(), &[Value::Integer(41)]);
    }
}
