//! Table operator: insert, find, update and delete against one resolved table

use std::sync::Arc;

use rusqlite::params_from_iter;
use tracing::{debug, info};

use crate::error::{DynaError, DynaResult};
use crate::executor::sql::SqlBuilder;
use crate::executor::translator::{
    build_filter, build_pagination, build_projection, build_sort, build_update_set,
};
use crate::executor::{Assignments, Criteria, Row, Rows};
use crate::storage::{Deadline, StorageEngine, TableSchema, TxMode, Value};

/// Executes CRUD against a single table whose shape was resolved through the
/// schema catalog. Each call is one unit of work.
pub struct TableOperator {
    engine: Arc<StorageEngine>,
    schema: Arc<TableSchema>,
    deadline: Deadline,
}

impl TableOperator {
    pub fn new(engine: Arc<StorageEngine>, schema: Arc<TableSchema>, deadline: Deadline) -> Self {
        Self {
            engine,
            schema,
            deadline,
        }
    }

    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    /// Insert one row or a batch. Fields that are not columns of the table
    /// are dropped. The whole batch commits or none of it does; the result
    /// is the number of rows submitted.
    pub fn insert(&self, rows: Rows) -> DynaResult<usize> {
        let rows = rows.into_vec();
        if rows.is_empty() {
            return Ok(0);
        }

        let prepared = rows
            .into_iter()
            .map(|row| self.clean_row(row))
            .collect::<DynaResult<Vec<_>>>()?;
        let count = prepared.len();

        // Checkout, BEGIN and COMMIT failures belong to the batch too.
        self.engine
            .unit_of_work(TxMode::Write, self.deadline, |tx| {
                for (columns, values) in &prepared {
                    let sql = self.insert_sql(columns);
                    let mut stmt = tx.prepare_cached(&sql)?;
                    stmt.execute(params_from_iter(values.iter()))?;
                }
                Ok(())
            })
            .map_err(insert_failed)?;

        info!(table = %self.schema.name, rows = count, "rows inserted");
        Ok(count)
    }

    /// Keep the recognized fields of a row, coerced to their column types.
    fn clean_row(&self, row: Row) -> DynaResult<(Vec<String>, Vec<Value>)> {
        let mut columns = Vec::with_capacity(row.len());
        let mut values = Vec::with_capacity(row.len());

        for (field, value) in row {
            let Some(column) = self.schema.column(&field) else {
                debug!(table = %self.schema.name, field = %field, "dropping unknown field");
                continue;
            };
            let value = value.coerce(column.column_type()).map_err(|reason| {
                DynaError::InsertFailed(format!("column '{}': {}", column.name, reason))
            })?;
            columns.push(column.name.clone());
            values.push(value);
        }

        Ok((columns, values))
    }

    fn insert_sql(&self, columns: &[String]) -> String {
        let mut sql = SqlBuilder::new("INSERT INTO ");
        sql.push_ident(&self.schema.name);
        if columns.is_empty() {
            sql.push(" DEFAULT VALUES");
        } else {
            sql.push(" (")
                .push_list(columns, ", ", |s, c| {
                    s.push_ident(c);
                })
                .push(") VALUES (")
                .push(&vec!["?"; columns.len()].join(", "))
                .push(")");
        }
        sql.sql().to_string()
    }

    /// Filter, project, sort, then paginate.
    pub fn find(
        &self,
        criteria: &Criteria,
        projection: Option<&[String]>,
        sort: &[(String, String)],
        skip: i64,
        limit: i64,
    ) -> DynaResult<Vec<Row>> {
        let filter = build_filter(&self.schema, criteria)?;
        let projection = build_projection(&self.schema, projection)?;
        let ordering = build_sort(&self.schema, sort)?;
        let pagination = build_pagination(skip, limit)?;

        let mut sql = SqlBuilder::new("SELECT ");
        projection.write_to(&mut sql);
        sql.push(" FROM ").push_ident(&self.schema.name);
        filter.write_to(&mut sql);
        ordering.write_to(&mut sql);
        pagination.write_to(&mut sql);
        debug!(table = %self.schema.name, sql = sql.sql(), "find");

        let columns = projection.columns();
        let rows = self.engine.unit_of_work(TxMode::Read, self.deadline, |tx| {
            let mut stmt = tx.prepare(sql.sql())?;
            let rows = stmt
                .query_map(sql.bound().as_slice(), |raw| {
                    let mut row = Row::with_capacity(columns.len());
                    for (idx, column) in columns.iter().enumerate() {
                        let value = Value::from_stored(raw.get_ref(idx)?, column.column_type());
                        row.insert(column.name.clone(), value);
                    }
                    Ok(row)
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })?;

        debug!(table = %self.schema.name, rows = rows.len(), "find returned");
        Ok(rows)
    }

    /// Apply `payload` to every row matching `criteria`; returns rows changed.
    pub fn update(&self, criteria: &Criteria, payload: &Assignments) -> DynaResult<usize> {
        let filter = build_filter(&self.schema, criteria)?;
        let set = build_update_set(&self.schema, payload)?;

        let mut sql = SqlBuilder::new("UPDATE ");
        sql.push_ident(&self.schema.name);
        set.write_to(&mut sql);
        filter.write_to(&mut sql);

        let modified = self.engine.unit_of_work(TxMode::Write, self.deadline, |tx| {
            Ok(tx.execute(sql.sql(), sql.bound().as_slice())?)
        })?;

        info!(table = %self.schema.name, modified, "rows updated");
        Ok(modified)
    }

    /// Remove every row matching `criteria`; returns rows removed.
    pub fn delete(&self, criteria: &Criteria) -> DynaResult<usize> {
        let filter = build_filter(&self.schema, criteria)?;

        let mut sql = SqlBuilder::new("DELETE FROM ");
        sql.push_ident(&self.schema.name);
        filter.write_to(&mut sql);

        let deleted = self.engine.unit_of_work(TxMode::Write, self.deadline, |tx| {
            Ok(tx.execute(sql.sql(), sql.bound().as_slice())?)
        })?;

        info!(table = %self.schema.name, deleted, "rows deleted");
        Ok(deleted)
    }
}

fn insert_failed(err: DynaError) -> DynaError {
    match err {
        DynaError::StorageFailure(cause) => DynaError::InsertFailed(cause),
        other => other,
    }
}
