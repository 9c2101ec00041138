//! The engine's public surface: table management and generic CRUD by table
//! name.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::StorageConfig;
use crate::error::DynaResult;
use crate::executor::{Assignments, Criteria, Row, Rows, SortSpec, TableOperator};
use crate::storage::{
    ColumnDefinition, Deadline, SchemaCatalog, StorageEngine, TableSchema, Value,
};

#[cfg(test)]
mod tests;

/// Arguments of a query, as sent by clients.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryParams {
    #[serde(default)]
    pub query: Option<Criteria>,
    #[serde(default)]
    pub projection: Option<Vec<String>>,
    #[serde(default)]
    pub sort: Option<SortSpec>,
    #[serde(default)]
    pub skip: i64,
    #[serde(default)]
    pub limit: i64,
}

impl QueryParams {
    pub fn filter(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.query
            .get_or_insert_with(Criteria::new)
            .insert(field.into(), value.into());
        self
    }

    pub fn project<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.projection = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    pub fn sort_by(mut self, field: impl Into<String>, direction: impl Into<String>) -> Self {
        self.sort
            .get_or_insert_with(Vec::new)
            .push((field.into(), direction.into()));
        self
    }

    pub fn skip(mut self, skip: i64) -> Self {
        self.skip = skip;
        self
    }

    pub fn limit(mut self, limit: i64) -> Self {
        self.limit = limit;
        self
    }
}

/// Dynamic-schema database: tables are declared at runtime and every
/// operation addresses a table by name.
///
/// Calls are blocking and safe to make from many threads at once. Each one
/// gets a fresh deadline from the configured operation timeout, which
/// covers both the catalog lookup and the table work.
pub struct Database {
    engine: Arc<StorageEngine>,
    catalog: SchemaCatalog,
    operation_timeout: Option<Duration>,
}

impl Database {
    pub fn open(config: &StorageConfig) -> DynaResult<Self> {
        let engine = Arc::new(StorageEngine::open(config)?);
        Ok(Self {
            catalog: SchemaCatalog::new(Arc::clone(&engine)),
            engine,
            operation_timeout: config.operation_timeout(),
        })
    }

    pub fn in_memory() -> DynaResult<Self> {
        Self::open(&StorageConfig::in_memory())
    }

    pub fn with_operation_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.operation_timeout = timeout;
        self
    }

    pub fn catalog(&self) -> &SchemaCatalog {
        &self.catalog
    }

    fn deadline(&self) -> Deadline {
        Deadline::from_timeout(self.operation_timeout)
    }

    pub fn create_table(&self, name: &str, columns: &[ColumnDefinition]) -> DynaResult<bool> {
        self.catalog.create_table(name, columns, self.deadline())
    }

    pub fn list_tables(&self) -> DynaResult<Vec<String>> {
        self.catalog.list_tables(self.deadline())
    }

    pub fn delete_table(&self, name: &str) -> DynaResult<bool> {
        self.catalog.delete_table(name, self.deadline())
    }

    /// Current shape of a table.
    pub fn describe_table(&self, name: &str) -> DynaResult<Arc<TableSchema>> {
        self.catalog.resolve_table(name, self.deadline())
    }

    /// Resolve `name` and bind an operator to it, sharing `deadline`.
    fn operator(&self, name: &str, deadline: Deadline) -> DynaResult<TableOperator> {
        let schema = self.catalog.resolve_table(name, deadline)?;
        debug!(table = %name, columns = schema.columns().len(), "table resolved");
        Ok(TableOperator::new(Arc::clone(&self.engine), schema, deadline))
    }

    pub fn insert_one(&self, table: &str, row: Row) -> DynaResult<bool> {
        let deadline = self.deadline();
        let inserted = self.operator(table, deadline)?.insert(Rows::One(row))?;
        Ok(inserted == 1)
    }

    pub fn insert_many(&self, table: &str, rows: Vec<Row>) -> DynaResult<usize> {
        let deadline = self.deadline();
        self.operator(table, deadline)?.insert(Rows::Many(rows))
    }

    pub fn query(&self, table: &str, params: &QueryParams) -> DynaResult<Vec<Row>> {
        let deadline = self.deadline();
        let empty = Criteria::new();
        self.operator(table, deadline)?.find(
            params.query.as_ref().unwrap_or(&empty),
            params.projection.as_deref(),
            params.sort.as_deref().unwrap_or(&[]),
            params.skip,
            params.limit,
        )
    }

    pub fn update_many(
        &self,
        table: &str,
        criteria: &Criteria,
        payload: &Assignments,
    ) -> DynaResult<usize> {
        let deadline = self.deadline();
        self.operator(table, deadline)?.update(criteria, payload)
    }

    pub fn delete_many(&self, table: &str, criteria: &Criteria) -> DynaResult<usize> {
        let deadline = self.deadline();
        self.operator(table, deadline)?.delete(criteria)
    }
}
