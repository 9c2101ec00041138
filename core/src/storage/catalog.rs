//! Schema catalog: a refresh-on-use view of the tables in the storage engine

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::error::{DynaError, DynaResult};
use crate::storage::{ColumnDefinition, Deadline, StorageEngine, TableSchema};

/// One synchronized snapshot of the engine's tables.
#[derive(Debug, Default)]
pub struct CatalogView {
    order: Vec<String>,
    tables: HashMap<String, Arc<TableSchema>>,
}

impl CatalogView {
    fn from_schemas(schemas: Vec<TableSchema>) -> Self {
        let order = schemas.iter().map(|s| s.name.clone()).collect();
        let tables = schemas
            .into_iter()
            .map(|s| (s.name.clone(), Arc::new(s)))
            .collect();
        Self { order, tables }
    }

    pub fn names(&self) -> &[String] {
        &self.order
    }

    pub fn get(&self, name: &str) -> Option<&Arc<TableSchema>> {
        self.tables.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tables.contains_key(name)
    }
}

/// Tracks existing tables and mutates them.
///
/// The engine is the source of truth: every operation re-reads the table
/// definitions first, and the cached view is only a snapshot. Create and
/// delete hold a per-name mutex across synchronize, check and DDL, so
/// concurrent calls for one name are serialized while unrelated names
/// proceed in parallel.
pub struct SchemaCatalog {
    engine: Arc<StorageEngine>,
    view: RwLock<Arc<CatalogView>>,
    name_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl SchemaCatalog {
    pub fn new(engine: Arc<StorageEngine>) -> Self {
        Self {
            engine,
            view: RwLock::new(Arc::new(CatalogView::default())),
            name_locks: DashMap::new(),
        }
    }

    pub fn engine(&self) -> &Arc<StorageEngine> {
        &self.engine
    }

    /// The view as of the most recent synchronization.
    pub fn snapshot(&self) -> Arc<CatalogView> {
        self.view.read().clone()
    }

    /// Re-read every table definition from the engine and replace the view.
    pub fn synchronize(&self, deadline: Deadline) -> DynaResult<Arc<CatalogView>> {
        let view = Arc::new(CatalogView::from_schemas(self.engine.reflect(deadline)?));
        debug!(tables = view.order.len(), "catalog synchronized");
        *self.view.write() = Arc::clone(&view);
        Ok(view)
    }

    /// Create a table. Returns `false` if a table with this name already
    /// exists, including one created concurrently by someone else.
    pub fn create_table(
        &self,
        name: &str,
        columns: &[ColumnDefinition],
        deadline: Deadline,
    ) -> DynaResult<bool> {
        if columns.is_empty() {
            return Err(DynaError::InvalidSchema(
                "columns must be provided and not empty".into(),
            ));
        }

        self.with_name_lock(name, deadline, || {
            if self.synchronize(deadline)?.contains(name) {
                debug!(table = %name, "create skipped, table exists");
                return Ok(false);
            }

            let schema = TableSchema::from_definitions(name, columns)?;
            match self.engine.create_table(&schema, deadline) {
                Ok(()) => Ok(true),
                Err(DynaError::DuplicateTable(_)) => {
                    warn!(table = %name, "table created concurrently elsewhere");
                    Ok(false)
                }
                Err(err) => Err(err),
            }
        })
    }

    /// Drop a table. Returns `false` if no such table exists.
    pub fn delete_table(&self, name: &str, deadline: Deadline) -> DynaResult<bool> {
        self.with_name_lock(name, deadline, || {
            if !self.synchronize(deadline)?.contains(name) {
                return Ok(false);
            }

            match self.engine.drop_table(name, deadline) {
                Ok(()) => Ok(true),
                Err(DynaError::TableNotFound(_)) => {
                    warn!(table = %name, "table dropped concurrently elsewhere");
                    Ok(false)
                }
                Err(err) => Err(err),
            }
        })
    }

    pub fn list_tables(&self, deadline: Deadline) -> DynaResult<Vec<String>> {
        Ok(self.synchronize(deadline)?.names().to_vec())
    }

    /// Look up a table's current shape for a table operator.
    pub fn resolve_table(&self, name: &str, deadline: Deadline) -> DynaResult<Arc<TableSchema>> {
        self.synchronize(deadline)?
            .get(name)
            .cloned()
            .ok_or_else(|| DynaError::TableNotFound(name.to_string()))
    }

    /// Run `f` while holding the lock for `name`. Waiting for the lock
    /// counts against `deadline`.
    fn with_name_lock<T, F>(&self, name: &str, deadline: Deadline, f: F) -> DynaResult<T>
    where
        F: FnOnce() -> DynaResult<T>,
    {
        let lock = self.name_locks.entry(name.to_string()).or_default().value().clone();

        let result = {
            let guard = match deadline.instant() {
                Some(at) => lock.try_lock_until(at),
                None => Some(lock.lock()),
            };
            match guard {
                Some(_guard) => f(),
                None => {
                    debug!(table = %name, "timed out waiting for table lock");
                    Err(DynaError::Timeout)
                }
            }
        };

        // Only the map and this call hold the mutex: nobody is waiting on it.
        self.name_locks
            .remove_if(name, |_, held| Arc::strong_count(held) == 2);
        result
    }
}
