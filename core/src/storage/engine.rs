//! Pooled SQLite storage engine

use std::time::Duration;

use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{OpenFlags, Transaction};
use tracing::{debug, info};

use crate::config::{DatabaseLocation, StorageConfig};
use crate::error::{DynaError, DynaResult};
use crate::storage::ddl::{create_table_sql, drop_table_sql, reflect_tables};
use crate::storage::transaction::{Deadline, TxMode, run_unit_of_work};
use crate::storage::TableSchema;

/// Longest wait for a pooled connection when the operation has no deadline.
const CHECKOUT_TIMEOUT: Duration = Duration::from_secs(30);

/// The source of truth for table definitions and rows. Every operation
/// checks out one pooled connection and runs as one unit of work.
pub struct StorageEngine {
    pool: Pool<SqliteConnectionManager>,
    location: DatabaseLocation,
}

impl StorageEngine {
    pub fn open(config: &StorageConfig) -> DynaResult<Self> {
        let location = config.location();
        let busy_timeout = config.busy_timeout();

        let pool = match &location {
            DatabaseLocation::Memory => {
                // Every connection to ":memory:" is a separate database, so
                // the pool holds exactly one and never recycles it.
                let manager = SqliteConnectionManager::memory()
                    .with_init(move |c| c.busy_timeout(busy_timeout));
                Pool::builder()
                    .max_size(1)
                    .idle_timeout(None)
                    .max_lifetime(None)
                    .connection_timeout(CHECKOUT_TIMEOUT)
                    .build(manager)?
            }
            DatabaseLocation::File(path) => {
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    std::fs::create_dir_all(parent)?;
                }
                let manager = SqliteConnectionManager::file(path)
                    .with_flags(
                        OpenFlags::SQLITE_OPEN_READ_WRITE
                            | OpenFlags::SQLITE_OPEN_CREATE
                            | OpenFlags::SQLITE_OPEN_NO_MUTEX
                            | OpenFlags::SQLITE_OPEN_URI,
                    )
                    .with_init(move |c| {
                        c.busy_timeout(busy_timeout)?;
                        c.execute_batch("PRAGMA journal_mode = WAL;")
                    });
                Pool::builder()
                    .max_size(config.max_connections.max(1))
                    .connection_timeout(CHECKOUT_TIMEOUT)
                    .build(manager)?
            }
        };

        info!(location = ?location, pool_size = pool.max_size(), "storage engine opened");
        Ok(Self { pool, location })
    }

    pub fn in_memory() -> DynaResult<Self> {
        Self::open(&StorageConfig::in_memory())
    }

    pub fn location(&self) -> &DatabaseLocation {
        &self.location
    }

    fn checkout(&self, deadline: Deadline) -> DynaResult<PooledConnection<SqliteConnectionManager>> {
        let wait = deadline.remaining().unwrap_or(CHECKOUT_TIMEOUT);
        self.pool.get_timeout(wait).map_err(|err| {
            if deadline.expired() {
                DynaError::Timeout
            } else {
                err.into()
            }
        })
    }

    /// Check out a connection and run `f` as one transaction. The connection
    /// goes back to the pool on every exit path.
    pub fn unit_of_work<T, F>(&self, mode: TxMode, deadline: Deadline, f: F) -> DynaResult<T>
    where
        F: FnOnce(&Transaction<'_>) -> DynaResult<T>,
    {
        deadline.check()?;
        let mut conn = self.checkout(deadline)?;
        run_unit_of_work(&mut conn, mode, deadline, f)
    }

    /// Read every table definition currently in the database.
    pub fn reflect(&self, deadline: Deadline) -> DynaResult<Vec<TableSchema>> {
        self.unit_of_work(TxMode::Read, deadline, |tx| reflect_tables(tx))
    }

    /// Issue `CREATE TABLE`. A table that appeared since the caller last
    /// looked fails with `DuplicateTable`.
    pub fn create_table(&self, schema: &TableSchema, deadline: Deadline) -> DynaResult<()> {
        let sql = create_table_sql(schema);
        debug!(table = %schema.name, sql = %sql, "create table");

        self.unit_of_work(TxMode::Write, deadline, |tx| {
            tx.execute_batch(&sql).map_err(|err| {
                if sqlite_message(&err).is_some_and(|msg| msg.contains("already exists")) {
                    DynaError::DuplicateTable(schema.name.clone())
                } else {
                    err.into()
                }
            })
        })?;

        info!(table = %schema.name, columns = schema.columns().len(), "table created");
        Ok(())
    }

    /// Issue `DROP TABLE`. A table that vanished since the caller last looked
    /// fails with `TableNotFound`.
    pub fn drop_table(&self, name: &str, deadline: Deadline) -> DynaResult<()> {
        let sql = drop_table_sql(name);
        self.unit_of_work(TxMode::Write, deadline, |tx| {
            tx.execute_batch(&sql).map_err(|err| {
                if sqlite_message(&err).is_some_and(|msg| msg.contains("no such table")) {
                    DynaError::TableNotFound(name.to_string())
                } else {
                    err.into()
                }
            })
        })?;
        info!(table = %name, "table dropped");
        Ok(())
    }
}

/// The engine's message for a failed statement. Errors that carry a byte
/// offset into the SQL come back as `SqlInputError`.
fn sqlite_message(err: &rusqlite::Error) -> Option<&str> {
    match err {
        rusqlite::Error::SqliteFailure(_, Some(msg)) => Some(msg),
        rusqlite::Error::SqlInputError { msg, .. } => Some(msg),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::ColumnDefinition;
    use tempfile::tempdir;

    fn schema(name: &str) -> TableSchema {
        TableSchema::from_definitions(name, &[ColumnDefinition::new("id", "Integer").primary_key()])
            .unwrap()
    }

    #[test]
    fn test_memory_engine_shares_one_database() {
        let engine = StorageEngine::in_memory().unwrap();
        engine.create_table(&schema("a"), Deadline::none()).unwrap();

        let names: Vec<String> = engine
            .reflect(Deadline::none())
            .unwrap()
            .into_iter()
            .map(|t| t.name)
            .collect();
        assert_eq!(names, vec!["a".to_string()]);
    }

    #[test]
    fn test_duplicate_create_is_reported() {
        let engine = StorageEngine::in_memory().unwrap();
        engine.create_table(&schema("a"), Deadline::none()).unwrap();
        assert_eq!(
            engine.create_table(&schema("a"), Deadline::none()),
            Err(DynaError::DuplicateTable("a".into()))
        );
    }

    #[test]
    fn test_drop_missing_is_table_not_found() {
        let engine = StorageEngine::in_memory().unwrap();
        assert_eq!(
            engine.drop_table("ghost", Deadline::none()),
            Err(DynaError::TableNotFound("ghost".into()))
        );
    }

    #[test]
    fn test_file_engine_persists_tables() {
        let dir = tempdir().unwrap();
        let config = StorageConfig::file(dir.path().join("nested").join("db.sqlite"));

        {
            let engine = StorageEngine::open(&config).unwrap();
            engine.create_table(&schema("kept"), Deadline::none()).unwrap();
            engine.create_table(&schema("gone"), Deadline::none()).unwrap();
            engine.drop_table("gone", Deadline::none()).unwrap();
        }

        let engine = StorageEngine::open(&config).unwrap();
        let tables = engine.reflect(Deadline::none()).unwrap();
        assert_eq!(tables.len(), 1);
        assert_eq!(tables[0].name, "kept");
    }
}
