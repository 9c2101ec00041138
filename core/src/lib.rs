//! DynaDB: a dynamic-schema table engine.
//!
//! Tables are declared at runtime from column definitions and then used
//! through schema-agnostic CRUD calls. The storage engine (SQLite behind a
//! connection pool) is the source of truth; the schema catalog re-reads it
//! before every operation that depends on which tables exist.

pub mod config;
pub mod database;
pub mod error;
pub mod executor;
pub mod network;
pub mod server;
pub mod storage;

pub use config::Config;
pub use database::{Database, QueryParams};
pub use error::{DynaError, DynaResult};
pub use executor::{Assignments, Criteria, Row, SortSpec};
pub use storage::{ColumnDefinition, ColumnType, TableSchema, Value};
