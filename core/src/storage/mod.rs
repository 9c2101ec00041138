//! Storage layer: the SQLite-backed engine, the type registry and the
//! schema catalog kept in sync with it.

pub mod catalog;
pub mod ddl;
pub mod engine;
pub mod table;
pub mod transaction;
pub mod types;
pub mod value;

pub use catalog::SchemaCatalog;
pub use ddl::quote_ident;
pub use engine::StorageEngine;
pub use table::{Column, ColumnDefinition, TableSchema};
pub use transaction::{Deadline, TxMode};
pub use types::{ColumnType, PhysicalType, build_column, resolve};
pub use value::Value;
