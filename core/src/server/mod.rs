//! Daemon: accepts clients and serves the wire protocol

pub mod connection_manager;
pub mod database_server;

pub use connection_manager::{Connection, ConnectionManager};
pub use database_server::DatabaseServer;
