use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Value as JsonValue, json};
use tracing::debug;

use crate::database::{Database, QueryParams};
use crate::error::{DynaError, DynaResult};
use crate::executor::{Assignments, Criteria, Row};
use crate::storage::ColumnDefinition;

pub const MAX_MESSAGE_SIZE: usize = 1024 * 1024; // 1MB max message size

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ClientMessage {
    Ping,
    CreateTable {
        name: String,
        columns: Vec<ColumnDefinition>,
    },
    ListTables,
    DeleteTable {
        name: String,
    },
    InsertOne {
        table: String,
        document: Row,
    },
    InsertMany {
        table: String,
        documents: Vec<Row>,
    },
    Query {
        table: String,
        #[serde(default)]
        params: QueryParams,
    },
    UpdateMany {
        table: String,
        #[serde(default)]
        query: Criteria,
        update_data: Assignments,
    },
    DeleteMany {
        table: String,
        #[serde(default)]
        query: Criteria,
    },
}

impl ClientMessage {
    /// Short name for logs.
    pub fn operation(&self) -> &'static str {
        match self {
            ClientMessage::Ping => "ping",
            ClientMessage::CreateTable { .. } => "create_table",
            ClientMessage::ListTables => "list_tables",
            ClientMessage::DeleteTable { .. } => "delete_table",
            ClientMessage::InsertOne { .. } => "insert_one",
            ClientMessage::InsertMany { .. } => "insert_many",
            ClientMessage::Query { .. } => "query",
            ClientMessage::UpdateMany { .. } => "update_many",
            ClientMessage::DeleteMany { .. } => "delete_many",
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> DynaResult<Self> {
        serde_json::from_slice(bytes).map_err(|e| DynaError::Protocol(e.to_string()))
    }

    pub fn to_bytes(&self) -> DynaResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| DynaError::Protocol(e.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ServerMessage {
    Pong,
    /// Uniform operation result. `success` is false only for the
    /// "nothing to do" outcomes of create and delete table.
    Data {
        success: bool,
        #[serde(default)]
        data: Option<JsonValue>,
        #[serde(default)]
        message: Option<String>,
    },
    Error {
        code: String,
        message: String,
    },
}

impl ServerMessage {
    fn ok(data: JsonValue) -> Self {
        ServerMessage::Data {
            success: true,
            data: Some(data),
            message: None,
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> DynaResult<Self> {
        serde_json::from_slice(bytes).map_err(|e| DynaError::Protocol(e.to_string()))
    }

    pub fn to_bytes(&self) -> DynaResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| DynaError::Protocol(e.to_string()))
    }
}

impl From<DynaError> for ServerMessage {
    fn from(err: DynaError) -> Self {
        ServerMessage::Error {
            code: err.kind().to_string(),
            message: err.to_string(),
        }
    }
}

/// Maps client requests onto database calls. Every call blocks; the server
/// runs it on the blocking thread pool.
pub struct ProtocolHandler {
    db: Arc<Database>,
}

impl ProtocolHandler {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub fn handle_message(&self, message: ClientMessage) -> ServerMessage {
        let operation = message.operation();
        match self.dispatch(message) {
            Ok(response) => response,
            Err(err) => {
                debug!(operation, error = %err, "request failed");
                err.into()
            }
        }
    }

    fn dispatch(&self, message: ClientMessage) -> DynaResult<ServerMessage> {
        Ok(match message {
            ClientMessage::Ping => ServerMessage::Pong,

            ClientMessage::CreateTable { name, columns } => {
                let created = self.db.create_table(&name, &columns)?;
                ServerMessage::Data {
                    success: created,
                    data: None,
                    message: Some(
                        if created {
                            "Table created successfully"
                        } else {
                            "Table already exists"
                        }
                        .to_string(),
                    ),
                }
            }

            ClientMessage::ListTables => ServerMessage::ok(json!(self.db.list_tables()?)),

            ClientMessage::DeleteTable { name } => {
                let deleted = self.db.delete_table(&name)?;
                let message = if deleted {
                    let tables = self.db.list_tables()?;
                    format!(
                        "Table deleted successfully, here are the tables now:{:?}",
                        tables
                    )
                } else {
                    "Table not found".to_string()
                };
                ServerMessage::Data {
                    success: deleted,
                    data: None,
                    message: Some(message),
                }
            }

            ClientMessage::InsertOne { table, document } => {
                let inserted = self.db.insert_one(&table, document)?;
                ServerMessage::ok(json!({ "inserted": inserted }))
            }

            ClientMessage::InsertMany { table, documents } => {
                let count = self.db.insert_many(&table, documents)?;
                ServerMessage::ok(json!({ "inserted": count }))
            }

            ClientMessage::Query { table, params } => {
                let rows = self.db.query(&table, &params)?;
                ServerMessage::ok(
                    serde_json::to_value(rows).map_err(|e| DynaError::Protocol(e.to_string()))?,
                )
            }

            ClientMessage::UpdateMany {
                table,
                query,
                update_data,
            } => {
                let modified = self.db.update_many(&table, &query, &update_data)?;
                ServerMessage::ok(json!({ "modified_count": modified }))
            }

            ClientMessage::DeleteMany { table, query } => {
                let deleted = self.db.delete_many(&table, &query)?;
                ServerMessage::ok(json!({ "deleted_count": deleted }))
            }
        })
    }
}
