//! Client for the `dynad` wire protocol.

use std::time::Duration;

use dyna_core::network::{ClientMessage, NetworkConnection, ServerMessage};
use dyna_core::{
    Assignments, ColumnDefinition, Criteria, DynaError, DynaResult, QueryParams, Row,
};
use serde_json::Value as JsonValue;
use tokio::net::TcpStream;
use tokio::time::{Instant, timeout};
use tracing::debug;

/// Default `dynad` address.
pub const DEFAULT_ADDRESS: &str = "127.0.0.1:20060";

/// The uniform `{success, data, message}` payload of a successful call.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub success: bool,
    pub data: Option<JsonValue>,
    pub message: Option<String>,
}

pub struct DynaClient {
    connection: Option<NetworkConnection>,
    server_address: String,
    heartbeat_interval: Duration,
    request_timeout: Duration,
    last_heartbeat: Option<Instant>,
}

impl Default for DynaClient {
    fn default() -> Self {
        Self::with_server(DEFAULT_ADDRESS)
    }
}

impl DynaClient {
    pub fn with_server(address: impl Into<String>) -> Self {
        Self {
            connection: None,
            server_address: address.into(),
            heartbeat_interval: Duration::from_secs(30),
            request_timeout: Duration::from_secs(60),
            last_heartbeat: None,
        }
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn server_address(&self) -> &str {
        &self.server_address
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    pub fn disconnect(&mut self) {
        self.connection = None;
    }

    /// Open a connection and confirm the server answers a ping.
    pub async fn connect(&mut self) -> DynaResult<()> {
        if self.connection.is_some() {
            return Ok(());
        }

        let stream = TcpStream::connect(&self.server_address).await.map_err(|e| {
            DynaError::Connection(format!(
                "Failed to connect to {}: {}",
                self.server_address, e
            ))
        })?;
        let mut connection = NetworkConnection::new(stream).with_read_timeout(self.request_timeout);

        connection.send_message(&ClientMessage::Ping).await?;
        match connection.read_response().await? {
            Some(ServerMessage::Pong) => {
                debug!(server = %self.server_address, "connected");
                self.connection = Some(connection);
                self.last_heartbeat = Some(Instant::now());
                Ok(())
            }
            Some(ServerMessage::Error { code, message }) => Err(DynaError::from_wire(&code, message)),
            Some(other) => Err(DynaError::Protocol(format!(
                "Unexpected response to ping: {:?}",
                other
            ))),
            None => Err(DynaError::Connection(
                "Connection closed during handshake".to_string(),
            )),
        }
    }

    pub async fn ping(&mut self) -> DynaResult<()> {
        match self.request(ClientMessage::Ping).await? {
            ServerMessage::Pong => {
                self.last_heartbeat = Some(Instant::now());
                Ok(())
            }
            other => Err(unexpected(&other)),
        }
    }

    /// Reconnect if the connection went quiet for longer than the heartbeat
    /// interval and no longer answers.
    async fn ensure_connection(&mut self) -> DynaResult<()> {
        let stale = self
            .last_heartbeat
            .is_some_and(|last| last.elapsed() >= self.heartbeat_interval);

        if stale && self.connection.is_some() && self.exchange(ClientMessage::Ping).await.is_err() {
            debug!(server = %self.server_address, "heartbeat failed, reconnecting");
            self.connection = None;
            self.last_heartbeat = None;
        }

        self.connect().await
    }

    async fn exchange(&mut self, message: ClientMessage) -> DynaResult<ServerMessage> {
        let request_timeout = self.request_timeout;
        let connection = self
            .connection
            .as_mut()
            .ok_or_else(|| DynaError::Connection("not connected".to_string()))?;

        let result = async {
            connection.send_message(&message).await?;
            match timeout(request_timeout, connection.read_response()).await {
                Ok(Ok(Some(response))) => Ok(response),
                Ok(Ok(None)) => Err(DynaError::Connection(
                    "Connection closed by server".to_string(),
                )),
                Ok(Err(e)) => Err(e),
                Err(_) => Err(DynaError::Timeout),
            }
        }
        .await;

        match result {
            Ok(response) => {
                self.last_heartbeat = Some(Instant::now());
                Ok(response)
            }
            Err(e) => {
                // the stream is in an unknown state
                self.connection = None;
                Err(e)
            }
        }
    }

    async fn request(&mut self, message: ClientMessage) -> DynaResult<ServerMessage> {
        self.ensure_connection().await?;
        match self.exchange(message).await? {
            ServerMessage::Error { code, message } => Err(DynaError::from_wire(&code, message)),
            response => Ok(response),
        }
    }

    async fn call(&mut self, message: ClientMessage) -> DynaResult<Reply> {
        match self.request(message).await? {
            ServerMessage::Data {
                success,
                data,
                message,
            } => Ok(Reply {
                success,
                data,
                message,
            }),
            other => Err(unexpected(&other)),
        }
    }

    /// `true` if the table was created, `false` if it already existed.
    pub async fn create_table(&mut self, name: &str, columns: Vec<ColumnDefinition>) -> DynaResult<bool> {
        let reply = self
            .call(ClientMessage::CreateTable {
                name: name.to_string(),
                columns,
            })
            .await?;
        Ok(reply.success)
    }

    pub async fn list_tables(&mut self) -> DynaResult<Vec<String>> {
        let reply = self.call(ClientMessage::ListTables).await?;
        decode(reply.data.unwrap_or(JsonValue::Array(Vec::new())))
    }

    /// `true` if the table existed and was dropped.
    pub async fn delete_table(&mut self, name: &str) -> DynaResult<bool> {
        let reply = self
            .call(ClientMessage::DeleteTable {
                name: name.to_string(),
            })
            .await?;
        Ok(reply.success)
    }

    pub async fn insert_one(&mut self, table: &str, document: Row) -> DynaResult<bool> {
        let reply = self
            .call(ClientMessage::InsertOne {
                table: table.to_string(),
                document,
            })
            .await?;
        Ok(field(&reply, "inserted")?.as_bool().unwrap_or(false))
    }

    pub async fn insert_many(&mut self, table: &str, documents: Vec<Row>) -> DynaResult<u64> {
        let reply = self
            .call(ClientMessage::InsertMany {
                table: table.to_string(),
                documents,
            })
            .await?;
        count(&reply, "inserted")
    }

    pub async fn query(&mut self, table: &str, params: QueryParams) -> DynaResult<Vec<Row>> {
        let reply = self
            .call(ClientMessage::Query {
                table: table.to_string(),
                params,
            })
            .await?;
        decode(reply.data.unwrap_or(JsonValue::Array(Vec::new())))
    }

    pub async fn update_many(
        &mut self,
        table: &str,
        query: Criteria,
        update_data: Assignments,
    ) -> DynaResult<u64> {
        let reply = self
            .call(ClientMessage::UpdateMany {
                table: table.to_string(),
                query,
                update_data,
            })
            .await?;
        count(&reply, "modified_count")
    }

    pub async fn delete_many(&mut self, table: &str, query: Criteria) -> DynaResult<u64> {
        let reply = self
            .call(ClientMessage::DeleteMany {
                table: table.to_string(),
                query,
            })
            .await?;
        count(&reply, "deleted_count")
    }
}

fn unexpected(response: &ServerMessage) -> DynaError {
    DynaError::Protocol(format!("Unexpected response from server: {:?}", response))
}

fn decode<T: serde::de::DeserializeOwned>(data: JsonValue) -> DynaResult<T> {
    serde_json::from_value(data).map_err(|e| DynaError::Protocol(e.to_string()))
}

fn field<'a>(reply: &'a Reply, name: &str) -> DynaResult<&'a JsonValue> {
    reply
        .data
        .as_ref()
        .and_then(|d| d.get(name))
        .ok_or_else(|| DynaError::Protocol(format!("response is missing '{}'", name)))
}

fn count(reply: &Reply, name: &str) -> DynaResult<u64> {
    field(reply, name)?
        .as_u64()
        .ok_or_else(|| DynaError::Protocol(format!("'{}' is not a count", name)))
}

/// Render rows as a text table, columns in first-row order.
pub fn format_rows(rows: &[Row]) -> String {
    use prettytable::{Cell, Row as TableRow, Table};

    let Some(first) = rows.first() else {
        return "Empty result set".to_string();
    };
    let headers: Vec<&str> = first.columns().collect();

    let mut table = Table::new();
    table.set_format(*prettytable::format::consts::FORMAT_NO_LINESEP_WITH_TITLE);
    table.set_titles(TableRow::new(headers.iter().map(|h| Cell::new(h)).collect()));
    for row in rows {
        table.add_row(TableRow::new(
            headers
                .iter()
                .map(|h| match row.get(h) {
                    Some(value) => Cell::new(&value.to_string()),
                    None => Cell::new(""),
                })
                .collect(),
        ));
    }
    table.to_string()
}

/// Blocking wrapper for synchronous callers.
pub struct BlockingClient {
    client: DynaClient,
    runtime: tokio::runtime::Runtime,
}

impl BlockingClient {
    pub fn with_server(address: impl Into<String>) -> DynaResult<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        Ok(Self {
            client: DynaClient::with_server(address),
            runtime,
        })
    }

    pub fn ping(&mut self) -> DynaResult<()> {
        self.runtime.block_on(self.client.ping())
    }

    pub fn create_table(&mut self, name: &str, columns: Vec<ColumnDefinition>) -> DynaResult<bool> {
        self.runtime.block_on(self.client.create_table(name, columns))
    }

    pub fn list_tables(&mut self) -> DynaResult<Vec<String>> {
        self.runtime.block_on(self.client.list_tables())
    }

    pub fn delete_table(&mut self, name: &str) -> DynaResult<bool> {
        self.runtime.block_on(self.client.delete_table(name))
    }

    pub fn insert_one(&mut self, table: &str, document: Row) -> DynaResult<bool> {
        self.runtime.block_on(self.client.insert_one(table, document))
    }

    pub fn insert_many(&mut self, table: &str, documents: Vec<Row>) -> DynaResult<u64> {
        self.runtime.block_on(self.client.insert_many(table, documents))
    }

    pub fn query(&mut self, table: &str, params: QueryParams) -> DynaResult<Vec<Row>> {
        self.runtime.block_on(self.client.query(table, params))
    }

    pub fn update_many(
        &mut self,
        table: &str,
        query: Criteria,
        update_data: Assignments,
    ) -> DynaResult<u64> {
        self.runtime
            .block_on(self.client.update_many(table, query, update_data))
    }

    pub fn delete_many(&mut self, table: &str, query: Criteria) -> DynaResult<u64> {
        self.runtime.block_on(self.client.delete_many(table, query))
    }

    pub fn is_connected(&self) -> bool {
        self.client.is_connected()
    }

    pub fn disconnect(&mut self) {
        self.client.disconnect()
    }
}
