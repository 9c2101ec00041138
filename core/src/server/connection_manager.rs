//! Client connection handling for the daemon

use std::sync::Arc;

use tokio::net::TcpStream;
use tokio::sync::Semaphore;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{DynaError, DynaResult};
use crate::network::NetworkConnection;
use crate::network::protocol::{ClientMessage, ProtocolHandler, ServerMessage};

/// Caps concurrent connections and hands each accepted socket its own task.
pub struct ConnectionManager {
    permits: Arc<Semaphore>,
    handler: Arc<ProtocolHandler>,
    idle_timeout: Duration,
}

impl ConnectionManager {
    pub fn new(max_connections: usize, handler: Arc<ProtocolHandler>, idle_timeout: Duration) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(max_connections.max(1))),
            handler,
            idle_timeout,
        }
    }

    /// Serve one client until it disconnects, idles out or `shutdown` fires.
    pub async fn handle_connection(
        &self,
        socket: TcpStream,
        shutdown: CancellationToken,
    ) -> DynaResult<()> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| DynaError::Connection("connection manager closed".into()))?;

        let connection = Connection::new(socket, Arc::clone(&self.handler), self.idle_timeout, shutdown);
        connection.run().await
    }
}

/// A single client session.
pub struct Connection {
    id: Uuid,
    network_conn: NetworkConnection,
    handler: Arc<ProtocolHandler>,
    shutdown_token: CancellationToken,
}

impl Connection {
    pub fn new(
        socket: TcpStream,
        handler: Arc<ProtocolHandler>,
        idle_timeout: Duration,
        shutdown_token: CancellationToken,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            network_conn: NetworkConnection::new(socket).with_read_timeout(idle_timeout),
            handler,
            shutdown_token,
        }
    }

    pub async fn run(mut self) -> DynaResult<()> {
        debug!(connection = %self.id, "connection started");

        loop {
            tokio::select! {
                message_result = self.network_conn.read_message() => {
                    match message_result {
                        Ok(Some(message)) => {
                            let response = self.handle_message(message).await;
                            if let Err(e) = self.network_conn.send_response(&response).await {
                                warn!(connection = %self.id, error = %e, "error sending response");
                                break;
                            }
                        }
                        Ok(None) => break,
                        Err(DynaError::Timeout) => {
                            info!(connection = %self.id, "connection timed out due to inactivity");
                            let response = ServerMessage::from(DynaError::Connection(
                                "Connection timed out due to inactivity".into(),
                            ));
                            let _ = self.network_conn.send_response(&response).await;
                            break;
                        }
                        Err(e) => {
                            warn!(connection = %self.id, error = %e, "error reading message");
                            let _ = self.network_conn.send_response(&ServerMessage::from(e)).await;
                            break;
                        }
                    }
                }
                _ = self.shutdown_token.cancelled() => {
                    debug!(connection = %self.id, "connection shutdown requested");
                    break;
                }
            }
        }

        debug!(connection = %self.id, "connection closed");
        Ok(())
    }

    /// Requests block on storage, so they run on the blocking pool and no
    /// lock or pooled connection is held across an await.
    async fn handle_message(&self, message: ClientMessage) -> ServerMessage {
        let handler = Arc::clone(&self.handler);
        let operation = message.operation();

        match tokio::task::spawn_blocking(move || handler.handle_message(message)).await {
            Ok(response) => response,
            Err(e) => {
                warn!(connection = %self.id, operation, error = %e, "request task failed");
                DynaError::StorageFailure(format!("request task failed: {}", e)).into()
            }
        }
    }
}
