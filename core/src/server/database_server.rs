//! The `dynad` TCP server

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::database::Database;
use crate::error::DynaResult;
use crate::network::ProtocolHandler;
use crate::server::ConnectionManager;

pub struct DatabaseServer {
    config: Config,
    connection_manager: Arc<ConnectionManager>,
    shutdown_token: CancellationToken,
}

impl DatabaseServer {
    /// Open the database described by `config.storage`.
    pub fn new(config: Config) -> DynaResult<Self> {
        let db = Arc::new(Database::open(&config.storage)?);
        Ok(Self::with_database(config, db))
    }

    pub fn with_database(config: Config, db: Arc<Database>) -> Self {
        let handler = Arc::new(ProtocolHandler::new(db));
        let connection_manager = Arc::new(ConnectionManager::new(
            config.server.max_connections,
            handler,
            Duration::from_secs(config.server.idle_timeout_secs.max(1)),
        ));

        Self {
            config,
            connection_manager,
            shutdown_token: CancellationToken::new(),
        }
    }

    pub async fn bind(&self) -> DynaResult<TcpListener> {
        let addr = format!("{}:{}", self.config.server.host, self.config.server.port);
        let listener = TcpListener::bind(&addr).await?;
        info!(addr = %listener.local_addr()?, "dynad listening");
        Ok(listener)
    }

    /// Bind the configured address and serve until shutdown.
    pub async fn start(&self) -> DynaResult<()> {
        let listener = self.bind().await?;
        self.serve(listener).await
    }

    /// Accept connections on `listener` until the shutdown token fires.
    pub async fn serve(&self, listener: TcpListener) -> DynaResult<()> {
        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((socket, addr)) => self.spawn_connection(socket, addr),
                        Err(e) => error!(error = %e, "failed to accept connection"),
                    }
                }
                _ = self.shutdown_token.cancelled() => {
                    info!("shutdown signal received, no longer accepting connections");
                    break;
                }
            }
        }

        Ok(())
    }

    fn spawn_connection(&self, socket: tokio::net::TcpStream, addr: SocketAddr) {
        info!(peer = %addr, "new connection");
        let connection_manager = Arc::clone(&self.connection_manager);
        let shutdown = self.shutdown_token.child_token();

        tokio::spawn(async move {
            if let Err(e) = connection_manager.handle_connection(socket, shutdown).await {
                warn!(peer = %addr, error = %e, "error handling connection");
            }
        });
    }

    /// Stop accepting and close open connections. Committed work is already
    /// durable, so there is nothing to flush.
    pub fn shutdown(&self) {
        info!("shutting down dynad");
        self.shutdown_token.cancel();
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::{ClientMessage, NetworkConnection, ServerMessage};
    use crate::storage::ColumnDefinition;
    use tokio::net::TcpStream;

    async fn start_server() -> (Arc<DatabaseServer>, SocketAddr) {
        let mut config = Config::default();
        config.server.port = 0;
        let db = Arc::new(Database::in_memory().unwrap());
        let server = Arc::new(DatabaseServer::with_database(config, db));

        let listener = server.bind().await.unwrap();
        let addr = listener.local_addr().unwrap();
        let running = Arc::clone(&server);
        tokio::spawn(async move { running.serve(listener).await });
        (server, addr)
    }

    async fn request(conn: &mut NetworkConnection, message: ClientMessage) -> ServerMessage {
        conn.send_message(&message).await.unwrap();
        conn.read_response().await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn test_serves_requests_over_tcp() {
        let (server, addr) = start_server().await;
        let mut conn = NetworkConnection::new(TcpStream::connect(addr).await.unwrap());

        assert_eq!(request(&mut conn, ClientMessage::Ping).await, ServerMessage::Pong);

        let created = request(
            &mut conn,
            ClientMessage::CreateTable {
                name: "kv".into(),
                columns: vec![
                    ColumnDefinition::new("k", "String").primary_key(),
                    ColumnDefinition::new("v", "Json"),
                ],
            },
        )
        .await;
        assert!(matches!(created, ServerMessage::Data { success: true, .. }));

        let listed = request(&mut conn, ClientMessage::ListTables).await;
        assert_eq!(
            listed,
            ServerMessage::Data {
                success: true,
                data: Some(serde_json::json!(["kv"])),
                message: None,
            }
        );

        server.shutdown();
    }

    #[tokio::test]
    async fn test_shutdown_closes_connections() {
        let (server, addr) = start_server().await;
        let mut conn = NetworkConnection::new(TcpStream::connect(addr).await.unwrap());
        assert_eq!(request(&mut conn, ClientMessage::Ping).await, ServerMessage::Pong);

        server.shutdown();
        assert_eq!(conn.read_response().await.unwrap(), None);
    }
}
