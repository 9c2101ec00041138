//! Length-prefixed JSON framing over TCP.
//!
//! Each frame is a big-endian `u32` byte length followed by one serialized
//! message. The same connection type is used by the server and the driver.

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::error::{DynaError, DynaResult};
use crate::network::protocol::{ClientMessage, MAX_MESSAGE_SIZE, ServerMessage};

const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(60);

pub struct NetworkConnection {
    stream: TcpStream,
    read_buffer: Vec<u8>,
    write_buffer: Vec<u8>,
    read_timeout: Duration,
}

impl NetworkConnection {
    pub fn new(stream: TcpStream) -> Self {
        Self {
            stream,
            read_buffer: vec![0; 8192],
            write_buffer: Vec::with_capacity(8192),
            read_timeout: DEFAULT_READ_TIMEOUT,
        }
    }

    /// How long to wait for the start of the next frame.
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Next client request; `None` once the peer has closed the connection.
    pub async fn read_message(&mut self) -> DynaResult<Option<ClientMessage>> {
        match self.read_frame().await? {
            Some(len) => ClientMessage::from_bytes(&self.read_buffer[..len]).map(Some),
            None => Ok(None),
        }
    }

    pub async fn send_response(&mut self, response: &ServerMessage) -> DynaResult<()> {
        let bytes = response.to_bytes()?;
        self.write_frame(&bytes).await
    }

    pub async fn send_message(&mut self, message: &ClientMessage) -> DynaResult<()> {
        let bytes = message.to_bytes()?;
        self.write_frame(&bytes).await
    }

    /// Next server response; `None` once the server has closed the connection.
    pub async fn read_response(&mut self) -> DynaResult<Option<ServerMessage>> {
        match self.read_frame().await? {
            Some(len) => ServerMessage::from_bytes(&self.read_buffer[..len]).map(Some),
            None => Ok(None),
        }
    }

    /// Read one frame into `read_buffer` and return its length.
    async fn read_frame(&mut self) -> DynaResult<Option<usize>> {
        let mut len_bytes = [0u8; 4];
        match tokio::time::timeout(self.read_timeout, self.stream.read_exact(&mut len_bytes)).await
        {
            Ok(Ok(_)) => {}
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => return Err(DynaError::Timeout),
        }

        let len = u32::from_be_bytes(len_bytes) as usize;
        if len > MAX_MESSAGE_SIZE {
            return Err(DynaError::Protocol(format!(
                "Message too large: {} bytes",
                len
            )));
        }

        if self.read_buffer.len() < len {
            self.read_buffer.resize(len, 0);
        }
        self.stream.read_exact(&mut self.read_buffer[..len]).await?;

        Ok(Some(len))
    }

    async fn write_frame(&mut self, bytes: &[u8]) -> DynaResult<()> {
        if bytes.len() > MAX_MESSAGE_SIZE {
            return Err(DynaError::Protocol(format!(
                "Message too large: {} bytes",
                bytes.len()
            )));
        }

        self.write_buffer.clear();
        self.write_buffer.reserve(4 + bytes.len());
        self.write_buffer
            .extend_from_slice(&(bytes.len() as u32).to_be_bytes());
        self.write_buffer.extend_from_slice(bytes);

        self.stream.write_all(&self.write_buffer).await?;
        self.stream.flush().await?;
        Ok(())
    }
}
