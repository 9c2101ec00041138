//! Wire protocol and framed connections shared by the daemon and the driver

pub mod connection;
pub mod protocol;

pub use connection::NetworkConnection;
pub use protocol::{ClientMessage, MAX_MESSAGE_SIZE, ProtocolHandler, ServerMessage};
