//! Connection manager: owns the single WebSocket to the chat backend,
//! reconnects with a bounded attempt count, and turns binary frames into
//! typed packets.

pub mod connection;
pub mod retry;
pub mod state;

mod error;

pub use connection::{
    spawn_connection, ConnectionCommand, ConnectionConfig, ConnectionEvent, ConnectionHandle,
};
pub use error::NetError;
pub use retry::RetryPolicy;
pub use state::{ConnectionState, Link, ReconnectTracker};
