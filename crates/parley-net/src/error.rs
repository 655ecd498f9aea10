use parley_shared::CodecError;
use thiserror::Error;
use tokio_tungstenite::tungstenite;

#[derive(Error, Debug)]
pub enum NetError {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    #[error("Invalid handshake header: {0}")]
    InvalidHeader(#[from] tungstenite::http::header::InvalidHeaderValue),

    #[error("Connection attempt timed out")]
    Timeout,

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    /// The connection task has stopped (shut down or gave up reconnecting).
    #[error("Connection terminated")]
    Terminated,
}
