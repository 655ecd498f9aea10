use parley_net::NetError;
use parley_shared::types::{ChannelId, MessageId, ServerId};
use parley_store::StoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Own identity not received yet")]
    NotReady,

    #[error("Not connected to the backend")]
    Offline,

    #[error("No server selected")]
    NoServerSelected,

    #[error("No channel selected")]
    NoActiveChannel,

    #[error("Unknown server: {0}")]
    UnknownServer(ServerId),

    #[error("Unknown channel: {0}")]
    UnknownChannel(ChannelId),

    #[error("Unknown message: {0}")]
    UnknownMessage(MessageId),

    #[error("An upload is already in progress")]
    UploadInProgress,

    #[error("Nothing to send")]
    EmptyMessage,

    #[error("Upload failed: {0}")]
    Upload(#[from] UploadError),

    #[error("Network error: {0}")]
    Net(#[from] NetError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Client stopped")]
    Stopped,
}

#[derive(Error, Debug)]
pub enum UploadError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{endpoint} answered {status}")]
    Status { endpoint: &'static str, status: u16 },

    #[error("Server returned an empty attachment token")]
    EmptyToken,

    #[error("File too large: {name} is {size} bytes (max {max})")]
    TooLarge { name: String, size: usize, max: usize },

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
