use thiserror::Error;

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Malformed packet: {0}")]
    Malformed(String),

    #[error("Unknown packet type: {0}")]
    UnknownType(u8),

    #[error("Invalid payload for packet type {packet_type}: {source}")]
    Payload {
        packet_type: u8,
        #[source]
        source: serde_json::Error,
    },

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl CodecError {
    /// Whether the frame should simply be dropped with the connection kept open.
    ///
    /// Every decode-side error is recoverable; only encoding a payload that
    /// cannot be represented as JSON points at a caller bug.
    pub fn is_droppable(&self) -> bool {
        !matches!(self, CodecError::Serialize(_))
    }
}
