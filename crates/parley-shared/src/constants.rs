/// Application name
pub const APP_NAME: &str = "Parley";

/// Frame header size: 4-byte length + 1-byte packet type
pub const HEADER_LEN: usize = 5;

/// Payload written in place of a JSON body when a packet carries none
pub const EMPTY_PAYLOAD: u8 = 0;

/// Upper bound accepted for a single inbound frame (16 MiB)
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Snowflake IDs keep their creation time (Unix millis) above this bit
pub const SNOWFLAKE_TIMESTAMP_SHIFT: u32 = 22;

/// Minimum number of loaded messages before older history is paged in
pub const HISTORY_PAGE_THRESHOLD: usize = 50;

/// Seconds without a refresh before a remote typing indicator expires
pub const TYPING_TIMEOUT_SECS: u64 = 20;

/// Reconnect attempts before the connection is declared lost
pub const MAX_RECONNECT_ATTEMPTS: u32 = 10;

/// Maximum attachment size in bytes (50 MiB)
pub const MAX_ATTACHMENT_SIZE: usize = 50 * 1024 * 1024;

/// JSON keys carrying 64-bit identifiers on the wire
pub const ID_FIELDS: &[&str] = &[
    "ChannelID",
    "FromMessageID",
    "MessageID",
    "OwnerID",
    "ReplyTo",
    "ServerID",
    "UserID",
];
