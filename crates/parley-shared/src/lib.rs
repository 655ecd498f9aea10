//! # parley-shared
//!
//! Wire-level vocabulary shared by every Parley crate: snowflake identifiers,
//! the packet type enumeration with its typed payloads, and the binary frame
//! codec.

pub mod codec;
pub mod constants;
pub mod error;
pub mod protocol;
pub mod types;

pub use codec::{decode_frame, encode_frame};
pub use error::CodecError;
pub use protocol::{Packet, PacketType, Request};
