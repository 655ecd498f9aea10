//! Parley chat client: synchronization core, attachment upload and the
//! driver task tying them to the realtime connection.

pub mod client;
pub mod composer;
pub mod config;
pub mod error;
pub mod events;
pub mod latch;
pub mod messages;
pub mod session;
pub mod typing;
pub mod upload;

use tracing_subscriber::{fmt, EnvFilter};

pub use client::{start, Client, ClientCommand, ClientHandle};
pub use config::ClientConfig;
pub use error::{ClientError, UploadError};
pub use events::{ConnectionStatus, SessionEvent};
pub use session::SyncSession;
pub use upload::{AttachmentUploader, LocalFile};

/// Install the global `tracing` subscriber (respects `RUST_LOG`).
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("parley_client=debug,parley_net=debug,parley_store=info,warn")
    });

    let _ = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .try_init();
}
