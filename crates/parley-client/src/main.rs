//! Terminal runner for the Parley client.
//!
//! Lines typed on stdin are sent to the active channel. Commands:
//! `/server <id>`, `/channel <id>`, `/attach <path> [text]`, `/status <0-3>`,
//! `/name <display name>`, `/quit`.

use std::path::Path;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use parley_client::{ClientCommand, ClientConfig, ClientHandle, LocalFile, SessionEvent};
use parley_shared::constants::APP_NAME;
use parley_shared::types::{ChannelId, ServerId, UserStatus};
use parley_store::{Database, LocalCache};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    parley_client::init_tracing();
    info!("Starting {APP_NAME} client v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration and open the local cache
    // -----------------------------------------------------------------------
    let config = ClientConfig::from_env();
    info!(ws_url = %config.ws_url, http_url = %config.http_url, "Loaded configuration");

    let db = Database::new(config.data_dir.as_deref()).context("opening local cache")?;
    let cache = LocalCache::new(db);

    // -----------------------------------------------------------------------
    // 3. Start the client and pump stdin / events until quit
    // -----------------------------------------------------------------------
    let (handle, mut events, driver) = parley_client::start(&config, cache);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(event) => print_event(&event),
                None => break,
            },
            line = lines.next_line() => match line.context("reading stdin")? {
                Some(line) => match handle_line(&handle, line.trim()).await {
                    Ok(true) => {}
                    Ok(false) => break,
                    Err(e) => warn!(error = %e, "Command failed"),
                },
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        }
    }

    handle.shutdown().await;
    driver.await.context("client driver panicked")?;
    info!("Bye");
    Ok(())
}

/// Returns false when the user asked to quit.
async fn handle_line(handle: &ClientHandle, line: &str) -> anyhow::Result<bool> {
    if line.is_empty() {
        return Ok(true);
    }

    let (word, rest) = line.split_once(' ').unwrap_or((line, ""));
    let command = match word {
        "/quit" => return Ok(false),
        "/server" => ClientCommand::SelectServer(ServerId(rest.trim().parse()?)),
        "/channel" => ClientCommand::SelectChannel(ChannelId(rest.trim().parse()?)),
        "/status" => ClientCommand::SetStatus(UserStatus::from(rest.trim().parse::<u8>()?)),
        "/name" => ClientCommand::SetDisplayName(rest.trim().to_string()),
        "/attach" => {
            let (path, text) = rest.split_once(' ').unwrap_or((rest, ""));
            let file = LocalFile::read(Path::new(path)).await?;
            ClientCommand::Submit {
                text: text.to_string(),
                files: vec![file],
            }
        }
        _ if word.starts_with('/') => {
            warn!(command = word, "Unknown command");
            return Ok(true);
        }
        _ => ClientCommand::Submit {
            text: line.to_string(),
            files: Vec::new(),
        },
    };

    handle.send(command).await?;
    Ok(true)
}

fn print_event(event: &SessionEvent) {
    match event {
        SessionEvent::Status(status) => println!("* {status}"),
        SessionEvent::Notify(message) => {
            println!("[{}] <{}> {}", message.channel_id, message.user_id, message.text)
        }
        SessionEvent::NoHistory(channel) => println!("* #{channel} has no messages yet"),
        SessionEvent::ServerSelected(server) => println!("* server {server}"),
        SessionEvent::ChannelSelected(channel) => println!("* channel #{channel}"),
        SessionEvent::InviteCreated { invite_key, .. } => println!("* invite: {invite_key}"),
        SessionEvent::SendFailed { reason } | SessionEvent::CommandFailed { reason } => {
            println!("! {reason}")
        }
        other => tracing::debug!(event = ?other, "Session event"),
    }
}
