//! Backend connection task with the tokio mpsc command/notification pattern.
//!
//! The WebSocket lives in a dedicated tokio task that owns it exclusively.
//! Callers talk to it through a [`ConnectionHandle`] and receive decoded
//! packets and lifecycle changes as [`ConnectionEvent`]s.
//!
//! Every successful open starts a new epoch. Outbound frames carry the epoch
//! they were built for and are dropped unless it is the epoch of the socket
//! that is open when the task gets to them, so nothing built against one
//! connection ever reaches the next.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::COOKIE;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use parley_shared::constants::MAX_RECONNECT_ATTEMPTS;
use parley_shared::{Packet, Request};

use crate::error::NetError;
use crate::retry::RetryPolicy;
use crate::state::{AfterClose, ConnectionState, Link, ReconnectTracker};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

// ---------------------------------------------------------------------------
// Command / event types
// ---------------------------------------------------------------------------

/// Commands sent *into* the connection task.
#[derive(Debug)]
pub enum ConnectionCommand {
    /// Transmit an encoded frame on the socket of `epoch`.
    Send { epoch: u64, frame: Vec<u8> },
    /// Close the socket and stop without reconnecting.
    Shutdown,
}

/// Events sent *from* the connection task to the application.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    /// The socket opened. `reconnect` is false only for the first open.
    Opened { reconnect: bool, epoch: u64 },
    /// A decoded inbound packet, in receipt order.
    Packet(Packet),
    /// The socket closed; `attempts` failed connections in a row so far.
    Closed { attempts: u32 },
    /// Reconnecting was abandoned. Terminal.
    GaveUp { attempts: u32 },
}

/// Configuration for spawning the connection task.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// WebSocket endpoint, e.g. `ws://127.0.0.1:8080/ws`.
    pub url: String,
    /// Session token sent as a `token` cookie on the handshake.
    pub session_token: Option<String>,
    /// Failed attempts tolerated before giving up.
    pub max_reconnect_attempts: u32,
    pub retry: RetryPolicy,
    pub connect_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:8080/ws".to_string(),
            session_token: None,
            max_reconnect_attempts: MAX_RECONNECT_ATTEMPTS,
            retry: RetryPolicy::default(),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// Cloneable handle to the connection task.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    cmd_tx: mpsc::Sender<ConnectionCommand>,
    link_rx: watch::Receiver<Link>,
}

impl ConnectionHandle {
    pub fn state(&self) -> ConnectionState {
        self.link_rx.borrow().state
    }

    pub fn subscribe_state(&self) -> watch::Receiver<Link> {
        self.link_rx.clone()
    }

    /// Wait until a socket is open and return its epoch.
    pub async fn wait_open(&self) -> Result<u64, NetError> {
        let mut rx = self.link_rx.clone();
        rx.wait_for(|l| l.state == ConnectionState::Open)
            .await
            .map(|l| l.epoch)
            .map_err(|_| NetError::Terminated)
    }

    /// Encode and transmit a request, suspending until a socket is open.
    pub async fn send(&self, request: &Request) -> Result<(), NetError> {
        let epoch = self.wait_open().await?;
        self.send_on(epoch, request).await
    }

    /// Queue a request for the socket of `epoch` without waiting for it to
    /// be open. The frame is dropped if that socket is gone by then.
    pub async fn send_on(&self, epoch: u64, request: &Request) -> Result<(), NetError> {
        let frame = request.encode()?;
        debug!(packet_type = ?request.packet_type(), epoch, len = frame.len(), "Queueing request");
        self.cmd_tx
            .send(ConnectionCommand::Send { epoch, frame })
            .await
            .map_err(|_| NetError::Terminated)
    }

    pub async fn shutdown(&self) {
        let _ = self.cmd_tx.send(ConnectionCommand::Shutdown).await;
    }
}

/// Spawn the connection task in the background.
///
/// Returns the handle for outbound traffic and the receiver of inbound
/// events. The task ends after a shutdown, after giving up, or once the
/// event receiver is dropped.
pub fn spawn_connection(
    config: ConnectionConfig,
) -> (ConnectionHandle, mpsc::Receiver<ConnectionEvent>) {
    let (cmd_tx, cmd_rx) = mpsc::channel::<ConnectionCommand>(256);
    let (event_tx, event_rx) = mpsc::channel::<ConnectionEvent>(256);
    let (link_tx, link_rx) = watch::channel(Link::default());

    tokio::spawn(async move {
        run_connection(config, cmd_rx, event_tx, link_tx).await;
    });

    (ConnectionHandle { cmd_tx, link_rx }, event_rx)
}

/// How a single socket session ended.
enum SessionEnd {
    /// Shutdown was requested (or nobody is listening any more).
    Stop,
    /// Remote close or transport error; reconnect.
    Lost(String),
}

async fn run_connection(
    config: ConnectionConfig,
    mut cmd_rx: mpsc::Receiver<ConnectionCommand>,
    event_tx: mpsc::Sender<ConnectionEvent>,
    link_tx: watch::Sender<Link>,
) {
    let mut tracker = ReconnectTracker::new(config.max_reconnect_attempts);
    let mut epoch = 0u64;
    let set_state = |state: ConnectionState| {
        link_tx.send_modify(|link| link.state = state);
    };

    loop {
        set_state(ConnectionState::Connecting);
        debug!(url = %config.url, attempt = tracker.attempts(), "Connecting");

        match connect(&config).await {
            Ok(socket) => {
                let reconnect = tracker.on_open();
                epoch += 1;
                link_tx.send_replace(Link {
                    state: ConnectionState::Open,
                    epoch,
                });
                info!(url = %config.url, reconnect, epoch, "Connection open");

                if event_tx
                    .send(ConnectionEvent::Opened { reconnect, epoch })
                    .await
                    .is_err()
                {
                    break;
                }

                match drive_socket(socket, epoch, &mut cmd_rx, &event_tx, &link_tx).await {
                    SessionEnd::Stop => break,
                    SessionEnd::Lost(reason) => {
                        warn!(reason = %reason, "Connection lost");
                    }
                }
            }
            Err(e) => {
                warn!(url = %config.url, error = %e, "Connection attempt failed");
            }
        }

        set_state(ConnectionState::Closed);
        let after = tracker.on_closed();
        let attempts = tracker.attempts();
        if event_tx
            .send(ConnectionEvent::Closed { attempts })
            .await
            .is_err()
        {
            break;
        }

        match after {
            AfterClose::GiveUp => {
                error!(attempts, "Failed to reconnect, giving up");
                let _ = event_tx.send(ConnectionEvent::GaveUp { attempts }).await;
                break;
            }
            AfterClose::Retry(attempt) => {
                let delay = config.retry.delay_for_attempt(attempt);
                debug!(attempt, delay_ms = delay.as_millis() as u64, "Reconnecting");
                if !wait_backoff(delay, &mut cmd_rx).await {
                    break;
                }
            }
        }
    }

    set_state(ConnectionState::Closed);
    info!("Connection task terminated");
}

async fn connect(config: &ConnectionConfig) -> Result<Socket, NetError> {
    let mut request = config.url.as_str().into_client_request()?;
    if let Some(ref token) = config.session_token {
        let cookie = HeaderValue::from_str(&format!("token={token}"))?;
        request.headers_mut().insert(COOKIE, cookie);
    }

    let (socket, _response) = tokio::time::timeout(config.connect_timeout, connect_async(request))
        .await
        .map_err(|_| NetError::Timeout)??;
    Ok(socket)
}

/// Pump one open socket until it closes or shutdown is requested.
async fn drive_socket(
    socket: Socket,
    epoch: u64,
    cmd_rx: &mut mpsc::Receiver<ConnectionCommand>,
    event_tx: &mpsc::Sender<ConnectionEvent>,
    link_tx: &watch::Sender<Link>,
) -> SessionEnd {
    let (mut write, mut read) = socket.split();

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(ConnectionCommand::Send { epoch: sent_for, frame }) if sent_for != epoch => {
                        debug!(sent_for, epoch, len = frame.len(), "Dropping frame built for a previous connection");
                    }
                    Some(ConnectionCommand::Send { frame, .. }) => {
                        let len = frame.len();
                        if let Err(e) = write.send(Message::Binary(frame)).await {
                            return SessionEnd::Lost(format!("write failed: {e}"));
                        }
                        debug!(len, "Frame sent");
                    }
                    Some(ConnectionCommand::Shutdown) | None => {
                        info!("Connection shutdown requested");
                        link_tx.send_modify(|link| link.state = ConnectionState::Closing);
                        let _ = write.send(Message::Close(None)).await;
                        return SessionEnd::Stop;
                    }
                }
            }

            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Binary(data))) => match Packet::decode(&data) {
                        Ok(packet) => {
                            debug!(packet_type = ?packet.packet_type(), len = data.len(), "Packet received");
                            if event_tx.send(ConnectionEvent::Packet(packet)).await.is_err() {
                                return SessionEnd::Stop;
                            }
                        }
                        Err(e) => {
                            warn!(error = %e, len = data.len(), "Dropping undecodable frame");
                        }
                    },
                    Some(Ok(Message::Close(frame))) => {
                        return SessionEnd::Lost(format!("remote close: {frame:?}"));
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return SessionEnd::Lost(format!("read failed: {e}")),
                    None => return SessionEnd::Lost("stream ended".to_string()),
                }
            }
        }
    }
}

/// Sleep out the backoff while still honouring commands. Frames sent in the
/// meantime belong to a closed socket and are dropped. Returns `false` on
/// shutdown.
async fn wait_backoff(delay: Duration, cmd_rx: &mut mpsc::Receiver<ConnectionCommand>) -> bool {
    let sleep = tokio::time::sleep(delay);
    tokio::pin!(sleep);

    loop {
        tokio::select! {
            _ = &mut sleep => return true,
            cmd = cmd_rx.recv() => match cmd {
                Some(ConnectionCommand::Send { epoch, frame }) => {
                    debug!(epoch, len = frame.len(), "Dropping frame, no open connection");
                }
                Some(ConnectionCommand::Shutdown) | None => return false,
            },
        }
    }
}
