//! Client driver task.
//!
//! [`Client::run`] owns the [`SyncSession`] and feeds it, one at a time,
//! connection events, UI commands, upload completions and the typing
//! deadline. Requests produced by the session are queued for the socket the
//! driver last saw open; while no socket is open they are dropped, and
//! commands that talk to the backend are refused.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use parley_net::{spawn_connection, ConnectionEvent, ConnectionHandle, ConnectionState};
use parley_shared::types::{ChannelId, MessageId, ServerId, UserStatus};
use parley_shared::Request;
use parley_store::LocalCache;

use crate::composer::PendingSubmit;
use crate::config::ClientConfig;
use crate::error::{ClientError, UploadError};
use crate::events::{ConnectionStatus, SessionEvent};
use crate::latch::Latch;
use crate::session::{SubmitPlan, SyncSession};
use crate::upload::{AttachmentUploader, LocalFile};

/// Actions requested by the UI.
#[derive(Debug)]
pub enum ClientCommand {
    SelectServer(ServerId),
    SelectChannel(ChannelId),
    Viewport { near_top: bool, near_bottom: bool },
    ComposerInput(String),
    ReplyTo(MessageId),
    Submit { text: String, files: Vec<LocalFile> },
    ResetComposer,
    DeleteMessage(MessageId),
    EditMessage { id: MessageId, text: String },
    CreateServer(String),
    DeleteServer(ServerId),
    CreateChannel(String),
    CreateInvite,
    SetDisplayName(String),
    SetStatus(UserStatus),
    Shutdown,
}

impl ClientCommand {
    fn needs_connection(&self) -> bool {
        !matches!(
            self,
            Self::Viewport { .. }
                | Self::ComposerInput(_)
                | Self::ReplyTo(_)
                | Self::ResetComposer
                | Self::Shutdown
        )
    }
}

/// Cloneable handle for talking to a running client.
#[derive(Debug, Clone)]
pub struct ClientHandle {
    commands: mpsc::Sender<ClientCommand>,
    ready: Latch,
    connection: ConnectionHandle,
}

impl ClientHandle {
    pub async fn send(&self, command: ClientCommand) -> Result<(), ClientError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| ClientError::Stopped)
    }

    /// Wait until the own identity of the current connection is known.
    pub async fn wait_ready(&self) {
        self.ready.wait().await;
    }

    pub fn is_ready(&self) -> bool {
        self.ready.is_open()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub async fn shutdown(&self) {
        let _ = self.commands.send(ClientCommand::Shutdown).await;
    }
}

#[derive(Debug)]
struct UploadDone {
    pending: PendingSubmit,
    result: Result<String, UploadError>,
}

pub struct Client {
    session: SyncSession,
    events: mpsc::UnboundedSender<SessionEvent>,
    connection: ConnectionHandle,
    connection_events: mpsc::Receiver<ConnectionEvent>,
    /// Epoch of the open socket, as last reported by the connection task.
    link: Option<u64>,
    commands: mpsc::Receiver<ClientCommand>,
    uploader: AttachmentUploader,
    upload_tx: mpsc::UnboundedSender<UploadDone>,
    upload_rx: mpsc::UnboundedReceiver<UploadDone>,
    upload_task: Option<(u64, JoinHandle<()>)>,
}

/// Connect and spawn the driver task.
///
/// Returns the command handle, the stream of UI events and the driver's
/// join handle. The driver stops on [`ClientCommand::Shutdown`], when every
/// handle is dropped, or once reconnecting has been given up.
pub fn start(
    config: &ClientConfig,
    cache: LocalCache,
) -> (ClientHandle, mpsc::UnboundedReceiver<SessionEvent>, JoinHandle<()>) {
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let (command_tx, command_rx) = mpsc::channel(64);
    let (upload_tx, upload_rx) = mpsc::unbounded_channel();
    let (connection, connection_events) = spawn_connection(config.connection_config());

    let session = SyncSession::new(cache, event_tx.clone(), config.typing_timeout);
    let handle = ClientHandle {
        commands: command_tx,
        ready: session.identity_latch(),
        connection: connection.clone(),
    };

    let client = Client {
        session,
        events: event_tx,
        connection,
        connection_events,
        link: None,
        commands: command_rx,
        uploader: AttachmentUploader::new(&config.http_url),
        upload_tx,
        upload_rx,
        upload_task: None,
    };
    let task = tokio::spawn(client.run());

    (handle, event_rx, task)
}

impl Client {
    pub async fn run(mut self) {
        info!("Client driver started");
        if let Some(server_count) = self.session.placeholder_server_count() {
            self.emit(SessionEvent::Placeholder { server_count });
        }
        self.emit(SessionEvent::Status(ConnectionStatus::Connecting));

        loop {
            let typing_deadline = self.session.next_typing_deadline();

            tokio::select! {
                event = self.connection_events.recv() => match event {
                    Some(event) => self.on_connection_event(event).await,
                    None => {
                        info!("Connection task ended");
                        break;
                    }
                },

                command = self.commands.recv() => match command {
                    Some(ClientCommand::Shutdown) | None => {
                        self.shutdown().await;
                        break;
                    }
                    Some(command) => self.on_command(command).await,
                },

                Some(done) = self.upload_rx.recv() => self.on_upload_done(done).await,

                _ = sleep_until_deadline(typing_deadline) => {
                    self.session.expire_typing(Instant::now());
                }
            }
        }

        self.abort_upload();
        info!("Client driver stopped");
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }

    async fn on_connection_event(&mut self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::Opened { reconnect, epoch } => {
                if reconnect {
                    self.abort_upload();
                    self.session.reset_for_resync();
                }
                self.link = Some(epoch);
                self.emit(SessionEvent::Status(ConnectionStatus::Connected));
            }
            ConnectionEvent::Packet(packet) => {
                let requests = self.session.handle_packet(packet, Instant::now());
                send_all(&self.connection, self.link, requests).await;
            }
            ConnectionEvent::Closed { attempts } => {
                debug!(attempts, "Connection closed");
                self.link = None;
                self.emit(SessionEvent::Status(ConnectionStatus::Reconnecting {
                    attempt: attempts,
                }));
            }
            ConnectionEvent::GaveUp { attempts } => {
                error!(attempts, "Failed to reconnect");
                self.link = None;
                self.emit(SessionEvent::Status(ConnectionStatus::Failed));
            }
        }
    }

    async fn on_command(&mut self, command: ClientCommand) {
        let result = match command {
            command if self.link.is_none() && command.needs_connection() => {
                Err(ClientError::Offline)
            }
            ClientCommand::SelectServer(id) => self.session.select_server(id),
            ClientCommand::SelectChannel(id) => self.session.select_channel(id),
            ClientCommand::Viewport {
                near_top,
                near_bottom,
            } => Ok(self.session.set_viewport(near_top, near_bottom)),
            ClientCommand::ComposerInput(text) => Ok(self.session.composer_input(&text)),
            ClientCommand::ReplyTo(id) => {
                self.session.set_reply_to(id);
                Ok(Vec::new())
            }
            ClientCommand::Submit { text, files } => self.submit(text, files),
            ClientCommand::ResetComposer => {
                self.abort_upload();
                Ok(self.session.reset_composer())
            }
            ClientCommand::DeleteMessage(id) => self.session.delete_message(id),
            ClientCommand::EditMessage { id, text } => self.session.edit_message(id, text),
            ClientCommand::CreateServer(name) => self.session.create_server(name),
            ClientCommand::DeleteServer(id) => self.session.delete_server(id),
            ClientCommand::CreateChannel(name) => self.session.create_channel(name),
            ClientCommand::CreateInvite => self.session.create_invite(),
            ClientCommand::SetDisplayName(name) => self.session.set_display_name(name),
            ClientCommand::SetStatus(status) => self.session.set_status(status),
            ClientCommand::Shutdown => Ok(Vec::new()),
        };

        match result {
            Ok(requests) => send_all(&self.connection, self.link, requests).await,
            Err(e) => {
                warn!(error = %e, "Command rejected");
                self.emit(SessionEvent::CommandFailed {
                    reason: e.to_string(),
                });
            }
        }
    }

    fn submit(&mut self, text: String, files: Vec<LocalFile>) -> Result<Vec<Request>, ClientError> {
        match self.session.begin_submit(text, files)? {
            SubmitPlan::Send(requests) => Ok(requests),
            SubmitPlan::Upload {
                requests,
                mut pending,
            } => {
                let generation = pending.generation;
                let files = std::mem::take(&mut pending.files);
                let uploader = self.uploader.clone();
                let done_tx = self.upload_tx.clone();

                info!(generation, files = files.len(), "Starting attachment upload");
                let task = tokio::spawn(async move {
                    let result = uploader.upload(files).await;
                    let _ = done_tx.send(UploadDone { pending, result });
                });
                self.upload_task = Some((generation, task));
                Ok(requests)
            }
        }
    }

    async fn on_upload_done(&mut self, done: UploadDone) {
        let generation = done.pending.generation;
        if matches!(self.upload_task, Some((current, _)) if current == generation) {
            self.upload_task = None;
        }

        match (done.result, self.link) {
            (Ok(token), Some(_)) => {
                let requests = self.session.finish_submit(done.pending, token);
                send_all(&self.connection, self.link, requests).await;
            }
            (Ok(_), None) => self
                .session
                .abort_submit(generation, &ClientError::Offline.to_string()),
            (Err(e), _) => self.session.abort_submit(generation, &e.to_string()),
        }
    }

    fn abort_upload(&mut self) {
        if let Some((generation, task)) = self.upload_task.take() {
            debug!(generation, "Aborting upload task");
            task.abort();
        }
    }

    async fn shutdown(&mut self) {
        info!("Client shutdown requested");
        self.abort_upload();
        self.connection.shutdown().await;
    }
}

async fn send_all(connection: &ConnectionHandle, link: Option<u64>, requests: Vec<Request>) {
    if requests.is_empty() {
        return;
    }
    let Some(epoch) = link else {
        warn!(count = requests.len(), "Not connected, dropping requests");
        return;
    };
    for request in requests {
        if let Err(e) = connection.send_on(epoch, &request).await {
            warn!(error = %e, packet_type = ?request.packet_type(), "Failed to send request");
        }
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
