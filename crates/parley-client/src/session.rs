//! Synchronization core.
//!
//! [`SyncSession`] owns everything the client knows about the backend: own
//! identity, servers, the selected server's channels and members, and the
//! message store of the active channel. It performs no I/O. Inbound packets
//! and UI actions are method calls that mutate state and return the
//! requests to transmit; changes the UI should render are pushed as
//! [`SessionEvent`]s.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use parley_shared::constants::HISTORY_PAGE_THRESHOLD;
use parley_shared::protocol::{
    AckList, Channel, ChannelList, ChatHistory, CreateChannel, CreateServer, HistoryRequest,
    Member, MemberLeave, MemberList, Message, MessageEdit, MessageRef, OwnIdentity, SendMessage,
    Server, ServerRef, SetDisplayName, SetStatus, TypingNotice, TypingUpdate,
};
use parley_shared::types::{ChannelId, MessageId, ServerId, UserId, UserStatus};
use parley_shared::{Packet, Request};
use parley_store::LocalCache;

use crate::composer::{Composer, PendingSubmit};
use crate::error::ClientError;
use crate::events::SessionEvent;
use crate::latch::Latch;
use crate::messages::{Duplicate, MessageStore};
use crate::typing::TypingSet;
use crate::upload::LocalFile;

/// What the driver has to do with an accepted submit.
#[derive(Debug)]
pub enum SubmitPlan {
    /// Nothing to upload; transmit right away.
    Send(Vec<Request>),
    /// Upload the files, then call [`SyncSession::finish_submit`].
    Upload {
        requests: Vec<Request>,
        pending: PendingSubmit,
    },
}

/// The active channel and its loaded history.
#[derive(Debug)]
pub struct ChannelView {
    channel: Channel,
    messages: MessageStore,
    first_request_pending: bool,
    /// Cursor of the history request this view is waiting on.
    awaiting: Option<MessageId>,
    history_received_once: bool,
    reached_beginning: bool,
}

impl ChannelView {
    fn new(channel: Channel) -> Self {
        Self {
            channel,
            messages: MessageStore::new(),
            first_request_pending: true,
            awaiting: Some(MessageId::NONE),
            history_received_once: false,
            reached_beginning: false,
        }
    }

    pub fn channel_id(&self) -> ChannelId {
        self.channel.id
    }

    pub fn messages(&self) -> &MessageStore {
        &self.messages
    }

    pub fn loaded_message_count(&self) -> usize {
        self.messages.loaded_count()
    }

    pub fn history_in_flight(&self) -> bool {
        self.awaiting.is_some()
    }

    pub fn history_received_once(&self) -> bool {
        self.history_received_once
    }

    pub fn reached_beginning(&self) -> bool {
        self.reached_beginning
    }
}

#[derive(Debug, Clone)]
struct EventSink(mpsc::UnboundedSender<SessionEvent>);

impl EventSink {
    fn emit(&self, event: SessionEvent) {
        // a UI that went away is not an error for the session
        let _ = self.0.send(event);
    }
}

enum ProfileField {
    DisplayName(String),
    Picture(String),
    Status(UserStatus),
}

pub struct SyncSession {
    cache: LocalCache,
    events: EventSink,

    identity: Option<OwnIdentity>,
    identity_ready: Latch,
    image_host: Option<String>,

    servers: Vec<Server>,
    current_server: Option<ServerId>,
    channels: Vec<Channel>,
    members: BTreeMap<UserId, Member>,
    members_ready: Latch,

    view: Option<ChannelView>,
    /// Cursors of history requests sent and not yet answered, per channel,
    /// in send order. Answers arrive in the same order.
    history_requests: HashMap<ChannelId, VecDeque<MessageId>>,
    deferred_history: Vec<ChatHistory>,
    near_top: bool,
    near_bottom: bool,

    typing: TypingSet,
    composer: Composer,
    acks: HashMap<ChannelId, MessageId>,
}

impl SyncSession {
    pub fn new(
        cache: LocalCache,
        events: mpsc::UnboundedSender<SessionEvent>,
        typing_timeout: Duration,
    ) -> Self {
        Self {
            cache,
            events: EventSink(events),
            identity: None,
            identity_ready: Latch::new(),
            image_host: None,
            servers: Vec::new(),
            current_server: None,
            channels: Vec::new(),
            members: BTreeMap::new(),
            members_ready: Latch::new(),
            view: None,
            history_requests: HashMap::new(),
            deferred_history: Vec::new(),
            near_top: false,
            near_bottom: true,
            typing: TypingSet::new(typing_timeout),
            composer: Composer::new(),
            acks: HashMap::new(),
        }
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn identity(&self) -> Option<&OwnIdentity> {
        self.identity.as_ref()
    }

    pub fn own_user_id(&self) -> Option<UserId> {
        self.identity.as_ref().map(|id| id.user_id)
    }

    /// Opens once the own identity has been received.
    pub fn identity_latch(&self) -> Latch {
        self.identity_ready.clone()
    }

    pub fn image_host(&self) -> Option<&str> {
        self.image_host.as_deref()
    }

    pub fn servers(&self) -> &[Server] {
        &self.servers
    }

    pub fn current_server(&self) -> Option<ServerId> {
        self.current_server
    }

    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    pub fn members(&self) -> impl Iterator<Item = &Member> {
        self.members.values()
    }

    pub fn member(&self, user: UserId) -> Option<&Member> {
        self.members.get(&user)
    }

    pub fn view(&self) -> Option<&ChannelView> {
        self.view.as_ref()
    }

    pub fn active_channel(&self) -> Option<ChannelId> {
        self.view.as_ref().map(ChannelView::channel_id)
    }

    pub fn typing_users(&self) -> Vec<UserId> {
        self.typing.users()
    }

    pub fn next_typing_deadline(&self) -> Option<Instant> {
        self.typing.next_deadline()
    }

    pub fn last_ack(&self, channel: ChannelId) -> Option<MessageId> {
        self.acks.get(&channel).copied()
    }

    pub fn upload_in_progress(&self) -> bool {
        self.composer.is_uploading()
    }

    /// Server count remembered from the previous run.
    pub fn placeholder_server_count(&self) -> Option<usize> {
        self.cache.server_count()
    }

    fn require_identity(&self) -> Result<UserId, ClientError> {
        self.own_user_id().ok_or(ClientError::NotReady)
    }

    fn server_known(&self, id: ServerId) -> bool {
        self.servers.iter().any(|s| s.id == id)
    }

    fn is_active(&self, channel: ChannelId) -> bool {
        self.active_channel() == Some(channel)
    }

    // ------------------------------------------------------------------
    // Inbound packets
    // ------------------------------------------------------------------

    /// Apply one inbound packet. Packets must be fed in receipt order.
    pub fn handle_packet(&mut self, packet: Packet, now: Instant) -> Vec<Request> {
        match packet {
            Packet::OwnIdentity(identity) => return self.on_identity(identity),
            Packet::ServerList(servers) => return self.on_server_list(servers),
            Packet::ServerAdd(server) => return self.on_server_add(server),
            Packet::ServerDelete(r) => return self.on_server_delete(r.server_id),
            Packet::ChannelList(list) => return self.on_channel_list(list),
            Packet::ChannelAdd(channel) => return self.on_channel_add(channel),
            Packet::ChatMessage(message) => return self.on_message(message),
            Packet::MemberList(list) => self.on_member_list(list),
            Packet::MemberAdd(member) => self.on_member_add(member),
            Packet::MemberLeave(leave) => self.on_member_leave(leave),
            Packet::DisplayNameChange(c) => {
                self.on_profile_change(c.user_id, ProfileField::DisplayName(c.display_name))
            }
            Packet::PictureChange(c) => {
                self.on_profile_change(c.user_id, ProfileField::Picture(c.picture))
            }
            Packet::StatusChange(c) => self.on_profile_change(c.user_id, ProfileField::Status(c.status)),
            Packet::ChatHistory(history) => self.on_history(history),
            Packet::ChatDelete(r) => self.on_delete(r),
            Packet::ChatEdit(edit) => self.on_edit(edit),
            Packet::Typing(notice) => self.on_typing(notice, now),
            Packet::ImageHostAddress(host) => {
                debug!(address = %host.address, "Image host address received");
                self.image_host = Some(host.address);
            }
            Packet::Invite(invite) => {
                info!(server_id = %invite.server_id, "Invite created");
                self.events.emit(SessionEvent::InviteCreated {
                    server_id: invite.server_id,
                    invite_key: invite.invite_key,
                });
            }
            Packet::UpdateAcks(list) => self.on_acks(list),
        }
        Vec::new()
    }

    fn on_identity(&mut self, identity: OwnIdentity) -> Vec<Request> {
        let user_id = identity.user_id;
        let first = self.identity.is_none();
        info!(user_id = %user_id, "Own identity received");

        self.identity = Some(identity);
        self.identity_ready.open();
        self.events.emit(SessionEvent::Ready { user_id });

        if first {
            vec![Request::ListServers]
        } else {
            Vec::new()
        }
    }

    fn on_server_list(&mut self, servers: Vec<Server>) -> Vec<Request> {
        debug!(count = servers.len(), "Server list received");
        self.servers = servers;
        self.persist_servers();
        self.events.emit(SessionEvent::ServersChanged);

        match self.current_server {
            Some(current) if self.server_known(current) => Vec::new(),
            Some(_) => {
                let mut requests = self.clear_server_selection();
                self.events.emit(SessionEvent::SelectionCleared);
                requests.extend(self.auto_select_server());
                requests
            }
            None => self.auto_select_server(),
        }
    }

    fn on_server_add(&mut self, server: Server) -> Vec<Request> {
        if let Some(existing) = self.servers.iter_mut().find(|s| s.id == server.id) {
            *existing = server;
            self.events.emit(SessionEvent::ServersChanged);
            return Vec::new();
        }

        let id = server.id;
        info!(server_id = %id, name = %server.name, "Server added");
        self.servers.push(server);
        self.persist_servers();
        self.events.emit(SessionEvent::ServersChanged);

        if self.current_server.is_none() {
            self.select_server(id).unwrap_or_else(|e| {
                warn!(error = %e, "Could not select added server");
                Vec::new()
            })
        } else {
            Vec::new()
        }
    }

    fn on_server_delete(&mut self, id: ServerId) -> Vec<Request> {
        let before = self.servers.len();
        self.servers.retain(|s| s.id != id);
        if self.servers.len() == before {
            debug!(server_id = %id, "Delete for unknown server");
            return Vec::new();
        }

        info!(server_id = %id, "Server removed");
        self.persist_servers();
        self.events.emit(SessionEvent::ServersChanged);

        if self.current_server == Some(id) {
            let requests = self.clear_server_selection();
            self.events.emit(SessionEvent::SelectionCleared);
            requests
        } else {
            Vec::new()
        }
    }

    fn on_channel_list(&mut self, list: ChannelList) -> Vec<Request> {
        if self.current_server != Some(list.server_id) {
            warn!(server_id = %list.server_id, "Discarding channel list for unselected server");
            return Vec::new();
        }

        debug!(server_id = %list.server_id, count = list.channels.len(), "Channel list received");
        self.channels = list.channels;
        self.events.emit(SessionEvent::ChannelsChanged);

        if let Some(active) = self.active_channel() {
            if self.channels.iter().any(|c| c.id == active) {
                return Vec::new();
            }
        }

        let target = self
            .cache
            .last_channel(list.server_id)
            .filter(|id| self.channels.iter().any(|c| c.id == *id))
            .or_else(|| self.channels.first().map(|c| c.id));

        match target {
            Some(id) => self.select_channel(id).unwrap_or_else(|e| {
                warn!(error = %e, "Could not select channel");
                Vec::new()
            }),
            None => self.leave_channel(),
        }
    }

    fn on_channel_add(&mut self, channel: Channel) -> Vec<Request> {
        if self.current_server != Some(channel.server_id) {
            debug!(channel_id = %channel.id, "Channel added on another server");
            return Vec::new();
        }
        if self.channels.iter().any(|c| c.id == channel.id) {
            return Vec::new();
        }

        let id = channel.id;
        self.channels.push(channel);
        self.events.emit(SessionEvent::ChannelsChanged);

        if self.view.is_none() {
            self.select_channel(id).unwrap_or_else(|e| {
                warn!(error = %e, "Could not select added channel");
                Vec::new()
            })
        } else {
            Vec::new()
        }
    }

    fn on_member_list(&mut self, list: MemberList) {
        if self.current_server != Some(list.server_id) {
            warn!(server_id = %list.server_id, "Discarding member list for unselected server");
            return;
        }

        debug!(server_id = %list.server_id, count = list.members.len(), "Member list received");
        self.members = list.members.into_iter().map(|m| (m.user_id, m)).collect();
        self.members_ready.open();
        self.events.emit(SessionEvent::MembersChanged);

        for history in std::mem::take(&mut self.deferred_history) {
            self.apply_history(history);
        }
    }

    fn on_member_add(&mut self, member: Member) {
        if self.current_server != Some(member.server_id) {
            return;
        }
        self.members.insert(member.user_id, member);
        self.events.emit(SessionEvent::MembersChanged);
    }

    fn on_member_leave(&mut self, leave: MemberLeave) {
        if self.current_server != Some(leave.server_id) {
            return;
        }
        if self.members.remove(&leave.user_id).is_some() {
            self.events.emit(SessionEvent::MembersChanged);
        }
        if self.typing.stop(leave.user_id) {
            self.emit_typing();
        }
    }

    fn on_profile_change(&mut self, user: UserId, field: ProfileField) {
        if let Some(member) = self.members.get_mut(&user) {
            match &field {
                ProfileField::DisplayName(name) => member.display_name = name.clone(),
                ProfileField::Picture(picture) => member.picture = picture.clone(),
                ProfileField::Status(status) => member.status = *status,
            }
        }
        if let Some(identity) = self.identity.as_mut().filter(|id| id.user_id == user) {
            match field {
                ProfileField::DisplayName(name) => identity.display_name = name,
                ProfileField::Picture(picture) => identity.picture = picture,
                ProfileField::Status(status) => identity.status = status,
            }
        }
        self.events.emit(SessionEvent::ProfileChanged(user));
    }

    fn on_history(&mut self, history: ChatHistory) {
        let channel_id = history.channel_id;
        let Some(answered) = self
            .history_requests
            .get_mut(&channel_id)
            .and_then(VecDeque::pop_front)
        else {
            warn!(channel_id = %channel_id, "Discarding unsolicited history");
            return;
        };
        if self.history_requests.get(&channel_id).is_some_and(VecDeque::is_empty) {
            self.history_requests.remove(&channel_id);
        }

        let Some(view) = self.view.as_ref() else {
            debug!(channel_id = %channel_id, "Discarding history, no active channel");
            return;
        };
        if view.channel.id != channel_id || view.awaiting != Some(answered) {
            debug!(
                channel_id = %channel_id,
                from = %answered,
                active = %view.channel.id,
                "Discarding stale history"
            );
            return;
        }
        if !self.members_ready.is_open() {
            debug!(channel_id = %channel_id, "Deferring history until members load");
            self.deferred_history.push(history);
            return;
        }
        self.apply_history(history);
    }

    fn apply_history(&mut self, history: ChatHistory) {
        let Some(view) = self
            .view
            .as_mut()
            .filter(|v| v.channel.id == history.channel_id)
        else {
            return;
        };

        let channel_id = history.channel_id;
        let first = std::mem::take(&mut view.first_request_pending);
        view.awaiting = None;
        view.history_received_once = true;

        if history.messages.is_empty() {
            if first {
                info!(channel_id = %channel_id, "Channel has no history");
                self.events.emit(SessionEvent::NoHistory(channel_id));
            } else {
                info!(channel_id = %channel_id, "Reached beginning of history");
                view.reached_beginning = true;
                self.events.emit(SessionEvent::ReachedBeginning(channel_id));
            }
            return;
        }

        let report = view.messages.merge_history(history.messages);
        if report.duplicates > 0 {
            warn!(channel_id = %channel_id, duplicates = report.duplicates, "Skipped duplicate history entries");
        }
        debug!(
            channel_id = %channel_id,
            inserted = report.inserted,
            loaded = view.messages.loaded_count(),
            "History merged"
        );
        self.events.emit(SessionEvent::HistoryLoaded {
            channel_id,
            inserted: report.inserted,
        });
        if first {
            self.events.emit(SessionEvent::ScrollToBottom);
        }
    }

    fn on_message(&mut self, message: Message) -> Vec<Request> {
        let own = self.own_user_id() == Some(message.user_id);

        if !self.is_active(message.channel_id) {
            debug!(channel_id = %message.channel_id, message_id = %message.id, "Message for inactive channel");
            if !own {
                self.events.emit(SessionEvent::Notify(message));
            }
            return Vec::new();
        }
        let Some(view) = self.view.as_mut() else {
            return Vec::new();
        };

        let channel_id = message.channel_id;
        let message_id = message.id;
        if view.messages.get(message_id).is_some_and(|e| !e.ghost) {
            warn!(channel_id = %channel_id, message_id = %message_id, "Dropping duplicate message");
            return Vec::new();
        }

        if own {
            if let Some(ghost) = view.messages.remove_oldest_ghost() {
                debug!(ghost_id = %ghost.message.id, message_id = %message_id, "Ghost replaced by server copy");
                self.events.emit(SessionEvent::GhostRemoved {
                    channel_id,
                    message_id: ghost.message.id,
                });
            }
        }
        // a ghost fabricated with the very same ID gives way to the real message
        if view.messages.remove(message_id).is_some() {
            self.events.emit(SessionEvent::GhostRemoved {
                channel_id,
                message_id,
            });
        }
        let author_was_typing = self.typing.stop(message.user_id);

        let notify = (!own).then(|| message.clone());
        if let Err(Duplicate(id)) = view.messages.insert(message, false) {
            warn!(message_id = %id, "Dropping duplicate message");
            return Vec::new();
        }

        if author_was_typing {
            self.emit_typing();
        }
        self.events.emit(SessionEvent::MessageAdded {
            channel_id,
            message_id,
            ghost: false,
        });
        if self.near_bottom || own {
            self.events.emit(SessionEvent::ScrollToBottom);
        }
        if let Some(message) = notify {
            self.events.emit(SessionEvent::Notify(message));
        }

        if self.near_bottom {
            self.acks.insert(channel_id, message_id);
            vec![Request::Ack(MessageRef {
                channel_id,
                message_id,
            })]
        } else {
            Vec::new()
        }
    }

    fn on_delete(&mut self, r: MessageRef) {
        let Some(view) = self.view.as_mut().filter(|v| v.channel.id == r.channel_id) else {
            return;
        };
        let Some((_, regrouped)) = view.messages.remove(r.message_id) else {
            debug!(message_id = %r.message_id, "Delete for message not loaded");
            return;
        };

        self.events.emit(SessionEvent::MessageDeleted {
            channel_id: r.channel_id,
            message_id: r.message_id,
        });
        if let Some(regrouped) = regrouped {
            self.events.emit(SessionEvent::MessageRegrouped {
                channel_id: r.channel_id,
                message_id: regrouped.id,
                first_of_day: regrouped.first_of_day,
            });
        }
    }

    fn on_edit(&mut self, edit: MessageEdit) {
        let Some(view) = self.view.as_mut().filter(|v| v.channel.id == edit.channel_id) else {
            return;
        };
        if view.messages.edit(edit.message_id, edit.text) {
            self.events.emit(SessionEvent::MessageEdited {
                channel_id: edit.channel_id,
                message_id: edit.message_id,
            });
        } else {
            debug!(message_id = %edit.message_id, "Edit for message not loaded");
        }
    }

    fn on_typing(&mut self, notice: TypingNotice, now: Instant) {
        if !self.is_active(notice.channel_id) || self.own_user_id() == Some(notice.user_id) {
            return;
        }
        let changed = if notice.typing {
            self.typing.start(notice.user_id, now)
        } else {
            self.typing.stop(notice.user_id)
        };
        if changed {
            self.emit_typing();
        }
    }

    fn on_acks(&mut self, list: AckList) {
        for ack in list.acks {
            let entry = self.acks.entry(ack.channel_id).or_insert(ack.message_id);
            if ack.message_id > *entry {
                *entry = ack.message_id;
            }
        }
    }

    fn emit_typing(&self) {
        if let Some(channel_id) = self.active_channel() {
            self.events.emit(SessionEvent::TypingChanged {
                channel_id,
                users: self.typing.users(),
            });
        }
    }

    fn persist_servers(&self) {
        if let Err(e) = self.cache.set_server_count(self.servers.len()) {
            warn!(error = %e, "Failed to cache server count");
        }
        let present: Vec<ServerId> = self.servers.iter().map(|s| s.id).collect();
        match self.cache.prune_last_channels(&present) {
            Ok(0) => {}
            Ok(removed) => debug!(removed, "Pruned last-channel cache"),
            Err(e) => warn!(error = %e, "Failed to prune last-channel cache"),
        }
    }

    // ------------------------------------------------------------------
    // Selection
    // ------------------------------------------------------------------

    fn auto_select_server(&mut self) -> Vec<Request> {
        let target = self
            .cache
            .last_server()
            .filter(|id| self.server_known(*id))
            .or_else(|| self.servers.first().map(|s| s.id));

        match target {
            Some(id) => self.select_server(id).unwrap_or_else(|e| {
                warn!(error = %e, "Could not select server");
                Vec::new()
            }),
            None => Vec::new(),
        }
    }

    pub fn select_server(&mut self, id: ServerId) -> Result<Vec<Request>, ClientError> {
        self.require_identity()?;
        if !self.server_known(id) {
            return Err(ClientError::UnknownServer(id));
        }
        if self.current_server == Some(id) {
            return Ok(Vec::new());
        }

        let mut requests = self.clear_server_selection();
        self.current_server = Some(id);
        if let Err(e) = self.cache.set_last_server(id) {
            warn!(error = %e, "Failed to cache last server");
        }

        info!(server_id = %id, "Server selected");
        self.events.emit(SessionEvent::ServerSelected(id));

        let server = ServerRef { server_id: id };
        requests.push(Request::ListChannels(server.clone()));
        requests.push(Request::ListMembers(server));
        Ok(requests)
    }

    fn clear_server_selection(&mut self) -> Vec<Request> {
        let requests = self.leave_channel();
        self.current_server = None;
        self.channels.clear();
        self.members.clear();
        self.members_ready.reset();
        requests
    }

    /// Drop the active channel view. Returns a typing stop for it if the
    /// local user was announced as typing.
    fn leave_channel(&mut self) -> Vec<Request> {
        self.typing.clear();
        self.deferred_history.clear();
        let Some(view) = self.view.take() else {
            return Vec::new();
        };
        if self.composer.stop_typing() {
            vec![typing_request(view.channel.id, false)]
        } else {
            Vec::new()
        }
    }

    pub fn select_channel(&mut self, id: ChannelId) -> Result<Vec<Request>, ClientError> {
        self.require_identity()?;
        let server = self.current_server.ok_or(ClientError::NoServerSelected)?;
        let channel = self
            .channels
            .iter()
            .find(|c| c.id == id)
            .cloned()
            .ok_or(ClientError::UnknownChannel(id))?;
        if self.active_channel() == Some(id) {
            return Ok(Vec::new());
        }

        let mut requests = self.leave_channel();
        if let Err(e) = self.cache.set_last_channel(server, id) {
            warn!(error = %e, "Failed to cache last channel");
        }

        self.view = Some(ChannelView::new(channel));
        self.near_top = false;
        self.near_bottom = true;

        info!(server_id = %server, channel_id = %id, "Channel selected");
        self.events.emit(SessionEvent::ChannelSelected(id));

        requests.push(self.track_history(id, MessageId::NONE));
        Ok(requests)
    }

    // ------------------------------------------------------------------
    // Viewport and pagination
    // ------------------------------------------------------------------

    pub fn set_viewport(&mut self, near_top: bool, near_bottom: bool) -> Vec<Request> {
        self.near_top = near_top;
        self.near_bottom = near_bottom;
        self.request_older_history().into_iter().collect()
    }

    /// Request the page before the oldest loaded message, if the viewer is
    /// near the top and paging makes sense right now.
    pub fn request_older_history(&mut self) -> Option<Request> {
        if !self.near_top {
            return None;
        }
        let view = self.view.as_mut()?;
        if !view.history_received_once
            || view.awaiting.is_some()
            || view.reached_beginning
            || view.messages.loaded_count() < HISTORY_PAGE_THRESHOLD
        {
            return None;
        }
        let oldest = view.messages.oldest_id()?;

        view.awaiting = Some(oldest);
        let channel_id = view.channel.id;
        debug!(channel_id = %channel_id, from = %oldest, "Requesting older history");
        Some(self.track_history(channel_id, oldest))
    }

    fn track_history(&mut self, channel_id: ChannelId, from: MessageId) -> Request {
        self.history_requests
            .entry(channel_id)
            .or_default()
            .push_back(from);
        Request::History(HistoryRequest { channel_id, from })
    }

    // ------------------------------------------------------------------
    // Composer
    // ------------------------------------------------------------------

    pub fn composer_input(&mut self, text: &str) -> Vec<Request> {
        let Some(channel_id) = self.active_channel() else {
            return Vec::new();
        };
        match self.composer.input(text) {
            Some(typing) => vec![typing_request(channel_id, typing)],
            None => Vec::new(),
        }
    }

    pub fn set_reply_to(&mut self, message: MessageId) {
        self.composer.set_reply_to(message);
    }

    pub fn begin_submit(
        &mut self,
        text: String,
        files: Vec<LocalFile>,
    ) -> Result<SubmitPlan, ClientError> {
        self.require_identity()?;
        let channel_id = self.active_channel().ok_or(ClientError::NoActiveChannel)?;
        let submission = self.composer.begin(&text, !files.is_empty())?;

        let mut requests = Vec::new();
        if submission.stop_typing {
            requests.push(typing_request(channel_id, false));
        }

        if files.is_empty() {
            requests.extend(self.send_with_ghost(channel_id, text, submission.reply_to, None));
            return Ok(SubmitPlan::Send(requests));
        }

        debug!(channel_id = %channel_id, files = files.len(), "Submit waiting on upload");
        Ok(SubmitPlan::Upload {
            requests,
            pending: PendingSubmit {
                generation: submission.generation,
                channel_id,
                text,
                reply_to: submission.reply_to,
                files,
            },
        })
    }

    /// Complete a submit whose upload produced `token`.
    pub fn finish_submit(&mut self, pending: PendingSubmit, token: String) -> Vec<Request> {
        if !self.composer.complete(pending.generation) {
            debug!(generation = pending.generation, "Ignoring stale upload completion");
            return Vec::new();
        }
        self.send_with_ghost(pending.channel_id, pending.text, pending.reply_to, Some(token))
    }

    pub fn abort_submit(&mut self, generation: u64, reason: &str) {
        if !self.composer.complete(generation) {
            debug!(generation, "Ignoring stale upload failure");
            return;
        }
        warn!(reason, "Attachment upload failed, message not sent");
        self.events.emit(SessionEvent::SendFailed {
            reason: reason.to_string(),
        });
    }

    pub fn reset_composer(&mut self) -> Vec<Request> {
        let reset = self.composer.reset();
        if let Some(generation) = reset.aborted {
            info!(generation, "Upload cancelled");
        }
        match self.active_channel() {
            Some(channel_id) if reset.stop_typing => vec![typing_request(channel_id, false)],
            _ => Vec::new(),
        }
    }

    fn send_with_ghost(
        &mut self,
        channel_id: ChannelId,
        text: String,
        reply_to: MessageId,
        attachment_token: Option<String>,
    ) -> Vec<Request> {
        let user_id = self.own_user_id();
        if let (Some(user_id), Some(view)) = (
            user_id,
            self.view.as_mut().filter(|v| v.channel.id == channel_id),
        ) {
            let ghost = Message {
                id: view.messages.next_ghost_id(),
                channel_id,
                user_id,
                text: text.clone(),
                attachments: Vec::new(),
                edited: false,
                reply_to,
            };
            let message_id = ghost.id;
            if view.messages.insert(ghost, true).is_ok() {
                self.events.emit(SessionEvent::MessageAdded {
                    channel_id,
                    message_id,
                    ghost: true,
                });
                self.events.emit(SessionEvent::ScrollToBottom);
            }
        }

        vec![Request::SendMessage(SendMessage {
            channel_id,
            text,
            reply_to,
            attachment_token,
        })]
    }

    // ------------------------------------------------------------------
    // Other user actions
    // ------------------------------------------------------------------

    pub fn delete_message(&self, message: MessageId) -> Result<Vec<Request>, ClientError> {
        let channel_id = self.loaded_message_channel(message)?;
        Ok(vec![Request::DeleteMessage(MessageRef {
            channel_id,
            message_id: message,
        })])
    }

    pub fn edit_message(&self, message: MessageId, text: String) -> Result<Vec<Request>, ClientError> {
        let channel_id = self.loaded_message_channel(message)?;
        Ok(vec![Request::EditMessage(MessageEdit {
            channel_id,
            message_id: message,
            text,
        })])
    }

    fn loaded_message_channel(&self, message: MessageId) -> Result<ChannelId, ClientError> {
        self.require_identity()?;
        let view = self.view.as_ref().ok_or(ClientError::NoActiveChannel)?;
        match view.messages.get(message) {
            Some(entry) if !entry.ghost => Ok(view.channel.id),
            _ => Err(ClientError::UnknownMessage(message)),
        }
    }

    pub fn create_server(&self, name: String) -> Result<Vec<Request>, ClientError> {
        self.require_identity()?;
        Ok(vec![Request::CreateServer(CreateServer { name })])
    }

    pub fn delete_server(&self, id: ServerId) -> Result<Vec<Request>, ClientError> {
        self.require_identity()?;
        if !self.server_known(id) {
            return Err(ClientError::UnknownServer(id));
        }
        Ok(vec![Request::DeleteServer(ServerRef { server_id: id })])
    }

    pub fn create_channel(&self, name: String) -> Result<Vec<Request>, ClientError> {
        self.require_identity()?;
        let server_id = self.current_server.ok_or(ClientError::NoServerSelected)?;
        Ok(vec![Request::CreateChannel(CreateChannel { server_id, name })])
    }

    pub fn create_invite(&self) -> Result<Vec<Request>, ClientError> {
        self.require_identity()?;
        let server_id = self.current_server.ok_or(ClientError::NoServerSelected)?;
        Ok(vec![Request::CreateInvite(ServerRef { server_id })])
    }

    pub fn set_display_name(&self, display_name: String) -> Result<Vec<Request>, ClientError> {
        self.require_identity()?;
        Ok(vec![Request::SetDisplayName(SetDisplayName { display_name })])
    }

    pub fn set_status(&self, status: UserStatus) -> Result<Vec<Request>, ClientError> {
        self.require_identity()?;
        Ok(vec![Request::SetStatus(SetStatus { status })])
    }

    // ------------------------------------------------------------------
    // Timers and reconnect
    // ------------------------------------------------------------------

    pub fn expire_typing(&mut self, now: Instant) {
        let expired = self.typing.expire(now);
        if !expired.is_empty() {
            debug!(count = expired.len(), "Typing indicators expired");
            self.emit_typing();
        }
    }

    /// Forget everything learned from the previous connection. The next
    /// identity packet starts a full reload.
    pub fn reset_for_resync(&mut self) {
        info!("Discarding session state for resynchronization");
        self.clear_server_selection();
        self.composer.reset();
        self.servers.clear();
        self.identity = None;
        self.identity_ready.reset();
        self.image_host = None;
        self.history_requests.clear();
        self.acks.clear();
        self.near_top = false;
        self.near_bottom = true;
        self.events.emit(SessionEvent::Resynchronizing);
    }
}

fn typing_request(channel_id: ChannelId, typing: bool) -> Request {
    Request::Typing(TypingUpdate { channel_id, typing })
}
