//! Notifications from the client to the UI layer.

use std::fmt;

use parley_shared::protocol::Message;
use parley_shared::types::{ChannelId, MessageId, ServerId, UserId};

/// Connection status as shown to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connecting,
    Connected,
    Reconnecting { attempt: u32 },
    Failed,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Reconnecting { attempt } => write!(f, "reconnecting (attempt {attempt})"),
            Self::Failed => write!(f, "failed to reconnect"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Status(ConnectionStatus),
    /// Cached server count, for drawing placeholders before the list arrives.
    Placeholder { server_count: usize },
    /// Everything was discarded after a reconnect; a full reload follows.
    Resynchronizing,
    Ready { user_id: UserId },

    ServersChanged,
    ServerSelected(ServerId),
    /// The selected server went away; nothing is selected now.
    SelectionCleared,
    ChannelsChanged,
    ChannelSelected(ChannelId),
    MembersChanged,
    ProfileChanged(UserId),
    InviteCreated { server_id: ServerId, invite_key: String },

    HistoryLoaded { channel_id: ChannelId, inserted: usize },
    /// The first history request for a channel came back empty.
    NoHistory(ChannelId),
    ReachedBeginning(ChannelId),
    MessageAdded { channel_id: ChannelId, message_id: MessageId, ghost: bool },
    GhostRemoved { channel_id: ChannelId, message_id: MessageId },
    MessageEdited { channel_id: ChannelId, message_id: MessageId },
    MessageDeleted { channel_id: ChannelId, message_id: MessageId },
    MessageRegrouped { channel_id: ChannelId, message_id: MessageId, first_of_day: bool },
    ScrollToBottom,
    Notify(Message),

    TypingChanged { channel_id: ChannelId, users: Vec<UserId> },
    SendFailed { reason: String },
    /// A UI command was refused (not ready, unknown target, ...).
    CommandFailed { reason: String },
}
