use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::codec::{decode_frame, encode_frame};
use crate::constants::ID_FIELDS;
use crate::error::CodecError;
use crate::types::{ChannelId, MessageId, ServerId, UserId, UserStatus};

/// Flat packet type enumeration shared with the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum PacketType {
    ChatMessage = 1,
    ChatHistory = 2,
    ChatDelete = 3,
    ChatEdit = 4,
    ServerAdd = 5,
    ServerList = 6,
    ServerDelete = 7,
    Invite = 8,
    ChannelAdd = 9,
    ChannelList = 10,
    MemberAdd = 11,
    MemberList = 12,
    MemberLeave = 13,
    DisplayNameChange = 14,
    PictureChange = 15,
    StatusChange = 16,
    Typing = 17,
    OwnIdentity = 18,
    ImageHostAddress = 19,
    UpdateAcks = 20,
}

impl PacketType {
    pub fn from_byte(b: u8) -> Option<Self> {
        Some(match b {
            1 => Self::ChatMessage,
            2 => Self::ChatHistory,
            3 => Self::ChatDelete,
            4 => Self::ChatEdit,
            5 => Self::ServerAdd,
            6 => Self::ServerList,
            7 => Self::ServerDelete,
            8 => Self::Invite,
            9 => Self::ChannelAdd,
            10 => Self::ChannelList,
            11 => Self::MemberAdd,
            12 => Self::MemberList,
            13 => Self::MemberLeave,
            14 => Self::DisplayNameChange,
            15 => Self::PictureChange,
            16 => Self::StatusChange,
            17 => Self::Typing,
            18 => Self::OwnIdentity,
            19 => Self::ImageHostAddress,
            20 => Self::UpdateAcks,
            _ => return None,
        })
    }

    pub fn as_byte(self) -> u8 {
        self as u8
    }
}

/// Treat an explicit JSON `null` the same as a missing field.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Option::unwrap_or_default)
}

// ---------------------------------------------------------------------------
// Domain records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Server {
    #[serde(rename = "ServerID")]
    pub id: ServerId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub picture: String,
    #[serde(rename = "OwnerID", default)]
    pub owner_id: UserId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Channel {
    #[serde(rename = "ChannelID")]
    pub id: ChannelId,
    #[serde(rename = "ServerID", default)]
    pub server_id: ServerId,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Member {
    #[serde(rename = "UserID")]
    pub user_id: UserId,
    #[serde(rename = "ServerID", default)]
    pub server_id: ServerId,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub picture: String,
    #[serde(default)]
    pub status: UserStatus,
}

/// Reference to a stored attachment by content hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Attachment {
    pub hash: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Message {
    #[serde(rename = "MessageID")]
    pub id: MessageId,
    #[serde(rename = "ChannelID")]
    pub channel_id: ChannelId,
    #[serde(rename = "UserID")]
    pub user_id: UserId,
    #[serde(default)]
    pub text: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub attachments: Vec<Attachment>,
    #[serde(default)]
    pub edited: bool,
    #[serde(default)]
    pub reply_to: MessageId,
}

// ---------------------------------------------------------------------------
// Inbound payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ChatHistory {
    #[serde(rename = "ChannelID")]
    pub channel_id: ChannelId,
    #[serde(default, deserialize_with = "null_as_default")]
    pub messages: Vec<Message>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MessageRef {
    #[serde(rename = "ChannelID")]
    pub channel_id: ChannelId,
    #[serde(rename = "MessageID")]
    pub message_id: MessageId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MessageEdit {
    #[serde(rename = "ChannelID")]
    pub channel_id: ChannelId,
    #[serde(rename = "MessageID")]
    pub message_id: MessageId,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerRef {
    #[serde(rename = "ServerID")]
    pub server_id: ServerId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct InviteCreated {
    #[serde(rename = "ServerID")]
    pub server_id: ServerId,
    pub invite_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ChannelList {
    #[serde(rename = "ServerID")]
    pub server_id: ServerId,
    #[serde(default, deserialize_with = "null_as_default")]
    pub channels: Vec<Channel>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MemberList {
    #[serde(rename = "ServerID")]
    pub server_id: ServerId,
    #[serde(default, deserialize_with = "null_as_default")]
    pub members: Vec<Member>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberLeave {
    #[serde(rename = "ServerID")]
    pub server_id: ServerId,
    #[serde(rename = "UserID")]
    pub user_id: UserId,
}

/// A profile field change broadcast for one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DisplayNameChange {
    #[serde(rename = "UserID")]
    pub user_id: UserId,
    pub display_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PictureChange {
    #[serde(rename = "UserID")]
    pub user_id: UserId,
    pub picture: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StatusChange {
    #[serde(rename = "UserID")]
    pub user_id: UserId,
    pub status: UserStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TypingNotice {
    #[serde(rename = "ChannelID")]
    pub channel_id: ChannelId,
    #[serde(rename = "UserID")]
    pub user_id: UserId,
    pub typing: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct OwnIdentity {
    #[serde(rename = "UserID")]
    pub user_id: UserId,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub picture: String,
    #[serde(default)]
    pub status: UserStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ImageHostAddress {
    pub address: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AckList {
    #[serde(default, deserialize_with = "null_as_default")]
    pub acks: Vec<MessageRef>,
}

/// Every packet the backend can push, decoded at the frame boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    ChatMessage(Message),
    ChatHistory(ChatHistory),
    ChatDelete(MessageRef),
    ChatEdit(MessageEdit),
    ServerAdd(Server),
    ServerList(Vec<Server>),
    ServerDelete(ServerRef),
    Invite(InviteCreated),
    ChannelAdd(Channel),
    ChannelList(ChannelList),
    MemberAdd(Member),
    MemberList(MemberList),
    MemberLeave(MemberLeave),
    DisplayNameChange(DisplayNameChange),
    PictureChange(PictureChange),
    StatusChange(StatusChange),
    Typing(TypingNotice),
    OwnIdentity(OwnIdentity),
    ImageHostAddress(ImageHostAddress),
    UpdateAcks(AckList),
}

impl Packet {
    /// Decode a raw frame into a typed packet.
    pub fn decode(data: &[u8]) -> Result<Self, CodecError> {
        let (ty, value) = decode_frame(data)?;
        Self::from_parts(ty, value)
    }

    pub fn from_parts(ty: u8, value: Value) -> Result<Self, CodecError> {
        let packet_type = PacketType::from_byte(ty).ok_or(CodecError::UnknownType(ty))?;
        let wrap = |source| CodecError::Payload {
            packet_type: ty,
            source,
        };

        let packet = match packet_type {
            PacketType::ChatMessage => Self::ChatMessage(serde_json::from_value(value).map_err(wrap)?),
            PacketType::ChatHistory => Self::ChatHistory(serde_json::from_value(value).map_err(wrap)?),
            PacketType::ChatDelete => Self::ChatDelete(serde_json::from_value(value).map_err(wrap)?),
            PacketType::ChatEdit => Self::ChatEdit(serde_json::from_value(value).map_err(wrap)?),
            PacketType::ServerAdd => Self::ServerAdd(serde_json::from_value(value).map_err(wrap)?),
            PacketType::ServerList => {
                let servers: Option<Vec<Server>> = serde_json::from_value(value).map_err(wrap)?;
                Self::ServerList(servers.unwrap_or_default())
            }
            PacketType::ServerDelete => Self::ServerDelete(serde_json::from_value(value).map_err(wrap)?),
            PacketType::Invite => Self::Invite(serde_json::from_value(value).map_err(wrap)?),
            PacketType::ChannelAdd => Self::ChannelAdd(serde_json::from_value(value).map_err(wrap)?),
            PacketType::ChannelList => Self::ChannelList(serde_json::from_value(value).map_err(wrap)?),
            PacketType::MemberAdd => Self::MemberAdd(serde_json::from_value(value).map_err(wrap)?),
            PacketType::MemberList => Self::MemberList(serde_json::from_value(value).map_err(wrap)?),
            PacketType::MemberLeave => Self::MemberLeave(serde_json::from_value(value).map_err(wrap)?),
            PacketType::DisplayNameChange => {
                Self::DisplayNameChange(serde_json::from_value(value).map_err(wrap)?)
            }
            PacketType::PictureChange => Self::PictureChange(serde_json::from_value(value).map_err(wrap)?),
            PacketType::StatusChange => Self::StatusChange(serde_json::from_value(value).map_err(wrap)?),
            PacketType::Typing => Self::Typing(serde_json::from_value(value).map_err(wrap)?),
            PacketType::OwnIdentity => Self::OwnIdentity(serde_json::from_value(value).map_err(wrap)?),
            PacketType::ImageHostAddress => {
                Self::ImageHostAddress(serde_json::from_value(value).map_err(wrap)?)
            }
            PacketType::UpdateAcks => Self::UpdateAcks(serde_json::from_value(value).map_err(wrap)?),
        };
        Ok(packet)
    }

    pub fn packet_type(&self) -> PacketType {
        match self {
            Self::ChatMessage(_) => PacketType::ChatMessage,
            Self::ChatHistory(_) => PacketType::ChatHistory,
            Self::ChatDelete(_) => PacketType::ChatDelete,
            Self::ChatEdit(_) => PacketType::ChatEdit,
            Self::ServerAdd(_) => PacketType::ServerAdd,
            Self::ServerList(_) => PacketType::ServerList,
            Self::ServerDelete(_) => PacketType::ServerDelete,
            Self::Invite(_) => PacketType::Invite,
            Self::ChannelAdd(_) => PacketType::ChannelAdd,
            Self::ChannelList(_) => PacketType::ChannelList,
            Self::MemberAdd(_) => PacketType::MemberAdd,
            Self::MemberList(_) => PacketType::MemberList,
            Self::MemberLeave(_) => PacketType::MemberLeave,
            Self::DisplayNameChange(_) => PacketType::DisplayNameChange,
            Self::PictureChange(_) => PacketType::PictureChange,
            Self::StatusChange(_) => PacketType::StatusChange,
            Self::Typing(_) => PacketType::Typing,
            Self::OwnIdentity(_) => PacketType::OwnIdentity,
            Self::ImageHostAddress(_) => PacketType::ImageHostAddress,
            Self::UpdateAcks(_) => PacketType::UpdateAcks,
        }
    }

    /// Encode this packet as the backend would send it. Used by test servers.
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        let ty = self.packet_type().as_byte();
        match self {
            Self::ChatMessage(p) => encode_frame(ty, Some(p), ID_FIELDS),
            Self::ChatHistory(p) => encode_frame(ty, Some(p), ID_FIELDS),
            Self::ChatDelete(p) => encode_frame(ty, Some(p), ID_FIELDS),
            Self::ChatEdit(p) => encode_frame(ty, Some(p), ID_FIELDS),
            Self::ServerAdd(p) => encode_frame(ty, Some(p), ID_FIELDS),
            Self::ServerList(p) => encode_frame(ty, Some(p), ID_FIELDS),
            Self::ServerDelete(p) => encode_frame(ty, Some(p), ID_FIELDS),
            Self::Invite(p) => encode_frame(ty, Some(p), ID_FIELDS),
            Self::ChannelAdd(p) => encode_frame(ty, Some(p), ID_FIELDS),
            Self::ChannelList(p) => encode_frame(ty, Some(p), ID_FIELDS),
            Self::MemberAdd(p) => encode_frame(ty, Some(p), ID_FIELDS),
            Self::MemberList(p) => encode_frame(ty, Some(p), ID_FIELDS),
            Self::MemberLeave(p) => encode_frame(ty, Some(p), ID_FIELDS),
            Self::DisplayNameChange(p) => encode_frame(ty, Some(p), ID_FIELDS),
            Self::PictureChange(p) => encode_frame(ty, Some(p), ID_FIELDS),
            Self::StatusChange(p) => encode_frame(ty, Some(p), ID_FIELDS),
            Self::Typing(p) => encode_frame(ty, Some(p), ID_FIELDS),
            Self::OwnIdentity(p) => encode_frame(ty, Some(p), ID_FIELDS),
            Self::ImageHostAddress(p) => encode_frame(ty, Some(p), ID_FIELDS),
            Self::UpdateAcks(p) => encode_frame(ty, Some(p), ID_FIELDS),
        }
    }
}

// ---------------------------------------------------------------------------
// Outbound requests
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SendMessage {
    #[serde(rename = "ChannelID")]
    pub channel_id: ChannelId,
    pub text: String,
    pub reply_to: MessageId,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub attachment_token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct HistoryRequest {
    #[serde(rename = "ChannelID")]
    pub channel_id: ChannelId,
    /// `MessageId::NONE` asks for the most recent page.
    #[serde(rename = "FromMessageID")]
    pub from: MessageId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CreateServer {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CreateChannel {
    #[serde(rename = "ServerID")]
    pub server_id: ServerId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SetDisplayName {
    pub display_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SetStatus {
    pub status: UserStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TypingUpdate {
    #[serde(rename = "ChannelID")]
    pub channel_id: ChannelId,
    pub typing: bool,
}

/// Every request the client can send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    SendMessage(SendMessage),
    History(HistoryRequest),
    DeleteMessage(MessageRef),
    EditMessage(MessageEdit),
    CreateServer(CreateServer),
    ListServers,
    DeleteServer(ServerRef),
    CreateInvite(ServerRef),
    CreateChannel(CreateChannel),
    ListChannels(ServerRef),
    ListMembers(ServerRef),
    SetDisplayName(SetDisplayName),
    SetStatus(SetStatus),
    Typing(TypingUpdate),
    Ack(MessageRef),
}

impl Request {
    pub fn packet_type(&self) -> PacketType {
        match self {
            Self::SendMessage(_) => PacketType::ChatMessage,
            Self::History(_) => PacketType::ChatHistory,
            Self::DeleteMessage(_) => PacketType::ChatDelete,
            Self::EditMessage(_) => PacketType::ChatEdit,
            Self::CreateServer(_) => PacketType::ServerAdd,
            Self::ListServers => PacketType::ServerList,
            Self::DeleteServer(_) => PacketType::ServerDelete,
            Self::CreateInvite(_) => PacketType::Invite,
            Self::CreateChannel(_) => PacketType::ChannelAdd,
            Self::ListChannels(_) => PacketType::ChannelList,
            Self::ListMembers(_) => PacketType::MemberList,
            Self::SetDisplayName(_) => PacketType::DisplayNameChange,
            Self::SetStatus(_) => PacketType::StatusChange,
            Self::Typing(_) => PacketType::Typing,
            Self::Ack(_) => PacketType::UpdateAcks,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        let ty = self.packet_type().as_byte();
        match self {
            Self::SendMessage(p) => encode_frame(ty, Some(p), &["ChannelID", "ReplyTo"]),
            Self::History(p) => encode_frame(ty, Some(p), &["ChannelID", "FromMessageID"]),
            Self::DeleteMessage(p) | Self::Ack(p) => {
                encode_frame(ty, Some(p), &["ChannelID", "MessageID"])
            }
            Self::EditMessage(p) => encode_frame(ty, Some(p), &["ChannelID", "MessageID"]),
            Self::CreateServer(p) => encode_frame(ty, Some(p), &[]),
            Self::ListServers => encode_frame(ty, None::<&Value>, &[]),
            Self::DeleteServer(p) | Self::CreateInvite(p) | Self::ListChannels(p) | Self::ListMembers(p) => {
                encode_frame(ty, Some(p), &["ServerID"])
            }
            Self::CreateChannel(p) => encode_frame(ty, Some(p), &["ServerID"]),
            Self::SetDisplayName(p) => encode_frame(ty, Some(p), &[]),
            Self::SetStatus(p) => encode_frame(ty, Some(p), &[]),
            Self::Typing(p) => encode_frame(ty, Some(p), &["ChannelID"]),
        }
    }

    /// Parse an encoded request back. Used by test servers.
    pub fn decode(data: &[u8]) -> Result<Self, CodecError> {
        let (ty, value) = decode_frame(data)?;
        let packet_type = PacketType::from_byte(ty).ok_or(CodecError::UnknownType(ty))?;
        let wrap = |source| CodecError::Payload {
            packet_type: ty,
            source,
        };

        let request = match packet_type {
            PacketType::ChatMessage => Self::SendMessage(serde_json::from_value(value).map_err(wrap)?),
            PacketType::ChatHistory => Self::History(serde_json::from_value(value).map_err(wrap)?),
            PacketType::ChatDelete => Self::DeleteMessage(serde_json::from_value(value).map_err(wrap)?),
            PacketType::ChatEdit => Self::EditMessage(serde_json::from_value(value).map_err(wrap)?),
            PacketType::ServerAdd => Self::CreateServer(serde_json::from_value(value).map_err(wrap)?),
            PacketType::ServerList => Self::ListServers,
            PacketType::ServerDelete => Self::DeleteServer(serde_json::from_value(value).map_err(wrap)?),
            PacketType::Invite => Self::CreateInvite(serde_json::from_value(value).map_err(wrap)?),
            PacketType::ChannelAdd => Self::CreateChannel(serde_json::from_value(value).map_err(wrap)?),
            PacketType::ChannelList => Self::ListChannels(serde_json::from_value(value).map_err(wrap)?),
            PacketType::MemberList => Self::ListMembers(serde_json::from_value(value).map_err(wrap)?),
            PacketType::DisplayNameChange => {
                Self::SetDisplayName(serde_json::from_value(value).map_err(wrap)?)
            }
            PacketType::StatusChange => Self::SetStatus(serde_json::from_value(value).map_err(wrap)?),
            PacketType::Typing => Self::Typing(serde_json::from_value(value).map_err(wrap)?),
            PacketType::UpdateAcks => Self::Ack(serde_json::from_value(value).map_err(wrap)?),
            PacketType::MemberAdd
            | PacketType::MemberLeave
            | PacketType::PictureChange
            | PacketType::OwnIdentity
            | PacketType::ImageHostAddress => return Err(CodecError::UnknownType(ty)),
        };
        Ok(request)
    }
}
