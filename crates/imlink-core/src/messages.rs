//! Message envelope model for the connector ↔ transfer link.
//!
//! Two sealed families travel over the same connection: the internal
//! protocol message ([`InternalMsg`]), which carries origin and destination
//! modules, and the business messages ([`ChatMsg`], [`AckMsg`]) owned by the
//! messaging service. [`TransferMessage`] is the single wire type.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{ImError, ImResult};

/// Internal protocol version stamped on every message this node builds.
pub const PROTOCOL_VERSION: u32 = 1;

/// Internal message kinds. Numeric tags are the wire representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
#[repr(u8)]
pub enum MsgType {
    Greet = 0x01,
    Ack = 0x02,
    ForceOffline = 0x03,
    Error = 0x04,
}

impl From<MsgType> for u8 {
    fn from(m: MsgType) -> u8 {
        m as u8
    }
}

impl TryFrom<u8> for MsgType {
    type Error = String;
    fn try_from(v: u8) -> Result<Self, String> {
        match v {
            0x01 => Ok(Self::Greet),
            0x02 => Ok(Self::Ack),
            0x03 => Ok(Self::ForceOffline),
            0x04 => Ok(Self::Error),
            _ => Err(format!("unknown internal message type: 0x{v:02x}")),
        }
    }
}

impl fmt::Display for MsgType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MsgType::Greet => "GREET",
            MsgType::Ack => "ACK",
            MsgType::ForceOffline => "FORCE_OFFLINE",
            MsgType::Error => "ERROR",
        };
        f.write_str(name)
    }
}

/// Cluster modules that can originate or receive internal messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Module {
    Connector,
    Transfer,
    Logic,
}

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Module::Connector => "CONNECTOR",
            Module::Transfer => "TRANSFER",
            Module::Logic => "LOGIC",
        };
        f.write_str(name)
    }
}

/// Internal protocol message exchanged between cluster modules.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InternalMsg {
    pub id: u64,
    pub version: u32,
    pub msg_type: MsgType,
    #[serde(default)]
    pub msg_body: String,
    pub from: Module,
    pub dest: Module,
    pub create_time: i64,
}

impl InternalMsg {
    /// Build a message stamped with the current protocol version and wall clock.
    pub fn new(
        id: u64,
        msg_type: MsgType,
        msg_body: impl Into<String>,
        from: Module,
        dest: Module,
    ) -> Self {
        Self {
            id,
            version: PROTOCOL_VERSION,
            msg_type,
            msg_body: msg_body.into(),
            from,
            dest,
            create_time: now_millis(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatType {
    Text,
    File,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DestType {
    Single,
    Group,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AckType {
    Delivered,
    Read,
}

/// A chat payload routed to a user or group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMsg {
    pub id: u64,
    pub version: u32,
    pub from_id: String,
    pub dest_id: String,
    pub create_time: i64,
    pub msg_type: ChatType,
    pub dest_type: DestType,
    #[serde(default)]
    pub token: String,
    #[serde(with = "serde_bytes")]
    pub msg_body: Vec<u8>,
}

/// Delivery or read acknowledgement for a previously sent chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AckMsg {
    pub id: u64,
    pub version: u32,
    pub from_id: String,
    pub dest_id: String,
    pub create_time: i64,
    pub msg_type: AckType,
    pub dest_type: DestType,
    pub ack_msg_id: u64,
}

/// Everything that can travel over a connector ↔ transfer connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferMessage {
    Internal(InternalMsg),
    Chat(ChatMsg),
    Ack(AckMsg),
}

/// Variant tag of a [`TransferMessage`], used as the outer dispatch key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageClass {
    Internal,
    Chat,
    Ack,
}

impl fmt::Display for MessageClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MessageClass::Internal => "InternalMsg",
            MessageClass::Chat => "ChatMsg",
            MessageClass::Ack => "AckMsg",
        };
        f.write_str(name)
    }
}

impl TransferMessage {
    pub fn class(&self) -> MessageClass {
        match self {
            TransferMessage::Internal(_) => MessageClass::Internal,
            TransferMessage::Chat(_) => MessageClass::Chat,
            TransferMessage::Ack(_) => MessageClass::Ack,
        }
    }

    /// Sequence id carried by the message, whatever its family.
    pub fn id(&self) -> u64 {
        match self {
            TransferMessage::Internal(m) => m.id,
            TransferMessage::Chat(m) => m.id,
            TransferMessage::Ack(m) => m.id,
        }
    }
}

impl From<InternalMsg> for TransferMessage {
    fn from(m: InternalMsg) -> Self {
        TransferMessage::Internal(m)
    }
}

impl From<ChatMsg> for TransferMessage {
    fn from(m: ChatMsg) -> Self {
        TransferMessage::Chat(m)
    }
}

impl From<AckMsg> for TransferMessage {
    fn from(m: AckMsg) -> Self {
        TransferMessage::Ack(m)
    }
}

/// Fail unless an internal message originates from `expected`.
///
/// Business messages carry no module fields and always pass.
pub fn check_from(msg: &TransferMessage, expected: Module) -> ImResult<()> {
    match msg {
        TransferMessage::Internal(m) if m.from != expected => {
            Err(ImError::ProtocolViolation(format!(
                "expected msg from {expected}, but received msg from {} (id {}, type {})",
                m.from, m.id, m.msg_type
            )))
        }
        _ => Ok(()),
    }
}

/// Fail unless an internal message is addressed to `expected`.
pub fn check_dest(msg: &TransferMessage, expected: Module) -> ImResult<()> {
    match msg {
        TransferMessage::Internal(m) if m.dest != expected => {
            Err(ImError::ProtocolViolation(format!(
                "expected msg dest {expected}, but received msg dest {} (id {}, type {})",
                m.dest, m.id, m.msg_type
            )))
        }
        _ => Ok(()),
    }
}

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
