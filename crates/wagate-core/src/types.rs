//! Domain types shared by the store, the session layer, and the HTTP API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::WagateError;

/// A WhatsApp account (one linked-device session).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub name: String,
    pub phone: Option<String>,
    pub status: AccountStatus,
    pub last_connected_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Persisted lifecycle state of an account's session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountStatus {
    #[default]
    Disconnected,
    Connecting,
    QrPending,
    Connected,
    LoggedOut,
}

impl AccountStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::QrPending => "qr_pending",
            Self::Connected => "connected",
            Self::LoggedOut => "logged_out",
        }
    }
}

impl fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccountStatus {
    type Err = WagateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "disconnected" => Ok(Self::Disconnected),
            "connecting" => Ok(Self::Connecting),
            "qr_pending" => Ok(Self::QrPending),
            "connected" => Ok(Self::Connected),
            "logged_out" => Ok(Self::LoggedOut),
            other => Err(WagateError::Store(format!("unknown account status '{other}'"))),
        }
    }
}

/// An entry in the contact list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contact {
    pub id: String,
    pub name: String,
    pub phone: String,
    pub email: Option<String>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A reusable message body with `{{placeholder}}` variables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
    pub id: String,
    pub name: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// What kind of payload a message carried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Text,
    Image,
    Video,
    Audio,
    Document,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
            Self::Video => "video",
            Self::Audio => "audio",
            Self::Document => "document",
        }
    }

    /// Pick the media kind for a MIME type. Anything unrecognized is sent as a document.
    pub fn from_mime(mime: &str) -> Self {
        match mime.split('/').next().unwrap_or_default() {
            "image" => Self::Image,
            "video" => Self::Video,
            "audio" => Self::Audio,
            _ => Self::Document,
        }
    }
}

impl FromStr for MessageKind {
    type Err = WagateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(Self::Text),
            "image" => Ok(Self::Image),
            "video" => Ok(Self::Video),
            "audio" => Ok(Self::Audio),
            "document" => Ok(Self::Document),
            other => Err(WagateError::Store(format!("unknown message kind '{other}'"))),
        }
    }
}

/// Outcome of one delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Sent,
    Failed,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sent => "sent",
            Self::Failed => "failed",
        }
    }
}

impl FromStr for MessageStatus {
    type Err = WagateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sent" => Ok(Self::Sent),
            "failed" => Ok(Self::Failed),
            other => Err(WagateError::Store(format!("unknown message status '{other}'"))),
        }
    }
}

/// A row of the outgoing message log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub id: String,
    pub account_id: String,
    pub recipient: String,
    pub kind: MessageKind,
    pub body: String,
    pub media_name: Option<String>,
    pub status: MessageStatus,
    pub wa_message_id: Option<String>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A message to be written to the log.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub account_id: String,
    pub recipient: String,
    pub kind: MessageKind,
    pub body: String,
    pub media_name: Option<String>,
    pub status: MessageStatus,
    pub wa_message_id: Option<String>,
    pub error: Option<String>,
}

/// A media file ready to be uploaded and sent.
#[derive(Debug, Clone)]
pub struct MediaPayload {
    pub kind: MessageKind,
    pub mime_type: String,
    pub file_name: String,
    pub caption: Option<String>,
    pub data: Vec<u8>,
}

/// Lifecycle notification emitted by a running session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionEvent {
    pub account_id: String,
    pub kind: SessionEventKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEventKind {
    Connecting,
    /// A fresh pairing QR payload (rotates periodically until scanned).
    QrCode(String),
    Paired,
    Connected,
    Disconnected,
    LoggedOut,
}

impl SessionEventKind {
    /// The account status this event moves the account into.
    pub fn status(&self) -> AccountStatus {
        match self {
            Self::Connecting => AccountStatus::Connecting,
            Self::QrCode(_) => AccountStatus::QrPending,
            Self::Paired | Self::Connected => AccountStatus::Connected,
            Self::Disconnected => AccountStatus::Disconnected,
            Self::LoggedOut => AccountStatus::LoggedOut,
        }
    }
}

/// Per-recipient outcome of a bulk send.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryResult {
    pub recipient: String,
    pub status: MessageStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
