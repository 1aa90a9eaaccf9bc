//! Message model representing a synced mailbox message

use super::UserId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Provider-assigned unique identifier for a message
///
/// Globally unique across the message store; the store enforces this.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub String);

impl MessageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for MessageId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for MessageId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// An email address with its display name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailAddress {
    /// Display name (e.g., "John Doe"), may be empty
    pub name: String,
    /// Email address (e.g., "john@example.com")
    pub address: String,
}

impl EmailAddress {
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
        }
    }

    /// Format the email address for display
    pub fn display(&self) -> String {
        if self.name.is_empty() {
            self.address.clone()
        } else {
            format!("{} <{}>", self.name, self.address)
        }
    }
}

/// Message body with its content type as reported by the provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageBody {
    pub content: String,
    /// Provider content type, e.g. "html" or "text"
    pub content_type: String,
}

impl MessageBody {
    pub fn new(content: impl Into<String>, content_type: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            content_type: content_type.into(),
        }
    }
}

/// A canonical message record
///
/// Immutable once stored: re-syncing the same id is a no-op.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Provider message ID
    pub id: MessageId,
    /// Owning user
    pub user_id: UserId,
    /// When the message was received
    pub received_at: DateTime<Utc>,
    /// Subject line
    pub subject: String,
    /// Plain text preview of the body
    pub body_preview: String,
    /// Full body
    pub body: MessageBody,
    /// Whether the message has been read in the provider mailbox
    pub is_read: bool,
    /// Sender's address
    pub sender: EmailAddress,
    /// Recipients (To field), in provider order
    pub to_recipients: Vec<EmailAddress>,
}

impl Message {
    /// Create a new message builder
    pub fn builder(id: MessageId, user_id: UserId) -> MessageBuilder {
        MessageBuilder::new(id, user_id)
    }
}

/// Builder for creating Message instances
pub struct MessageBuilder {
    id: MessageId,
    user_id: UserId,
    received_at: Option<DateTime<Utc>>,
    subject: String,
    body_preview: String,
    body: Option<MessageBody>,
    is_read: bool,
    sender: Option<EmailAddress>,
    to_recipients: Vec<EmailAddress>,
}

impl MessageBuilder {
    fn new(id: MessageId, user_id: UserId) -> Self {
        Self {
            id,
            user_id,
            received_at: None,
            subject: String::new(),
            body_preview: String::new(),
            body: None,
            is_read: false,
            sender: None,
            to_recipients: Vec::new(),
        }
    }

    pub fn received_at(mut self, received_at: DateTime<Utc>) -> Self {
        self.received_at = Some(received_at);
        self
    }

    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = subject.into();
        self
    }

    pub fn body_preview(mut self, body_preview: impl Into<String>) -> Self {
        self.body_preview = body_preview.into();
        self
    }

    pub fn body(mut self, body: MessageBody) -> Self {
        self.body = Some(body);
        self
    }

    pub fn is_read(mut self, is_read: bool) -> Self {
        self.is_read = is_read;
        self
    }

    pub fn sender(mut self, sender: EmailAddress) -> Self {
        self.sender = Some(sender);
        self
    }

    pub fn to_recipients(mut self, to_recipients: Vec<EmailAddress>) -> Self {
        self.to_recipients = to_recipients;
        self
    }

    pub fn build(self) -> Message {
        Message {
            id: self.id,
            user_id: self.user_id,
            received_at: self.received_at.unwrap_or_else(Utc::now),
            subject: self.subject,
            body_preview: self.body_preview,
            body: self.body.unwrap_or_else(|| MessageBody::new("", "text")),
            is_read: self.is_read,
            sender: self
                .sender
                .unwrap_or_else(|| EmailAddress::new("", "unknown@unknown.com")),
            to_recipients: self.to_recipients,
        }
    }
}
