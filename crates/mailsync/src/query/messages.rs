//! Message query functions

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{EmailAddress, Message, MessageId, UserId};
use crate::storage::MessageStore;

/// Messages shown per inbox page
pub const DEFAULT_INBOX_PAGE_SIZE: usize = 9;

/// Summary information for displaying a message in a list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageSummary {
    pub id: MessageId,
    pub received_at: DateTime<Utc>,
    pub subject: String,
    /// Plain text preview
    pub body_preview: String,
    pub is_read: bool,
    pub sender: EmailAddress,
    pub recipient_count: usize,
}

impl From<Message> for MessageSummary {
    fn from(message: Message) -> Self {
        Self {
            id: message.id,
            received_at: message.received_at,
            subject: message.subject,
            body_preview: message.body_preview,
            is_read: message.is_read,
            sender: message.sender,
            recipient_count: message.to_recipients.len(),
        }
    }
}

/// One page of a user's inbox
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboxPage {
    /// Zero-based page number
    pub page: usize,
    pub messages: Vec<MessageSummary>,
    pub has_next: bool,
    pub next_page: usize,
    pub previous_page: usize,
}

/// List a user's messages with pagination
///
/// Returns messages sorted by received_at descending (newest first).
///
/// # Arguments
/// * `store` - The storage backend
/// * `user_id` - Owner of the messages
/// * `limit` - Maximum number of messages to return
/// * `offset` - Number of messages to skip
pub fn list_messages(
    store: &dyn MessageStore,
    user_id: &UserId,
    limit: usize,
    offset: usize,
) -> Result<Vec<MessageSummary>> {
    let messages = store.list_messages_for_user(user_id, limit, offset)?;
    Ok(messages.into_iter().map(MessageSummary::from).collect())
}

/// Get a zero-based page of a user's inbox
///
/// A page size of zero falls back to [`DEFAULT_INBOX_PAGE_SIZE`].
pub fn inbox_page(
    store: &dyn MessageStore,
    user_id: &UserId,
    page: usize,
    page_size: usize,
) -> Result<InboxPage> {
    let page_size = if page_size == 0 {
        DEFAULT_INBOX_PAGE_SIZE
    } else {
        page_size
    };
    let offset = page.saturating_mul(page_size);

    // One extra row tells us whether a next page exists
    let mut messages = list_messages(store, user_id, page_size.saturating_add(1), offset)?;
    let has_next = messages.len() > page_size;
    messages.truncate(page_size);

    Ok(InboxPage {
        page,
        messages,
        has_next,
        next_page: page.saturating_add(1),
        previous_page: page.saturating_sub(1),
    })
}
