//! Query API for UI consumption
//!
//! Provides read-only views over stored messages.

mod messages;

pub use messages::{
    DEFAULT_INBOX_PAGE_SIZE, InboxPage, MessageSummary, inbox_page, list_messages,
};
