//! Page fetching contract between the sync cursor and a mail provider

use crate::error::SyncError;
use crate::models::{Message, UserId};

/// Opaque continuation token identifying the next page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cursor(String);

impl Cursor {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// One page of normalized messages
#[derive(Debug, Clone, Default)]
pub struct Page {
    pub messages: Vec<Message>,
    /// `None` once the provider reports no further pages
    pub next: Option<Cursor>,
}

/// Performs a single paginated call against the mail provider
///
/// Implementations do not retry; retry policy belongs to the job queue.
pub trait PageFetcher: Send + Sync {
    /// Fetch one page of `owner`'s mailbox
    ///
    /// # Arguments
    /// * `owner` - User the normalized messages are attributed to
    /// * `cursor` - `None` for the first page, otherwise the previous page's cursor
    /// * `access_token` - Bearer credential
    fn fetch(
        &self,
        owner: &UserId,
        cursor: Option<&Cursor>,
        access_token: &str,
    ) -> Result<Page, SyncError>;
}
