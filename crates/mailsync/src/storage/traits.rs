//! Storage trait definitions

use crate::models::{Message, MessageId, User, UserId};
use anyhow::Result;

/// Result of [`UserStore::upsert_user`]
#[derive(Debug, Clone)]
pub struct UserUpsert {
    /// The user as stored
    pub user: User,
    /// True when no user with this username existed before
    pub created: bool,
}

/// Persistence for mailbox owners
///
/// Usernames are unique; that constraint is the only coordination between
/// concurrent authorizations.
pub trait UserStore: Send + Sync {
    /// Get a user by id
    fn find_user(&self, id: &UserId) -> Result<Option<User>>;

    /// Get a user by (lowercased) username
    fn find_user_by_username(&self, username: &str) -> Result<Option<User>>;

    /// Insert a user, or replace the name and credential of the user with
    /// the same username. An existing user keeps its id and `created_at`.
    fn upsert_user(&self, user: User) -> Result<UserUpsert>;
}

/// Persistence for synced messages
///
/// Message ids are unique across the store and stored messages are never
/// updated.
pub trait MessageStore: Send + Sync {
    /// Insert a batch, skipping any message whose id is already stored
    /// (including repeats within the batch). A duplicate never aborts the
    /// rest of the batch.
    ///
    /// Returns the number of messages actually inserted.
    fn insert_messages(&self, messages: &[Message]) -> Result<usize>;

    /// Get a message by id
    fn get_message(&self, id: &MessageId) -> Result<Option<Message>>;

    /// Check if a message exists
    fn has_message(&self, id: &MessageId) -> Result<bool>;

    /// List a user's messages, ordered by received_at descending
    fn list_messages_for_user(
        &self,
        user_id: &UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Message>>;

    /// Count a user's messages
    fn count_messages_for_user(&self, user_id: &UserId) -> Result<usize>;

    /// Count all messages
    fn count_messages(&self) -> Result<usize>;
}
