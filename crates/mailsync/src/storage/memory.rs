//! In-memory storage implementation
//!
//! Used by tests and by callers that do not need persistence.

use anyhow::{Result, anyhow};
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use super::{MessageStore, UserStore, UserUpsert};
use crate::models::{Message, MessageId, User, UserId};

/// In-memory implementation of the user and message stores
///
/// Uses HashMaps protected by RwLocks for thread-safe access. Users are keyed
/// by username, which enforces username uniqueness.
pub struct InMemoryMailStore {
    users: RwLock<HashMap<String, User>>,
    messages: RwLock<HashMap<String, Message>>,
}

impl InMemoryMailStore {
    /// Create a new empty in-memory store
    pub fn new() -> Self {
        Self {
            users: RwLock::new(HashMap::new()),
            messages: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryMailStore {
    fn default() -> Self {
        Self::new()
    }
}

fn poisoned<T>(_: PoisonError<T>) -> anyhow::Error {
    anyhow!("In-memory store lock poisoned")
}

impl UserStore for InMemoryMailStore {
    fn find_user(&self, id: &UserId) -> Result<Option<User>> {
        let users = self.users.read().map_err(poisoned)?;
        Ok(users.values().find(|u| &u.id == id).cloned())
    }

    fn find_user_by_username(&self, username: &str) -> Result<Option<User>> {
        let users = self.users.read().map_err(poisoned)?;
        Ok(users.get(username).cloned())
    }

    fn upsert_user(&self, user: User) -> Result<UserUpsert> {
        let mut users = self.users.write().map_err(poisoned)?;

        if let Some(existing) = users.get_mut(&user.username) {
            existing.name = user.name;
            existing.access_token = user.access_token;
            existing.updated_at = user.updated_at;
            return Ok(UserUpsert {
                user: existing.clone(),
                created: false,
            });
        }

        users.insert(user.username.clone(), user.clone());
        Ok(UserUpsert {
            user,
            created: true,
        })
    }
}

impl MessageStore for InMemoryMailStore {
    fn insert_messages(&self, messages: &[Message]) -> Result<usize> {
        let mut stored = self.messages.write().map_err(poisoned)?;
        let mut inserted = 0;

        for message in messages {
            if stored.contains_key(message.id.as_str()) {
                continue;
            }
            stored.insert(message.id.0.clone(), message.clone());
            inserted += 1;
        }

        Ok(inserted)
    }

    fn get_message(&self, id: &MessageId) -> Result<Option<Message>> {
        let messages = self.messages.read().map_err(poisoned)?;
        Ok(messages.get(id.as_str()).cloned())
    }

    fn has_message(&self, id: &MessageId) -> Result<bool> {
        let messages = self.messages.read().map_err(poisoned)?;
        Ok(messages.contains_key(id.as_str()))
    }

    fn list_messages_for_user(
        &self,
        user_id: &UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Message>> {
        let messages = self.messages.read().map_err(poisoned)?;
        let mut owned: Vec<Message> = messages
            .values()
            .filter(|m| &m.user_id == user_id)
            .cloned()
            .collect();

        // Newest first, id as a stable tie-breaker
        owned.sort_by(|a, b| {
            b.received_at
                .cmp(&a.received_at)
                .then_with(|| a.id.0.cmp(&b.id.0))
        });

        Ok(owned.into_iter().skip(offset).take(limit).collect())
    }

    fn count_messages_for_user(&self, user_id: &UserId) -> Result<usize> {
        let messages = self.messages.read().map_err(poisoned)?;
        Ok(messages.values().filter(|m| &m.user_id == user_id).count())
    }

    fn count_messages(&self) -> Result<usize> {
        let messages = self.messages.read().map_err(poisoned)?;
        Ok(messages.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AccessToken;
    use chrono::{Duration, Utc};

    fn make_message(id: &str, user: &str, age_hours: i64) -> Message {
        Message::builder(MessageId::new(id), UserId::new(user))
            .subject(format!("Subject {}", id))
            .received_at(Utc::now() - Duration::hours(age_hours))
            .build()
    }

    fn make_user(username: &str, token: &str) -> User {
        User::new(
            username,
            "Test User",
            AccessToken::new(token, Utc::now() + Duration::hours(1)),
        )
    }

    #[test]
    fn test_insert_skips_duplicates() {
        let store = InMemoryMailStore::new();

        let inserted = store
            .insert_messages(&[make_message("m1", "u1", 1), make_message("m2", "u1", 2)])
            .unwrap();
        assert_eq!(inserted, 2);

        // m2 already stored, m3 new, m3 repeated within the batch
        let inserted = store
            .insert_messages(&[
                make_message("m2", "u1", 2),
                make_message("m3", "u1", 3),
                make_message("m3", "u1", 3),
            ])
            .unwrap();
        assert_eq!(inserted, 1);
        assert_eq!(store.count_messages().unwrap(), 3);
    }

    #[test]
    fn test_duplicate_does_not_overwrite() {
        let store = InMemoryMailStore::new();
        store.insert_messages(&[make_message("m1", "u1", 1)]).unwrap();

        let mut changed = make_message("m1", "u1", 1);
        changed.subject = "Edited".to_string();
        store.insert_messages(&[changed]).unwrap();

        let stored = store.get_message(&MessageId::new("m1")).unwrap().unwrap();
        assert_eq!(stored.subject, "Subject m1");
    }

    #[test]
    fn test_list_messages_for_user_newest_first() {
        let store = InMemoryMailStore::new();
        store
            .insert_messages(&[
                make_message("old", "u1", 10),
                make_message("new", "u1", 1),
                make_message("mid", "u1", 5),
                make_message("other", "u2", 0),
            ])
            .unwrap();

        let listed = store
            .list_messages_for_user(&UserId::new("u1"), 10, 0)
            .unwrap();
        let ids: Vec<&str> = listed.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["new", "mid", "old"]);

        let page = store
            .list_messages_for_user(&UserId::new("u1"), 1, 1)
            .unwrap();
        assert_eq!(page[0].id.as_str(), "mid");
        assert_eq!(store.count_messages_for_user(&UserId::new("u1")).unwrap(), 3);
    }

    #[test]
    fn test_upsert_user_by_username() {
        let store = InMemoryMailStore::new();

        let first = store.upsert_user(make_user("alice@example.com", "t1")).unwrap();
        assert!(first.created);

        let second = store.upsert_user(make_user("alice@example.com", "t2")).unwrap();
        assert!(!second.created);
        assert_eq!(second.user.id, first.user.id);
        assert_eq!(second.user.access_token.value, "t2");

        let found = store.find_user(&first.user.id).unwrap().unwrap();
        assert_eq!(found.access_token.value, "t2");
        assert!(store
            .find_user_by_username("alice@example.com")
            .unwrap()
            .is_some());
        assert!(store.find_user(&UserId::new("missing")).unwrap().is_none());
    }
}
