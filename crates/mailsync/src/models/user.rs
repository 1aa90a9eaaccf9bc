//! User model holding the mailbox owner and their access credential

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Opaque user identifier, also the job identity key
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh random identifier
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for UserId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Bearer access token plus its expiration
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessToken {
    pub value: String,
    pub expiration: DateTime<Utc>,
}

impl AccessToken {
    pub fn new(value: impl Into<String>, expiration: DateTime<Utc>) -> Self {
        Self {
            value: value.into(),
            expiration,
        }
    }

    /// Build a token from an `exp` claim (seconds since the Unix epoch)
    pub fn from_unix_expiry(value: impl Into<String>, exp_secs: i64) -> Option<Self> {
        let expiration = Utc.timestamp_opt(exp_secs, 0).single()?;
        Some(Self::new(value, expiration))
    }

    /// A token is expired once its expiration lies strictly before `now`
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expiration < now
    }
}

// Keeps bearer tokens out of logs.
impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessToken")
            .field("value", &"<redacted>")
            .field("expiration", &self.expiration)
            .finish()
    }
}

/// A mailbox owner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    /// Unique identifier (job identity key)
    pub id: UserId,
    /// Unique username, stored lowercased
    pub username: String,
    /// Display name
    pub name: String,
    /// Current access credential
    pub access_token: AccessToken,
    /// When the user was first authorized
    pub created_at: DateTime<Utc>,
    /// When the credential was last replaced
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// Create a new user with a generated id
    pub fn new(username: &str, name: impl Into<String>, access_token: AccessToken) -> Self {
        let now = Utc::now();
        Self {
            id: UserId::generate(),
            username: normalize_username(username),
            name: name.into(),
            access_token,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Usernames are compared case-insensitively by storing them lowercased
pub fn normalize_username(username: &str) -> String {
    username.trim().to_lowercase()
}
