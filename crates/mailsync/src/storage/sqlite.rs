//! SQLite-based storage for users and synced messages

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, SecondsFormat, Utc};
use log::debug;
use rusqlite::{Connection, OptionalExtension, params};
use rusqlite_migration::{M, Migrations};

use super::traits::{MessageStore, UserStore, UserUpsert};
use crate::models::{AccessToken, EmailAddress, Message, MessageBody, MessageId, User, UserId};

/// Database migrations
///
/// Each migration is applied in order. The user_version pragma tracks which
/// migrations have been applied.
fn migrations() -> Migrations<'static> {
    Migrations::new(vec![
        // Migration 1: Initial schema
        M::up(
            r#"
            -- Mailbox owners, one row per username
            CREATE TABLE users (
                id TEXT PRIMARY KEY,
                username TEXT NOT NULL UNIQUE,
                name TEXT NOT NULL,
                access_token TEXT NOT NULL,
                token_expires_at TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            -- Synced messages with zstd-compressed bodies.
            -- No foreign key to users: orphans are acceptable.
            CREATE TABLE messages (
                mail_id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                received_at TEXT NOT NULL,
                subject TEXT NOT NULL,
                body_preview TEXT NOT NULL,
                body_content BLOB NOT NULL,  -- zstd compressed
                body_content_type TEXT NOT NULL,
                is_read INTEGER NOT NULL,
                sender_name TEXT NOT NULL,
                sender_address TEXT NOT NULL
            );

            CREATE INDEX idx_messages_user_received
                ON messages(user_id, received_at DESC);

            -- To recipients, in provider order
            CREATE TABLE message_recipients (
                mail_id TEXT NOT NULL,
                position INTEGER NOT NULL,
                name TEXT NOT NULL,
                address TEXT NOT NULL,
                PRIMARY KEY (mail_id, position),
                FOREIGN KEY (mail_id) REFERENCES messages(mail_id) ON DELETE CASCADE
            );
            "#,
        ),
    ])
}

/// Message row before recipients are attached and the body is decompressed
struct MessageRow {
    mail_id: String,
    user_id: String,
    received_at: String,
    subject: String,
    body_preview: String,
    body_content: Vec<u8>,
    body_content_type: String,
    is_read: bool,
    sender_name: String,
    sender_address: String,
}

const MESSAGE_COLUMNS: &str = "mail_id, user_id, received_at, subject, body_preview,
     body_content, body_content_type, is_read, sender_name, sender_address";

const USER_COLUMNS: &str =
    "id, username, name, access_token, token_expires_at, created_at, updated_at";

/// SQLite-based mail storage
pub struct SqliteMailStore {
    conn: Mutex<Connection>,
}

impl SqliteMailStore {
    /// Open (or create) the database at `db_path` and run migrations
    pub fn new(db_path: impl AsRef<Path>) -> Result<Self> {
        let mut conn = Connection::open(db_path.as_ref())
            .with_context(|| format!("Failed to open database at {:?}", db_path.as_ref()))?;

        // WAL lets the read path query while a sync is writing.
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
            PRAGMA foreign_keys = ON;
            "#,
        )?;

        migrations()
            .to_latest(&mut conn)
            .context("Failed to run database migrations")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("SQLite connection mutex poisoned"))
    }

    fn load_user(conn: &Connection, column: &str, value: &str) -> Result<Option<User>> {
        let row: Option<(String, String, String, String, String, String, String)> = conn
            .query_row(
                &format!("SELECT {} FROM users WHERE {} = ?", USER_COLUMNS, column),
                [value],
                |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                        row.get(5)?,
                        row.get(6)?,
                    ))
                },
            )
            .optional()?;

        let Some((id, username, name, token, expires_at, created_at, updated_at)) = row else {
            return Ok(None);
        };

        Ok(Some(User {
            id: UserId::new(id),
            username,
            name,
            access_token: AccessToken::new(token, parse_timestamp(&expires_at)?),
            created_at: parse_timestamp(&created_at)?,
            updated_at: parse_timestamp(&updated_at)?,
        }))
    }

    fn read_message_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<MessageRow> {
        Ok(MessageRow {
            mail_id: row.get(0)?,
            user_id: row.get(1)?,
            received_at: row.get(2)?,
            subject: row.get(3)?,
            body_preview: row.get(4)?,
            body_content: row.get(5)?,
            body_content_type: row.get(6)?,
            is_read: row.get(7)?,
            sender_name: row.get(8)?,
            sender_address: row.get(9)?,
        })
    }

    /// Load recipients for a message
    fn load_recipients(conn: &Connection, mail_id: &str) -> Result<Vec<EmailAddress>> {
        let mut stmt = conn.prepare(
            "SELECT name, address FROM message_recipients
             WHERE mail_id = ?
             ORDER BY position",
        )?;

        let recipients = stmt
            .query_map([mail_id], |row| {
                Ok(EmailAddress {
                    name: row.get(0)?,
                    address: row.get(1)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(recipients)
    }

    fn hydrate(conn: &Connection, row: MessageRow) -> Result<Message> {
        let content = zstd::decode_all(row.body_content.as_slice())
            .with_context(|| format!("Failed to decompress body of {}", row.mail_id))?;
        let content = String::from_utf8(content)
            .with_context(|| format!("Body of {} is not valid UTF-8", row.mail_id))?;
        let to_recipients = Self::load_recipients(conn, &row.mail_id)?;

        Ok(Message {
            received_at: parse_timestamp(&row.received_at)?,
            id: MessageId::new(row.mail_id),
            user_id: UserId::new(row.user_id),
            subject: row.subject,
            body_preview: row.body_preview,
            body: MessageBody::new(content, row.body_content_type),
            is_read: row.is_read,
            sender: EmailAddress::new(row.sender_name, row.sender_address),
            to_recipients,
        })
    }
}

/// Fixed-width UTC timestamps so text ordering matches time ordering
fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("Invalid timestamp in database: {}", s))
}

impl UserStore for SqliteMailStore {
    fn find_user(&self, id: &UserId) -> Result<Option<User>> {
        let conn = self.conn()?;
        Self::load_user(&conn, "id", id.as_str())
    }

    fn find_user_by_username(&self, username: &str) -> Result<Option<User>> {
        let conn = self.conn()?;
        Self::load_user(&conn, "username", username)
    }

    fn upsert_user(&self, user: User) -> Result<UserUpsert> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let existing: Option<String> = tx
            .query_row(
                "SELECT id FROM users WHERE username = ?",
                [&user.username],
                |row| row.get(0),
            )
            .optional()?;

        let created = existing.is_none();
        let id = match existing {
            Some(id) => {
                tx.execute(
                    "UPDATE users
                     SET name = ?, access_token = ?, token_expires_at = ?, updated_at = ?
                     WHERE id = ?",
                    params![
                        user.name,
                        user.access_token.value,
                        format_timestamp(&user.access_token.expiration),
                        format_timestamp(&user.updated_at),
                        id,
                    ],
                )?;
                id
            }
            None => {
                tx.execute(
                    &format!("INSERT INTO users ({}) VALUES (?, ?, ?, ?, ?, ?, ?)", USER_COLUMNS),
                    params![
                        user.id.as_str(),
                        user.username,
                        user.name,
                        user.access_token.value,
                        format_timestamp(&user.access_token.expiration),
                        format_timestamp(&user.created_at),
                        format_timestamp(&user.updated_at),
                    ],
                )?;
                user.id.0.clone()
            }
        };

        let stored = Self::load_user(&tx, "id", &id)?
            .context("User vanished during upsert")?;
        tx.commit()?;

        Ok(UserUpsert {
            user: stored,
            created,
        })
    }
}

impl MessageStore for SqliteMailStore {
    fn insert_messages(&self, messages: &[Message]) -> Result<usize> {
        // Compress bodies before taking the lock (level 3 = good balance of speed vs compression)
        let bodies = messages
            .iter()
            .map(|m| zstd::encode_all(m.body.content.as_bytes(), 3))
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to compress message body")?;

        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let mut inserted = 0;

        {
            let mut insert_message = tx.prepare(&format!(
                "INSERT INTO messages ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT(mail_id) DO NOTHING",
                MESSAGE_COLUMNS
            ))?;
            let mut insert_recipient = tx.prepare(
                "INSERT INTO message_recipients (mail_id, position, name, address)
                 VALUES (?, ?, ?, ?)",
            )?;

            for (message, body) in messages.iter().zip(bodies) {
                let changed = insert_message.execute(params![
                    message.id.as_str(),
                    message.user_id.as_str(),
                    format_timestamp(&message.received_at),
                    message.subject,
                    message.body_preview,
                    body,
                    message.body.content_type,
                    message.is_read,
                    message.sender.name,
                    message.sender.address,
                ])?;

                if changed == 0 {
                    debug!("Skipping duplicate message {}", message.id);
                    continue;
                }
                inserted += 1;

                for (i, recipient) in message.to_recipients.iter().enumerate() {
                    insert_recipient.execute(params![
                        message.id.as_str(),
                        i as i64,
                        recipient.name,
                        recipient.address,
                    ])?;
                }
            }
        }

        tx.commit()?;
        Ok(inserted)
    }

    fn get_message(&self, id: &MessageId) -> Result<Option<Message>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                &format!("SELECT {} FROM messages WHERE mail_id = ?", MESSAGE_COLUMNS),
                [id.as_str()],
                Self::read_message_row,
            )
            .optional()?;

        row.map(|row| Self::hydrate(&conn, row)).transpose()
    }

    fn has_message(&self, id: &MessageId) -> Result<bool> {
        let conn = self.conn()?;
        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM messages WHERE mail_id = ?)",
            [id.as_str()],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    fn list_messages_for_user(
        &self,
        user_id: &UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Message>> {
        let conn = self.conn()?;
        let rows = {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM messages
                 WHERE user_id = ?
                 ORDER BY received_at DESC, mail_id ASC
                 LIMIT ? OFFSET ?",
                MESSAGE_COLUMNS
            ))?;
            let rows = stmt
                .query_map(
                    params![
                        user_id.as_str(),
                        i64::try_from(limit).unwrap_or(i64::MAX),
                        i64::try_from(offset).unwrap_or(i64::MAX)
                    ],
                    Self::read_message_row,
                )?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        };

        rows.into_iter()
            .map(|row| Self::hydrate(&conn, row))
            .collect()
    }

    fn count_messages_for_user(&self, user_id: &UserId) -> Result<usize> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM messages WHERE user_id = ?",
            [user_id.as_str()],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    fn count_messages(&self) -> Result<usize> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM messages", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tempfile::TempDir;

    fn create_test_store() -> (SqliteMailStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = SqliteMailStore::new(temp_dir.path().join("test.db")).unwrap();
        (store, temp_dir)
    }

    fn make_test_message(id: &str, user: &str, age_hours: i64) -> Message {
        Message::builder(MessageId::new(id), UserId::new(user))
            .subject(format!("Subject {}", id))
            .body_preview("Preview")
            .body(MessageBody::new(format!("<p>Body of {}</p>", id), "html"))
            .is_read(true)
            .sender(EmailAddress::new("Sender", "sender@example.com"))
            .to_recipients(vec![
                EmailAddress::new("First", "first@example.com"),
                EmailAddress::new("", "second@example.com"),
            ])
            .received_at(Utc::now() - Duration::hours(age_hours))
            .build()
    }

    fn make_test_user(username: &str, token: &str) -> User {
        User::new(
            username,
            "Test User",
            AccessToken::new(token, Utc::now() + Duration::hours(1)),
        )
    }

    #[test]
    fn test_message_round_trip() {
        let (store, _dir) = create_test_store();
        let message = make_test_message("m1", "u1", 1);

        assert_eq!(store.insert_messages(&[message.clone()]).unwrap(), 1);
        assert!(store.has_message(&MessageId::new("m1")).unwrap());

        let loaded = store.get_message(&MessageId::new("m1")).unwrap().unwrap();
        assert_eq!(loaded.body.content, "<p>Body of m1</p>");
        assert_eq!(loaded.body.content_type, "html");
        assert!(loaded.is_read);
        assert_eq!(loaded.sender, message.sender);
        assert_eq!(loaded.to_recipients, message.to_recipients);
        assert_eq!(
            loaded.received_at.timestamp_millis(),
            message.received_at.timestamp_millis()
        );
    }

    #[test]
    fn test_insert_skips_duplicates_without_aborting() {
        let (store, _dir) = create_test_store();
        store
            .insert_messages(&[make_test_message("m1", "u1", 1)])
            .unwrap();

        let inserted = store
            .insert_messages(&[
                make_test_message("m1", "u1", 1),
                make_test_message("m2", "u1", 2),
                make_test_message("m2", "u1", 2),
                make_test_message("m3", "u1", 3),
            ])
            .unwrap();

        assert_eq!(inserted, 2);
        assert_eq!(store.count_messages().unwrap(), 3);

        // Recipients were written once for m2 despite the repeat
        let m2 = store.get_message(&MessageId::new("m2")).unwrap().unwrap();
        assert_eq!(m2.to_recipients.len(), 2);
    }

    #[test]
    fn test_list_messages_for_user() {
        let (store, _dir) = create_test_store();
        store
            .insert_messages(&[
                make_test_message("old", "u1", 10),
                make_test_message("new", "u1", 1),
                make_test_message("theirs", "u2", 0),
            ])
            .unwrap();

        let listed = store
            .list_messages_for_user(&UserId::new("u1"), 10, 0)
            .unwrap();
        let ids: Vec<&str> = listed.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["new", "old"]);

        let offset = store
            .list_messages_for_user(&UserId::new("u1"), 10, 1)
            .unwrap();
        assert_eq!(offset.len(), 1);

        // Offsets past i64 clamp instead of wrapping to a negative offset
        let far = store
            .list_messages_for_user(&UserId::new("u1"), usize::MAX, usize::MAX)
            .unwrap();
        assert!(far.is_empty());
        assert_eq!(store.count_messages_for_user(&UserId::new("u1")).unwrap(), 2);
        assert_eq!(store.count_messages_for_user(&UserId::new("u3")).unwrap(), 0);
    }

    #[test]
    fn test_upsert_user() {
        let (store, _dir) = create_test_store();

        let first = store.upsert_user(make_test_user("bob@example.com", "t1")).unwrap();
        assert!(first.created);
        assert_eq!(first.user.access_token.value, "t1");

        let second = store.upsert_user(make_test_user("bob@example.com", "t2")).unwrap();
        assert!(!second.created);
        assert_eq!(second.user.id, first.user.id);
        assert_eq!(second.user.access_token.value, "t2");
        assert_eq!(
            second.user.created_at.timestamp_millis(),
            first.user.created_at.timestamp_millis()
        );

        let by_name = store
            .find_user_by_username("bob@example.com")
            .unwrap()
            .unwrap();
        assert_eq!(by_name.id, first.user.id);
        assert!(store.find_user(&UserId::new("nope")).unwrap().is_none());
    }

    #[test]
    fn test_reopen_keeps_data() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("reopen.db");

        {
            let store = SqliteMailStore::new(&path).unwrap();
            store
                .insert_messages(&[make_test_message("m1", "u1", 1)])
                .unwrap();
        }

        let store = SqliteMailStore::new(&path).unwrap();
        assert!(store.has_message(&MessageId::new("m1")).unwrap());
    }
}
