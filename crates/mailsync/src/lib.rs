//! Mailsync crate - Background mailbox sync for EchoMail
//!
//! This crate provides the platform-independent sync core:
//! - Domain models (User, Message, EmailAddress)
//! - Microsoft Graph client and message normalization
//! - Storage trait abstractions with in-memory and SQLite backends
//! - Paced, capped, idempotent mailbox sync job
//! - In-process job queue with retries and a worker thread
//! - Authorization handler that triggers syncs
//! - Query API for reading synced mail

pub mod actions;
pub mod config;
pub mod error;
pub mod graph;
pub mod models;
pub mod query;
pub mod queue;
pub mod storage;
pub mod sync;

pub use actions::{Authorization, AuthorizationHandler, AuthorizationOutcome, UserEvent};
pub use config::SyncSettings;
pub use error::SyncError;
pub use graph::GraphClient;
pub use models::{AccessToken, EmailAddress, Message, MessageBody, MessageId, User, UserId};
pub use query::{InboxPage, MessageSummary, inbox_page, list_messages};
pub use queue::{
    EnqueueResult, INITIAL_MAILBOX_SYNC, InMemoryJobQueue, JobId, JobQueue, JobStatus,
    MAILBOX_RESYNC, SyncJobData, Worker, WorkerHandle, WorkerReport,
};
pub use storage::{InMemoryMailStore, MessageStore, SqliteMailStore, UserStore, UserUpsert};
pub use sync::{
    Clock, ManualClock, MailboxSyncJob, PageFetcher, SkipReason, SyncOptions, SyncOutcome,
    SyncStats, SystemClock,
};
