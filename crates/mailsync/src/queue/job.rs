//! Job records and retry policy types

use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::models::UserId;
use crate::sync::JobState;

/// Job name for the first sync after a user is created
pub const INITIAL_MAILBOX_SYNC: &str = "initial-mailbox-sync";

/// Job name for the sync after an existing user re-authorizes
pub const MAILBOX_RESYNC: &str = "mailbox-resync";

/// Queue-level job identity
///
/// Sync jobs use the user id, so at most one sync per user is pending or
/// running at any time.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobId(String);

impl JobId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&UserId> for JobId {
    fn from(user_id: &UserId) -> Self {
        Self(user_id.as_str().to_string())
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    /// Ready to run
    Waiting,
    /// Waiting for its backoff to elapse
    Delayed,
    /// Claimed by a worker
    Active,
    /// Finished as Completed or Skipped
    Completed,
    /// All attempts used up
    Failed,
}

impl JobStatus {
    /// Waiting, delayed and active jobs block a duplicate submission
    pub fn is_pending(self) -> bool {
        matches!(self, Self::Waiting | Self::Delayed | Self::Active)
    }

    pub fn is_finished(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Payload of a sync job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncJobData {
    pub user_id: UserId,
}

/// A queued job and its bookkeeping
#[derive(Debug, Clone)]
pub struct Job {
    pub id: JobId,
    /// Job kind, e.g. [`INITIAL_MAILBOX_SYNC`]
    pub name: String,
    pub data: SyncJobData,
    pub status: JobStatus,
    /// Attempts started so far
    pub attempts_made: u32,
    pub max_attempts: u32,
    /// Earliest time the next attempt may start
    pub run_at: DateTime<Utc>,
    pub enqueued_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Terminal state of the last successful attempt
    pub outcome: Option<JobState>,
    /// Error message of the most recent failed attempt
    pub last_error: Option<String>,
    /// Submission order, used to run ready jobs first-in first-out
    pub(crate) seq: u64,
}

/// Retry and retention policy applied to every job in a queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobOptions {
    /// Total attempts, including the first
    pub attempts: u32,
    /// Delay before the first retry; doubles per further retry
    pub backoff_base: Duration,
    /// How long finished jobs are kept before pruning
    pub retention: Duration,
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff_base: Duration::from_secs(1),
            retention: Duration::from_secs(48 * 60 * 60),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnqueueResult {
    Enqueued(JobId),
    /// A job with this id is already pending or running; nothing was added
    Duplicate(JobId),
}

impl EnqueueResult {
    pub fn job_id(&self) -> &JobId {
        match self {
            Self::Enqueued(id) | Self::Duplicate(id) => id,
        }
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, Self::Duplicate(_))
    }
}

/// What the queue did with a failed attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureDisposition {
    /// Scheduled again after `delay`
    Retry { attempt: u32, delay: Duration },
    /// No attempts left; the job is now Failed
    Exhausted { attempts: u32 },
}
