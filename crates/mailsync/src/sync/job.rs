//! Mailbox sync job: one attempt of pulling a user's mailbox into the store

use log::{debug, error, info, warn};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::cursor::SyncCursor;
use super::page::PageFetcher;
use super::timing::Clock;
use crate::error::SyncError;
use crate::models::{User, UserId};
use crate::storage::{MessageStore, UserStore};

/// Per-attempt limits
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOptions {
    /// Stop pulling once this many messages were considered. Checked after
    /// each full page, so the last page may overshoot.
    pub max_messages: usize,
    /// Fixed pause between pages
    pub page_delay: Duration,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            max_messages: 100,
            page_delay: Duration::from_secs(1),
        }
    }
}

/// States of one job attempt
///
/// `Loading → Validating → Syncing → Completed | Skipped | Failed`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Loading,
    Validating,
    Syncing,
    Completed,
    Skipped,
    Failed,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Skipped | Self::Failed)
    }
}

/// Why a job ended without syncing (or without finishing)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The user was deleted between submission and execution
    UserNotFound,
    /// The credential expired; a re-authorization re-triggers sync
    CredentialExpired,
}

/// Statistics from one job attempt
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SyncStats {
    /// Pages received from the provider
    pub pages_fetched: usize,
    /// Messages received (the running total the cap applies to)
    pub messages_fetched: usize,
    /// Messages newly stored
    pub messages_stored: usize,
    /// Messages skipped because their id was already stored
    pub duplicates_skipped: usize,
    /// Whether the run stopped because of the cap
    pub cap_reached: bool,
    /// Duration of the attempt
    pub duration_ms: u64,
}

/// Terminal result of a successful attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    Completed(SyncStats),
    Skipped { reason: SkipReason, stats: SyncStats },
}

impl SyncOutcome {
    pub fn state(&self) -> JobState {
        match self {
            Self::Completed(_) => JobState::Completed,
            Self::Skipped { .. } => JobState::Skipped,
        }
    }

    pub fn stats(&self) -> &SyncStats {
        match self {
            Self::Completed(stats) => stats,
            Self::Skipped { stats, .. } => stats,
        }
    }

    fn stats_mut(&mut self) -> &mut SyncStats {
        match self {
            Self::Completed(stats) => stats,
            Self::Skipped { stats, .. } => stats,
        }
    }
}

/// Orchestrates one sync attempt for a user
///
/// Each call to [`run`](Self::run) starts from `Loading` and ends in exactly
/// one terminal state. Failures are returned as errors for the queue to retry;
/// this type never retries on its own.
pub struct MailboxSyncJob {
    users: Arc<dyn UserStore>,
    messages: Arc<dyn MessageStore>,
    fetcher: Arc<dyn PageFetcher>,
    clock: Arc<dyn Clock>,
    options: SyncOptions,
}

impl MailboxSyncJob {
    pub fn new(
        users: Arc<dyn UserStore>,
        messages: Arc<dyn MessageStore>,
        fetcher: Arc<dyn PageFetcher>,
        clock: Arc<dyn Clock>,
        options: SyncOptions,
    ) -> Self {
        Self {
            users,
            messages,
            fetcher,
            clock,
            options,
        }
    }

    /// Run one attempt for `user_id`
    ///
    /// Returns `Ok` for `Completed` and `Skipped`, `Err` for `Failed`.
    /// Pages persisted before a failure stay stored.
    pub fn run(&self, user_id: &UserId) -> Result<SyncOutcome, SyncError> {
        let start = Instant::now();
        let mut state = JobState::Loading;
        let mut stats = SyncStats::default();

        let result = self.drive(user_id, &mut state, &mut stats);
        let elapsed_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok(mut outcome) => {
                transition(user_id, &mut state, outcome.state());
                outcome.stats_mut().duration_ms = elapsed_ms;
                Ok(outcome)
            }
            Err(e) => {
                transition(user_id, &mut state, JobState::Failed);
                error!(
                    "Sync for user {} failed after {} pages ({} stored): {}",
                    user_id, stats.pages_fetched, stats.messages_stored, e
                );
                Err(e)
            }
        }
    }

    fn drive(
        &self,
        user_id: &UserId,
        state: &mut JobState,
        stats: &mut SyncStats,
    ) -> Result<SyncOutcome, SyncError> {
        let Some(user) = self.users.find_user(user_id)? else {
            warn!("User {} not found, skipping sync", user_id);
            return Ok(self.skipped(SkipReason::UserNotFound, stats));
        };

        transition(user_id, state, JobState::Validating);
        if user.access_token.is_expired_at(self.clock.now()) {
            warn!("Access token for user {} has expired", user_id);
            return Ok(self.skipped(SkipReason::CredentialExpired, stats));
        }

        transition(user_id, state, JobState::Syncing);
        self.sync_pages(&user, stats)
    }

    fn sync_pages(&self, user: &User, stats: &mut SyncStats) -> Result<SyncOutcome, SyncError> {
        let mut cursor =
            SyncCursor::new(self.fetcher.as_ref(), &user.id, &user.access_token.value);

        while let Some(page) = cursor.next() {
            let messages = page?;
            let inserted = self.messages.insert_messages(&messages)?;

            stats.pages_fetched += 1;
            stats.messages_fetched += messages.len();
            stats.messages_stored += inserted;
            stats.duplicates_skipped += messages.len().saturating_sub(inserted);

            info!(
                "Inserted {} mails for user {} ({} considered, {} duplicates)",
                stats.messages_stored, user.id, stats.messages_fetched, stats.duplicates_skipped
            );

            if stats.messages_fetched >= self.options.max_messages {
                info!(
                    "Reached cap of {} messages for user {}, stopping",
                    self.options.max_messages, user.id
                );
                stats.cap_reached = true;
                break;
            }

            if cursor.is_exhausted() {
                break;
            }

            debug!("Pausing {:?} before next page", self.options.page_delay);
            self.clock.sleep(self.options.page_delay);

            // Never trust the expiry we checked before the pause
            if user.access_token.is_expired_at(self.clock.now()) {
                warn!(
                    "Access token for user {} expired mid-sync after {} pages",
                    user.id, stats.pages_fetched
                );
                return Ok(self.skipped(SkipReason::CredentialExpired, stats));
            }
        }

        Ok(SyncOutcome::Completed(stats.clone()))
    }

    fn skipped(&self, reason: SkipReason, stats: &SyncStats) -> SyncOutcome {
        SyncOutcome::Skipped {
            reason,
            stats: stats.clone(),
        }
    }
}

fn transition(user_id: &UserId, state: &mut JobState, next: JobState) {
    debug_assert!(!state.is_terminal(), "terminal state {:?} re-entered", state);
    debug!("user {}: {:?} -> {:?}", user_id, state, next);
    *state = next;
}
