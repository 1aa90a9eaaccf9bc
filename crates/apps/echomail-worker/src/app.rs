//! Worker application wiring
//!
//! Owns the store, queue, and sync job for one process and runs queued jobs
//! on a background worker thread.

use anyhow::{Context, Result, anyhow};
use log::{debug, info};
use mailsync::query::{DEFAULT_INBOX_PAGE_SIZE, InboxPage, inbox_page};
use mailsync::queue::Job;
use mailsync::sync::PageFetcher;
use mailsync::{
    Authorization, AuthorizationHandler, AuthorizationOutcome, Clock, GraphClient,
    InMemoryJobQueue, JobId, JobQueue, MailboxSyncJob, SqliteMailStore, SyncSettings, SystemClock,
    UserId, UserStore, Worker,
};
use std::sync::Arc;
use std::time::Duration;

/// How often the foreground thread checks on a draining job
const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(50);

pub struct WorkerApp {
    store: Arc<SqliteMailStore>,
    queue: Arc<InMemoryJobQueue>,
    clock: Arc<dyn Clock>,
    job: Arc<MailboxSyncJob>,
    handler: AuthorizationHandler,
}

impl WorkerApp {
    /// Open the database and Graph client described by `settings`
    pub fn open(settings: &SyncSettings) -> Result<Self> {
        let db_path = settings
            .resolve_db_path()
            .context("No database path configured and no data directory available")?;
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        info!("Opening database at {}", db_path.display());
        let store = Arc::new(SqliteMailStore::new(&db_path)?);
        let graph = Arc::new(GraphClient::from_settings(settings)?);

        Ok(Self::with_parts(settings, store, graph, Arc::new(SystemClock)))
    }

    /// Assemble the app from already-built parts
    pub fn with_parts(
        settings: &SyncSettings,
        store: Arc<SqliteMailStore>,
        fetcher: Arc<dyn PageFetcher>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let queue = Arc::new(InMemoryJobQueue::new(clock.clone(), settings.job_options()));
        let job = Arc::new(MailboxSyncJob::new(
            store.clone(),
            store.clone(),
            fetcher,
            clock.clone(),
            settings.sync_options(),
        ));
        let handler = AuthorizationHandler::new(store.clone(), queue.clone())
            .with_resync_on_reauthorization(settings.resync_on_reauthorization);

        Self {
            store,
            queue,
            clock,
            job,
            handler,
        }
    }

    /// Record an authorization and run the sync it triggers
    pub fn authorize(&self, auth: Authorization) -> Result<(AuthorizationOutcome, Option<Job>)> {
        let outcome = self.handler.record_authorization(auth)?;
        let job = match &outcome.job {
            Some(enqueued) => Some(self.drain(enqueued.job_id())?),
            None => None,
        };
        Ok((outcome, job))
    }

    /// Run a manual resync for an existing user
    pub fn sync(&self, user_id: &UserId) -> Result<Job> {
        let enqueued = self.handler.request_sync(user_id)?;
        self.drain(enqueued.job_id())
    }

    /// Read a page of a user's stored inbox; `None` for an unknown username
    pub fn inbox(&self, username: &str, page: usize) -> Result<Option<InboxPage>> {
        let username = mailsync::models::normalize_username(username);
        let Some(user) = self.store.find_user_by_username(&username)? else {
            return Ok(None);
        };
        Ok(Some(inbox_page(
            self.store.as_ref(),
            &user.id,
            page,
            DEFAULT_INBOX_PAGE_SIZE,
        )?))
    }

    /// Run the worker thread until job `id` has finished, then stop it
    fn drain(&self, id: &JobId) -> Result<Job> {
        let handle = Worker::new(self.queue.clone(), self.job.clone(), self.clock.clone()).spawn()?;

        let finished = loop {
            match self.queue.get(id)? {
                Some(job) if job.status.is_finished() => break Ok(job),
                Some(job) => debug!("Job {} is {:?}", id, job.status),
                None => break Err(anyhow!("Job {} disappeared from the queue", id)),
            }
            std::thread::sleep(DRAIN_POLL_INTERVAL);
        };

        let report = handle.shutdown()?;
        debug!("Worker report: {:?}", report);
        finished
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mailsync::graph::api::GraphMessage;
    use mailsync::graph::normalize_message;
    use mailsync::queue::JobStatus;
    use mailsync::sync::{Cursor, JobState, Page};
    use mailsync::{AccessToken, SyncError};
    use tempfile::TempDir;

    /// Single-page mailbox with three messages
    struct ThreeMessages;

    impl PageFetcher for ThreeMessages {
        fn fetch(
            &self,
            owner: &UserId,
            _cursor: Option<&Cursor>,
            _access_token: &str,
        ) -> Result<Page, SyncError> {
            let messages = (0..3)
                .map(|i| {
                    let raw: GraphMessage = serde_json::from_value(serde_json::json!({
                        "id": format!("m{}", i),
                        "receivedDateTime": format!("2024-01-0{}T08:00:00Z", i + 1),
                        "subject": "Hi",
                        "bodyPreview": "Hi",
                        "body": { "contentType": "text", "content": "Hi" },
                        "isRead": true,
                        "sender": { "emailAddress": { "name": "S", "address": "s@example.com" } },
                        "toRecipients": []
                    }))
                    .unwrap();
                    normalize_message(raw, owner)
                })
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Page {
                messages,
                next: None,
            })
        }
    }

    fn app(dir: &TempDir) -> WorkerApp {
        let settings = SyncSettings {
            page_delay_ms: 0,
            ..SyncSettings::default()
        };
        let store = Arc::new(SqliteMailStore::new(dir.path().join("mail.test.sqlite")).unwrap());
        WorkerApp::with_parts(&settings, store, Arc::new(ThreeMessages), Arc::new(SystemClock))
    }

    fn authorization(token: &str) -> Authorization {
        Authorization::new(
            "Owner@Example.com",
            "Owner",
            AccessToken::new(token, chrono::Utc::now() + chrono::Duration::hours(1)),
        )
    }

    #[test]
    fn test_authorize_runs_initial_sync() {
        let dir = TempDir::new().unwrap();
        let app = app(&dir);

        let (outcome, job) = app.authorize(authorization("t1")).unwrap();
        let job = job.unwrap();

        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.outcome, Some(JobState::Completed));

        let page = app.inbox("owner@example.com", 0).unwrap().unwrap();
        assert_eq!(page.messages.len(), 3);
        assert_eq!(page.messages[0].id.as_str(), "m2");
        assert_eq!(outcome.user.username, "owner@example.com");
    }

    #[test]
    fn test_manual_sync_for_known_user() {
        let dir = TempDir::new().unwrap();
        let app = app(&dir);
        let (outcome, _) = app.authorize(authorization("t1")).unwrap();

        let job = app.sync(&outcome.user.id).unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.name, mailsync::MAILBOX_RESYNC);

        assert!(app.sync(&UserId::new("unknown")).is_err());
    }

    #[test]
    fn test_inbox_for_unknown_username() {
        let dir = TempDir::new().unwrap();
        let app = app(&dir);
        assert!(app.inbox("nobody@example.com", 0).unwrap().is_none());
    }
}
