//! Authorization handler
//!
//! Records the identity provider's result for a user and turns user changes
//! into sync jobs.

use anyhow::{Context, Result, bail};
use log::{debug, info};
use std::sync::Arc;

use crate::models::{AccessToken, User, UserId, normalize_username};
use crate::queue::{EnqueueResult, INITIAL_MAILBOX_SYNC, JobQueue, MAILBOX_RESYNC, SyncJobData};
use crate::storage::UserStore;

/// Output of a successful sign-in with the identity provider
#[derive(Debug, Clone)]
pub struct Authorization {
    pub username: String,
    pub name: String,
    pub access_token: AccessToken,
}

impl Authorization {
    pub fn new(username: impl Into<String>, name: impl Into<String>, access_token: AccessToken) -> Self {
        Self {
            username: username.into(),
            name: name.into(),
            access_token,
        }
    }

    /// Build from a token whose expiry is given as Unix seconds
    pub fn with_unix_expiry(
        username: impl Into<String>,
        name: impl Into<String>,
        token: impl Into<String>,
        expires_at: i64,
    ) -> Result<Self> {
        let access_token = AccessToken::from_unix_expiry(token, expires_at)
            .with_context(|| format!("Token expiry {} is out of range", expires_at))?;
        Ok(Self::new(username, name, access_token))
    }
}

/// Change to a user that may require a mailbox sync
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserEvent {
    /// First authorization for this username
    Created(UserId),
    /// Existing user authorized again with a new credential
    Reauthorized(UserId),
}

impl UserEvent {
    pub fn user_id(&self) -> &UserId {
        match self {
            Self::Created(id) | Self::Reauthorized(id) => id,
        }
    }
}

/// Result of [`AuthorizationHandler::record_authorization`]
#[derive(Debug, Clone)]
pub struct AuthorizationOutcome {
    pub user: User,
    pub event: UserEvent,
    /// `None` when the event did not request a sync
    pub job: Option<EnqueueResult>,
}

/// Handler for authorization callbacks
///
/// Writes the user first, then publishes the resulting event. The queue's
/// per-user job identity keeps repeated callbacks from piling up syncs.
pub struct AuthorizationHandler {
    users: Arc<dyn UserStore>,
    queue: Arc<dyn JobQueue>,
    resync_on_reauthorization: bool,
}

impl AuthorizationHandler {
    pub fn new(users: Arc<dyn UserStore>, queue: Arc<dyn JobQueue>) -> Self {
        Self {
            users,
            queue,
            resync_on_reauthorization: true,
        }
    }

    pub fn with_resync_on_reauthorization(mut self, enabled: bool) -> Self {
        self.resync_on_reauthorization = enabled;
        self
    }

    /// Create or update the user for `auth` and publish the matching event
    pub fn record_authorization(&self, auth: Authorization) -> Result<AuthorizationOutcome> {
        let username = normalize_username(&auth.username);
        if username.is_empty() {
            bail!("Authorization has an empty username");
        }

        let upsert = self
            .users
            .upsert_user(User::new(&username, auth.name, auth.access_token))
            .with_context(|| format!("Failed to store user {}", username))?;

        let event = if upsert.created {
            info!("Created user {} ({})", upsert.user.id, username);
            UserEvent::Created(upsert.user.id.clone())
        } else {
            info!("Re-authorized user {} ({})", upsert.user.id, username);
            UserEvent::Reauthorized(upsert.user.id.clone())
        };

        let job = self.publish(&event)?;
        Ok(AuthorizationOutcome {
            user: upsert.user,
            event,
            job,
        })
    }

    /// Enqueue the sync job an event calls for, if any
    pub fn publish(&self, event: &UserEvent) -> Result<Option<EnqueueResult>> {
        let name = match event {
            UserEvent::Created(_) => INITIAL_MAILBOX_SYNC,
            UserEvent::Reauthorized(_) if self.resync_on_reauthorization => MAILBOX_RESYNC,
            UserEvent::Reauthorized(id) => {
                debug!("Resync on re-authorization disabled, not syncing {}", id);
                return Ok(None);
            }
        };

        let data = SyncJobData {
            user_id: event.user_id().clone(),
        };
        Ok(Some(self.queue.enqueue(name, data)?))
    }

    /// Enqueue a manual resync for an existing user
    pub fn request_sync(&self, user_id: &UserId) -> Result<EnqueueResult> {
        if self.users.find_user(user_id)?.is_none() {
            bail!("User {} not found", user_id);
        }
        self.queue.enqueue(
            MAILBOX_RESYNC,
            SyncJobData {
                user_id: user_id.clone(),
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{InMemoryJobQueue, JobId, JobOptions, JobStatus};
    use crate::storage::InMemoryMailStore;
    use crate::sync::{JobState, ManualClock};
    use chrono::{Duration, Utc};

    fn setup() -> (AuthorizationHandler, Arc<InMemoryMailStore>, Arc<InMemoryJobQueue>) {
        let store = Arc::new(InMemoryMailStore::new());
        let queue = Arc::new(InMemoryJobQueue::new(
            Arc::new(ManualClock::default()),
            JobOptions::default(),
        ));
        let handler = AuthorizationHandler::new(store.clone(), queue.clone());
        (handler, store, queue)
    }

    fn auth(username: &str, token: &str) -> Authorization {
        Authorization::new(
            username,
            "Alice Example",
            AccessToken::new(token, Utc::now() + Duration::hours(1)),
        )
    }

    #[test]
    fn test_first_authorization_enqueues_initial_sync() {
        let (handler, store, queue) = setup();

        let outcome = handler
            .record_authorization(auth("Alice@Example.COM", "t1"))
            .unwrap();

        assert_eq!(outcome.user.username, "alice@example.com");
        assert!(matches!(outcome.event, UserEvent::Created(_)));
        assert_eq!(
            outcome.job,
            Some(EnqueueResult::Enqueued(JobId::from(&outcome.user.id)))
        );

        let waiting = queue.jobs_with_status(JobStatus::Waiting).unwrap();
        assert_eq!(waiting.len(), 1);
        assert_eq!(waiting[0].name, INITIAL_MAILBOX_SYNC);
        assert_eq!(waiting[0].data.user_id, outcome.user.id);
        assert!(store.find_user_by_username("alice@example.com").unwrap().is_some());
    }

    #[test]
    fn test_reauthorization_updates_credential_without_new_user() {
        let (handler, store, queue) = setup();

        let first = handler.record_authorization(auth("alice@example.com", "t1")).unwrap();
        // Let the initial sync finish so the resync is not a duplicate
        let job = queue.claim_next().unwrap().unwrap();
        queue.complete(&job.id, JobState::Completed).unwrap();

        let second = handler.record_authorization(auth("ALICE@example.com", "t2")).unwrap();

        assert_eq!(second.user.id, first.user.id);
        assert_eq!(second.event, UserEvent::Reauthorized(first.user.id.clone()));
        let stored = store.find_user(&first.user.id).unwrap().unwrap();
        assert_eq!(stored.access_token.value, "t2");

        let job = queue.get(&JobId::from(&first.user.id)).unwrap().unwrap();
        assert_eq!(job.name, MAILBOX_RESYNC);
        assert_eq!(job.status, JobStatus::Waiting);
    }

    #[test]
    fn test_reauthorization_while_pending_is_duplicate() {
        let (handler, _store, queue) = setup();

        handler.record_authorization(auth("alice@example.com", "t1")).unwrap();
        let second = handler.record_authorization(auth("alice@example.com", "t2")).unwrap();

        assert!(second.job.unwrap().is_duplicate());
        assert_eq!(queue.len().unwrap(), 1);
    }

    #[test]
    fn test_resync_can_be_disabled() {
        let (handler, _store, queue) = setup();
        let handler = handler.with_resync_on_reauthorization(false);

        handler.record_authorization(auth("alice@example.com", "t1")).unwrap();
        let job = queue.claim_next().unwrap().unwrap();
        queue.complete(&job.id, JobState::Completed).unwrap();

        let second = handler.record_authorization(auth("alice@example.com", "t2")).unwrap();
        assert!(second.job.is_none());
        assert!(queue.jobs_with_status(JobStatus::Waiting).unwrap().is_empty());
    }

    #[test]
    fn test_empty_username_is_rejected() {
        let (handler, _store, queue) = setup();
        assert!(handler.record_authorization(auth("   ", "t1")).is_err());
        assert!(queue.is_empty().unwrap());
    }

    #[test]
    fn test_request_sync_requires_known_user() {
        let (handler, _store, _queue) = setup();
        assert!(handler.request_sync(&UserId::new("nobody")).is_err());

        let outcome = handler.record_authorization(auth("bob@example.com", "t")).unwrap();
        // Initial sync still pending
        assert!(handler.request_sync(&outcome.user.id).unwrap().is_duplicate());
    }

    #[test]
    fn test_unix_expiry() {
        let auth = Authorization::with_unix_expiry("a@b.c", "A", "tok", 1_700_000_000).unwrap();
        assert_eq!(auth.access_token.expiration.timestamp(), 1_700_000_000);
        assert!(Authorization::with_unix_expiry("a@b.c", "A", "tok", i64::MAX).is_err());
    }
}
