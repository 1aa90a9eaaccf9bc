//! In-process job queue
//!
//! Jobs live in memory only; a restarted worker starts with an empty queue.

use anyhow::{Result, anyhow, bail};
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use super::JobQueue;
use super::job::{
    EnqueueResult, FailureDisposition, Job, JobId, JobOptions, JobStatus, SyncJobData,
};
use crate::sync::{Clock, JobState, backoff_delay, to_chrono};

#[derive(Default)]
struct QueueState {
    jobs: HashMap<JobId, Job>,
    next_seq: u64,
    /// Set by enqueue/retry/wake, consumed by wait_for_work
    signaled: bool,
}

/// Mutex-and-condvar job queue shared between producers and a worker
pub struct InMemoryJobQueue {
    state: Mutex<QueueState>,
    work_available: Condvar,
    clock: Arc<dyn Clock>,
    options: JobOptions,
}

fn poisoned<T>(_: PoisonError<T>) -> anyhow::Error {
    anyhow!("Job queue lock poisoned")
}

impl InMemoryJobQueue {
    pub fn new(clock: Arc<dyn Clock>, options: JobOptions) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            work_available: Condvar::new(),
            clock,
            options,
        }
    }

    /// Number of jobs currently held, finished ones included
    pub fn len(&self) -> Result<usize> {
        Ok(self.lock()?.jobs.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// All jobs with the given status
    pub fn jobs_with_status(&self, status: JobStatus) -> Result<Vec<Job>> {
        let state = self.lock()?;
        let mut jobs: Vec<Job> = state
            .jobs
            .values()
            .filter(|j| j.status == status)
            .cloned()
            .collect();
        jobs.sort_by_key(|j| j.seq);
        Ok(jobs)
    }

    fn lock(&self) -> Result<MutexGuard<'_, QueueState>> {
        self.state.lock().map_err(poisoned)
    }

    fn signal(&self, state: &mut QueueState) {
        state.signaled = true;
        self.work_available.notify_all();
    }
}

impl JobQueue for InMemoryJobQueue {
    fn enqueue(&self, name: &str, data: SyncJobData) -> Result<EnqueueResult> {
        let id = JobId::from(&data.user_id);
        let now = self.clock.now();
        let mut state = self.lock()?;

        if let Some(existing) = state.jobs.get(&id) {
            if existing.status.is_pending() {
                debug!(
                    "Job {} already {:?}, ignoring {} submission",
                    id, existing.status, name
                );
                return Ok(EnqueueResult::Duplicate(id));
            }
        }

        let seq = state.next_seq;
        state.next_seq += 1;
        state.jobs.insert(
            id.clone(),
            Job {
                id: id.clone(),
                name: name.to_string(),
                data,
                status: JobStatus::Waiting,
                attempts_made: 0,
                max_attempts: self.options.attempts,
                run_at: now,
                enqueued_at: now,
                finished_at: None,
                outcome: None,
                last_error: None,
                seq,
            },
        );
        self.signal(&mut state);

        info!("Enqueued {} job {}", name, id);
        Ok(EnqueueResult::Enqueued(id))
    }

    fn claim_next(&self) -> Result<Option<Job>> {
        let now = self.clock.now();
        let mut state = self.lock()?;

        let ready = state
            .jobs
            .values()
            .filter(|j| matches!(j.status, JobStatus::Waiting | JobStatus::Delayed))
            .filter(|j| j.run_at <= now)
            .min_by_key(|j| (j.run_at, j.seq))
            .map(|j| j.id.clone());

        let Some(id) = ready else {
            return Ok(None);
        };
        let Some(job) = state.jobs.get_mut(&id) else {
            return Ok(None);
        };

        job.status = JobStatus::Active;
        job.attempts_made += 1;
        debug!(
            "Claimed job {} (attempt {}/{})",
            job.id, job.attempts_made, job.max_attempts
        );
        Ok(Some(job.clone()))
    }

    fn complete(&self, id: &JobId, outcome: JobState) -> Result<()> {
        let now = self.clock.now();
        let mut state = self.lock()?;
        let Some(job) = state.jobs.get_mut(id) else {
            bail!("Job {} not found", id);
        };
        if job.status != JobStatus::Active {
            bail!("Job {} is not active ({:?})", id, job.status);
        }

        job.status = JobStatus::Completed;
        job.outcome = Some(outcome);
        job.finished_at = Some(now);
        Ok(())
    }

    fn fail(&self, id: &JobId, error: &str) -> Result<FailureDisposition> {
        let now = self.clock.now();
        let mut state = self.lock()?;
        let Some(job) = state.jobs.get_mut(id) else {
            bail!("Job {} not found", id);
        };
        if job.status != JobStatus::Active {
            bail!("Job {} is not active ({:?})", id, job.status);
        }

        job.last_error = Some(error.to_string());

        if job.attempts_made >= job.max_attempts {
            job.status = JobStatus::Failed;
            job.finished_at = Some(now);
            warn!(
                "Job {} failed after {} attempts: {}",
                id, job.attempts_made, error
            );
            return Ok(FailureDisposition::Exhausted {
                attempts: job.attempts_made,
            });
        }

        let attempt = job.attempts_made;
        let delay = backoff_delay(self.options.backoff_base, attempt);
        job.status = JobStatus::Delayed;
        job.run_at = now
            .checked_add_signed(to_chrono(delay))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        info!(
            "Job {} attempt {} failed, retrying in {:?}: {}",
            id, attempt, delay, error
        );

        self.signal(&mut state);
        Ok(FailureDisposition::Retry { attempt, delay })
    }

    fn prune(&self) -> Result<usize> {
        let cutoff = self
            .clock
            .now()
            .checked_sub_signed(to_chrono(self.options.retention))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let mut state = self.lock()?;
        let before = state.jobs.len();

        state.jobs.retain(|_, job| match job.finished_at {
            Some(finished_at) if job.status.is_finished() => finished_at >= cutoff,
            _ => true,
        });

        let removed = before - state.jobs.len();
        if removed > 0 {
            debug!("Pruned {} finished jobs", removed);
        }
        Ok(removed)
    }

    fn next_wake(&self) -> Result<Option<DateTime<Utc>>> {
        let state = self.lock()?;
        Ok(state
            .jobs
            .values()
            .filter(|j| matches!(j.status, JobStatus::Waiting | JobStatus::Delayed))
            .map(|j| j.run_at)
            .min())
    }

    fn get(&self, id: &JobId) -> Result<Option<Job>> {
        Ok(self.lock()?.jobs.get(id).cloned())
    }

    fn wait_for_work(&self, timeout: Duration) -> Result<()> {
        let mut state = self.lock()?;
        if !state.signaled {
            let (guard, _) = self
                .work_available
                .wait_timeout(state, timeout)
                .map_err(poisoned)?;
            state = guard;
        }
        state.signaled = false;
        Ok(())
    }

    fn wake(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        self.signal(&mut state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::UserId;
    use crate::queue::{INITIAL_MAILBOX_SYNC, MAILBOX_RESYNC};
    use crate::sync::ManualClock;

    fn queue() -> (InMemoryJobQueue, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::default());
        (
            InMemoryJobQueue::new(clock.clone(), JobOptions::default()),
            clock,
        )
    }

    fn data(user: &str) -> SyncJobData {
        SyncJobData {
            user_id: UserId::new(user),
        }
    }

    #[test]
    fn test_duplicate_pending_job_is_ignored() {
        let (queue, _clock) = queue();

        let first = queue.enqueue(INITIAL_MAILBOX_SYNC, data("u1")).unwrap();
        let second = queue.enqueue(MAILBOX_RESYNC, data("u1")).unwrap();

        assert_eq!(first, EnqueueResult::Enqueued(JobId::new("u1")));
        assert!(second.is_duplicate());
        assert_eq!(queue.len().unwrap(), 1);

        // Still a duplicate while active
        queue.claim_next().unwrap().unwrap();
        assert!(queue.enqueue(MAILBOX_RESYNC, data("u1")).unwrap().is_duplicate());
    }

    #[test]
    fn test_finished_job_is_replaced() {
        let (queue, _clock) = queue();
        queue.enqueue(INITIAL_MAILBOX_SYNC, data("u1")).unwrap();
        let job = queue.claim_next().unwrap().unwrap();
        queue.complete(&job.id, JobState::Completed).unwrap();

        let again = queue.enqueue(MAILBOX_RESYNC, data("u1")).unwrap();
        assert!(!again.is_duplicate());

        let job = queue.get(&JobId::new("u1")).unwrap().unwrap();
        assert_eq!(job.name, MAILBOX_RESYNC);
        assert_eq!(job.status, JobStatus::Waiting);
        assert_eq!(job.attempts_made, 0);
    }

    #[test]
    fn test_claims_in_submission_order() {
        let (queue, _clock) = queue();
        for user in ["a", "b", "c"] {
            queue.enqueue(INITIAL_MAILBOX_SYNC, data(user)).unwrap();
        }

        let order: Vec<String> = std::iter::from_fn(|| queue.claim_next().unwrap())
            .map(|j| j.id.as_str().to_string())
            .collect();
        assert_eq!(order, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_retry_backoff_then_exhaustion() {
        let (queue, clock) = queue();
        queue.enqueue(INITIAL_MAILBOX_SYNC, data("u1")).unwrap();
        let id = JobId::new("u1");

        queue.claim_next().unwrap().unwrap();
        assert_eq!(
            queue.fail(&id, "boom").unwrap(),
            FailureDisposition::Retry {
                attempt: 1,
                delay: Duration::from_secs(1)
            }
        );

        // Not ready until the backoff elapses
        assert!(queue.claim_next().unwrap().is_none());
        assert_eq!(
            queue.next_wake().unwrap(),
            Some(clock.now() + chrono::Duration::seconds(1))
        );
        clock.advance(Duration::from_secs(1));
        queue.claim_next().unwrap().unwrap();

        assert_eq!(
            queue.fail(&id, "boom").unwrap(),
            FailureDisposition::Retry {
                attempt: 2,
                delay: Duration::from_secs(2)
            }
        );
        clock.advance(Duration::from_secs(2));
        let job = queue.claim_next().unwrap().unwrap();
        assert_eq!(job.attempts_made, 3);

        assert_eq!(
            queue.fail(&id, "still broken").unwrap(),
            FailureDisposition::Exhausted { attempts: 3 }
        );
        let job = queue.get(&id).unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.last_error.as_deref(), Some("still broken"));
        assert!(queue.next_wake().unwrap().is_none());
    }

    #[test]
    fn test_prune_respects_retention() {
        let (queue, clock) = queue();
        queue.enqueue(INITIAL_MAILBOX_SYNC, data("done")).unwrap();
        queue.enqueue(INITIAL_MAILBOX_SYNC, data("pending")).unwrap();
        let job = queue.claim_next().unwrap().unwrap();
        queue.complete(&job.id, JobState::Skipped).unwrap();

        clock.advance(Duration::from_secs(47 * 3600));
        assert_eq!(queue.prune().unwrap(), 0);

        clock.advance(Duration::from_secs(2 * 3600));
        assert_eq!(queue.prune().unwrap(), 1);
        assert!(queue.get(&JobId::new("done")).unwrap().is_none());
        assert!(queue.get(&JobId::new("pending")).unwrap().is_some());
    }

    #[test]
    fn test_huge_backoff_and_retention_do_not_overflow() {
        let clock = Arc::new(ManualClock::default());
        let queue = InMemoryJobQueue::new(
            clock.clone(),
            JobOptions {
                attempts: 2,
                backoff_base: Duration::MAX,
                retention: Duration::MAX,
            },
        );
        queue.enqueue(INITIAL_MAILBOX_SYNC, data("u1")).unwrap();
        queue.claim_next().unwrap().unwrap();

        assert!(matches!(
            queue.fail(&JobId::new("u1"), "boom").unwrap(),
            FailureDisposition::Retry { attempt: 1, .. }
        ));
        assert!(queue.claim_next().unwrap().is_none());
        assert_eq!(queue.prune().unwrap(), 0);
    }

    #[test]
    fn test_complete_requires_active_job() {
        let (queue, _clock) = queue();
        queue.enqueue(INITIAL_MAILBOX_SYNC, data("u1")).unwrap();
        assert!(queue.complete(&JobId::new("u1"), JobState::Completed).is_err());
        assert!(queue.fail(&JobId::new("missing"), "x").is_err());
    }

    #[test]
    fn test_wait_for_work_returns_after_signal() {
        let (queue, _clock) = queue();
        queue.enqueue(INITIAL_MAILBOX_SYNC, data("u1")).unwrap();

        // The pending signal makes this return immediately
        let started = std::time::Instant::now();
        queue.wait_for_work(Duration::from_secs(10)).unwrap();
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
