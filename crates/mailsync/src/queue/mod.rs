//! Background job queue for mailbox syncs
//!
//! Jobs are keyed by user id, retried with exponential backoff, and kept for
//! a retention window after they finish.

mod job;
mod memory;
mod traits;
mod worker;

pub use job::{
    EnqueueResult, FailureDisposition, INITIAL_MAILBOX_SYNC, Job, JobId, JobOptions, JobStatus,
    MAILBOX_RESYNC, SyncJobData,
};
pub use memory::InMemoryJobQueue;
pub use traits::JobQueue;
pub use worker::{JobHandler, Worker, WorkerHandle, WorkerReport};
