//! Sync engine for pulling a mailbox into the store
//!
//! A [`MailboxSyncJob`] walks the provider's pages through a [`SyncCursor`],
//! persisting each page before requesting the next. Re-running a job is safe:
//! already stored messages are skipped.

mod cursor;
mod job;
mod page;
mod timing;

pub use cursor::SyncCursor;
pub use job::{JobState, MailboxSyncJob, SkipReason, SyncOptions, SyncOutcome, SyncStats};
pub use page::{Cursor, Page, PageFetcher};
pub use timing::{Clock, ManualClock, SystemClock, backoff_delay, to_chrono};
