//! Lazy page sequence over a paginated mailbox

use std::iter::FusedIterator;

use super::page::{Cursor, PageFetcher};
use crate::error::SyncError;
use crate::models::{Message, UserId};

#[derive(Debug)]
enum CursorState {
    Start,
    Next(Cursor),
    Exhausted,
}

/// Iterator over the pages of one mailbox
///
/// Each call to `next` issues exactly one fetch, passing the continuation
/// cursor from the previous page. The sequence ends after a page without a
/// continuation cursor, or after the first error. State lives in memory only:
/// a retried job starts a fresh cursor from the first page.
///
/// Dropping the iterator (or simply not calling `next`) stops the sync; no
/// further requests are made.
pub struct SyncCursor<'a> {
    fetcher: &'a dyn PageFetcher,
    owner: &'a UserId,
    access_token: &'a str,
    state: CursorState,
    pages_fetched: usize,
}

impl<'a> SyncCursor<'a> {
    pub fn new(fetcher: &'a dyn PageFetcher, owner: &'a UserId, access_token: &'a str) -> Self {
        Self {
            fetcher,
            owner,
            access_token,
            state: CursorState::Start,
            pages_fetched: 0,
        }
    }

    /// True once no further page will be requested
    pub fn is_exhausted(&self) -> bool {
        matches!(self.state, CursorState::Exhausted)
    }

    /// Number of pages fetched successfully so far
    pub fn pages_fetched(&self) -> usize {
        self.pages_fetched
    }

    /// Rewind to the first page
    pub fn restart(&mut self) {
        self.state = CursorState::Start;
        self.pages_fetched = 0;
    }
}

impl Iterator for SyncCursor<'_> {
    type Item = Result<Vec<Message>, SyncError>;

    fn next(&mut self) -> Option<Self::Item> {
        let cursor = match std::mem::replace(&mut self.state, CursorState::Exhausted) {
            CursorState::Start => None,
            CursorState::Next(cursor) => Some(cursor),
            CursorState::Exhausted => return None,
        };

        match self.fetcher.fetch(self.owner, cursor.as_ref(), self.access_token) {
            Ok(page) => {
                self.pages_fetched += 1;
                if let Some(next) = page.next {
                    self.state = CursorState::Next(next);
                }
                Some(Ok(page.messages))
            }
            // State stays Exhausted: an error ends the sequence
            Err(e) => Some(Err(e)),
        }
    }
}

impl FusedIterator for SyncCursor<'_> {}
