//! User-facing actions
//!
//! Provides the authorization handler that records users and requests
//! mailbox syncs.

mod handler;

pub use handler::{Authorization, AuthorizationHandler, AuthorizationOutcome, UserEvent};
