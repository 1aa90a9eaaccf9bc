//! Storage traits and implementations
//!
//! This module defines the storage abstraction layer for users and synced
//! messages. The trait-based design allows swapping between in-memory and
//! SQLite storage implementations.

mod memory;
mod sqlite;
mod traits;

pub use memory::InMemoryMailStore;
pub use sqlite::SqliteMailStore;
pub use traits::{MessageStore, UserStore, UserUpsert};
