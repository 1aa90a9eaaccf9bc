//! Domain models for users and synced messages

mod message;
mod user;

pub use message::{EmailAddress, Message, MessageBody, MessageBuilder, MessageId};
pub use user::{AccessToken, User, UserId, normalize_username};
