//! # duet-shared
//!
//! Types shared by the store and the client: identifier newtypes, the
//! server-assignable [`Timestamp`], collection and field names, and email
//! validation.

pub mod constants;
pub mod error;
pub mod timestamp;
pub mod types;
pub mod validation;

pub use error::SharedError;
pub use timestamp::Timestamp;
pub use types::{ConversationId, MessageId, UserEmail};
