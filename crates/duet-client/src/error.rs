use thiserror::Error;

use duet_shared::ConversationId;
use duet_store::StoreError;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Not authenticated")]
    NotAuthenticated,

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Malformed {collection} record {id}: {reason}")]
    Decode {
        collection: &'static str,
        id: String,
        reason: String,
    },

    #[error("Conversation not found: {0}")]
    ConversationNotFound(ConversationId),

    #[error("Sign-out failed: {0}")]
    SignOut(String),
}

pub type Result<T> = std::result::Result<T, ClientError>;
