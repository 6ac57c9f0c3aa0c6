//! Domain entities decoded from store records.

use serde::Serialize;

use duet_shared::{ConversationId, MessageId, Timestamp, UserEmail};

/// A user's public record. Only the owner ever writes it.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub email: UserEmail,
    pub photo_url: Option<String>,
    pub last_seen: Option<Timestamp>,
}

/// A two-party conversation. Never updated after creation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: ConversationId,
    pub users: Vec<UserEmail>,
}

impl Conversation {
    pub fn includes(&self, email: &UserEmail) -> bool {
        self.users.contains(email)
    }
}

/// An immutable chat message.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub text: String,
    /// Store-assigned; `Pending` until the append commits.
    pub sent_at: Timestamp,
    pub user: UserEmail,
}
