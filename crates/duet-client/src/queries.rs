//! The three live queries the client runs.

use duet_shared::constants::{
    CONVERSATIONS_COLLECTION, FIELD_CONVERSATION_ID, FIELD_SENT_AT, FIELD_USERS,
    MESSAGES_COLLECTION,
    USERS_COLLECTION,
};
use duet_shared::{ConversationId, UserEmail};
use duet_store::Query;

/// Messages of one conversation, oldest first.
pub fn messages_in(conversation_id: &ConversationId) -> Query {
    Query::collection(MESSAGES_COLLECTION)
        .where_eq(FIELD_CONVERSATION_ID, conversation_id.as_str())
        .order_by(FIELD_SENT_AT)
}

/// Conversations the user takes part in.
pub fn conversations_of(email: &UserEmail) -> Query {
    Query::collection(CONVERSATIONS_COLLECTION).where_array_contains(FIELD_USERS, email.as_str())
}

/// One conversation record.
pub fn conversation(id: &ConversationId) -> Query {
    Query::collection(CONVERSATIONS_COLLECTION).where_id(id.as_str())
}

/// One user record.
pub fn user(email: &UserEmail) -> Query {
    Query::collection(USERS_COLLECTION).where_id(email.as_str())
}
