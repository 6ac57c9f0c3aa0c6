/// Collection holding one record per user, keyed by email.
pub const USERS_COLLECTION: &str = "users";

/// Collection holding two-party conversations.
pub const CONVERSATIONS_COLLECTION: &str = "conversations";

/// Collection holding every message of every conversation.
pub const MESSAGES_COLLECTION: &str = "messages";

/// User record fields
pub const FIELD_EMAIL: &str = "email";
pub const FIELD_PHOTO_URL: &str = "photo_url";
pub const FIELD_LAST_SEEN: &str = "last_seen";

/// Conversation record fields
pub const FIELD_USERS: &str = "users";

/// Message record fields
pub const FIELD_CONVERSATION_ID: &str = "conversation_id";
pub const FIELD_TEXT: &str = "text";
pub const FIELD_SENT_AT: &str = "sent_at";
pub const FIELD_USER: &str = "user";

/// Shown in place of a send time the store has not assigned yet.
pub const PENDING_TIMESTAMP_LABEL: &str = "sending…";

/// Shown when a recipient's last-seen time is not known.
pub const UNKNOWN_LAST_SEEN_LABEL: &str = "unknown";

/// Number of result-sets a subscription may buffer before the producer waits.
pub const DEFAULT_SUBSCRIPTION_BUFFER: usize = 16;
