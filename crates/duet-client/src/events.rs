//! Notifications from the engine to the rendering layer.

use serde::Serialize;
use tokio::sync::broadcast;

use duet_shared::{ConversationId, UserEmail};

pub const EVENT_SCROLL_TO_LATEST: &str = "scroll-to-latest";
pub const EVENT_SEND_FAILED: &str = "send-failed";
pub const EVENT_SYNC_UNAVAILABLE: &str = "sync-unavailable";
pub const EVENT_CONVERSATION_CREATED: &str = "conversation-created";
pub const EVENT_SIGNED_OUT: &str = "signed-out";

const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientEvent {
    /// A message was sent; the view should show the newest message.
    #[serde(rename_all = "camelCase")]
    ScrollToLatest { conversation_id: ConversationId },

    /// The store rejected a message. The draft still holds its text.
    #[serde(rename_all = "camelCase")]
    SendFailed {
        conversation_id: ConversationId,
        reason: String,
    },

    /// A live subscription failed and will not deliver again until retried.
    SyncUnavailable {
        feed: String,
        key: String,
        reason: String,
    },

    #[serde(rename_all = "camelCase")]
    ConversationCreated {
        conversation_id: ConversationId,
        recipient: UserEmail,
    },

    SignedOut,
}

impl ClientEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::ScrollToLatest { .. } => EVENT_SCROLL_TO_LATEST,
            Self::SendFailed { .. } => EVENT_SEND_FAILED,
            Self::SyncUnavailable { .. } => EVENT_SYNC_UNAVAILABLE,
            Self::ConversationCreated { .. } => EVENT_CONVERSATION_CREATED,
            Self::SignedOut => EVENT_SIGNED_OUT,
        }
    }
}

pub type EventSender = broadcast::Sender<ClientEvent>;

pub fn event_channel() -> EventSender {
    let (tx, _) = broadcast::channel(EVENT_CAPACITY);
    tx
}

pub fn emit_event(events: &EventSender, event: ClientEvent) {
    let name = event.name();
    // Fails only when nobody is listening.
    if events.send(event).is_err() {
        tracing::trace!(event = name, "no event listeners");
    }
}
