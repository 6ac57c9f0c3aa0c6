//! Composer: the pending outgoing text of one conversation and the send
//! action.
//!
//! The draft is observable state owned here; views subscribe to it with
//! [`Composer::watch`]. A send claims the draft, touches the sender's
//! `last_seen`, then appends the message. The draft is cleared only once the
//! append is accepted; a rejected append leaves the text in place and marks
//! the draft [`ComposerStatus::Failed`].

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use duet_shared::constants::{
    FIELD_CONVERSATION_ID, FIELD_LAST_SEEN, FIELD_SENT_AT, FIELD_TEXT, FIELD_USER,
    MESSAGES_COLLECTION,
    USERS_COLLECTION,
};
use duet_shared::{ConversationId, MessageId, UserEmail};
use duet_store::{DocumentId, DocumentStore, WriteFields};

use crate::error::Result;
use crate::events::{emit_event, ClientEvent, EventSender};

/// Key that submits the draft.
pub const SUBMIT_KEY: &str = "Enter";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ComposerStatus {
    #[default]
    Idle,
    Sending,
    Failed(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Draft {
    pub text: String,
    pub status: ComposerStatus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendReceipt {
    pub message_id: MessageId,
    /// Whether the `last_seen` update was accepted. Its failure does not
    /// stop the message.
    pub presence_updated: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// Nothing to send, or a send is already running.
    Skipped,
    Sent(SendReceipt),
}

pub struct Composer {
    store: Arc<dyn DocumentStore>,
    me: UserEmail,
    conversation_id: ConversationId,
    draft: watch::Sender<Draft>,
    events: Option<EventSender>,
}

impl Composer {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        me: UserEmail,
        conversation_id: ConversationId,
        events: Option<EventSender>,
    ) -> Self {
        let (draft, _) = watch::channel(Draft::default());
        Self {
            store,
            me,
            conversation_id,
            draft,
            events,
        }
    }

    pub fn conversation_id(&self) -> &ConversationId {
        &self.conversation_id
    }

    pub fn watch(&self) -> watch::Receiver<Draft> {
        self.draft.subscribe()
    }

    pub fn text(&self) -> String {
        self.draft.borrow().text.clone()
    }

    pub fn status(&self) -> ComposerStatus {
        self.draft.borrow().status.clone()
    }

    /// Replace the draft text. Editing clears a previous failure.
    pub fn set_text(&self, text: impl Into<String>) {
        let text = text.into();
        self.draft.send_if_modified(|draft| {
            let failed = matches!(draft.status, ComposerStatus::Failed(_));
            if draft.text == text && !failed {
                return false;
            }
            draft.text = text;
            if failed {
                draft.status = ComposerStatus::Idle;
            }
            true
        });
    }

    /// Keypress trigger: the submit key sends, any other key does nothing.
    pub async fn submit_key(&self, key: &str) -> Result<SendOutcome> {
        if key != SUBMIT_KEY {
            return Ok(SendOutcome::Skipped);
        }
        self.send().await
    }

    /// Send the draft. An empty draft produces no writes.
    pub async fn send(&self) -> Result<SendOutcome> {
        let Some(text) = self.claim() else {
            return Ok(SendOutcome::Skipped);
        };

        let presence_updated = self.touch_presence().await;

        let fields = WriteFields::new()
            .set(FIELD_CONVERSATION_ID, self.conversation_id.as_str())
            .set(FIELD_TEXT, text.as_str())
            .set(FIELD_USER, self.me.as_str())
            .server_timestamp(FIELD_SENT_AT);

        match self.store.append(MESSAGES_COLLECTION, fields).await {
            Ok(id) => {
                self.draft.send_modify(|draft| {
                    if draft.text == text {
                        draft.text.clear();
                    }
                    draft.status = ComposerStatus::Idle;
                });
                info!(conversation = %self.conversation_id, message = %id, "message sent");
                self.emit(ClientEvent::ScrollToLatest {
                    conversation_id: self.conversation_id.clone(),
                });
                Ok(SendOutcome::Sent(SendReceipt {
                    message_id: MessageId(id.0),
                    presence_updated,
                }))
            }
            Err(e) => {
                let reason = e.to_string();
                warn!(conversation = %self.conversation_id, error = %reason, "message rejected");
                self.draft
                    .send_modify(|draft| draft.status = ComposerStatus::Failed(reason.clone()));
                self.emit(ClientEvent::SendFailed {
                    conversation_id: self.conversation_id.clone(),
                    reason,
                });
                Err(e.into())
            }
        }
    }

    /// Mark the draft as sending and take a copy of its text.
    fn claim(&self) -> Option<String> {
        let mut claimed = None;
        self.draft.send_if_modified(|draft| {
            if draft.text.is_empty() || draft.status == ComposerStatus::Sending {
                return false;
            }
            draft.status = ComposerStatus::Sending;
            claimed = Some(draft.text.clone());
            true
        });
        if claimed.is_none() {
            debug!(conversation = %self.conversation_id, "send skipped");
        }
        claimed
    }

    async fn touch_presence(&self) -> bool {
        let fields = WriteFields::new().server_timestamp(FIELD_LAST_SEEN);
        match self
            .store
            .merge_update(USERS_COLLECTION, &DocumentId::from(self.me.as_str()), fields)
            .await
        {
            Ok(()) => true,
            Err(e) => {
                warn!(user = %self.me, error = %e, "presence update rejected");
                false
            }
        }
    }

    fn emit(&self, event: ClientEvent) {
        if let Some(events) = &self.events {
            emit_event(events, event);
        }
    }
}
