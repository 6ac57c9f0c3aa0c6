//! One open conversation: recipient header, live message list and composer,
//! all keyed to the same conversation id.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use duet_shared::{ConversationId, MessageId, UserEmail};
use duet_store::DocumentStore;

use crate::composer::Composer;
use crate::error::{ClientError, Result};
use crate::events::EventSender;
use crate::feed::{FeedView, LiveFeed};
use crate::models::{Conversation, Message};
use crate::queries;
use crate::resolver::{Recipient, RecipientView};
use crate::transform;

/// The one-shot page-load data of a conversation.
#[derive(Debug, Clone, PartialEq)]
pub struct StaticSnapshot {
    pub conversation: Conversation,
    pub messages: Vec<Message>,
}

/// Fetch a conversation and its messages once, in store order.
pub async fn load_static_snapshot(
    store: &dyn DocumentStore,
    id: &ConversationId,
) -> Result<StaticSnapshot> {
    let set = store.fetch(&queries::conversation(id)).await?;
    let doc = set
        .iter()
        .next()
        .ok_or_else(|| ClientError::ConversationNotFound(id.clone()))?;
    let conversation = transform::conversation_from_document(doc)?;

    let set = store.fetch(&queries::messages_in(id)).await?;
    let mut messages = Vec::with_capacity(set.len());
    for doc in set.iter() {
        match transform::message_from_document(doc) {
            Ok(message) => messages.push(message),
            Err(e) => warn!(conversation = %id, error = %e, "skipping undecodable message"),
        }
    }

    debug!(conversation = %id, messages = messages.len(), "static snapshot loaded");
    Ok(StaticSnapshot { conversation, messages })
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageView {
    pub id: MessageId,
    pub text: String,
    pub author: UserEmail,
    pub sent_at: String,
    pub is_own: bool,
    pub pending: bool,
}

impl MessageView {
    pub fn new(message: &Message, me: &UserEmail) -> Self {
        Self {
            id: message.id.clone(),
            text: message.text.clone(),
            author: message.user.clone(),
            sent_at: transform::format_timestamp(Some(&message.sent_at)),
            is_own: &message.user == me,
            pending: message.sent_at.is_pending(),
        }
    }
}

pub struct ConversationView {
    store: Arc<dyn DocumentStore>,
    me: UserEmail,
    events: Option<EventSender>,
    conversation: Conversation,
    recipient: Recipient,
    messages: LiveFeed<Message>,
    composer: Composer,
}

impl ConversationView {
    /// Show `snapshot` immediately and go live on its conversation.
    pub async fn open(
        store: Arc<dyn DocumentStore>,
        me: UserEmail,
        snapshot: StaticSnapshot,
        events: Option<EventSender>,
    ) -> Self {
        let mut messages = LiveFeed::messages(store.clone());
        if let Some(events) = &events {
            messages = messages.with_events(events.clone());
        }

        let id = snapshot.conversation.id.clone();
        let users = &snapshot.conversation.users;
        let recipient = Recipient::resolve(store.clone(), users, &me, events.clone()).await;
        let composer = Composer::new(store.clone(), me.clone(), id.clone(), events.clone());

        let mut view = Self {
            store,
            me,
            events,
            conversation: snapshot.conversation,
            recipient,
            messages,
            composer,
        };
        view.go_live(snapshot.messages).await;
        info!(conversation = %id, recipient = %view.recipient.email(), "conversation opened");
        view
    }

    /// Point the view at another conversation. Everything keyed to the old id
    /// is cancelled before the new subscriptions open.
    pub async fn switch_to(&mut self, snapshot: StaticSnapshot) {
        let from = self.conversation.id.clone();
        self.messages.close();

        let id = snapshot.conversation.id.clone();
        self.recipient = Recipient::resolve(
            self.store.clone(),
            &snapshot.conversation.users,
            &self.me,
            self.events.clone(),
        )
        .await;
        self.composer = Composer::new(
            self.store.clone(),
            self.me.clone(),
            id.clone(),
            self.events.clone(),
        );
        self.conversation = snapshot.conversation;

        self.go_live(snapshot.messages).await;
        info!(from = %from, to = %id, "switched conversation");
    }

    async fn go_live(&mut self, snapshot: Vec<Message>) {
        if let Err(e) = self.messages.open_conversation(&self.conversation.id, snapshot).await {
            warn!(conversation = %self.conversation.id, error = %e, "message feed unavailable");
        }
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub fn id(&self) -> &ConversationId {
        &self.conversation.id
    }

    pub fn messages(&self) -> Vec<MessageView> {
        self.messages
            .items()
            .iter()
            .map(|m| MessageView::new(m, &self.me))
            .collect()
    }

    pub fn message_state(&self) -> FeedView<Message> {
        self.messages.current()
    }

    pub fn watch_messages(&self) -> watch::Receiver<FeedView<Message>> {
        self.messages.watch()
    }

    pub fn recipient(&self) -> RecipientView {
        self.recipient.view()
    }

    pub fn composer(&self) -> &Composer {
        &self.composer
    }

    /// Re-open whichever subscriptions have become unavailable.
    pub async fn retry(&mut self) -> Result<()> {
        self.messages.retry().await?;
        self.recipient.retry().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::composer::SendOutcome;
    use crate::testing::wait_for;
    use duet_store::{LocalStore, WriteFields};
    use serde_json::json;

    async fn seed(local: &LocalStore, users: [&str; 2]) -> ConversationId {
        let id = local
            .append("conversations", WriteFields::new().set("users", json!(users)))
            .await
            .unwrap();
        ConversationId(id.0)
    }

    async fn say(local: &LocalStore, conversation: &ConversationId, user: &str, text: &str) {
        local
            .append(
                "messages",
                WriteFields::new()
                    .set("conversation_id", conversation.as_str())
                    .set("text", text)
                    .set("user", user)
                    .server_timestamp("sent_at"),
            )
            .await
            .unwrap();
    }

    fn texts(view: &ConversationView) -> Vec<String> {
        view.messages().into_iter().map(|m| m.text).collect()
    }

    #[tokio::test]
    async fn test_static_snapshot_in_order() {
        let local = LocalStore::in_memory().unwrap();
        let id = seed(&local, ["a@x", "b@x"]).await;
        say(&local, &id, "a@x", "one").await;
        say(&local, &id, "b@x", "two").await;

        let snapshot = load_static_snapshot(&local, &id).await.unwrap();
        assert_eq!(snapshot.conversation.id, id);
        let texts: Vec<_> = snapshot.messages.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec!["one", "two"]);
    }

    #[tokio::test]
    async fn test_missing_conversation() {
        let local = LocalStore::in_memory().unwrap();
        let err = load_static_snapshot(&local, &ConversationId::from("nope"))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::ConversationNotFound(_)));
    }

    #[tokio::test]
    async fn test_send_shows_up_through_live_feed() {
        let local = LocalStore::in_memory().unwrap();
        let id = seed(&local, ["a@x", "b@x"]).await;
        say(&local, &id, "b@x", "hey").await;

        let snapshot = load_static_snapshot(&local, &id).await.unwrap();
        let store = Arc::new(local.clone());
        let view = ConversationView::open(store, UserEmail::from("a@x"), snapshot, None).await;
        assert_eq!(view.recipient().email.as_str(), "b@x");
        assert_eq!(texts(&view), vec!["hey"]);

        let mut rx = view.watch_messages();
        view.composer().set_text("hello");
        assert!(matches!(view.composer().send().await.unwrap(), SendOutcome::Sent(_)));

        wait_for(&mut rx, |v| v.state.items().len() == 2).await;
        let messages = view.messages();
        assert_eq!(messages[1].text, "hello");
        assert!(messages[1].is_own);
        assert!(!messages[0].is_own);
        assert_eq!(view.composer().text(), "");
    }

    #[tokio::test]
    async fn test_switch_drops_old_conversation() {
        let local = LocalStore::in_memory().unwrap();
        let first = seed(&local, ["a@x", "b@x"]).await;
        let second = seed(&local, ["a@x", "c@x"]).await;
        say(&local, &first, "b@x", "in first").await;

        let snapshot = load_static_snapshot(&local, &first).await.unwrap();
        let store = Arc::new(local.clone());
        let mut view = ConversationView::open(store, UserEmail::from("a@x"), snapshot, None).await;
        wait_for(&mut view.watch_messages(), |v| v.state.is_live()).await;

        let snapshot = load_static_snapshot(&local, &second).await.unwrap();
        view.switch_to(snapshot).await;
        assert_eq!(view.id(), &second);
        assert_eq!(view.recipient().email.as_str(), "c@x");
        assert_eq!(view.composer().conversation_id(), &second);

        say(&local, &first, "b@x", "late write to first").await;
        say(&local, &second, "c@x", "in second").await;

        let mut rx = view.watch_messages();
        wait_for(&mut rx, |v| v.state.items().len() == 1).await;
        assert_eq!(texts(&view), vec!["in second"]);
        assert_eq!(view.message_state().key.as_deref(), Some(second.as_str()));
    }
}
