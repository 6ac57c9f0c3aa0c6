//! Live subscription manager.
//!
//! A [`LiveFeed`] keeps one live query open for one key (a conversation id,
//! a user email) and publishes its decoded result through a `watch` channel
//! as a [`FeedState`]:
//!
//! ```text
//! Warming(static snapshot) --first delivery--> Live(latest delivery)
//!          |                                        |
//!          +------------ subscription error --------+--> Unavailable
//! ```
//!
//! `Live` never goes back to `Warming`. Every open bumps a generation number;
//! a pump only writes while its generation is current, so a delivery for a
//! key that has since been replaced is discarded. Records that do not belong
//! to the current key are dropped as well. The store's delivery order is kept
//! as is.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use duet_shared::constants::{FIELD_CONVERSATION_ID, FIELD_USERS};
use duet_shared::{ConversationId, UserEmail};
use duet_store::{Document, DocumentStore, Query, ResultSet, Subscription};

use crate::error::Result;
use crate::events::{emit_event, ClientEvent, EventSender};
use crate::models::{Conversation, Message, User};
use crate::queries;
use crate::transform;

#[derive(Debug, Clone, PartialEq)]
pub enum FeedState<T> {
    /// No live delivery yet; the static snapshot stands in.
    Warming(Vec<T>),
    /// The latest live delivery.
    Live(Vec<T>),
    /// The subscription failed. `last` is what was on screen at the time.
    Unavailable {
        last: Vec<T>,
        went_live: bool,
        reason: String,
    },
}

impl<T> FeedState<T> {
    pub fn items(&self) -> &[T] {
        match self {
            Self::Warming(items) | Self::Live(items) => items,
            Self::Unavailable { last, .. } => last,
        }
    }

    pub fn is_warming(&self) -> bool {
        matches!(self, Self::Warming(_))
    }

    pub fn is_live(&self) -> bool {
        matches!(self, Self::Live(_))
    }

    pub fn unavailable_reason(&self) -> Option<&str> {
        match self {
            Self::Unavailable { reason, .. } => Some(reason),
            _ => None,
        }
    }

    /// Whether a live delivery has ever been applied.
    pub fn has_gone_live(&self) -> bool {
        match self {
            Self::Warming(_) => false,
            Self::Live(_) => true,
            Self::Unavailable { went_live, .. } => *went_live,
        }
    }
}

/// What a feed currently shows, tagged with the key and generation it was
/// produced for.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedView<T> {
    pub key: Option<String>,
    pub generation: u64,
    pub state: FeedState<T>,
}

type Decode<T> = fn(&Document) -> Result<T>;
type Belongs = fn(&Document, &str) -> bool;

pub struct LiveFeed<T> {
    name: &'static str,
    store: Arc<dyn DocumentStore>,
    decode: Decode<T>,
    belongs: Belongs,
    state: Arc<watch::Sender<FeedView<T>>>,
    active: Option<ActiveSubscription>,
    generation: u64,
    events: Option<EventSender>,
}

struct ActiveSubscription {
    key: String,
    query: Query,
    pump: Option<JoinHandle<()>>,
}

impl Drop for ActiveSubscription {
    fn drop(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
    }
}

impl<T> LiveFeed<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    pub fn new(
        name: &'static str,
        store: Arc<dyn DocumentStore>,
        decode: Decode<T>,
        belongs: Belongs,
    ) -> Self {
        let (state, _) = watch::channel(FeedView {
            key: None,
            generation: 0,
            state: FeedState::Warming(Vec::new()),
        });
        Self {
            name,
            store,
            decode,
            belongs,
            state: Arc::new(state),
            active: None,
            generation: 0,
            events: None,
        }
    }

    /// Report subscription failures as [`ClientEvent::SyncUnavailable`].
    pub fn with_events(mut self, events: EventSender) -> Self {
        self.events = Some(events);
        self
    }

    pub fn key(&self) -> Option<&str> {
        self.active.as_ref().map(|a| a.key.as_str())
    }

    pub fn watch(&self) -> watch::Receiver<FeedView<T>> {
        self.state.subscribe()
    }

    pub fn current(&self) -> FeedView<T> {
        self.state.borrow().clone()
    }

    pub fn items(&self) -> Vec<T> {
        self.state.borrow().state.items().to_vec()
    }

    /// Subscribe for `key`, showing `snapshot` until the first live delivery.
    /// Any subscription for a previous key is cancelled first.
    ///
    /// On error the feed is left `Unavailable` and can be retried.
    pub async fn open(
        &mut self,
        key: impl Into<String>,
        query: Query,
        snapshot: Vec<T>,
    ) -> Result<()> {
        let key = key.into();
        self.close();

        let generation = self.next_generation();
        self.state.send_replace(FeedView {
            key: Some(key.clone()),
            generation,
            state: FeedState::Warming(snapshot),
        });

        self.start(key, query, generation).await
    }

    /// Cancel the subscription. The last published view stays readable.
    pub fn close(&mut self) {
        if let Some(active) = self.active.take() {
            debug!(feed = self.name, key = %active.key, "closing subscription");
        }

        let generation = self.next_generation();
        self.state.send_if_modified(|view| {
            view.generation = generation;
            false
        });
    }

    /// Re-open a subscription that became unavailable. A feed that had gone
    /// live keeps its last live items; one that had not keeps its snapshot.
    pub async fn retry(&mut self) -> Result<()> {
        let Some(active) = self.active.take() else {
            return Ok(());
        };
        if self.state.borrow().state.unavailable_reason().is_none() {
            self.active = Some(active);
            return Ok(());
        }

        let (key, query) = (active.key.clone(), active.query.clone());
        drop(active);

        let generation = self.next_generation();
        self.state.send_modify(|view| {
            view.generation = generation;
            let next = match &mut view.state {
                FeedState::Unavailable { last, went_live, .. } => {
                    let items = std::mem::take(last);
                    Some(if *went_live {
                        FeedState::Live(items)
                    } else {
                        FeedState::Warming(items)
                    })
                }
                _ => None,
            };
            if let Some(next) = next {
                view.state = next;
            }
        });

        info!(feed = self.name, key = %key, "retrying subscription");
        self.start(key, query, generation).await
    }

    fn next_generation(&mut self) -> u64 {
        self.generation += 1;
        self.generation
    }

    async fn start(&mut self, key: String, query: Query, generation: u64) -> Result<()> {
        debug!(feed = self.name, key = %key, query = %query, "opening subscription");

        let pump = Pump {
            name: self.name,
            key: key.clone(),
            generation,
            decode: self.decode,
            belongs: self.belongs,
            state: self.state.clone(),
            events: self.events.clone(),
        };

        match self.store.subscribe(query.clone()).await {
            Ok(subscription) => {
                let handle = tokio::spawn(pump.run(subscription));
                self.active = Some(ActiveSubscription {
                    key,
                    query,
                    pump: Some(handle),
                });
                Ok(())
            }
            Err(e) => {
                pump.fail(&e.to_string());
                self.active = Some(ActiveSubscription {
                    key,
                    query,
                    pump: None,
                });
                Err(e.into())
            }
        }
    }
}

/// Moves deliveries of one subscription into the feed's state.
struct Pump<T> {
    name: &'static str,
    key: String,
    generation: u64,
    decode: Decode<T>,
    belongs: Belongs,
    state: Arc<watch::Sender<FeedView<T>>>,
    events: Option<EventSender>,
}

impl<T> Pump<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    async fn run(self, mut subscription: Subscription) {
        while let Some(delivery) = subscription.next_delivery().await {
            match delivery {
                Ok(set) => self.apply(&set),
                Err(e) => {
                    self.fail(&e.reason);
                    return;
                }
            }
        }
        self.fail("subscription closed by the store");
    }

    fn decode_all(&self, set: &ResultSet) -> Vec<T> {
        let mut seen = HashSet::new();
        let mut items = Vec::with_capacity(set.len());

        for doc in set.iter() {
            if !(self.belongs)(doc, &self.key) {
                debug!(
                    feed = self.name,
                    key = %self.key,
                    id = %doc.id,
                    "dropping record of another key"
                );
                continue;
            }
            if !seen.insert(&doc.id) {
                continue;
            }
            match (self.decode)(doc) {
                Ok(item) => items.push(item),
                Err(e) => warn!(feed = self.name, error = %e, "skipping undecodable record"),
            }
        }
        items
    }

    fn apply(&self, set: &ResultSet) {
        let items = self.decode_all(set);
        let count = items.len();
        let mut stale = false;

        let changed = self.state.send_if_modified(|view| {
            if view.generation != self.generation {
                stale = true;
                return false;
            }
            let next = FeedState::Live(items);
            if view.state == next {
                return false;
            }
            view.state = next;
            true
        });

        if stale {
            debug!(feed = self.name, key = %self.key, "discarding delivery for a replaced key");
        } else if changed {
            debug!(
                feed = self.name,
                key = %self.key,
                count,
                pending = set.has_pending_writes,
                "live delivery applied"
            );
        }
    }

    fn fail(&self, reason: &str) {
        let failed = self.state.send_if_modified(|view| {
            if view.generation != self.generation || view.state.unavailable_reason().is_some() {
                return false;
            }
            view.state = FeedState::Unavailable {
                last: view.state.items().to_vec(),
                went_live: view.state.has_gone_live(),
                reason: reason.to_string(),
            };
            true
        });

        if failed {
            warn!(feed = self.name, key = %self.key, reason, "subscription unavailable");
            if let Some(events) = &self.events {
                emit_event(
                    events,
                    ClientEvent::SyncUnavailable {
                        feed: self.name.to_string(),
                        key: self.key.clone(),
                        reason: reason.to_string(),
                    },
                );
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Typed feeds
// ---------------------------------------------------------------------------

impl LiveFeed<Message> {
    pub fn messages(store: Arc<dyn DocumentStore>) -> Self {
        Self::new("messages", store, transform::message_from_document, |doc, key| {
            doc.get_str(FIELD_CONVERSATION_ID) == Some(key)
        })
    }

    pub async fn open_conversation(
        &mut self,
        id: &ConversationId,
        snapshot: Vec<Message>,
    ) -> Result<()> {
        self.open(id.as_str(), queries::messages_in(id), snapshot).await
    }
}

impl LiveFeed<Conversation> {
    pub fn conversations(store: Arc<dyn DocumentStore>) -> Self {
        Self::new("conversations", store, transform::conversation_from_document, |doc, key| {
            doc.get(FIELD_USERS)
                .and_then(|v| v.as_array())
                .map_or(false, |users| users.iter().any(|u| u.as_str() == Some(key)))
        })
    }

    /// Conversations list has no static snapshot: it starts empty.
    pub async fn open_for(&mut self, me: &UserEmail) -> Result<()> {
        self.open(me.as_str(), queries::conversations_of(me), Vec::new()).await
    }
}

impl LiveFeed<User> {
    pub fn users(store: Arc<dyn DocumentStore>) -> Self {
        Self::new("users", store, transform::user_from_document, |doc, key| {
            doc.id.as_str() == key
        })
    }

    pub async fn open_user(&mut self, email: &UserEmail) -> Result<()> {
        self.open(email.as_str(), queries::user(email), Vec::new()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{message_doc, wait_for, ManualStore};
    use duet_store::{LocalStore, StoreError, SubscriptionError, WriteFields};
    use serde_json::json;

    fn result_set(documents: Vec<Document>) -> ResultSet {
        ResultSet {
            documents,
            has_pending_writes: false,
        }
    }

    fn texts(items: &[Message]) -> Vec<&str> {
        items.iter().map(|m| m.text.as_str()).collect()
    }

    fn snapshot_message(id: &str, text: &str) -> Message {
        transform::message_from_document(&message_doc(id, "c1", text, 1)).unwrap()
    }

    #[tokio::test]
    async fn test_snapshot_shown_until_first_delivery() {
        let store = Arc::new(ManualStore::default());
        let mut feed = LiveFeed::messages(store.clone());
        let mut rx = feed.watch();

        let snapshot = vec![snapshot_message("m1", "from snapshot")];
        feed.open_conversation(&ConversationId::from("c1"), snapshot)
            .await
            .unwrap();

        let view = feed.current();
        assert_eq!(view.key.as_deref(), Some("c1"));
        assert!(view.state.is_warming());
        assert_eq!(texts(view.state.items()), vec!["from snapshot"]);

        store
            .sender(0)
            .send(Ok(result_set(vec![
                message_doc("m1", "c1", "from snapshot", 1),
                message_doc("m2", "c1", "live", 2),
            ])))
            .await
            .unwrap();

        let view = wait_for(&mut rx, |v| v.state.is_live()).await;
        assert_eq!(texts(view.state.items()), vec!["from snapshot", "live"]);
    }

    #[tokio::test]
    async fn test_live_never_reverts_to_snapshot() {
        let store = Arc::new(ManualStore::default());
        let mut feed = LiveFeed::messages(store.clone());
        let mut rx = feed.watch();

        feed.open_conversation(&ConversationId::from("c1"), vec![snapshot_message("m1", "old")])
            .await
            .unwrap();
        let tx = store.sender(0);

        tx.send(Ok(result_set(vec![message_doc("m1", "c1", "old", 1)])))
            .await
            .unwrap();
        wait_for(&mut rx, |v| v.state.is_live()).await;

        tx.send(Ok(result_set(Vec::new()))).await.unwrap();
        let view = wait_for(&mut rx, |v| v.state.items().is_empty()).await;
        assert_eq!(view.state, FeedState::Live(Vec::new()));
    }

    #[tokio::test]
    async fn test_records_of_other_conversations_dropped() {
        let store = Arc::new(ManualStore::default());
        let mut feed = LiveFeed::messages(store.clone());
        let mut rx = feed.watch();

        feed.open_conversation(&ConversationId::from("c1"), Vec::new())
            .await
            .unwrap();
        store
            .sender(0)
            .send(Ok(result_set(vec![
                message_doc("m1", "c1", "mine", 1),
                message_doc("x1", "c2", "cross-talk", 2),
                message_doc("m1", "c1", "mine", 1),
            ])))
            .await
            .unwrap();

        let view = wait_for(&mut rx, |v| v.state.is_live()).await;
        assert_eq!(texts(view.state.items()), vec!["mine"]);
    }

    #[tokio::test]
    async fn test_switching_key_cancels_previous_subscription() {
        let store = Arc::new(ManualStore::default());
        let mut feed = LiveFeed::messages(store.clone());
        let mut rx = feed.watch();

        feed.open_conversation(&ConversationId::from("c1"), Vec::new())
            .await
            .unwrap();
        let old = store.sender(0);

        let snapshot = vec![snapshot_message("s", "c2 snapshot")];
        feed.open_conversation(&ConversationId::from("c2"), snapshot)
            .await
            .unwrap();
        assert_eq!(feed.key(), Some("c2"));

        // The old subscription's receiver is gone once its pump is aborted.
        tokio::time::timeout(std::time::Duration::from_secs(2), old.closed())
            .await
            .expect("old subscription released");

        let view = feed.current();
        assert_eq!(view.key.as_deref(), Some("c2"));
        assert!(view.state.is_warming());

        store
            .sender(1)
            .send(Ok(result_set(vec![message_doc("n1", "c2", "new", 5)])))
            .await
            .unwrap();
        let view = wait_for(&mut rx, |v| v.state.is_live()).await;
        assert_eq!(texts(view.state.items()), vec!["new"]);
    }

    #[tokio::test]
    async fn test_error_marks_unavailable_and_retry_resumes_live() {
        let store = Arc::new(ManualStore::default());
        let events = crate::events::event_channel();
        let mut event_rx = events.subscribe();
        let mut feed = LiveFeed::messages(store.clone()).with_events(events);
        let mut rx = feed.watch();
        let query = queries::messages_in(&ConversationId::from("c1"));

        feed.open_conversation(&ConversationId::from("c1"), Vec::new())
            .await
            .unwrap();
        let tx = store.sender(0);
        tx.send(Ok(result_set(vec![message_doc("m1", "c1", "kept", 1)])))
            .await
            .unwrap();
        wait_for(&mut rx, |v| v.state.is_live()).await;

        tx.send(Err(SubscriptionError::new(&query, "permission denied")))
            .await
            .unwrap();
        let view = wait_for(&mut rx, |v| v.state.unavailable_reason().is_some()).await;
        assert_eq!(view.state.unavailable_reason(), Some("permission denied"));
        assert_eq!(texts(view.state.items()), vec!["kept"]);
        assert!(view.state.has_gone_live());

        match event_rx.recv().await.unwrap() {
            ClientEvent::SyncUnavailable { feed, key, .. } => {
                assert_eq!(feed, "messages");
                assert_eq!(key, "c1");
            }
            other => panic!("unexpected event {other:?}"),
        }

        feed.retry().await.unwrap();
        let view = feed.current();
        assert_eq!(view.state, FeedState::Live(vec![snapshot_message("m1", "kept")]));

        store
            .sender(1)
            .send(Ok(result_set(vec![
                message_doc("m1", "c1", "kept", 1),
                message_doc("m2", "c1", "after retry", 2),
            ])))
            .await
            .unwrap();
        let view = wait_for(&mut rx, |v| v.state.items().len() == 2).await;
        assert!(view.state.is_live());
    }

    #[tokio::test]
    async fn test_subscribe_failure_keeps_snapshot() {
        let store = Arc::new(ManualStore::default());
        store.set_offline(true);
        let mut feed = LiveFeed::messages(store.clone());

        let err = feed
            .open_conversation(&ConversationId::from("c1"), vec![snapshot_message("m1", "snap")])
            .await
            .unwrap_err();
        assert!(matches!(err, crate::error::ClientError::Store(StoreError::Unavailable(_))));

        let view = feed.current();
        assert!(!view.state.has_gone_live());
        assert_eq!(texts(view.state.items()), vec!["snap"]);

        store.set_offline(false);
        feed.retry().await.unwrap();
        assert!(feed.current().state.is_warming());
        assert_eq!(texts(&feed.items()), vec!["snap"]);
    }

    #[tokio::test]
    async fn test_closed_stream_marks_unavailable() {
        let store = Arc::new(ManualStore::default());
        let mut feed = LiveFeed::messages(store.clone());
        let mut rx = feed.watch();

        feed.open_conversation(&ConversationId::from("c1"), Vec::new())
            .await
            .unwrap();
        store.drop_senders();

        let view = wait_for(&mut rx, |v| v.state.unavailable_reason().is_some()).await;
        assert!(!view.state.has_gone_live());
    }

    #[tokio::test]
    async fn test_against_local_store() {
        let local = LocalStore::in_memory().unwrap();
        let store: Arc<dyn DocumentStore> = Arc::new(local.clone());

        let mut feed = LiveFeed::conversations(store.clone());
        let mut rx = feed.watch();
        feed.open_for(&UserEmail::from("a@x")).await.unwrap();
        wait_for(&mut rx, |v| v.state.is_live()).await;

        local
            .append("conversations", WriteFields::new().set("users", json!(["a@x", "b@x"])))
            .await
            .unwrap();
        local
            .append("conversations", WriteFields::new().set("users", json!(["b@x", "c@x"])))
            .await
            .unwrap();

        let view = wait_for(&mut rx, |v| !v.state.items().is_empty()).await;
        assert_eq!(view.state.items().len(), 1);
        assert_eq!(
            view.state.items()[0].users,
            vec![UserEmail::from("a@x"), UserEmail::from("b@x")]
        );

        let mut users = LiveFeed::users(store);
        let mut user_rx = users.watch();
        users.open_user(&UserEmail::from("b@x")).await.unwrap();
        let view = wait_for(&mut user_rx, |v| v.state.is_live()).await;
        assert!(view.state.items().is_empty());

        local
            .merge_update(
                "users",
                &duet_store::DocumentId::from("b@x"),
                WriteFields::new().set("photo_url", "b.png"),
            )
            .await
            .unwrap();
        let view = wait_for(&mut user_rx, |v| !v.state.items().is_empty()).await;
        assert_eq!(view.state.items()[0].photo_url.as_deref(), Some("b.png"));

    }
}
