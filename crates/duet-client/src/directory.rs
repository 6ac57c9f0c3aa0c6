//! Conversation directory: the live list of the current user's
//! conversations, and creation of new ones with dedup by recipient.
//!
//! Dedup is checked against the locally cached live list, so two clients
//! creating the same pair at the same moment can both succeed. Within one
//! client, a create that is still in flight and a conversation created but
//! not yet delivered by the live list both count as existing.
//!
//! Every listed conversation is annotated with its recipient's live profile.
//! A background task opens one profile subscription per recipient as they
//! appear in the list.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use serde_json::json;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use duet_shared::constants::{CONVERSATIONS_COLLECTION, FIELD_USERS};
use duet_shared::{ConversationId, UserEmail};
use duet_store::{DocumentStore, WriteFields};

use crate::error::Result;
use crate::events::{emit_event, ClientEvent, EventSender};
use crate::feed::{FeedView, LiveFeed};
use crate::models::Conversation;
use crate::resolver::{recipient_email, Recipient, RecipientView};

/// A conversation annotated with its recipient. The recipient's profile
/// fields stay empty until their record has been delivered.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryEntry {
    pub conversation: Conversation,
    pub recipient: RecipientView,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateOutcome {
    Created(ConversationId),
    Skipped(SkipReason),
}

impl CreateOutcome {
    pub fn is_created(&self) -> bool {
        matches!(self, Self::Created(_))
    }
}

/// Why a create did not write anything.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    Empty,
    InvalidEmail,
    SelfInvite,
    AlreadyExists(ConversationId),
    InFlight,
}

pub struct ConversationDirectory {
    store: Arc<dyn DocumentStore>,
    me: UserEmail,
    feed: LiveFeed<Conversation>,
    in_flight: Mutex<HashSet<UserEmail>>,
    recently_created: Mutex<HashMap<UserEmail, ConversationId>>,
    profiles: Arc<Mutex<HashMap<UserEmail, Recipient>>>,
    profile_tracker: JoinHandle<()>,
    events: Option<EventSender>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ConversationDirectory {
    /// Start the live list for `me`. If the subscription cannot be opened
    /// the list is `Unavailable` and [`ConversationDirectory::retry`] applies.
    pub async fn open(
        store: Arc<dyn DocumentStore>,
        me: UserEmail,
        events: Option<EventSender>,
    ) -> Self {
        let me = me.normalized();
        let mut feed = LiveFeed::conversations(store.clone());
        if let Some(events) = &events {
            feed = feed.with_events(events.clone());
        }
        if let Err(e) = feed.open_for(&me).await {
            warn!(user = %me, error = %e, "conversation list unavailable");
        }

        let profiles = Arc::default();
        let profile_tracker = tokio::spawn(track_profiles(
            store.clone(),
            me.clone(),
            feed.watch(),
            Arc::clone(&profiles),
            events.clone(),
        ));

        Self {
            store,
            me,
            feed,
            in_flight: Mutex::default(),
            recently_created: Mutex::default(),
            profiles,
            profile_tracker,
            events,
        }
    }

    pub fn me(&self) -> &UserEmail {
        &self.me
    }

    pub fn watch(&self) -> watch::Receiver<FeedView<Conversation>> {
        self.feed.watch()
    }

    /// The latest live list, in store order.
    pub fn conversations(&self) -> Vec<Conversation> {
        self.feed.items()
    }

    pub fn entries(&self) -> Vec<DirectoryEntry> {
        let conversations = self.conversations();
        let profiles = lock(&self.profiles);
        conversations
            .into_iter()
            .map(|conversation| {
                let email = recipient_email(&conversation.users, &self.me);
                let recipient = match profiles.get(&email) {
                    Some(profile) => profile.view(),
                    None => RecipientView::placeholder(email),
                };
                DirectoryEntry {
                    conversation,
                    recipient,
                }
            })
            .collect()
    }

    pub async fn retry(&mut self) -> Result<()> {
        self.feed.retry().await
    }

    /// Create a conversation between the current user and `recipient`.
    ///
    /// Invalid, self-targeted or duplicate requests are skipped without
    /// touching the store. Only a rejected append is an error.
    pub async fn create(&self, recipient: &str) -> Result<CreateOutcome> {
        let recipient = recipient.trim();
        if recipient.is_empty() {
            return Ok(CreateOutcome::Skipped(SkipReason::Empty));
        }

        let recipient = match UserEmail::parse(recipient) {
            Ok(email) => email,
            Err(e) => {
                debug!(error = %e, "create skipped: invalid email");
                return Ok(CreateOutcome::Skipped(SkipReason::InvalidEmail));
            }
        };

        if recipient == self.me {
            debug!(recipient = %recipient, "create skipped: self invite");
            return Ok(CreateOutcome::Skipped(SkipReason::SelfInvite));
        }

        if let Some(existing) = self.existing_with(&recipient) {
            debug!(
                recipient = %recipient,
                conversation = %existing,
                "create skipped: already exists"
            );
            return Ok(CreateOutcome::Skipped(SkipReason::AlreadyExists(existing)));
        }

        let Some(_claim) = InFlight::claim(&self.in_flight, recipient.clone()) else {
            debug!(recipient = %recipient, "create skipped: already in flight");
            return Ok(CreateOutcome::Skipped(SkipReason::InFlight));
        };

        let users = json!([self.me.as_str(), recipient.as_str()]);
        let fields = WriteFields::new().set(FIELD_USERS, users);
        let id = ConversationId(self.store.append(CONVERSATIONS_COLLECTION, fields).await?.0);

        lock(&self.recently_created).insert(recipient.clone(), id.clone());
        info!(conversation = %id, recipient = %recipient, "conversation created");

        if let Some(events) = &self.events {
            emit_event(
                events,
                ClientEvent::ConversationCreated {
                    conversation_id: id.clone(),
                    recipient: recipient.clone(),
                },
            );
        }

        Ok(CreateOutcome::Created(id))
    }

    /// A conversation with `recipient` in the live list, or one created by
    /// this client that the list has not delivered yet.
    fn existing_with(&self, recipient: &UserEmail) -> Option<ConversationId> {
        let listed = self.conversations();
        let mut recent = lock(&self.recently_created);
        recent.retain(|_, id| !listed.iter().any(|c| &c.id == id));

        listed
            .iter()
            .find(|c| c.includes(recipient))
            .map(|c| c.id.clone())
            .or_else(|| recent.get(recipient).cloned())
    }
}

impl Drop for ConversationDirectory {
    fn drop(&mut self) {
        self.profile_tracker.abort();
    }
}

/// Open a profile subscription for each recipient that shows up in the
/// conversation list. Subscriptions stay open for the directory's lifetime.
async fn track_profiles(
    store: Arc<dyn DocumentStore>,
    me: UserEmail,
    mut conversations: watch::Receiver<FeedView<Conversation>>,
    profiles: Arc<Mutex<HashMap<UserEmail, Recipient>>>,
    events: Option<EventSender>,
) {
    loop {
        let wanted: Vec<UserEmail> = conversations
            .borrow_and_update()
            .state
            .items()
            .iter()
            .map(|c| recipient_email(&c.users, &me))
            .collect();

        for email in wanted {
            let known = lock(&profiles).contains_key(&email);
            if known {
                continue;
            }
            let recipient =
                Recipient::watch_profile(store.clone(), email.clone(), events.clone()).await;
            lock(&profiles).entry(email).or_insert(recipient);
        }

        if conversations.changed().await.is_err() {
            break;
        }
    }
}

/// Marks a recipient as having a create in progress until dropped.
struct InFlight<'a> {
    set: &'a Mutex<HashSet<UserEmail>>,
    key: UserEmail,
}

impl<'a> InFlight<'a> {
    fn claim(set: &'a Mutex<HashSet<UserEmail>>, key: UserEmail) -> Option<Self> {
        lock(set).insert(key.clone()).then(|| Self { set, key })
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        lock(self.set).remove(&self.key);
    }
}
