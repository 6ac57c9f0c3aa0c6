//! Conversation resolver: who the other party is, and their live profile.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, warn};

use duet_shared::UserEmail;
use duet_store::DocumentStore;

use crate::error::Result;
use crate::events::EventSender;
use crate::feed::{FeedView, LiveFeed};
use crate::models::User;
use crate::transform;

/// The first participant who is not `current`. A degenerate list (only the
/// current user, or empty) resolves to `current` itself.
pub fn recipient_email(users: &[UserEmail], current: &UserEmail) -> UserEmail {
    users
        .iter()
        .find(|u| *u != current)
        .cloned()
        .unwrap_or_else(|| current.clone())
}

/// What the header shows for the other party.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecipientView {
    pub email: UserEmail,
    pub photo_url: Option<String>,
    pub last_seen: String,
    pub profile_loaded: bool,
}

impl RecipientView {
    /// Identifier known, profile not loaded yet.
    pub fn placeholder(email: UserEmail) -> Self {
        Self {
            email,
            photo_url: None,
            last_seen: transform::last_seen_label(None),
            profile_loaded: false,
        }
    }

    pub fn from_user(email: UserEmail, user: Option<&User>) -> Self {
        match user {
            Some(user) => Self {
                email,
                photo_url: user.photo_url.clone(),
                last_seen: transform::last_seen_label(user.last_seen.as_ref()),
                profile_loaded: true,
            },
            None => Self::placeholder(email),
        }
    }
}

/// A resolved recipient plus the live subscription on their user record.
pub struct Recipient {
    email: UserEmail,
    profile: LiveFeed<User>,
}

impl Recipient {
    /// Resolve the recipient and start watching their profile. A profile
    /// subscription that cannot be opened leaves the placeholder in place.
    pub async fn resolve(
        store: Arc<dyn DocumentStore>,
        users: &[UserEmail],
        current: &UserEmail,
        events: Option<EventSender>,
    ) -> Self {
        let email = recipient_email(users, current);
        debug!(recipient = %email, "resolved recipient");
        Self::watch_profile(store, email, events).await
    }

    /// Watch the profile of an already known recipient.
    pub async fn watch_profile(
        store: Arc<dyn DocumentStore>,
        email: UserEmail,
        events: Option<EventSender>,
    ) -> Self {
        let mut profile = LiveFeed::users(store);
        if let Some(events) = events {
            profile = profile.with_events(events);
        }
        if let Err(e) = profile.open_user(&email).await {
            warn!(recipient = %email, error = %e, "recipient profile unavailable");
        }

        Self { email, profile }
    }

    pub fn email(&self) -> &UserEmail {
        &self.email
    }

    pub fn profile(&self) -> Option<User> {
        self.profile.items().into_iter().next()
    }

    pub fn view(&self) -> RecipientView {
        RecipientView::from_user(self.email.clone(), self.profile().as_ref())
    }

    pub fn watch(&self) -> watch::Receiver<FeedView<User>> {
        self.profile.watch()
    }

    pub async fn retry(&mut self) -> Result<()> {
        self.profile.retry().await
    }
}
