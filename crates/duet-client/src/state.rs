//! Application state shared by every front end.
//!
//! [`AppState`] ties the store, the identity provider and the event channel
//! together and hands out directories and conversation views bound to the
//! signed-in user.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::info;

use duet_shared::constants::{FIELD_EMAIL, FIELD_LAST_SEEN, FIELD_PHOTO_URL, USERS_COLLECTION};
use duet_shared::ConversationId;
use duet_store::{DocumentId, DocumentStore, WriteFields};

use crate::directory::ConversationDirectory;
use crate::error::{ClientError, Result};
use crate::events::{emit_event, event_channel, ClientEvent, EventSender};
use crate::session::{IdentityProvider, Session};
use crate::view::{load_static_snapshot, ConversationView};

pub struct AppState {
    store: Arc<dyn DocumentStore>,
    identity: Arc<dyn IdentityProvider>,
    /// `None` until [`AppState::sign_in`] succeeds.
    session: Option<Session>,
    events: EventSender,
}

impl AppState {
    pub fn new(store: Arc<dyn DocumentStore>, identity: Arc<dyn IdentityProvider>) -> Self {
        Self {
            store,
            identity,
            session: None,
            events: event_channel(),
        }
    }

    pub fn store(&self) -> Arc<dyn DocumentStore> {
        self.store.clone()
    }

    /// Wait for the identity provider and announce the user's presence.
    pub async fn sign_in(&mut self) -> Result<Session> {
        let mut session = self
            .identity
            .current_user()
            .await
            .ok_or(ClientError::NotAuthenticated)?;
        session.email = session.email.normalized();

        self.announce_presence(&session).await?;
        info!(user = %session.email, "signed in");
        self.session = Some(session.clone());
        Ok(session)
    }

    /// Merge the user's profile fields and a fresh `last_seen` into their
    /// record. Fields not named here are left alone.
    pub async fn announce_presence(&self, session: &Session) -> Result<()> {
        let mut fields = WriteFields::new()
            .set(FIELD_EMAIL, session.email.as_str())
            .server_timestamp(FIELD_LAST_SEEN);
        if let Some(url) = &session.photo_url {
            fields = fields.set(FIELD_PHOTO_URL, url.as_str());
        }

        self.store
            .merge_update(USERS_COLLECTION, &DocumentId::from(session.email.as_str()), fields)
            .await?;
        Ok(())
    }

    pub fn session(&self) -> Result<&Session> {
        self.session.as_ref().ok_or(ClientError::NotAuthenticated)
    }

    pub fn events(&self) -> EventSender {
        self.events.clone()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    pub async fn open_directory(&self) -> Result<ConversationDirectory> {
        let me = self.session()?.email.clone();
        Ok(ConversationDirectory::open(self.store.clone(), me, Some(self.events.clone())).await)
    }

    /// Load the page-load snapshot of `id` and open a live view on it.
    pub async fn open_conversation(&self, id: &ConversationId) -> Result<ConversationView> {
        let me = self.session()?.email.clone();
        let snapshot = load_static_snapshot(self.store.as_ref(), id).await?;
        let events = Some(self.events.clone());
        Ok(ConversationView::open(self.store.clone(), me, snapshot, events).await)
    }

    pub async fn switch_conversation(
        &self,
        view: &mut ConversationView,
        id: &ConversationId,
    ) -> Result<()> {
        self.session()?;
        let snapshot = load_static_snapshot(self.store.as_ref(), id).await?;
        view.switch_to(snapshot).await;
        Ok(())
    }

    pub async fn sign_out(&mut self) -> Result<()> {
        self.identity.sign_out().await?;
        if let Some(session) = self.session.take() {
            info!(user = %session.email, "signed out");
        }
        emit_event(&self.events, ClientEvent::SignedOut);
        Ok(())
    }
}
