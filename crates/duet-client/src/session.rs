//! Identity seam: who is signed in.

use std::sync::Mutex;

use async_trait::async_trait;
use serde::Serialize;

use duet_shared::UserEmail;

use crate::error::{ClientError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub email: UserEmail,
    pub photo_url: Option<String>,
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// The signed-in user, or `None` when not authenticated.
    async fn current_user(&self) -> Option<Session>;

    async fn sign_out(&self) -> Result<()>;
}

/// Identity taken from configuration. Signing out forgets it.
#[derive(Debug, Default)]
pub struct StaticIdentity {
    session: Mutex<Option<Session>>,
}

impl StaticIdentity {
    pub fn new(session: Option<Session>) -> Self {
        Self {
            session: Mutex::new(session),
        }
    }

    pub fn signed_in(email: UserEmail, photo_url: Option<String>) -> Self {
        Self::new(Some(Session { email, photo_url }))
    }
}

#[async_trait]
impl IdentityProvider for StaticIdentity {
    async fn current_user(&self) -> Option<Session> {
        self.session.lock().ok().and_then(|s| s.clone())
    }

    async fn sign_out(&self) -> Result<()> {
        let mut session = self
            .session
            .lock()
            .map_err(|e| ClientError::SignOut(format!("Lock poisoned: {e}")))?;
        *session = None;
        Ok(())
    }
}
