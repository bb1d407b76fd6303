//! Authenticated session access.

use std::sync::RwLock;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Source of the signed-in user. Drains are skipped while it returns `None`.
#[async_trait]
pub trait SessionProvider: Send + Sync {
    async fn current_user_id(&self) -> Option<String>;

    /// Bearer token for backend calls made on the user's behalf.
    async fn access_token(&self) -> Option<String>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthSession {
    pub user_id: String,
    pub access_token: String,
}

/// In-process session holder updated by the auth layer on sign-in/out.
#[derive(Debug, Default)]
pub struct SessionStore {
    current: RwLock<Option<AuthSession>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn signed_in(session: AuthSession) -> Self {
        Self {
            current: RwLock::new(Some(session)),
        }
    }

    pub fn set(&self, session: AuthSession) {
        if let Ok(mut current) = self.current.write() {
            *current = Some(session);
        }
    }

    pub fn clear(&self) {
        if let Ok(mut current) = self.current.write() {
            *current = None;
        }
    }

    pub fn get(&self) -> Option<AuthSession> {
        self.current.read().ok().and_then(|current| current.clone())
    }
}

#[async_trait]
impl SessionProvider for SessionStore {
    async fn current_user_id(&self) -> Option<String> {
        self.get().map(|session| session.user_id)
    }

    async fn access_token(&self) -> Option<String> {
        self.get().map(|session| session.access_token)
    }
}
