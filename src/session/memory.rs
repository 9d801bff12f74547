//! In-memory session store — used in tests and as the reference semantics
//! for the libSQL backend.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::StoreError;
use crate::session::model::{ConversationSession, SessionPatch};
use crate::session::store::SessionStore;

/// HashMap-backed session store.
#[derive(Default)]
pub struct MemorySessionStore {
    sessions: Mutex<HashMap<String, ConversationSession>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn get(&self, phone: &str) -> Result<Option<ConversationSession>, StoreError> {
        Ok(self.sessions.lock().await.get(phone).cloned())
    }

    async fn upsert(
        &self,
        phone: &str,
        patch: SessionPatch,
    ) -> Result<ConversationSession, StoreError> {
        let mut sessions = self.sessions.lock().await;
        let session = sessions
            .entry(phone.to_string())
            .or_insert_with(|| ConversationSession::new(phone));
        patch.apply(session);
        Ok(session.clone())
    }

    async fn reset(&self, phone: &str) -> Result<(), StoreError> {
        self.sessions.lock().await.remove(phone);
        Ok(())
    }
}
