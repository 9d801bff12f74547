//! Session store contract.

use async_trait::async_trait;

use crate::error::StoreError;
use crate::session::model::{ConversationSession, SessionPatch};

/// Persistence for conversation sessions, keyed uniquely by phone number.
///
/// `upsert` must read the existing record before merging so that a patch
/// touching one metadata key never clobbers unrelated keys written by
/// another flow. Last-write-wins across whole fields is acceptable; the
/// dispatcher serializes calls per phone number.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Fetch the session for a phone number, if one exists.
    async fn get(&self, phone: &str) -> Result<Option<ConversationSession>, StoreError>;

    /// Merge a patch into the session for a phone number, creating the
    /// session if absent. Returns the stored result.
    async fn upsert(
        &self,
        phone: &str,
        patch: SessionPatch,
    ) -> Result<ConversationSession, StoreError>;

    /// Administrative reset — drops the session record entirely.
    async fn reset(&self, phone: &str) -> Result<(), StoreError>;
}
