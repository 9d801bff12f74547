//! Per-phone chat session cache.
//!
//! One model transcript is kept per phone number for the life of the
//! process, bounded by capacity (least-recently-used eviction) and an idle
//! TTL. Losing an entry only loses conversational context, never booking
//! state.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

use crate::llm::ChatMessage;

/// Transcript turns kept per phone.
const HISTORY_LIMIT: usize = 40;

struct Entry {
    system: String,
    messages: Vec<ChatMessage>,
    last_active: Instant,
}

/// Bounded cache of per-phone chat transcripts.
pub struct ChatSessionCache {
    capacity: usize,
    idle_timeout: Duration,
    inner: Mutex<HashMap<String, Entry>>,
}

impl ChatSessionCache {
    pub fn new(capacity: usize, idle_timeout: Duration) -> Self {
        Self {
            capacity: capacity.max(1),
            idle_timeout,
            inner: Mutex::new(HashMap::new()),
        }
    }

    /// Snapshot a phone's system prompt and transcript, creating the entry
    /// with `system` if absent. Touches the entry.
    pub async fn get_or_create(
        &self,
        phone: &str,
        system: impl FnOnce() -> String,
    ) -> (String, Vec<ChatMessage>) {
        let mut inner = self.inner.lock().await;
        if !inner.contains_key(phone) && inner.len() >= self.capacity {
            Self::evict_lru(&mut inner);
        }
        let entry = inner.entry(phone.to_string()).or_insert_with(|| Entry {
            system: system(),
            messages: Vec::new(),
            last_active: Instant::now(),
        });
        entry.last_active = Instant::now();
        (entry.system.clone(), entry.messages.clone())
    }

    /// Append a completed user/assistant turn pair to a phone's transcript.
    pub async fn commit_turn(&self, phone: &str, user: &str, assistant: &str) {
        let mut inner = self.inner.lock().await;
        if let Some(entry) = inner.get_mut(phone) {
            entry.messages.push(ChatMessage::user(user));
            entry.messages.push(ChatMessage::assistant(assistant));
            if entry.messages.len() > HISTORY_LIMIT {
                let excess = entry.messages.len() - HISTORY_LIMIT;
                entry.messages.drain(..excess);
            }
            entry.last_active = Instant::now();
        }
    }

    /// Drop a phone's transcript.
    pub async fn reset(&self, phone: &str) {
        self.inner.lock().await.remove(phone);
    }

    /// Evict entries idle beyond the TTL. Returns how many were dropped.
    pub async fn prune_idle(&self) -> usize {
        let mut inner = self.inner.lock().await;
        let before = inner.len();
        inner.retain(|_, entry| entry.last_active.elapsed() < self.idle_timeout);
        before - inner.len()
    }

    /// Current number of cached transcripts.
    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.is_empty()
    }

    fn evict_lru(inner: &mut HashMap<String, Entry>) {
        if let Some(oldest) = inner
            .iter()
            .min_by_key(|(_, entry)| entry.last_active)
            .map(|(phone, _)| phone.clone())
        {
            tracing::debug!(phone = %oldest, "Evicting least-recently-used chat session");
            inner.remove(&oldest);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn creates_once_and_keeps_history() {
        let cache = ChatSessionCache::new(8, Duration::from_secs(60));
        let (system, messages) = cache.get_or_create("111", || "SYS".to_string()).await;
        assert_eq!(system, "SYS");
        assert!(messages.is_empty());

        cache.commit_turn("111", "hi", "hello!").await;
        let (system, messages) = cache
            .get_or_create("111", || "DIFFERENT".to_string())
            .await;
        assert_eq!(system, "SYS", "existing entry keeps its system prompt");
        assert_eq!(messages.len(), 2);
    }

    #[tokio::test]
    async fn capacity_evicts_least_recently_used() {
        let cache = ChatSessionCache::new(2, Duration::from_secs(60));
        cache.get_or_create("a", || "s".into()).await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        cache.get_or_create("b", || "s".into()).await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        // Touch "a" so "b" is now the LRU.
        cache.get_or_create("a", || "s".into()).await;
        cache.get_or_create("c", || "s".into()).await;

        assert_eq!(cache.len().await, 2);
        cache.commit_turn("b", "x", "y").await;
        let (_, messages) = cache.get_or_create("b", || "s".into()).await;
        assert!(messages.is_empty(), "b was evicted and recreated empty");
    }

    #[tokio::test]
    async fn prune_drops_idle_entries() {
        let cache = ChatSessionCache::new(8, Duration::from_millis(10));
        cache.get_or_create("a", || "s".into()).await;
        tokio::time::sleep(Duration::from_millis(25)).await;
        cache.get_or_create("b", || "s".into()).await;

        let dropped = cache.prune_idle().await;
        assert_eq!(dropped, 1);
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn history_is_capped() {
        let cache = ChatSessionCache::new(8, Duration::from_secs(60));
        cache.get_or_create("a", || "s".into()).await;
        for i in 0..60 {
            cache
                .commit_turn("a", &format!("u{i}"), &format!("a{i}"))
                .await;
        }
        let (_, messages) = cache.get_or_create("a", || "s".into()).await;
        assert_eq!(messages.len(), HISTORY_LIMIT);
        // Oldest turns fell off the front.
        assert_eq!(messages[0].content, "u40");
    }
}
