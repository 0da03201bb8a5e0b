//! Polyfills the multi-turn conversation state that upstream does not
//! itself persist: response id -> prior context, and conversation id ->
//! latest response id. Process-local, reset on restart.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use indexmap::IndexMap;
use protocol::InputItem;
use tokio::sync::Mutex;

/// One tool call's recorded name and raw arguments, keyed by call id in
/// [`StoredResponseSnapshot::calls`].
#[derive(Debug, Clone)]
pub struct CallRecord {
    pub name: String,
    pub arguments: String,
}

/// Everything the polyfill needs to reconstruct a future turn that refers
/// back to this response.
#[derive(Debug, Clone)]
pub struct StoredResponseSnapshot {
    pub calls: HashMap<String, CallRecord>,
    pub context: Vec<InputItem>,
    pub instructions: String,
}

#[derive(Debug, Clone)]
struct ConversationLink {
    latest_response_id: String,
}

#[derive(Hash, Eq, PartialEq, Clone, Debug)]
enum Key {
    Response(String),
    Conversation(String),
}

enum Slot {
    Response(StoredResponseSnapshot),
    Conversation(ConversationLink),
}

struct Entry {
    slot: Slot,
    last_access: Instant,
}

struct Inner {
    /// Insertion/touch order doubles as LRU order: index 0 is the least
    /// recently used entry across both responses and conversations.
    order: IndexMap<Key, Entry>,
}

pub struct StateStore {
    inner: Mutex<Inner>,
    capacity: usize,
    ttl: Duration,
}

impl StateStore {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner { order: IndexMap::new() }),
            capacity,
            ttl,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(10_000, Duration::from_secs(60 * 60))
    }

    pub async fn put_response(&self, response_id: impl Into<String>, snapshot: StoredResponseSnapshot) {
        let mut inner = self.inner.lock().await;
        inner.touch_or_insert(Key::Response(response_id.into()), Slot::Response(snapshot));
        inner.evict_over_capacity(self.capacity);
    }

    pub async fn get_response(&self, response_id: &str) -> Option<StoredResponseSnapshot> {
        let mut inner = self.inner.lock().await;
        match inner.touch(&Key::Response(response_id.to_string()))? {
            Slot::Response(snapshot) => Some(snapshot.clone()),
            Slot::Conversation(_) => None,
        }
    }

    pub async fn put_conversation(&self, conversation_id: impl Into<String>, response_id: impl Into<String>) {
        let mut inner = self.inner.lock().await;
        inner.touch_or_insert(
            Key::Conversation(conversation_id.into()),
            Slot::Conversation(ConversationLink {
                latest_response_id: response_id.into(),
            }),
        );
        inner.evict_over_capacity(self.capacity);
    }

    pub async fn latest_response_for_conversation(&self, conversation_id: &str) -> Option<String> {
        let mut inner = self.inner.lock().await;
        match inner.touch(&Key::Conversation(conversation_id.to_string()))? {
            Slot::Conversation(link) => Some(link.latest_response_id.clone()),
            Slot::Response(_) => None,
        }
    }

    /// Removes everything whose last access predates the TTL. Intended to
    /// be driven by a periodic background tick, on roughly a 30s cadence.
    pub async fn sweep_expired(&self) {
        let mut inner = self.inner.lock().await;
        let ttl = self.ttl;
        let now = Instant::now();
        inner.order.retain(|_, entry| now.duration_since(entry.last_access) < ttl);
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.order.len()
    }
}

impl Inner {
    fn touch_or_insert(&mut self, key: Key, slot: Slot) {
        self.order.shift_remove(&key);
        self.order.insert(
            key,
            Entry {
                slot,
                last_access: Instant::now(),
            },
        );
    }

    fn touch(&mut self, key: &Key) -> Option<&Slot> {
        let idx = self.order.get_index_of(key)?;
        let last = self.order.len() - 1;
        self.order.move_index(idx, last);
        let entry = self.order.get_mut(key)?;
        entry.last_access = Instant::now();
        Some(&entry.slot)
    }

    fn evict_over_capacity(&mut self, capacity: usize) {
        while self.order.len() > capacity {
            self.order.shift_remove_index(0);
        }
    }
}

/// Spawns the background TTL sweep; the only background thread this crate
/// runs. The returned handle aborts the task when dropped.
pub fn spawn_sweeper(store: std::sync::Arc<StateStore>, interval: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            store.sweep_expired().await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> StoredResponseSnapshot {
        StoredResponseSnapshot {
            calls: HashMap::new(),
            context: Vec::new(),
            instructions: "be helpful".to_string(),
        }
    }

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let store = StateStore::new(10, Duration::from_secs(60));
        store.put_response("resp_1", snapshot()).await;

        let got = store.get_response("resp_1").await.unwrap();
        assert_eq!(got.instructions, "be helpful");
    }

    #[tokio::test]
    async fn conversation_link_resolves_latest_response() {
        let store = StateStore::new(10, Duration::from_secs(60));
        store.put_conversation("conv_1", "resp_1").await;

        assert_eq!(store.latest_response_for_conversation("conv_1").await, Some("resp_1".to_string()));
        assert_eq!(store.latest_response_for_conversation("conv_missing").await, None);
    }

    #[tokio::test]
    async fn capacity_is_enforced_combined_across_both_maps() {
        let store = StateStore::new(3, Duration::from_secs(60));
        store.put_response("resp_1", snapshot()).await;
        store.put_conversation("conv_1", "resp_1").await;
        store.put_response("resp_2", snapshot()).await;

        assert_eq!(store.len().await, 3);

        // Fourth insertion evicts the globally least-recently-used entry,
        // which is resp_1 (never touched again after insertion).
        store.put_response("resp_3", snapshot()).await;
        assert_eq!(store.len().await, 3);
        assert!(store.get_response("resp_1").await.is_none());
        assert!(store.get_response("resp_2").await.is_some());
    }

    #[tokio::test]
    async fn touching_an_entry_protects_it_from_eviction() {
        let store = StateStore::new(2, Duration::from_secs(60));
        store.put_response("resp_1", snapshot()).await;
        store.put_response("resp_2", snapshot()).await;

        // touch resp_1 so resp_2 becomes the least-recently-used entry.
        store.get_response("resp_1").await;
        store.put_response("resp_3", snapshot()).await;

        assert!(store.get_response("resp_2").await.is_none());
        assert!(store.get_response("resp_1").await.is_some());
        assert!(store.get_response("resp_3").await.is_some());
    }

    #[tokio::test]
    async fn sweep_expired_removes_stale_entries() {
        let store = StateStore::new(10, Duration::from_millis(10));
        store.put_response("resp_1", snapshot()).await;

        tokio::time::sleep(Duration::from_millis(30)).await;
        store.sweep_expired().await;

        assert_eq!(store.len().await, 0);
    }
}
