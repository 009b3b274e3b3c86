//! Injected key/value storage for sessions and OAuth state.
//!
//! Call sites depend on the [`KeyValueStore`] trait only, so the in-memory
//! map can be swapped for an external store or a fake in tests. The bundled
//! [`MemoryStore`] guards a single map with one mutex; no method awaits
//! anything other than that lock while holding it.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

/// Minimal storage interface shared by the session and CSRF state stores.
#[async_trait]
pub trait KeyValueStore<V>: Send + Sync
where
    V: Clone + Send + Sync + 'static,
{
    /// Look up a value without removing it.
    async fn get(&self, key: &str) -> Option<V>;

    /// Insert or replace a value.
    async fn put(&self, key: String, value: V);

    /// Remove a value. Returns whether anything was removed.
    async fn delete(&self, key: &str) -> bool;

    /// Atomically read and remove a value. Of several callers racing on the
    /// same key, at most one observes `Some`.
    async fn take(&self, key: &str) -> Option<V>;

    /// Number of live entries.
    async fn len(&self) -> usize;

    /// Drop entries past their time-to-live. Returns how many were removed.
    async fn sweep_expired(&self) -> usize {
        0
    }
}

struct Slot<V> {
    value: V,
    inserted_at: Instant,
    seq: u64,
}

struct Inner<V> {
    map: HashMap<String, Slot<V>>,
    /// Insertion order, oldest first. Keys here always mirror `map`.
    order: BTreeMap<u64, String>,
    next_seq: u64,
}

impl<V> Inner<V> {
    fn remove(&mut self, key: &str) -> Option<Slot<V>> {
        let slot = self.map.remove(key)?;
        self.order.remove(&slot.seq);
        Some(slot)
    }
}

/// In-memory store with an optional entry bound and time-to-live.
pub struct MemoryStore<V> {
    inner: Mutex<Inner<V>>,
    max_entries: Option<usize>,
    ttl: Option<Duration>,
}

impl<V> Default for MemoryStore<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> MemoryStore<V> {
    /// Unbounded store whose entries never expire.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                map: HashMap::new(),
                order: BTreeMap::new(),
                next_seq: 0,
            }),
            max_entries: None,
            ttl: None,
        }
    }

    /// Cap the number of entries; inserting past the cap evicts the oldest.
    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = Some(max_entries.max(1));
        self
    }

    /// Treat entries older than `ttl` as absent.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    fn is_expired(&self, slot: &Slot<V>, now: Instant) -> bool {
        self.ttl
            .map(|ttl| now.duration_since(slot.inserted_at) >= ttl)
            .unwrap_or(false)
    }
}

#[async_trait]
impl<V> KeyValueStore<V> for MemoryStore<V>
where
    V: Clone + Send + Sync + 'static,
{
    async fn get(&self, key: &str) -> Option<V> {
        let mut inner = self.inner.lock().await;
        let now = Instant::now();

        let expired = self.is_expired(inner.map.get(key)?, now);
        if expired {
            inner.remove(key);
            return None;
        }

        inner.map.get(key).map(|slot| slot.value.clone())
    }

    async fn put(&self, key: String, value: V) {
        let mut inner = self.inner.lock().await;

        inner.remove(&key);

        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.order.insert(seq, key.clone());
        inner.map.insert(
            key,
            Slot {
                value,
                inserted_at: Instant::now(),
                seq,
            },
        );

        if let Some(max) = self.max_entries {
            while inner.map.len() > max {
                let Some((_, oldest)) = inner.order.pop_first() else {
                    break;
                };
                inner.map.remove(&oldest);
                debug!(capacity = max, "Evicted oldest store entry");
            }
        }
    }

    async fn delete(&self, key: &str) -> bool {
        self.inner.lock().await.remove(key).is_some()
    }

    async fn take(&self, key: &str) -> Option<V> {
        let slot = self.inner.lock().await.remove(key)?;
        if self.is_expired(&slot, Instant::now()) {
            return None;
        }
        Some(slot.value)
    }

    async fn len(&self) -> usize {
        self.inner.lock().await.map.len()
    }

    async fn sweep_expired(&self) -> usize {
        let Some(ttl) = self.ttl else {
            return 0;
        };

        let mut inner = self.inner.lock().await;
        let now = Instant::now();
        let mut removed = 0;

        // Insertion order is also age order, so stop at the first live entry.
        while let Some((&seq, key)) = inner.order.first_key_value() {
            let fresh = inner
                .map
                .get(key)
                .map(|slot| now.duration_since(slot.inserted_at) < ttl)
                .unwrap_or(false);
            if fresh {
                break;
            }
            if let Some(key) = inner.order.remove(&seq) {
                inner.map.remove(&key);
            }
            removed += 1;
        }

        removed
    }
}

/// Periodically sweep expired entries out of `store` until the task is aborted.
pub fn spawn_sweeper<V>(store: Arc<dyn KeyValueStore<V>>, period: Duration) -> JoinHandle<()>
where
    V: Clone + Send + Sync + 'static,
{
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            let removed = store.sweep_expired().await;
            if removed > 0 {
                debug!(removed, "Swept expired store entries");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_get_delete() {
        let store: MemoryStore<u32> = MemoryStore::new();
        store.put("a".to_string(), 1).await;
        assert_eq!(store.get("a").await, Some(1));
        assert_eq!(store.get("a").await, Some(1));
        assert!(store.delete("a").await);
        assert!(!store.delete("a").await);
        assert_eq!(store.get("a").await, None);
    }

    #[tokio::test]
    async fn test_take_is_single_use() {
        let store: MemoryStore<&'static str> = MemoryStore::new();
        store.put("k".to_string(), "v").await;
        assert_eq!(store.take("k").await, Some("v"));
        assert_eq!(store.take("k").await, None);
        assert_eq!(store.len().await, 0);
    }

    #[tokio::test]
    async fn test_put_replaces_without_duplicating_order() {
        let store: MemoryStore<u32> = MemoryStore::new().with_max_entries(2);
        store.put("a".to_string(), 1).await;
        store.put("a".to_string(), 2).await;
        store.put("b".to_string(), 3).await;
        assert_eq!(store.len().await, 2);
        assert_eq!(store.get("a").await, Some(2));
    }

    #[tokio::test]
    async fn test_evicts_oldest_first() {
        let store: MemoryStore<u32> = MemoryStore::new().with_max_entries(3);
        for (i, key) in ["a", "b", "c", "d", "e"].iter().enumerate() {
            store.put(key.to_string(), i as u32).await;
        }
        assert_eq!(store.len().await, 3);
        assert_eq!(store.get("a").await, None);
        assert_eq!(store.get("b").await, None);
        assert_eq!(store.get("c").await, Some(2));
        assert_eq!(store.get("e").await, Some(4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_hides_and_sweeps_entries() {
        let store: MemoryStore<u32> = MemoryStore::new().with_ttl(Duration::from_secs(300));
        store.put("old".to_string(), 1).await;
        tokio::time::advance(Duration::from_secs(200)).await;
        store.put("new".to_string(), 2).await;

        tokio::time::advance(Duration::from_secs(101)).await;
        assert_eq!(store.take("old").await, None);
        assert_eq!(store.get("new").await, Some(2));

        store.put("old2".to_string(), 3).await;
        tokio::time::advance(Duration::from_secs(250)).await;
        // "new" is now 351s old, "old2" 250s.
        assert_eq!(store.sweep_expired().await, 1);
        assert_eq!(store.len().await, 1);
        assert_eq!(store.get("old2").await, Some(3));
    }

    #[tokio::test]
    async fn test_sweep_without_ttl_is_noop() {
        let store: MemoryStore<u32> = MemoryStore::new();
        store.put("a".to_string(), 1).await;
        assert_eq!(store.sweep_expired().await, 0);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_task_reaps_entries() {
        let store: Arc<MemoryStore<u32>> =
            Arc::new(MemoryStore::new().with_ttl(Duration::from_secs(10)));
        store.put("a".to_string(), 1).await;

        let handle = spawn_sweeper(
            store.clone() as Arc<dyn KeyValueStore<u32>>,
            Duration::from_secs(5),
        );
        tokio::time::sleep(Duration::from_secs(16)).await;
        assert_eq!(store.len().await, 0);
        handle.abort();
    }
}
