//! Short-lived storage binding an OAuth state value to its PKCE verifier.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::auth::store::{KeyValueStore, MemoryStore};
use crate::types::{PkceVerifier, StateToken};

/// Default lifetime of a pending login attempt, matching the state cookie.
pub const DEFAULT_STATE_TTL: Duration = Duration::from_secs(300);

/// Default cap on concurrently pending login attempts.
pub const DEFAULT_MAX_PENDING: usize = 10_000;

/// Pending federated logins keyed by state value. Each entry is single-use.
#[derive(Clone)]
pub struct CsrfStateStore {
    backend: Arc<dyn KeyValueStore<PkceVerifier>>,
}

impl CsrfStateStore {
    pub fn new(backend: Arc<dyn KeyValueStore<PkceVerifier>>) -> Self {
        Self { backend }
    }

    /// Bounded in-memory store: at most `max_entries` pending attempts, each
    /// forgotten after `ttl`.
    pub fn in_memory(max_entries: usize, ttl: Duration) -> Self {
        let backend = MemoryStore::new()
            .with_max_entries(max_entries)
            .with_ttl(ttl);
        Self::new(Arc::new(backend))
    }

    pub fn backend(&self) -> Arc<dyn KeyValueStore<PkceVerifier>> {
        self.backend.clone()
    }

    pub async fn put(&self, state: &StateToken, verifier: PkceVerifier) {
        self.backend.put(state.as_str().to_string(), verifier).await;
    }

    /// Consume the verifier stored under `state`. A second call for the same
    /// state, concurrent or not, returns `None`.
    pub async fn take(&self, state: &StateToken) -> Option<PkceVerifier> {
        let verifier = self.backend.take(state.as_str()).await;
        if verifier.is_none() {
            debug!(state = state.log_prefix(), "No pending login for state");
        }
        verifier
    }
}

impl Default for CsrfStateStore {
    fn default() -> Self {
        Self::in_memory(DEFAULT_MAX_PENDING, DEFAULT_STATE_TTL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_then_take_once() {
        let store = CsrfStateStore::default();
        let state = StateToken::new("state-1");
        store.put(&state, PkceVerifier::new("verifier-1")).await;

        assert_eq!(
            store.take(&state).await,
            Some(PkceVerifier::new("verifier-1"))
        );
        assert_eq!(store.take(&state).await, None);
    }

    #[tokio::test]
    async fn test_unknown_state() {
        let store = CsrfStateStore::default();
        assert_eq!(store.take(&StateToken::new("never-issued")).await, None);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_take_single_winner() {
        for round in 0..200 {
            let store = CsrfStateStore::default();
            let state = StateToken::new(format!("state-{round}"));
            store.put(&state, PkceVerifier::new("v")).await;

            let barrier = Arc::new(tokio::sync::Barrier::new(2));
            let mut handles = Vec::new();
            for _ in 0..2 {
                let store = store.clone();
                let state = state.clone();
                let barrier = barrier.clone();
                handles.push(tokio::spawn(async move {
                    barrier.wait().await;
                    store.take(&state).await.is_some()
                }));
            }

            let mut winners = 0;
            for handle in handles {
                if handle.await.unwrap() {
                    winners += 1;
                }
            }
            assert_eq!(winners, 1, "round {round}: expected exactly one winner");
        }
    }

    #[tokio::test]
    async fn test_abandoned_attempts_are_bounded() {
        let store = CsrfStateStore::in_memory(100, DEFAULT_STATE_TTL);
        for i in 0..1_000 {
            store
                .put(&StateToken::new(format!("s{i}")), PkceVerifier::new("v"))
                .await;
        }
        assert_eq!(store.backend().len().await, 100);
        // The newest attempt survives, the oldest was evicted.
        assert!(store.take(&StateToken::new("s999")).await.is_some());
        assert!(store.take(&StateToken::new("s0")).await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_state_expires() {
        let store = CsrfStateStore::in_memory(10, Duration::from_secs(300));
        let state = StateToken::new("slow");
        store.put(&state, PkceVerifier::new("v")).await;
        tokio::time::advance(Duration::from_secs(301)).await;
        assert_eq!(store.take(&state).await, None);
    }
}
