//! Keyed, deduplicated fetch states with stale-while-revalidate and invalidation

pub mod descriptor;
pub mod state;

use crate::core::error::ApiError;
use futures::FutureExt;
use futures::future::BoxFuture;
use state::{AnyValue, EntrySnapshot};
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;
use tracing::debug;

pub use descriptor::{FetchDescriptor, FetchFuture, QueryKey};
pub use state::FetchState;

type ErasedFetcher = Arc<dyn Fn() -> BoxFuture<'static, Result<AnyValue, ApiError>> + Send + Sync>;

struct Entry {
    state: watch::Sender<EntrySnapshot>,
    fetcher: ErasedFetcher,
    observers: usize,
    /// Bumped for every fetch started; results from older fetches are dropped.
    generation: u64,
}

#[derive(Default)]
struct Inner {
    entries: Mutex<HashMap<QueryKey, Entry>>,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, HashMap<QueryKey, Entry>> {
        match self.entries.lock() {
            Ok(entries) => entries,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn complete(&self, key: &QueryKey, generation: u64, result: Result<AnyValue, ApiError>) {
        let mut entries = self.lock();
        let Some(entry) = entries.get_mut(key) else {
            debug!(%key, "Entry removed before fetch completed");
            return;
        };
        if entry.generation != generation {
            debug!(%key, "Discarding superseded fetch result");
            return;
        }

        entry.state.send_modify(|s| {
            s.in_flight = false;
            s.invalidated = false;
            match result {
                Ok(value) => {
                    debug!(%key, "Fetch succeeded");
                    s.data = Some((value, chrono::Utc::now()));
                    s.error = None;
                }
                Err(error) => {
                    debug!(%key, %error, "Fetch failed");
                    s.error = Some(error);
                }
            }
        });
    }
}

/// Shared query cache. Cheap to clone; clones share state.
#[derive(Clone, Default)]
pub struct QueryClient {
    inner: Arc<Inner>,
}

impl QueryClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes to `descriptor`'s key and starts a fetch if the key has no
    /// value, is stale or was invalidated, unless one is already running.
    ///
    /// Must be called from within a tokio runtime.
    pub fn observe<V: Send + Sync + 'static>(&self, descriptor: &FetchDescriptor<V>) -> Observer<V> {
        let key = descriptor.key().clone();
        let mut entries = self.inner.lock();
        let entry = entries.entry(key.clone()).or_insert_with(|| {
            let (state, _) = watch::channel(EntrySnapshot::new(descriptor.stale_time()));
            Entry {
                state,
                fetcher: erase(descriptor),
                observers: 0,
                generation: 0,
            }
        });

        // Latest registration wins for refetches triggered later.
        entry.fetcher = erase(descriptor);
        let stale_time = descriptor.stale_time();
        entry.state.send_if_modified(|s| {
            let changed = s.stale_time != stale_time;
            s.stale_time = stale_time;
            changed
        });

        entry.observers += 1;
        let receiver = entry.state.subscribe();
        if entry.state.borrow().needs_fetch() {
            self.start_fetch(&key, entry);
        } else {
            debug!(%key, "Serving cached query state");
        }

        Observer {
            key,
            receiver,
            client: self.clone(),
            _marker: PhantomData,
        }
    }

    /// Marks every entry of `resource` as stale and refetches the observed
    /// ones, once per entry regardless of observer count. Returns the number
    /// of fetches started.
    pub fn invalidate(&self, resource: &str) -> usize {
        let mut entries = self.inner.lock();
        let mut started = 0;
        for (key, entry) in entries.iter_mut().filter(|(k, _)| k.resource() == resource) {
            entry.state.send_modify(|s| s.invalidated = true);
            if entry.observers > 0 {
                self.start_fetch(key, entry);
                started += 1;
            }
        }
        debug!(resource, started, "Invalidated queries");
        started
    }

    /// Forces a new fetch of `key` if it has been observed before.
    pub fn refetch(&self, key: &QueryKey) -> bool {
        let mut entries = self.inner.lock();
        match entries.get_mut(key) {
            Some(entry) => {
                self.start_fetch(key, entry);
                true
            }
            None => false,
        }
    }

    /// Best cached value for `key` without subscribing or fetching.
    pub fn cached<V: Send + Sync + 'static>(&self, key: &QueryKey) -> Option<Arc<V>> {
        let entries = self.inner.lock();
        let state = entries.get(key)?.state.borrow().to_state::<V>();
        state.value().cloned()
    }

    /// Forgets every cached value, e.g. after logout. Unobserved entries are
    /// dropped; observed ones are emptied and any running fetch is discarded,
    /// so the next observe, invalidate or refetch loads them again.
    pub fn clear(&self) {
        let mut entries = self.inner.lock();
        entries.retain(|_, entry| entry.observers > 0);
        for entry in entries.values_mut() {
            entry.generation += 1;
            entry.state.send_modify(|s| {
                s.data = None;
                s.error = None;
                s.in_flight = false;
                s.invalidated = true;
            });
        }
        debug!(retained = entries.len(), "Cleared query cache");
    }

    fn start_fetch(&self, key: &QueryKey, entry: &mut Entry) {
        entry.generation += 1;
        let generation = entry.generation;
        entry.state.send_modify(|s| s.in_flight = true);
        debug!(%key, generation, "Starting fetch");

        let future = (entry.fetcher)();
        let inner = Arc::clone(&self.inner);
        let key = key.clone();
        tokio::spawn(async move {
            let result = future.await;
            inner.complete(&key, generation, result);
        });
    }

    fn release(&self, key: &QueryKey) {
        let mut entries = self.inner.lock();
        if let Some(entry) = entries.get_mut(key) {
            entry.observers = entry.observers.saturating_sub(1);
            debug!(%key, observers = entry.observers, "Observer released");
        }
    }

    #[cfg(test)]
    fn observer_count(&self, key: &QueryKey) -> usize {
        self.inner.lock().get(key).map_or(0, |e| e.observers)
    }
}

fn erase<V: Send + Sync + 'static>(descriptor: &FetchDescriptor<V>) -> ErasedFetcher {
    let descriptor = descriptor.clone();
    Arc::new(move || {
        descriptor
            .fetch()
            .map(|result| result.map(|value| Arc::new(value) as AnyValue))
            .boxed()
    })
}

/// A subscription to one key. Dropping it unsubscribes.
pub struct Observer<V> {
    key: QueryKey,
    receiver: watch::Receiver<EntrySnapshot>,
    client: QueryClient,
    _marker: PhantomData<fn() -> V>,
}

impl<V: Send + Sync + 'static> Observer<V> {
    pub fn key(&self) -> &QueryKey {
        &self.key
    }

    pub fn state(&self) -> FetchState<V> {
        self.receiver.borrow().to_state()
    }

    /// Waits for the next state change. Returns false once the entry is gone.
    pub async fn changed(&mut self) -> bool {
        self.receiver.changed().await.is_ok()
    }

    /// Waits until no fetch is running for this key.
    pub async fn settled(&mut self) -> FetchState<V> {
        loop {
            {
                let snapshot = self.receiver.borrow_and_update();
                if !snapshot.in_flight {
                    return snapshot.to_state();
                }
            }
            if self.receiver.changed().await.is_err() {
                return self.state();
            }
        }
    }
}

impl<V> Drop for Observer<V> {
    fn drop(&mut self) {
        self.client.release(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::Notify;

    /// Counts calls and answers with the call number, or fails when `fail` is set.
    fn counting(
        key: QueryKey,
        stale_time: Duration,
        calls: Arc<AtomicUsize>,
        fail_after: Option<usize>,
    ) -> FetchDescriptor<usize> {
        FetchDescriptor::new(key, stale_time, move || {
            let calls = Arc::clone(&calls);
            async move {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                tokio::task::yield_now().await;
                match fail_after {
                    Some(limit) if n > limit => Err(ApiError::Network("offline".into())),
                    _ => Ok(n),
                }
            }
        })
    }

    fn prices_key() -> QueryKey {
        QueryKey::new("prices").param("current")
    }

    #[tokio::test]
    async fn test_concurrent_observers_share_one_fetch() {
        let calls = Arc::new(AtomicUsize::new(0));
        let gate = Arc::new(Notify::new());
        let descriptor = {
            let calls = Arc::clone(&calls);
            let gate = Arc::clone(&gate);
            FetchDescriptor::new(prices_key(), Duration::from_secs(60), move || {
                let calls = Arc::clone(&calls);
                let gate = Arc::clone(&gate);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    gate.notified().await;
                    Ok(42usize)
                }
            })
        };

        let client = QueryClient::new();
        let mut first = client.observe(&descriptor);
        let mut second = client.observe(&descriptor);
        assert!(matches!(first.state(), FetchState::InFlight));

        tokio::task::yield_now().await;
        gate.notify_one();

        let a = first.settled().await;
        let b = second.settled().await;
        assert_eq!(a.value().map(|v| **v), Some(42));
        assert_eq!(b.value().map(|v| **v), Some(42));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_fresh_value_is_served_from_cache() {
        let calls = Arc::new(AtomicUsize::new(0));
        let descriptor = counting(prices_key(), Duration::from_secs(60), Arc::clone(&calls), None);
        let client = QueryClient::new();

        let mut first = client.observe(&descriptor);
        first.settled().await;
        drop(first);

        let second = client.observe(&descriptor);
        assert!(matches!(second.state(), FetchState::Fresh { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stale_value_served_while_revalidating() {
        let calls = Arc::new(AtomicUsize::new(0));
        let descriptor = counting(prices_key(), Duration::ZERO, Arc::clone(&calls), None);
        let client = QueryClient::new();

        let mut first = client.observe(&descriptor);
        first.settled().await;

        let mut second = client.observe(&descriptor);
        match second.state() {
            FetchState::Stale {
                value, refreshing, ..
            } => {
                assert_eq!(*value, 1);
                assert!(refreshing);
            }
            other => panic!("expected stale state, got {other:?}"),
        }

        let state = second.settled().await;
        assert_eq!(state.value().map(|v| **v), Some(2));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failure_keeps_last_good_value() {
        let calls = Arc::new(AtomicUsize::new(0));
        let descriptor = counting(prices_key(), Duration::from_secs(60), Arc::clone(&calls), Some(1));
        let client = QueryClient::new();

        let mut observer = client.observe(&descriptor);
        observer.settled().await;

        for _ in 0..2 {
            assert_eq!(client.invalidate("prices"), 1);
            match observer.settled().await {
                FetchState::Failed { error, last_good } => {
                    assert_eq!(error, ApiError::Network("offline".into()));
                    assert_eq!(last_good.map(|(v, _)| *v), Some(1));
                }
                other => panic!("expected failed state, got {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_invalidate_refetches_once_for_many_observers() {
        let calls = Arc::new(AtomicUsize::new(0));
        let descriptor = counting(prices_key(), Duration::from_secs(60), Arc::clone(&calls), None);
        let client = QueryClient::new();

        let mut observers: Vec<_> = (0..3).map(|_| client.observe(&descriptor)).collect();
        for observer in observers.iter_mut() {
            observer.settled().await;
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        assert_eq!(client.invalidate("prices"), 1);
        for observer in observers.iter_mut() {
            assert_eq!(observer.settled().await.value().map(|v| **v), Some(2));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_invalidate_other_resource_is_ignored() {
        let calls = Arc::new(AtomicUsize::new(0));
        let descriptor = counting(prices_key(), Duration::from_secs(60), Arc::clone(&calls), None);
        let client = QueryClient::new();

        let mut observer = client.observe(&descriptor);
        observer.settled().await;

        assert_eq!(client.invalidate("alerts"), 0);
        assert!(matches!(observer.state(), FetchState::Fresh { .. }));
    }

    #[tokio::test]
    async fn test_invalidate_unobserved_defers_fetch() {
        let calls = Arc::new(AtomicUsize::new(0));
        let descriptor = counting(prices_key(), Duration::from_secs(60), Arc::clone(&calls), None);
        let client = QueryClient::new();

        let mut observer = client.observe(&descriptor);
        observer.settled().await;
        drop(observer);
        assert_eq!(client.observer_count(&prices_key()), 0);

        assert_eq!(client.invalidate("prices"), 0);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let mut observer = client.observe(&descriptor);
        assert_eq!(observer.settled().await.value().map(|v| **v), Some(2));
    }

    #[tokio::test]
    async fn test_superseded_result_is_discarded() {
        let gate = Arc::new(Notify::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let descriptor = {
            let gate = Arc::clone(&gate);
            let calls = Arc::clone(&calls);
            FetchDescriptor::new(prices_key(), Duration::from_secs(60), move || {
                let gate = Arc::clone(&gate);
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    if n == 1 {
                        gate.notified().await;
                    }
                    Ok(n)
                }
            })
        };
        let client = QueryClient::new();

        let mut observer = client.observe(&descriptor);
        assert_eq!(client.invalidate("prices"), 1);
        assert_eq!(observer.settled().await.value().map(|v| **v), Some(2));

        // The first fetch finishing late must not overwrite the newer value.
        gate.notify_one();
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;
        assert_eq!(observer.state().value().map(|v| **v), Some(2));
    }

    #[tokio::test]
    async fn test_cached_and_clear() {
        let calls = Arc::new(AtomicUsize::new(0));
        let descriptor = counting(prices_key(), Duration::from_secs(60), Arc::clone(&calls), None);
        let client = QueryClient::new();

        let mut observer = client.observe(&descriptor);
        observer.settled().await;
        assert_eq!(client.cached::<usize>(&prices_key()).map(|v| *v), Some(1));

        drop(observer);
        client.clear();
        assert!(client.cached::<usize>(&prices_key()).is_none());
    }

    #[tokio::test]
    async fn test_reobserving_retries_failed_fetch() {
        let calls = Arc::new(AtomicUsize::new(0));
        let descriptor = counting(prices_key(), Duration::from_secs(60), Arc::clone(&calls), Some(2));
        let client = QueryClient::new();

        let mut observer = client.observe(&descriptor);
        observer.settled().await;
        assert_eq!(client.invalidate("prices"), 1);
        assert!(matches!(observer.settled().await, FetchState::Failed { .. }));
        drop(observer);

        let mut observer = client.observe(&descriptor);
        assert!(observer.state().is_pending());
        observer.settled().await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_clear_empties_observed_entries() {
        let calls = Arc::new(AtomicUsize::new(0));
        let descriptor = counting(prices_key(), Duration::from_secs(60), Arc::clone(&calls), None);
        let client = QueryClient::new();

        let mut observer = client.observe(&descriptor);
        observer.settled().await;

        client.clear();
        assert!(client.cached::<usize>(&prices_key()).is_none());
        assert!(observer.state().value().is_none());
        assert_eq!(client.observer_count(&prices_key()), 1);

        let mut again = client.observe(&descriptor);
        assert_eq!(again.settled().await.value().map(|v| **v), Some(2));
    }

    #[tokio::test]
    async fn test_clear_discards_running_fetch() {
        let gate = Arc::new(Notify::new());
        let descriptor = {
            let gate = Arc::clone(&gate);
            FetchDescriptor::new(QueryKey::new("auth").param("me"), Duration::from_secs(60), move || {
                let gate = Arc::clone(&gate);
                async move {
                    gate.notified().await;
                    Ok("previous user".to_string())
                }
            })
        };
        let client = QueryClient::new();

        let mut observer = client.observe(&descriptor);
        tokio::task::yield_now().await;
        client.clear();
        assert!(observer.state().value().is_none());

        gate.notify_one();
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;
        assert!(client.cached::<String>(descriptor.key()).is_none());
        assert!(observer.settled().await.value().is_none());
    }
}
