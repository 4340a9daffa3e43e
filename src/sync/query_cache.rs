use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::query_key::QueryKey;
use crate::storage::kv::lock;
use crate::transport::ApiException;

type SharedFetch<V> = Shared<BoxFuture<'static, Result<V, ApiException>>>;

const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryStatus {
    Idle,
    Loading,
    Success,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheChange {
    Fetching,
    Updated,
    Failed,
    Invalidated,
    Removed,
    RolledBack,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEvent {
    pub key: QueryKey,
    pub change: CacheChange,
}

#[derive(Debug, Clone)]
pub struct QueryState<V> {
    pub status: QueryStatus,
    pub data: Option<V>,
    pub error: Option<ApiException>,
    pub updated_at: Option<Instant>,
    pub is_stale: bool,
    pub is_fetching: bool,
}

/// What a screen should render for a query.
#[derive(Debug)]
pub enum QueryView<'a, V> {
    Idle,
    Loading,
    Ready { data: &'a V, refreshing: bool },
    Failed(&'a ApiException),
}

impl<V> QueryState<V> {
    /// Last-known data wins over a newer error; an error only shows when
    /// nothing usable is cached.
    pub fn view(&self) -> QueryView<'_, V> {
        match (&self.data, &self.error) {
            (Some(data), _) => QueryView::Ready {
                data,
                refreshing: self.is_fetching,
            },
            (None, _) if self.is_fetching => QueryView::Loading,
            (None, Some(error)) => QueryView::Failed(error),
            (None, None) => QueryView::Idle,
        }
    }
}

#[derive(Clone)]
struct Snapshot<V> {
    status: QueryStatus,
    data: Option<V>,
    error: Option<ApiException>,
    updated_at: Option<Instant>,
    invalidated: bool,
}

struct Entry<V> {
    status: QueryStatus,
    data: Option<V>,
    error: Option<ApiException>,
    updated_at: Option<Instant>,
    invalidated: bool,
    in_flight: Option<(u64, SharedFetch<V>)>,
}

impl<V> Default for Entry<V> {
    fn default() -> Self {
        Self {
            status: QueryStatus::Idle,
            data: None,
            error: None,
            updated_at: None,
            invalidated: false,
            in_flight: None,
        }
    }
}

impl<V: Clone> Entry<V> {
    fn snapshot(&self) -> Snapshot<V> {
        Snapshot {
            status: self.status,
            data: self.data.clone(),
            error: self.error.clone(),
            updated_at: self.updated_at,
            invalidated: self.invalidated,
        }
    }

    fn restore(snapshot: Snapshot<V>) -> Self {
        Self {
            status: snapshot.status,
            data: snapshot.data,
            error: snapshot.error,
            updated_at: snapshot.updated_at,
            invalidated: snapshot.invalidated,
            in_flight: None,
        }
    }
}

struct Inner<V> {
    entries: HashMap<QueryKey, Entry<V>>,
    next_ticket: u64,
}

pub struct SnapshotToken<V> {
    prefix: QueryKey,
    entries: Vec<(QueryKey, Snapshot<V>)>,
}

impl<V> SnapshotToken<V> {
    pub fn prefix(&self) -> &QueryKey {
        &self.prefix
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

pub struct CacheSubscription {
    prefix: QueryKey,
    receiver: broadcast::Receiver<CacheEvent>,
}

impl CacheSubscription {
    pub async fn recv(&mut self) -> Option<CacheEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) if event.key.starts_with(&self.prefix) => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Cache subscriber for {} lagged by {} events", self.prefix, skipped);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    pub fn try_recv(&mut self) -> Option<CacheEvent> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) if event.key.starts_with(&self.prefix) => return Some(event),
                Ok(_) | Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    }
}

/// Keyed store of query results with request deduplication and a two-phase
/// optimistic write protocol.
///
/// A result is only written back if its request is still the entry's current
/// one; starting an optimistic write detaches any in-flight request so a late
/// read cannot overwrite the optimistic value.
pub struct QueryCache<V> {
    inner: Arc<Mutex<Inner<V>>>,
    stale_time: Duration,
    notifier: broadcast::Sender<CacheEvent>,
}

impl<V> Clone for QueryCache<V> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            stale_time: self.stale_time,
            notifier: self.notifier.clone(),
        }
    }
}

impl<V: Clone + Send + Sync + 'static> QueryCache<V> {
    pub fn new(stale_time: Duration) -> Self {
        let (notifier, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self::with_notifier(stale_time, notifier)
    }

    /// A cache publishing to an existing channel, so several caches can be
    /// observed through one subscription.
    pub fn with_notifier(stale_time: Duration, notifier: broadcast::Sender<CacheEvent>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                entries: HashMap::new(),
                next_ticket: 0,
            })),
            stale_time,
            notifier,
        }
    }

    pub fn notifier(&self) -> broadcast::Sender<CacheEvent> {
        self.notifier.clone()
    }

    pub fn stale_time(&self) -> Duration {
        self.stale_time
    }

    fn notify(&self, key: &QueryKey, change: CacheChange) {
        // No subscribers is not an error.
        let _ = self.notifier.send(CacheEvent {
            key: key.clone(),
            change,
        });
    }

    fn is_fresh(&self, entry: &Entry<V>) -> bool {
        entry.status == QueryStatus::Success
            && !entry.invalidated
            && entry
                .updated_at
                .is_some_and(|at| at.elapsed() < self.stale_time)
    }

    /// Returns fresh cached data, joins an identical in-flight request, or
    /// starts `fetcher` and records its result.
    pub async fn fetch<F, Fut>(&self, key: &QueryKey, fetcher: F) -> Result<V, ApiException>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, ApiException>> + Send + 'static,
    {
        let flight = {
            let mut inner = lock(&self.inner);
            let ticket = inner.next_ticket;
            let entry = inner.entries.entry(key.clone()).or_default();

            if self.is_fresh(entry)
                && let Some(data) = &entry.data
            {
                debug!("Cache hit for {}", key);
                return Ok(data.clone());
            }

            if let Some((_, flight)) = &entry.in_flight {
                debug!("Joining in-flight request for {}", key);
                flight.clone()
            } else {
                debug!("Fetching {}", key);
                let cache = self.clone();
                let settle_key = key.clone();
                let request = fetcher();
                let flight = async move {
                    let result = request.await;
                    cache.settle(&settle_key, ticket, &result);
                    result
                }
                .boxed()
                .shared();

                entry.in_flight = Some((ticket, flight.clone()));
                if entry.data.is_none() {
                    entry.status = QueryStatus::Loading;
                }
                inner.next_ticket += 1;
                self.notify(key, CacheChange::Fetching);
                flight
            }
        };
        flight.await
    }

    fn settle(&self, key: &QueryKey, ticket: u64, result: &Result<V, ApiException>) {
        let change = {
            let mut inner = lock(&self.inner);
            let Some(entry) = inner.entries.get_mut(key) else {
                return;
            };
            if entry.in_flight.as_ref().map(|(current, _)| *current) != Some(ticket) {
                debug!("Discarding superseded result for {}", key);
                return;
            }
            entry.in_flight = None;
            match result {
                Ok(data) => {
                    entry.data = Some(data.clone());
                    entry.error = None;
                    entry.status = QueryStatus::Success;
                    entry.updated_at = Some(Instant::now());
                    entry.invalidated = false;
                    CacheChange::Updated
                }
                Err(error) => {
                    entry.error = Some(error.clone());
                    entry.status = QueryStatus::Error;
                    CacheChange::Failed
                }
            }
        };
        self.notify(key, change);
    }

    pub fn state(&self, key: &QueryKey) -> QueryState<V> {
        let inner = lock(&self.inner);
        match inner.entries.get(key) {
            Some(entry) => QueryState {
                status: entry.status,
                data: entry.data.clone(),
                error: entry.error.clone(),
                updated_at: entry.updated_at,
                is_stale: !self.is_fresh(entry),
                is_fetching: entry.in_flight.is_some(),
            },
            None => QueryState {
                status: QueryStatus::Idle,
                data: None,
                error: None,
                updated_at: None,
                is_stale: true,
                is_fetching: false,
            },
        }
    }

    pub fn data(&self, key: &QueryKey) -> Option<V> {
        lock(&self.inner).entries.get(key).and_then(|e| e.data.clone())
    }

    pub fn keys(&self) -> Vec<QueryKey> {
        let mut keys: Vec<QueryKey> = lock(&self.inner).entries.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn set(&self, key: &QueryKey, value: V) {
        {
            let mut inner = lock(&self.inner);
            let entry = inner.entries.entry(key.clone()).or_default();
            entry.data = Some(value);
            entry.error = None;
            entry.status = QueryStatus::Success;
            entry.updated_at = Some(Instant::now());
            entry.invalidated = false;
            entry.in_flight = None;
        }
        self.notify(key, CacheChange::Updated);
    }

    pub fn remove(&self, key: &QueryKey) {
        let removed = lock(&self.inner).entries.remove(key).is_some();
        if removed {
            self.notify(key, CacheChange::Removed);
        }
    }

    /// Marks every entry under `prefix` stale. Data stays visible; the next
    /// access refetches in the background.
    pub fn invalidate(&self, prefix: &QueryKey) -> usize {
        let keys: Vec<QueryKey> = {
            let mut inner = lock(&self.inner);
            inner
                .entries
                .iter_mut()
                .filter(|(key, _)| key.starts_with(prefix))
                .map(|(key, entry)| {
                    entry.invalidated = true;
                    key.clone()
                })
                .collect()
        };
        for key in &keys {
            self.notify(key, CacheChange::Invalidated);
        }
        debug!("Invalidated {} entries under {}", keys.len(), prefix);
        keys.len()
    }

    pub fn update_matching(&self, prefix: &QueryKey, mut f: impl FnMut(&QueryKey, &mut V)) -> usize {
        let keys: Vec<QueryKey> = {
            let mut inner = lock(&self.inner);
            inner
                .entries
                .iter_mut()
                .filter(|(key, _)| key.starts_with(prefix))
                .filter_map(|(key, entry)| {
                    let data = entry.data.as_mut()?;
                    f(key, data);
                    Some(key.clone())
                })
                .collect()
        };
        for key in &keys {
            self.notify(key, CacheChange::Updated);
        }
        keys.len()
    }

    /// First phase of an optimistic write: captures every entry under
    /// `prefix` and detaches their in-flight requests.
    pub fn begin_optimistic(&self, prefix: &QueryKey) -> SnapshotToken<V> {
        let mut inner = lock(&self.inner);
        let entries = inner
            .entries
            .iter_mut()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, entry)| {
                entry.in_flight = None;
                (key.clone(), entry.snapshot())
            })
            .collect();
        SnapshotToken {
            prefix: prefix.clone(),
            entries,
        }
    }

    pub fn commit(&self, token: SnapshotToken<V>) {
        self.invalidate(&token.prefix);
    }

    /// The mutation failed: every captured entry is restored verbatim.
    /// Entries created under the prefix since the snapshot are kept but
    /// marked stale, since they may reflect the failed write.
    pub fn rollback(&self, token: SnapshotToken<V>) {
        let SnapshotToken { prefix, entries } = token;
        let (restored, newer) = {
            let mut inner = lock(&self.inner);
            let newer: Vec<QueryKey> = inner
                .entries
                .iter_mut()
                .filter(|(key, _)| key.starts_with(&prefix) && !entries.iter().any(|(k, _)| k == *key))
                .map(|(key, entry)| {
                    entry.invalidated = true;
                    key.clone()
                })
                .collect();
            let mut restored = Vec::with_capacity(entries.len());
            for (key, snapshot) in entries {
                inner.entries.insert(key.clone(), Entry::restore(snapshot));
                restored.push(key);
            }
            (restored, newer)
        };
        debug!(
            "Rolled back {} entries under {} ({} newer marked stale)",
            restored.len(),
            prefix,
            newer.len()
        );
        for key in &restored {
            self.notify(key, CacheChange::RolledBack);
        }
        for key in &newer {
            self.notify(key, CacheChange::Invalidated);
        }
    }

    pub fn subscribe(&self, prefix: &QueryKey) -> CacheSubscription {
        CacheSubscription {
            prefix: prefix.clone(),
            receiver: self.notifier.subscribe(),
        }
    }
}
