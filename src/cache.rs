//! TTL cache with single-flight fetches and optional disk persistence
//!
//! The cache is the only shared mutable state of the engine. All table
//! mutation happens under one mutex; fetch functions always run with the
//! lock released so a slow registry call never blocks unrelated reads.

use crate::error::CacheError;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::hash::Hash;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Version tag written into persisted cache files
const CACHE_FORMAT_VERSION: u32 = 1;

/// Used when `now + ttl` does not fit in an `Instant`
const FAR_FUTURE: Duration = Duration::from_secs(60 * 60 * 24 * 365 * 30);

/// A cached value and the instant it stops being served
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub value: V,
    pub expires_at: Instant,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Counters exposed for observability
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub errors: u64,
    /// Live (unexpired) entries
    pub size: usize,
}

struct Flight<V, E> {
    id: u64,
    sender: broadcast::Sender<Result<V, E>>,
}

struct Table<K, V, E> {
    entries: HashMap<K, CacheEntry<V>>,
    in_flight: HashMap<K, Flight<V, E>>,
    next_flight: u64,
}

impl<K: Eq + Hash + Clone, V: Clone, E> Table<K, V, E> {
    /// Value for `key` if present and unexpired; expired entries are dropped
    fn live_value(&mut self, key: &K, now: Instant) -> Option<V> {
        match self.entries.get(key) {
            Some(entry) if !entry.is_expired(now) => Some(entry.value.clone()),
            Some(_) => {
                self.entries.remove(key);
                None
            }
            None => None,
        }
    }

    fn insert(&mut self, key: K, value: V, expires_at: Instant, max_entries: Option<usize>) {
        if let Some(max) = max_entries {
            if !self.entries.contains_key(&key) {
                self.make_room(max, Instant::now());
            }
        }
        self.entries.insert(key, CacheEntry { value, expires_at });
    }

    /// Drop expired entries, then the soonest-expiring ones, until one slot is free
    fn make_room(&mut self, max: usize, now: Instant) {
        if self.entries.len() < max {
            return;
        }

        self.entries.retain(|_, entry| !entry.is_expired(now));
        if self.entries.len() < max {
            return;
        }

        let excess = self.entries.len() + 1 - max;
        let target = excess.max(max / 10);

        let mut by_expiry: Vec<(K, Instant)> = self
            .entries
            .iter()
            .map(|(key, entry)| (key.clone(), entry.expires_at))
            .collect();
        by_expiry.sort_by_key(|(_, expires_at)| *expires_at);

        for (key, _) in by_expiry.into_iter().take(target) {
            self.entries.remove(&key);
        }

        debug!("evicted {} cache entries", target);
    }
}

enum Role<V, E> {
    Hit(V),
    Follower(broadcast::Receiver<Result<V, E>>),
    Leader(u64),
}

/// Generic TTL cache.
///
/// `E` is the error type of the fetch functions; it must be `Clone` because
/// a failed single-flight fetch hands the same error to every waiting caller.
///
/// # Examples
///
/// ```
/// use deps_inspect::Cache;
/// use std::time::Duration;
///
/// # #[tokio::main]
/// # async fn main() {
/// let cache: Cache<String, u32, String> = Cache::new(Duration::from_secs(60));
///
/// let value = cache
///     .get_or_fetch("answer".to_string(), Duration::from_secs(60), || async { Ok(42) })
///     .await;
/// assert_eq!(value, Ok(42));
/// assert_eq!(cache.get(&"answer".to_string()), Some(42));
/// # }
/// ```
pub struct Cache<K, V, E> {
    table: Mutex<Table<K, V, E>>,
    default_ttl: Duration,
    max_entries: Option<usize>,
    path: Option<PathBuf>,
    hits: AtomicU64,
    misses: AtomicU64,
    errors: AtomicU64,
}

impl<K, V, E> Cache<K, V, E>
where
    K: Eq + Hash + Clone + std::fmt::Debug,
    V: Clone,
    E: Clone,
{
    /// Create an in-memory cache
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            table: Mutex::new(Table {
                entries: HashMap::new(),
                in_flight: HashMap::new(),
                next_flight: 0,
            }),
            default_ttl,
            max_entries: None,
            path: None,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            errors: AtomicU64::new(0),
        }
    }

    /// Bound the number of stored entries
    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = (max_entries > 0).then_some(max_entries);
        self
    }

    /// Enable `persist()`/`load()` against `path`
    pub fn with_persistence(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn lock(&self) -> MutexGuard<'_, Table<K, V, E>> {
        // Table state stays consistent across a panic in a caller, so a
        // poisoned lock is still usable.
        self.table.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Look up a value without fetching
    pub fn get(&self, key: &K) -> Option<V> {
        let value = self.lock().live_value(key, Instant::now());
        match value {
            Some(_) => self.hits.fetch_add(1, Ordering::Relaxed),
            None => self.misses.fetch_add(1, Ordering::Relaxed),
        };
        value
    }

    /// Store a value for `ttl`
    pub fn set(&self, key: K, value: V, ttl: Duration) {
        let expires_at = expiry(Instant::now(), ttl);
        self.lock().insert(key, value, expires_at, self.max_entries);
    }

    /// Remove one key
    pub fn invalidate(&self, key: &K) -> bool {
        self.lock().entries.remove(key).is_some()
    }

    /// Remove every entry
    pub fn flush(&self) {
        let mut table = self.lock();
        let removed = table.entries.len();
        table.entries.clear();
        debug!("flushed {} cache entries", removed);
    }

    pub fn stats(&self) -> CacheStats {
        let now = Instant::now();
        let size = self
            .lock()
            .entries
            .values()
            .filter(|entry| !entry.is_expired(now))
            .count();

        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            size,
        }
    }

    fn claim(&self, key: &K) -> Role<V, E> {
        let mut table = self.lock();

        if let Some(value) = table.live_value(key, Instant::now()) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Role::Hit(value);
        }

        if let Some(flight) = table.in_flight.get(key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Role::Follower(flight.sender.subscribe());
        }

        let id = table.next_flight;
        table.next_flight += 1;
        let (sender, _) = broadcast::channel(1);
        table.in_flight.insert(key.clone(), Flight { id, sender });
        self.misses.fetch_add(1, Ordering::Relaxed);
        Role::Leader(id)
    }

    /// Return the cached value for `key`, or run `fetch` to produce it.
    ///
    /// Concurrent callers for the same key share one `fetch` invocation and
    /// all receive its result. Successes are stored for `ttl`; failures are
    /// returned but never cached. If the caller running `fetch` is dropped,
    /// one of the waiting callers runs its own `fetch` instead.
    pub async fn get_or_fetch<F, Fut>(&self, key: K, ttl: Duration, fetch: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        let id = loop {
            match self.claim(&key) {
                Role::Hit(value) => return Ok(value),
                Role::Follower(mut receiver) => match receiver.recv().await {
                    Ok(result) => return result,
                    Err(_) => {
                        debug!("in-flight fetch for {:?} was abandoned, taking over", key);
                        continue;
                    }
                },
                Role::Leader(id) => break id,
            }
        };

        let guard = FlightGuard {
            cache: self,
            key: &key,
            id,
            done: false,
        };

        let result = fetch().await;
        if result.is_err() {
            self.errors.fetch_add(1, Ordering::Relaxed);
        }

        let stored = result.as_ref().ok().map(|value| (value.clone(), ttl));
        if let Some(flight) = guard.complete(stored) {
            // No receivers is fine: nobody was waiting.
            let _ = flight.sender.send(result.clone());
        }

        result
    }

    /// Return outcomes for all `keys`, fetching every miss in one batch.
    ///
    /// `batch_fetch` receives only the keys this call has to fetch and is
    /// not called when everything is cached or already being fetched. Keys
    /// with a fetch in flight elsewhere (single or batched) wait for that
    /// fetch instead of requesting again. Successful outcomes are stored for
    /// `ttl`; failed ones are returned per key and never cached.
    ///
    /// Keys the batch does not return are absent from the result, and any
    /// caller waiting on them fetches them itself. Batch entries for keys
    /// that were not requested are ignored.
    pub async fn get_or_fetch_many<I, F, Fut>(
        &self,
        keys: I,
        ttl: Duration,
        mut batch_fetch: F,
    ) -> HashMap<K, Result<V, E>>
    where
        I: IntoIterator<Item = K>,
        F: FnMut(Vec<K>) -> Fut,
        Fut: Future<Output = HashMap<K, Result<V, E>>>,
    {
        let mut results = HashMap::new();
        let mut seen = HashSet::new();
        let mut pending: Vec<K> = keys.into_iter().filter(|k| seen.insert(k.clone())).collect();

        while !pending.is_empty() {
            let mut led = Vec::new();
            let mut followers = Vec::new();

            for key in pending.drain(..) {
                match self.claim(&key) {
                    Role::Hit(value) => {
                        results.insert(key, Ok(value));
                    }
                    Role::Follower(receiver) => followers.push((key, receiver)),
                    Role::Leader(id) => led.push((key, id)),
                }
            }

            // Our own flights are published before waiting on anyone else's,
            // so two overlapping batches can never wait on each other.
            if !led.is_empty() {
                debug!(
                    "batch fetching {} missing keys ({} in flight elsewhere)",
                    led.len(),
                    followers.len()
                );
                let keys = led.iter().map(|(key, _)| key.clone()).collect();
                let flights = BatchFlights { cache: self, flights: led };
                let fetched = batch_fetch(keys).await;
                flights.complete(fetched, ttl, &mut results);
            }

            for (key, mut receiver) in followers {
                match receiver.recv().await {
                    Ok(result) => {
                        results.insert(key, result);
                    }
                    Err(_) => {
                        debug!("in-flight fetch for {:?} was abandoned, taking over", key);
                        pending.push(key);
                    }
                }
            }
        }

        results
    }
}

/// In-flight markers claimed by one batch; unfinished ones are cleared on drop
struct BatchFlights<'a, K, V, E>
where
    K: Eq + Hash + Clone + std::fmt::Debug,
    V: Clone,
    E: Clone,
{
    cache: &'a Cache<K, V, E>,
    flights: Vec<(K, u64)>,
}

impl<K, V, E> BatchFlights<'_, K, V, E>
where
    K: Eq + Hash + Clone + std::fmt::Debug,
    V: Clone,
    E: Clone,
{
    /// Store successes, detach every claimed flight and notify its waiters
    fn complete(
        mut self,
        mut fetched: HashMap<K, Result<V, E>>,
        ttl: Duration,
        results: &mut HashMap<K, Result<V, E>>,
    ) {
        let flights = std::mem::take(&mut self.flights);
        let expires_at = expiry(Instant::now(), ttl);
        let mut notify = Vec::new();

        {
            let mut table = self.cache.lock();
            for (key, id) in flights {
                let outcome = fetched.remove(&key);
                match &outcome {
                    Some(Ok(value)) => {
                        table.insert(key.clone(), value.clone(), expires_at, self.cache.max_entries);
                    }
                    Some(Err(_)) => {
                        self.cache.errors.fetch_add(1, Ordering::Relaxed);
                    }
                    None => {}
                }

                let flight = match table.in_flight.get(&key) {
                    Some(flight) if flight.id == id => table.in_flight.remove(&key),
                    _ => None,
                };

                // A missing outcome drops the flight, which wakes its waiters
                // with a closed channel so they fetch on their own.
                if let Some(outcome) = outcome {
                    if let Some(flight) = flight {
                        notify.push((flight, outcome.clone()));
                    }
                    results.insert(key, outcome);
                }
            }
        }

        for (flight, outcome) in notify {
            let _ = flight.sender.send(outcome);
        }
    }
}

impl<K, V, E> Drop for BatchFlights<'_, K, V, E>
where
    K: Eq + Hash + Clone + std::fmt::Debug,
    V: Clone,
    E: Clone,
{
    fn drop(&mut self) {
        if self.flights.is_empty() {
            return;
        }
        let mut table = self.cache.lock();
        for (key, id) in self.flights.drain(..) {
            if matches!(table.in_flight.get(&key), Some(flight) if flight.id == id) {
                table.in_flight.remove(&key);
            }
        }
    }
}

/// Clears the in-flight marker of a leader that never completed
struct FlightGuard<'a, K, V, E>
where
    K: Eq + Hash + Clone + std::fmt::Debug,
    V: Clone,
    E: Clone,
{
    cache: &'a Cache<K, V, E>,
    key: &'a K,
    id: u64,
    done: bool,
}

impl<K, V, E> FlightGuard<'_, K, V, E>
where
    K: Eq + Hash + Clone + std::fmt::Debug,
    V: Clone,
    E: Clone,
{
    /// Store the value (if any) and detach the flight so its waiters can be notified
    fn complete(mut self, stored: Option<(V, Duration)>) -> Option<Flight<V, E>> {
        self.done = true;
        let mut table = self.cache.lock();

        if let Some((value, ttl)) = stored {
            let expires_at = expiry(Instant::now(), ttl);
            table.insert(self.key.clone(), value, expires_at, self.cache.max_entries);
        }

        match table.in_flight.get(self.key) {
            Some(flight) if flight.id == self.id => table.in_flight.remove(self.key),
            _ => None,
        }
    }
}

impl<K, V, E> Drop for FlightGuard<'_, K, V, E>
where
    K: Eq + Hash + Clone + std::fmt::Debug,
    V: Clone,
    E: Clone,
{
    fn drop(&mut self) {
        if self.done {
            return;
        }
        let mut table = self.cache.lock();
        if matches!(table.in_flight.get(self.key), Some(flight) if flight.id == self.id) {
            // Dropping the sender wakes the waiters with a closed channel.
            table.in_flight.remove(self.key);
        }
    }
}

fn expiry(now: Instant, ttl: Duration) -> Instant {
    now.checked_add(ttl).unwrap_or_else(|| now + FAR_FUTURE)
}

#[derive(Serialize, Deserialize)]
struct PersistedCache<K, V> {
    format_version: u32,
    entries: Vec<PersistedEntry<K, V>>,
}

#[derive(Serialize, Deserialize)]
struct PersistedEntry<K, V> {
    key: K,
    value: V,
    expires_at: DateTime<Utc>,
}

impl<K, V, E> Cache<K, V, E>
where
    K: Eq + Hash + Clone + std::fmt::Debug + Serialize + DeserializeOwned,
    V: Clone + Serialize + DeserializeOwned,
    E: Clone,
{
    /// Write all live entries to the persistence path.
    ///
    /// Returns the number of entries written. Failures are logged and
    /// counted in [`CacheStats::errors`]; the in-memory table is untouched.
    pub async fn persist(&self) -> Result<usize, CacheError> {
        let result = self.write_snapshot().await;
        if let Err(e) = &result {
            self.errors.fetch_add(1, Ordering::Relaxed);
            warn!("Failed to persist cache: {}", e);
        }
        result
    }

    async fn write_snapshot(&self) -> Result<usize, CacheError> {
        let path = self.path.clone().ok_or(CacheError::NoPath)?;

        let snapshot = {
            let now = Instant::now();
            let wall_now = Utc::now();
            let table = self.lock();
            table
                .entries
                .iter()
                .filter(|(_, entry)| !entry.is_expired(now))
                .filter_map(|(key, entry)| {
                    let remaining =
                        chrono::Duration::from_std(entry.expires_at.duration_since(now)).ok()?;
                    Some(PersistedEntry {
                        key: key.clone(),
                        value: entry.value.clone(),
                        expires_at: wall_now.checked_add_signed(remaining)?,
                    })
                })
                .collect::<Vec<_>>()
        };

        let count = snapshot.len();
        let body = serde_json::to_vec(&PersistedCache {
            format_version: CACHE_FORMAT_VERSION,
            entries: snapshot,
        })?;

        let io_err = |source| CacheError::Io {
            path: path.clone(),
            source,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
        }

        // Write-then-rename so a crash never leaves a half-written cache.
        let tmp_path = path.with_extension("tmp");
        tokio::fs::write(&tmp_path, body).await.map_err(io_err)?;
        tokio::fs::rename(&tmp_path, &path).await.map_err(io_err)?;

        debug!("persisted {} cache entries to {}", count, path.display());
        Ok(count)
    }

    /// Restore entries from the persistence path.
    ///
    /// Returns the number of entries loaded. A missing, unreadable or corrupt
    /// file leaves the cache as it was; expired entries are skipped and
    /// entries already in memory are kept.
    pub async fn load(&self) -> usize {
        let Some(path) = self.path.as_deref() else {
            return 0;
        };

        let body = match tokio::fs::read(path).await {
            Ok(body) => body,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("no persisted cache at {}", path.display());
                return 0;
            }
            Err(e) => {
                self.errors.fetch_add(1, Ordering::Relaxed);
                warn!("Failed to read cache file {}: {}", path.display(), e);
                return 0;
            }
        };

        let persisted: PersistedCache<K, V> = match serde_json::from_slice(&body) {
            Ok(persisted) => persisted,
            Err(e) => {
                self.errors.fetch_add(1, Ordering::Relaxed);
                warn!("Ignoring corrupt cache file {}: {}", path.display(), e);
                return 0;
            }
        };

        if persisted.format_version != CACHE_FORMAT_VERSION {
            warn!(
                "Ignoring cache file {} with format version {}",
                path.display(),
                persisted.format_version
            );
            return 0;
        }

        let now = Instant::now();
        let wall_now = Utc::now();
        let mut loaded = 0;
        let mut table = self.lock();

        for entry in persisted.entries {
            let Ok(remaining) = entry.expires_at.signed_duration_since(wall_now).to_std() else {
                continue;
            };
            if remaining.is_zero() || table.entries.contains_key(&entry.key) {
                continue;
            }
            table.insert(
                entry.key,
                entry.value,
                expiry(now, remaining),
                self.max_entries,
            );
            loaded += 1;
        }

        debug!("loaded {} cache entries from {}", loaded, path.display());
        loaded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    type TestCache = Cache<String, String, String>;
    type Outcomes = HashMap<String, Result<String, String>>;

    fn key(s: &str) -> String {
        s.to_string()
    }

    #[tokio::test]
    async fn test_get_set_and_stats() {
        let cache = TestCache::new(Duration::from_secs(60));
        assert_eq!(cache.get(&key("a")), None);

        cache.set(key("a"), key("1"), Duration::from_secs(60));
        assert_eq!(cache.get(&key("a")), Some(key("1")));

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.size, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_entry_expires_at_ttl() {
        let cache = TestCache::new(Duration::from_secs(60));
        cache.set(key("a"), key("1"), Duration::from_secs(10));

        tokio::time::advance(Duration::from_millis(9_999)).await;
        assert_eq!(cache.get(&key("a")), Some(key("1")));

        tokio::time::advance(Duration::from_millis(1)).await;
        assert_eq!(cache.get(&key("a")), None);
        assert_eq!(cache.stats().size, 0);
    }

    #[tokio::test]
    async fn test_concurrent_get_or_fetch_runs_fetch_once() {
        let cache = TestCache::new(Duration::from_secs(60));
        let calls = AtomicUsize::new(0);

        let callers = (0..16).map(|_| {
            cache.get_or_fetch(key("pkg"), Duration::from_secs(60), || async {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                Ok::<_, String>(key("value"))
            })
        });
        let results = futures::future::join_all(callers).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(results.iter().all(|r| r.as_deref() == Ok("value")));
        assert_eq!(cache.stats().misses, 1);
    }

    #[tokio::test]
    async fn test_failure_is_shared_and_not_cached() {
        let cache = TestCache::new(Duration::from_secs(60));
        let calls = AtomicUsize::new(0);

        let callers = (0..4).map(|_| {
            cache.get_or_fetch(key("pkg"), Duration::from_secs(60), || async {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                Err::<String, _>(key("boom"))
            })
        });
        let results = futures::future::join_all(callers).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(results.iter().all(|r| r == &Err(key("boom"))));
        assert_eq!(cache.stats().errors, 1);

        let retried = cache
            .get_or_fetch(key("pkg"), Duration::from_secs(60), || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, String>(key("recovered"))
            })
            .await;
        assert_eq!(retried, Ok(key("recovered")));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_waiter_takes_over_abandoned_fetch() {
        let cache = Arc::new(TestCache::new(Duration::from_secs(60)));

        let leader_cache = Arc::clone(&cache);
        let leader = tokio::spawn(async move {
            leader_cache
                .get_or_fetch(key("pkg"), Duration::from_secs(60), || async {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok::<_, String>(key("leader"))
                })
                .await
        });
        tokio::time::sleep(Duration::from_millis(1)).await;

        let waiter_cache = Arc::clone(&cache);
        let waiter = tokio::spawn(async move {
            waiter_cache
                .get_or_fetch(key("pkg"), Duration::from_secs(60), || async {
                    Ok::<_, String>(key("waiter"))
                })
                .await
        });
        tokio::time::sleep(Duration::from_millis(1)).await;

        leader.abort();
        let result = waiter.await.unwrap();
        assert_eq!(result, Ok(key("waiter")));
        assert_eq!(cache.get(&key("pkg")), Some(key("waiter")));
    }

    #[tokio::test]
    async fn test_get_or_fetch_many_fetches_only_missing() {
        let cache = TestCache::new(Duration::from_secs(60));
        cache.set(key("a"), key("cached-a"), Duration::from_secs(60));

        let requested = Mutex::new(Vec::new());
        let result = cache
            .get_or_fetch_many(
                vec![key("a"), key("b"), key("c"), key("d"), key("b")],
                Duration::from_secs(60),
                |missing| {
                    requested.lock().unwrap().extend(missing.clone());
                    async move {
                        missing
                            .into_iter()
                            .filter(|k| k != "c")
                            .map(|k| {
                                let outcome = if k == "d" {
                                    Err(key("boom"))
                                } else {
                                    Ok(format!("fetched-{}", k))
                                };
                                (k, outcome)
                            })
                            .collect::<Outcomes>()
                    }
                },
            )
            .await;

        assert_eq!(
            *requested.lock().unwrap(),
            vec![key("b"), key("c"), key("d")]
        );
        assert_eq!(result.get("a"), Some(&Ok(key("cached-a"))));
        assert_eq!(result.get("b"), Some(&Ok(key("fetched-b"))));
        assert_eq!(result.get("d"), Some(&Err(key("boom"))));
        assert!(!result.contains_key("c"));
        assert_eq!(cache.get(&key("b")), Some(key("fetched-b")));
        assert_eq!(cache.get(&key("d")), None);
        assert_eq!(cache.stats().errors, 1);
    }

    #[tokio::test]
    async fn test_get_or_fetch_many_skips_batch_when_all_cached() {
        let cache = TestCache::new(Duration::from_secs(60));
        cache.set(key("a"), key("1"), Duration::from_secs(60));
        let counter = AtomicUsize::new(0);
        let calls = &counter;

        let result = cache
            .get_or_fetch_many(vec![key("a")], Duration::from_secs(60), |_| async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Outcomes::new()
            })
            .await;

        assert_eq!(result.len(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_overlapping_batches_fetch_each_key_once() {
        let cache = TestCache::new(Duration::from_secs(60));
        let counts = Mutex::new(HashMap::<String, usize>::new());
        let calls = &counts;
        let cache_ref = &cache;

        let batch = move |keys: Vec<String>| {
            cache_ref.get_or_fetch_many(keys, Duration::from_secs(60), move |missing| async move {
                for k in &missing {
                    *calls.lock().unwrap().entry(k.clone()).or_default() += 1;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
                missing
                    .into_iter()
                    .map(|k| {
                        let value = format!("v-{}", k);
                        (k, Ok(value))
                    })
                    .collect::<Outcomes>()
            })
        };

        let (first, second) = tokio::join!(
            batch(vec![key("a"), key("b")]),
            batch(vec![key("b"), key("c")])
        );

        assert_eq!(counts.lock().unwrap().len(), 3);
        assert!(counts.lock().unwrap().values().all(|&n| n == 1));
        assert_eq!(first.get("b"), Some(&Ok(key("v-b"))));
        assert_eq!(second.get("b"), Some(&Ok(key("v-b"))));
        assert_eq!(second.get("c"), Some(&Ok(key("v-c"))));
    }

    #[tokio::test]
    async fn test_batch_and_single_fetch_share_one_flight() {
        let cache = TestCache::new(Duration::from_secs(60));
        let counter = AtomicUsize::new(0);
        let calls = &counter;

        let single = cache.get_or_fetch(key("pkg"), Duration::from_secs(60), || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            Err::<String, _>(key("registry down"))
        });
        let batch = cache.get_or_fetch_many(
            vec![key("pkg")],
            Duration::from_secs(60),
            |missing| async move {
                calls.fetch_add(missing.len(), Ordering::SeqCst);
                missing
                    .into_iter()
                    .map(|k| (k, Ok(key("batched"))))
                    .collect::<Outcomes>()
            },
        );

        let (single, batch) = tokio::join!(single, batch);

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(single, Err(key("registry down")));
        assert_eq!(batch.get("pkg"), Some(&Err(key("registry down"))));
    }

    #[tokio::test]
    async fn test_batch_waiter_fetches_key_the_leader_skipped() {
        let cache = TestCache::new(Duration::from_secs(60));
        let counter = AtomicUsize::new(0);
        let calls = &counter;

        let skipping = cache.get_or_fetch_many(
            vec![key("pkg")],
            Duration::from_secs(60),
            |_| async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                Outcomes::new()
            },
        );
        let waiting = cache.get_or_fetch_many(
            vec![key("pkg")],
            Duration::from_secs(60),
            |missing| async move {
                calls.fetch_add(1, Ordering::SeqCst);
                missing
                    .into_iter()
                    .map(|k| (k, Ok(key("second"))))
                    .collect::<Outcomes>()
            },
        );

        let (skipped, waited) = tokio::join!(skipping, waiting);

        assert!(skipped.is_empty());
        assert_eq!(waited.get("pkg"), Some(&Ok(key("second"))));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_invalidate_and_flush() {
        let cache = TestCache::new(Duration::from_secs(60));
        cache.set(key("a"), key("1"), Duration::from_secs(60));
        cache.set(key("b"), key("2"), Duration::from_secs(60));

        assert!(cache.invalidate(&key("a")));
        assert!(!cache.invalidate(&key("a")));
        assert_eq!(cache.stats().size, 1);

        cache.flush();
        assert_eq!(cache.stats().size, 0);
    }

    #[tokio::test]
    async fn test_max_entries_evicts_soonest_expiring() {
        let cache = TestCache::new(Duration::from_secs(60)).with_max_entries(2);
        cache.set(key("short"), key("1"), Duration::from_secs(5));
        cache.set(key("long"), key("2"), Duration::from_secs(500));
        cache.set(key("new"), key("3"), Duration::from_secs(60));

        assert_eq!(cache.get(&key("short")), None);
        assert_eq!(cache.get(&key("long")), Some(key("2")));
        assert_eq!(cache.get(&key("new")), Some(key("3")));
    }

    #[tokio::test]
    async fn test_persist_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("cache.json");

        let cache = TestCache::new(Duration::from_secs(60)).with_persistence(&path);
        cache.set(key("a"), key("1"), Duration::from_secs(600));
        cache.set(key("b"), key("2"), Duration::from_secs(600));
        assert_eq!(cache.persist().await.unwrap(), 2);

        let restored = TestCache::new(Duration::from_secs(60)).with_persistence(&path);
        assert_eq!(restored.load().await, 2);
        assert_eq!(restored.get(&key("a")), Some(key("1")));
        assert_eq!(restored.get(&key("b")), Some(key("2")));
    }

    #[tokio::test]
    async fn test_load_corrupt_file_degrades_to_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");
        std::fs::write(&path, b"{ not json").unwrap();

        let cache = TestCache::new(Duration::from_secs(60)).with_persistence(&path);
        assert_eq!(cache.load().await, 0);
        assert_eq!(cache.stats().size, 0);
        assert_eq!(cache.stats().errors, 1);
    }

    #[tokio::test]
    async fn test_load_skips_expired_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");
        let body = serde_json::json!({
            "format_version": CACHE_FORMAT_VERSION,
            "entries": [
                { "key": "old", "value": "x", "expires_at": "2001-01-01T00:00:00Z" },
                { "key": "fresh", "value": "y", "expires_at": (Utc::now() + chrono::Duration::hours(1)).to_rfc3339() }
            ]
        });
        std::fs::write(&path, body.to_string()).unwrap();

        let cache = TestCache::new(Duration::from_secs(60)).with_persistence(&path);
        assert_eq!(cache.load().await, 1);
        assert_eq!(cache.get(&key("fresh")), Some(key("y")));
        assert_eq!(cache.get(&key("old")), None);
    }

    #[tokio::test]
    async fn test_persist_without_path_is_reported() {
        let cache = TestCache::new(Duration::from_secs(60));
        assert!(matches!(cache.persist().await, Err(CacheError::NoPath)));
        assert_eq!(cache.stats().errors, 1);
        assert_eq!(cache.load().await, 0);
    }
}
