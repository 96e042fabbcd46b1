//! Time-expiring caches for sounds and search pages.
//!
//! Two maps share one TTL: sounds by id, pages by normalized `query:page`.
//! Reads check expiry themselves, so a stale entry is never handed out even
//! if the background sweep has not run yet. Every mutation is mirrored to
//! the [`KeyValueStore`]; a failed write switches the cache to memory-only
//! for the rest of the process.
//!
//! Writes serialize the whole map and hit the store synchronously while the
//! map lock is held. `max_items` and `max_pages` bound both maps so each of
//! those documents stays small.

use crate::clock::{self, Clock};
use crate::executor::{Fetched, ResponseMeta};
use crate::storage::KeyValueStore;
use crate::types::{Page, Sound};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub const ITEM_CACHE_KEY: &str = "item_cache";
pub const SEARCH_CACHE_KEY: &str = "search_cache";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheConfig {
    pub ttl: Duration,
    pub sweep_interval: Duration,
    /// Oldest sounds are dropped beyond this many.
    pub max_items: usize,
    pub max_pages: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(5 * 60),
            sweep_interval: Duration::from_secs(60),
            max_items: 2_000,
            max_pages: 200,
        }
    }
}

/// A cached value with its capture time (epoch millis) and the validators
/// the server sent with it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedEntry<T> {
    pub data: T,
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    #[serde(
        rename = "lastModified",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub last_modified: Option<String>,
}

impl<T> CachedEntry<T> {
    fn stamp(fetched: Fetched<T>, now: i64) -> Self {
        let ResponseMeta {
            etag,
            last_modified,
            ..
        } = fetched.meta;
        Self {
            data: fetched.value,
            timestamp: now,
            etag,
            last_modified,
        }
    }
}

pub type CachedItem = CachedEntry<Sound>;
pub type CachedPage = CachedEntry<Page>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    pub items_removed: usize,
    pub pages_removed: usize,
}

impl SweepStats {
    pub fn total(&self) -> usize {
        self.items_removed + self.pages_removed
    }
}

/// Composite key for a page of results: trimmed, lower-cased query text and
/// the page number.
pub fn page_key(query: &str, page: u32) -> String {
    format!("{}:{}", query.trim().to_lowercase(), page)
}

#[derive(Debug, Default)]
struct Maps {
    items: HashMap<u64, CachedItem>,
    pages: HashMap<String, CachedPage>,
}

#[derive(Debug)]
pub struct SoundCache {
    maps: Mutex<Maps>,
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    config: CacheConfig,
    durable: AtomicBool,
}

impl SoundCache {
    pub fn open(store: Arc<dyn KeyValueStore>, config: CacheConfig) -> Self {
        Self::open_with_clock(store, clock::system(), config)
    }

    /// Loads both maps from `store`, dropping anything already expired.
    pub fn open_with_clock(
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        config: CacheConfig,
    ) -> Self {
        let cache = Self {
            maps: Mutex::new(Maps::default()),
            store,
            clock,
            config,
            durable: AtomicBool::new(true),
        };

        let now = cache.clock.now_millis();
        let (mut items, mut items_pruned) = cache.load::<u64, Sound>(ITEM_CACHE_KEY, now);
        let (mut pages, mut pages_pruned) = cache.load::<String, Page>(SEARCH_CACHE_KEY, now);
        items_pruned |= trim_oldest(&mut items, config.max_items) > 0;
        pages_pruned |= trim_oldest(&mut pages, config.max_pages) > 0;
        info!(
            items = items.len(),
            pages = pages.len(),
            "loaded sound cache from storage"
        );

        let mut maps = cache.lock();
        maps.items = items;
        maps.pages = pages;
        if items_pruned {
            cache.persist_items(&maps);
        }
        if pages_pruned {
            cache.persist_pages(&maps);
        }
        drop(maps);
        cache
    }

    pub fn config(&self) -> CacheConfig {
        self.config
    }

    /// Whether writes still reach durable storage.
    pub fn is_durable(&self) -> bool {
        self.durable.load(Ordering::Relaxed)
    }

    pub fn get_item(&self, id: u64) -> Option<Sound> {
        let now = self.clock.now_millis();
        let mut maps = self.lock();
        let fresh = self.is_fresh(maps.items.get(&id)?.timestamp, now);
        if fresh {
            debug!(id, "item cache hit");
            return maps.items.get(&id).map(|e| e.data.clone());
        }
        maps.items.remove(&id);
        debug!(id, "evicted expired item on read");
        self.persist_items(&maps);
        None
    }

    /// Expiry-aware existence check. Never mutates; stale entries are left
    /// for the next read or sweep.
    pub fn has_item(&self, id: u64) -> bool {
        let now = self.clock.now_millis();
        self.lock()
            .items
            .get(&id)
            .is_some_and(|e| self.is_fresh(e.timestamp, now))
    }

    /// The full cached record, validators included, if still fresh.
    pub fn item_entry(&self, id: u64) -> Option<CachedItem> {
        let now = self.clock.now_millis();
        self.lock()
            .items
            .get(&id)
            .filter(|e| self.is_fresh(e.timestamp, now))
            .cloned()
    }

    pub fn set_item(&self, sound: impl Into<Fetched<Sound>>) {
        let fetched = sound.into();
        let now = self.clock.now_millis();
        let mut maps = self.lock();
        maps.items
            .insert(fetched.value.id, CachedEntry::stamp(fetched, now));
        self.trim(&mut maps);
        self.persist_items(&maps);
    }

    pub fn get_page(&self, query: &str, page: u32) -> Option<Page> {
        let key = page_key(query, page);
        let now = self.clock.now_millis();
        let mut maps = self.lock();
        let fresh = self.is_fresh(maps.pages.get(&key)?.timestamp, now);
        if fresh {
            debug!(key = %key, "page cache hit");
            return maps.pages.get(&key).map(|e| e.data.clone());
        }
        maps.pages.remove(&key);
        debug!(key = %key, "evicted expired page on read");
        self.persist_pages(&maps);
        None
    }

    pub fn has_page(&self, query: &str, page: u32) -> bool {
        let now = self.clock.now_millis();
        self.lock()
            .pages
            .get(&page_key(query, page))
            .is_some_and(|e| self.is_fresh(e.timestamp, now))
    }

    /// Stores `results` under `(query, page)` and every sound in it under
    /// its own id.
    pub fn set_page(&self, query: &str, page: u32, results: impl Into<Fetched<Page>>) {
        let fetched = results.into();
        let key = page_key(query, page);
        let now = self.clock.now_millis();
        let mut maps = self.lock();
        for sound in &fetched.value.results {
            maps.items
                .insert(sound.id, CachedEntry::stamp(Fetched::from(sound.clone()), now));
        }
        debug!(key = %key, sounds = fetched.value.results.len(), "caching page");
        maps.pages.insert(key, CachedEntry::stamp(fetched, now));
        self.trim(&mut maps);
        self.persist_items(&maps);
        self.persist_pages(&maps);
    }

    /// Empties both maps and removes them from storage.
    pub fn clear(&self) {
        let mut maps = self.lock();
        maps.items.clear();
        maps.pages.clear();
        for key in [ITEM_CACHE_KEY, SEARCH_CACHE_KEY] {
            if let Err(e) = self.store.remove(key) {
                warn!(key, error = %e, "failed to remove cache from storage");
            }
        }
        info!("sound cache cleared");
    }

    /// Drops every expired entry from both maps.
    pub fn sweep(&self) -> SweepStats {
        let now = self.clock.now_millis();
        let mut maps = self.lock();

        let items_before = maps.items.len();
        maps.items.retain(|_, e| self.is_fresh(e.timestamp, now));
        let pages_before = maps.pages.len();
        maps.pages.retain(|_, e| self.is_fresh(e.timestamp, now));

        let stats = SweepStats {
            items_removed: items_before - maps.items.len(),
            pages_removed: pages_before - maps.pages.len(),
        };
        if stats.items_removed > 0 {
            self.persist_items(&maps);
        }
        if stats.pages_removed > 0 {
            self.persist_pages(&maps);
        }
        if stats.total() > 0 {
            debug!(
                items = stats.items_removed,
                pages = stats.pages_removed,
                "swept expired cache entries"
            );
        }
        stats
    }

    /// Sweeps on `config.sweep_interval` until the cache is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        let cache: Weak<Self> = Arc::downgrade(self);
        let period = self.config.sweep_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match cache.upgrade() {
                    Some(cache) => {
                        cache.sweep();
                    }
                    None => break,
                }
            }
        })
    }

    /// Raw entry counts, expired entries included.
    pub fn len(&self) -> (usize, usize) {
        let maps = self.lock();
        (maps.items.len(), maps.pages.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == (0, 0)
    }

    fn trim(&self, maps: &mut Maps) {
        let items = trim_oldest(&mut maps.items, self.config.max_items);
        let pages = trim_oldest(&mut maps.pages, self.config.max_pages);
        if items + pages > 0 {
            debug!(items, pages, "cache full, dropped oldest entries");
        }
    }

    fn is_fresh(&self, timestamp: i64, now: i64) -> bool {
        let ttl = i64::try_from(self.config.ttl.as_millis()).unwrap_or(i64::MAX);
        now.saturating_sub(timestamp) < ttl
    }

    fn lock(&self) -> MutexGuard<'_, Maps> {
        self.maps.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn load<K, T>(&self, key: &str, now: i64) -> (HashMap<K, CachedEntry<T>>, bool)
    where
        K: FromStr + Hash + Eq,
        T: DeserializeOwned,
    {
        let raw = match self.store.get(key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return (HashMap::new(), false),
            Err(e) => {
                warn!(key, error = %e, "could not read cache from storage");
                return (HashMap::new(), false);
            }
        };
        let parsed: BTreeMap<String, serde_json::Value> = match serde_json::from_str(&raw) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(key, error = %e, "discarding unreadable cache document");
                return (HashMap::new(), true);
            }
        };

        let total = parsed.len();
        let map: HashMap<K, CachedEntry<T>> = parsed
            .into_iter()
            .filter_map(|(k, v)| {
                let id = k.parse::<K>().ok()?;
                let entry = serde_json::from_value::<CachedEntry<T>>(v).ok()?;
                self.is_fresh(entry.timestamp, now).then_some((id, entry))
            })
            .collect();
        let pruned = map.len() != total;
        (map, pruned)
    }

    fn persist_items(&self, maps: &Maps) {
        let doc: BTreeMap<String, &CachedItem> =
            maps.items.iter().map(|(k, v)| (k.to_string(), v)).collect();
        self.persist(ITEM_CACHE_KEY, &doc);
    }

    fn persist_pages(&self, maps: &Maps) {
        let doc: BTreeMap<&str, &CachedPage> =
            maps.pages.iter().map(|(k, v)| (k.as_str(), v)).collect();
        self.persist(SEARCH_CACHE_KEY, &doc);
    }

    fn persist<V: Serialize>(&self, key: &str, doc: &V) {
        if !self.is_durable() {
            return;
        }
        let result = serde_json::to_string(doc)
            .map_err(crate::storage::StorageError::from)
            .and_then(|json| self.store.set(key, &json));
        if let Err(e) = result {
            warn!(key, error = %e, "cache write failed, continuing memory-only");
            self.durable.store(false, Ordering::Relaxed);
        }
    }
}

/// Removes the oldest entries until at most `cap` remain.
fn trim_oldest<K, T>(map: &mut HashMap<K, CachedEntry<T>>, cap: usize) -> usize
where
    K: Clone + Hash + Eq,
{
    let excess = map.len().saturating_sub(cap);
    if excess == 0 {
        return 0;
    }
    let mut by_age: Vec<(i64, K)> = map
        .iter()
        .map(|(k, e)| (e.timestamp, k.clone()))
        .collect();
    by_age.sort_by_key(|(timestamp, _)| *timestamp);
    for (_, key) in by_age.into_iter().take(excess) {
        map.remove(&key);
    }
    excess
}
