use crate::cache::SoundCache;
use crate::storage::KeyValueStore;
use crate::types::Sound;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::warn;

pub const FAVORITES_KEY: &str = "favorites";

/// Ordered, duplicate-free list of favorite sound ids.
///
/// Only ids are kept. Full records are looked up in the cache on demand, so a
/// favorite whose sound has expired from the cache simply isn't listed by
/// [`Favorites::cached_sounds`].
#[derive(Debug)]
pub struct Favorites {
    ids: Mutex<Vec<u64>>,
    store: Arc<dyn KeyValueStore>,
}

impl Favorites {
    pub fn open(store: Arc<dyn KeyValueStore>) -> Self {
        let ids = match store.get(FAVORITES_KEY) {
            Ok(Some(raw)) => serde_json::from_str::<Vec<u64>>(&raw).unwrap_or_else(|e| {
                warn!(error = %e, "ignoring unreadable favorites");
                Vec::new()
            }),
            Ok(None) => Vec::new(),
            Err(e) => {
                warn!(error = %e, "could not read favorites");
                Vec::new()
            }
        };
        let mut unique = Vec::with_capacity(ids.len());
        for id in ids {
            if !unique.contains(&id) {
                unique.push(id);
            }
        }
        Self {
            ids: Mutex::new(unique),
            store,
        }
    }

    /// Returns `false` if `id` was already a favorite.
    pub fn add(&self, id: u64) -> bool {
        let mut ids = self.lock();
        if ids.contains(&id) {
            return false;
        }
        ids.push(id);
        self.persist(&ids);
        true
    }

    pub fn remove(&self, id: u64) -> bool {
        let mut ids = self.lock();
        let before = ids.len();
        ids.retain(|&x| x != id);
        let removed = ids.len() != before;
        if removed {
            self.persist(&ids);
        }
        removed
    }

    /// Flips membership, returning whether `id` is now a favorite.
    pub fn toggle(&self, id: u64) -> bool {
        let mut ids = self.lock();
        let now_favorite = match ids.iter().position(|&x| x == id) {
            Some(at) => {
                ids.remove(at);
                false
            }
            None => {
                ids.push(id);
                true
            }
        };
        self.persist(&ids);
        now_favorite
    }

    pub fn contains(&self, id: u64) -> bool {
        self.lock().contains(&id)
    }

    pub fn list(&self) -> Vec<u64> {
        self.lock().clone()
    }

    pub fn clear(&self) {
        let mut ids = self.lock();
        ids.clear();
        if let Err(e) = self.store.remove(FAVORITES_KEY) {
            warn!(error = %e, "failed to clear favorites");
        }
    }

    /// Favorites that still have a fresh record in `cache`, in favorite order.
    pub fn cached_sounds(&self, cache: &SoundCache) -> Vec<Sound> {
        self.list()
            .into_iter()
            .filter_map(|id| cache.get_item(id))
            .collect()
    }

    fn persist(&self, ids: &[u64]) {
        let result = serde_json::to_string(ids)
            .map_err(Into::into)
            .and_then(|raw| self.store.set(FAVORITES_KEY, &raw));
        if let Err(e) = result {
            warn!(error = %e, "failed to persist favorites");
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<u64>> {
        self.ids.lock().unwrap_or_else(|e| e.into_inner())
    }
}
