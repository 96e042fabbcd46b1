pub mod api;
pub mod cache;
pub mod clock;
pub mod config;
pub mod error;
pub mod executor;
pub mod favorites;
pub mod freesound;
pub mod navigator;
pub mod pagination;
pub mod rate_limit;
pub mod storage;
pub mod types;

#[cfg(test)]
mod test_support;

use std::sync::Arc;
use std::time::Duration;

use cache::SoundCache;
use config::Config;
use error::ApiResult;
use executor::HttpExecutor;
use favorites::Favorites;
use freesound::FreesoundClient;
use navigator::{NavigatorConfig, SearchNavigator};
use rate_limit::RateLimiter;
use storage::KeyValueStore;
use tracing::debug;

pub use types::*;

/// How long an untouched search session survives.
pub const SESSION_IDLE: Duration = Duration::from_secs(30 * 60);

#[derive(Debug, Clone)]
pub struct AppState {
    pub config: Config,
    pub client: FreesoundClient,
    pub cache: Arc<SoundCache>,
    pub favorites: Arc<Favorites>,
    // One navigator per open view, keyed by session id
    pub sessions: moka::future::Cache<uuid::Uuid, Arc<SearchNavigator>>,
}

impl AppState {
    pub fn new(config: Config, store: Arc<dyn KeyValueStore>) -> ApiResult<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(config.http_timeout)
            .build()?;
        let limiter = Arc::new(RateLimiter::new(config.rate_limit));
        let executor = HttpExecutor::new(http_client, limiter).with_auth(config.auth.clone());
        let client = FreesoundClient::new(&config.base_url, executor)?;

        let cache = Arc::new(SoundCache::open(store.clone(), config.cache));
        let favorites = Arc::new(Favorites::open(store));

        let sessions = moka::future::Cache::builder()
            .max_capacity(10_000)
            .time_to_idle(SESSION_IDLE)
            .eviction_listener(|id: Arc<uuid::Uuid>, navigator: Arc<SearchNavigator>, cause| {
                debug!(session = %id, ?cause, "closing search session");
                navigator.cancel();
            })
            .build();

        Ok(Self {
            config,
            client,
            cache,
            favorites,
            sessions,
        })
    }

    pub fn navigator(&self) -> SearchNavigator {
        SearchNavigator::new(
            self.cache.clone(),
            Arc::new(self.client.clone()),
            NavigatorConfig {
                max_distance: self.config.max_navigation_distance,
                ..NavigatorConfig::default()
            },
        )
    }

    /// A single sound, from the cache when fresh, otherwise from the API.
    pub async fn sound(&self, id: u64) -> ApiResult<Sound> {
        if let Some(sound) = self.cache.get_item(id) {
            debug!(id, "sound served from cache");
            return Ok(sound);
        }
        let fetched = self.client.get_sound(id).await?;
        let sound = fetched.value.clone();
        self.cache.set_item(fetched);
        Ok(sound)
    }
}
