//! Resolves a logical `(query, page)` request to a page of results by the
//! cheapest route available: the cache, a short cursor walk from the page
//! already in memory, or a fresh search from page 1.
//!
//! Each call to [`SearchNavigator::resolve`] takes a new generation number.
//! Results are only committed (to the cache and to the published view) if
//! their generation is still the latest, so a slow walk can never clobber a
//! newer request.

use crate::cache::SoundCache;
use crate::error::{ApiError, ApiResult};
use crate::executor::Fetched;
use crate::pagination::{self, Direction, PageSource};
use crate::types::Page;
use serde::Serialize;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Hops beyond which a fresh search is cheaper than walking.
pub const MAX_NAVIGATION_DISTANCE: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    Cached,
    Fresh,
    Walk,
    LargeJump,
}

/// What a view renders for the current request.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SearchView {
    pub page: Option<Page>,
    pub loading: bool,
    pub error: Option<String>,
    pub current_page: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_by: Option<Resolution>,
}

#[derive(Debug, Clone)]
pub struct NavigatorConfig {
    pub max_distance: u32,
    pub default_error: String,
}

impl Default for NavigatorConfig {
    fn default() -> Self {
        Self {
            max_distance: MAX_NAVIGATION_DISTANCE,
            default_error: "Failed to load sounds.".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
struct Loaded {
    key: String,
    number: u32,
    page: Fetched<Page>,
}

#[derive(Debug, Default)]
struct NavState {
    generation: u64,
    loaded: Option<Loaded>,
    view: SearchView,
}

enum Plan {
    Walk { from: Fetched<Page>, number: u32 },
    Fresh(Resolution),
}

enum WalkError {
    Stale,
    Api { error: ApiError, reached: u32 },
}

pub struct SearchNavigator {
    cache: Arc<SoundCache>,
    source: Arc<dyn PageSource>,
    config: NavigatorConfig,
    state: Mutex<NavState>,
    updates: watch::Sender<SearchView>,
}

impl std::fmt::Debug for SearchNavigator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchNavigator")
            .field("config", &self.config)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

fn normalize(query: &str) -> String {
    query.trim().to_lowercase()
}

impl SearchNavigator {
    pub fn new(cache: Arc<SoundCache>, source: Arc<dyn PageSource>, config: NavigatorConfig) -> Self {
        let (updates, _) = watch::channel(SearchView::default());
        Self {
            cache,
            source,
            config,
            state: Mutex::new(NavState::default()),
            updates,
        }
    }

    /// Live view updates: loading flips, results, errors.
    pub fn subscribe(&self) -> watch::Receiver<SearchView> {
        self.updates.subscribe()
    }

    pub fn view(&self) -> SearchView {
        self.lock().view.clone()
    }

    /// Abandons whatever is in flight. Late results are dropped on arrival.
    pub fn cancel(&self) {
        let mut state = self.lock();
        state.generation += 1;
        state.view.loading = false;
        self.publish(&state.view);
        debug!(generation = state.generation, "navigator cancelled");
    }

    /// Resolves `(query, page)`. `search` performs a fresh remote search and
    /// must return page 1; it is called at most once.
    ///
    /// Failures end up in [`SearchView::error`]. A superseded call returns
    /// the view of whichever request replaced it.
    pub async fn resolve<F, Fut>(&self, query: &str, page: u32, search: F) -> SearchView
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ApiResult<Fetched<Page>>>,
    {
        let target = page.max(1);
        let key = normalize(query);

        let (generation, plan) = match self.begin(&key, target) {
            Ok(started) => started,
            Err(view) => return view,
        };

        let outcome = match plan {
            Plan::Walk { from, number } => {
                match self.walk(from, number, target, generation).await {
                    Ok(found) => Ok((found, Resolution::Walk)),
                    Err(WalkError::Stale) => return self.view(),
                    Err(WalkError::Api { error, reached }) => {
                        info!(
                            error = %error,
                            reached,
                            target,
                            "walk failed, falling back to a fresh search"
                        );
                        self.fresh(search, target, generation)
                            .await
                            .map(|found| (found, Resolution::Fresh))
                    }
                }
            }
            Plan::Fresh(resolution) => self
                .fresh(search, target, generation)
                .await
                .map(|found| (found, resolution)),
        };

        match outcome {
            Ok((found, resolution)) => self.commit(generation, &key, target, Ok(found), resolution),
            Err(WalkError::Stale) => self.view(),
            Err(WalkError::Api { error, .. }) => {
                self.commit(generation, &key, target, Err(error), Resolution::Fresh)
            }
        }
    }

    /// Takes a generation and picks a route. Serves cache hits on the spot.
    fn begin(&self, key: &str, target: u32) -> Result<(u64, Plan), SearchView> {
        let mut state = self.lock();
        state.generation += 1;
        let generation = state.generation;

        if let Some(cached) = self.cache.get_page(key, target) {
            debug!(key, target, "serving page from cache");
            state.loaded = Some(Loaded {
                key: key.to_string(),
                number: target,
                page: Fetched::from(cached.clone()),
            });
            state.view = SearchView {
                page: Some(cached),
                loading: false,
                error: None,
                current_page: target,
                resolved_by: Some(Resolution::Cached),
            };
            self.publish(&state.view);
            return Err(state.view.clone());
        }

        let plan = match &state.loaded {
            Some(loaded) if loaded.key == key => {
                let distance = loaded.number.abs_diff(target);
                if distance > 0 && distance <= self.config.max_distance {
                    Plan::Walk {
                        from: loaded.page.clone(),
                        number: loaded.number,
                    }
                } else {
                    Plan::Fresh(Resolution::LargeJump)
                }
            }
            _ => Plan::Fresh(Resolution::Fresh),
        };

        state.view.loading = true;
        state.view.error = None;
        state.view.current_page = target;
        self.publish(&state.view);
        Ok((generation, plan))
    }

    /// Searches page 1 and walks forward to `target`.
    async fn fresh<F, Fut>(&self, search: F, target: u32, generation: u64) -> Result<Fetched<Page>, WalkError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ApiResult<Fetched<Page>>>,
    {
        let first = search().await;
        if !self.is_current(generation) {
            return Err(WalkError::Stale);
        }
        let first = first.map_err(|error| WalkError::Api { error, reached: 0 })?;

        // Page 1 is full unless it is also the last page, so its length is
        // the page size.
        let per_page = u32::try_from(first.value.results.len()).unwrap_or(u32::MAX);
        if per_page > 0 || first.value.count == 0 {
            let last = first.value.total_pages(per_page);
            if target > last {
                debug!(target, last, "target is past the last page");
                return Err(WalkError::Api {
                    error: ApiError::PageOutOfRange {
                        requested: target,
                        last,
                    },
                    reached: 1,
                });
            }
        }

        self.walk(first, 1, target, generation)
            .await
            .map_err(|err| match err {
                WalkError::Api {
                    error: ApiError::PaginationExhausted(Direction::Next),
                    reached,
                } => WalkError::Api {
                    error: ApiError::PageOutOfRange {
                        requested: target,
                        last: reached,
                    },
                    reached,
                },
                other => other,
            })
    }

    /// Hops one page at a time from `number` to `target`.
    async fn walk(
        &self,
        from: Fetched<Page>,
        number: u32,
        target: u32,
        generation: u64,
    ) -> Result<Fetched<Page>, WalkError> {
        let mut current = from;
        let mut at = number;
        while let Some(direction) = Direction::towards(at, target) {
            let hop = pagination::step(self.source.as_ref(), &current.value, direction).await;
            if !self.is_current(generation) {
                return Err(WalkError::Stale);
            }
            current = hop.map_err(|error| WalkError::Api { error, reached: at })?;
            at = direction.apply(at);
            debug!(page = at, target, %direction, "hop");
        }
        Ok(current)
    }

    fn commit(
        &self,
        generation: u64,
        key: &str,
        target: u32,
        result: ApiResult<Fetched<Page>>,
        resolution: Resolution,
    ) -> SearchView {
        let mut state = self.lock();
        if state.generation != generation {
            debug!(key, target, "discarding superseded result");
            return state.view.clone();
        }

        match result {
            Ok(found) => {
                self.cache.set_page(key, target, found.clone());
                state.view = SearchView {
                    page: Some(found.value.clone()),
                    loading: false,
                    error: None,
                    current_page: target,
                    resolved_by: Some(resolution),
                };
                state.loaded = Some(Loaded {
                    key: key.to_string(),
                    number: target,
                    page: found,
                });
            }
            Err(error) => {
                warn!(key, target, error = %error, "search failed");
                state.view.loading = false;
                state.view.error = Some(error.user_message(&self.config.default_error));
            }
        }
        self.publish(&state.view);
        state.view.clone()
    }

    fn is_current(&self, generation: u64) -> bool {
        self.lock().generation == generation
    }

    fn publish(&self, view: &SearchView) {
        self.updates.send_replace(view.clone());
    }

    fn lock(&self) -> MutexGuard<'_, NavState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheConfig;
    use crate::pagination::tests::FakeSource;
    use crate::storage::MemoryStore;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;

    struct Harness {
        cache: Arc<SoundCache>,
        source: Arc<FakeSource>,
        nav: Arc<SearchNavigator>,
        searches: Arc<AtomicUsize>,
    }

    impl Harness {
        fn new(query: &str, pages: u32) -> Self {
            Self::with_source(FakeSource::build(query, pages, 5))
        }

        fn with_source(source: FakeSource) -> Self {
            let cache = Arc::new(SoundCache::open(
                Arc::new(MemoryStore::new()),
                CacheConfig::default(),
            ));
            let source = Arc::new(source);
            let nav = Arc::new(SearchNavigator::new(
                cache.clone(),
                source.clone(),
                NavigatorConfig::default(),
            ));
            Self {
                cache,
                source,
                nav,
                searches: Arc::new(AtomicUsize::new(0)),
            }
        }

        /// Fresh-search primitive returning page 1 of `query` from the fake.
        fn search(&self, query: &str) -> impl FnOnce() -> std::future::Ready<ApiResult<Fetched<Page>>> {
            let searches = self.searches.clone();
            let first = self.source.pages.get(&FakeSource::url(query, 1)).cloned();
            move || {
                searches.fetch_add(1, Ordering::SeqCst);
                std::future::ready(first.map(Fetched::from).ok_or(ApiError::Transport {
                    status: 500,
                    body: String::new(),
                }))
            }
        }

        async fn go(&self, query: &str, page: u32) -> SearchView {
            self.nav.resolve(query, page, self.search(query)).await
        }

        fn searches(&self) -> usize {
            self.searches.load(Ordering::SeqCst)
        }
    }

    #[tokio::test]
    async fn cache_hit_never_searches() {
        let h = Harness::new("drum", 5);
        let page = FakeSource::page("drum", 2, 5, 5);
        h.cache.set_page("drum", 2, page.clone());

        let view = h.go("Drum", 2).await;
        assert_eq!(view.page, Some(page));
        assert_eq!(view.resolved_by, Some(Resolution::Cached));
        assert!(!view.loading);
        assert_eq!(h.searches(), 0);
        assert_eq!(h.source.fetch_count(), 0);
    }

    #[tokio::test]
    async fn fresh_then_short_walk() {
        let h = Harness::new("drum", 10);

        let first = h.go("drum", 1).await;
        assert_eq!(first.resolved_by, Some(Resolution::Fresh));
        assert_eq!(first.current_page, 1);
        assert_eq!(h.searches(), 1);

        let second = h.go("drum", 2).await;
        assert_eq!(second.resolved_by, Some(Resolution::Walk));
        assert_eq!(second.page.unwrap().ids()[0], 6);
        assert_eq!(h.searches(), 1);
        assert_eq!(h.source.fetch_count(), 1);
        assert!(h.cache.has_page("drum", 2));
    }

    #[tokio::test]
    async fn walks_backwards_within_distance() {
        let h = Harness::new("drum", 10);
        h.go("drum", 4).await;
        assert_eq!(h.source.fetch_count(), 3);
        h.cache.clear();

        let view = h.go("drum", 2).await;
        assert_eq!(view.resolved_by, Some(Resolution::Walk));
        assert_eq!(view.page.unwrap().ids(), FakeSource::page("drum", 2, 10, 5).ids());
        assert_eq!(h.source.fetch_count(), 5);
        assert_eq!(h.searches(), 1);
    }

    #[tokio::test]
    async fn jumps_past_the_threshold_restart_from_page_one() {
        let h = Harness::new("drum", 10);
        h.go("drum", 2).await;
        let before = h.source.fetch_count();

        let view = h.go("drum", 2 + MAX_NAVIGATION_DISTANCE + 1).await;
        assert_eq!(view.resolved_by, Some(Resolution::LargeJump));
        assert_eq!(h.searches(), 2);
        // Walked 1 -> 6 from the new first page, never from page 2.
        assert_eq!(h.source.fetch_count() - before, 5);
    }

    #[tokio::test]
    async fn scenario_drum_pages_one_two_ten() {
        let h = Harness::new("drum", 10);

        let one = h.go("drum", 1).await;
        let one_page = one.page.unwrap();
        assert_eq!(one_page.count, 50);
        assert!(one_page.next.is_some());

        let two = h.go("drum", 2).await;
        assert_eq!(two.resolved_by, Some(Resolution::Walk));
        assert_eq!(h.source.fetch_count(), 1);

        let ten = h.go("drum", 10).await;
        assert_eq!(ten.resolved_by, Some(Resolution::LargeJump));
        assert_eq!(h.source.fetch_count(), 1 + 9);

        let expected = FakeSource::page("drum", 10, 10, 5).ids();
        assert_eq!(h.cache.get_page("drum", 10).unwrap().ids(), expected);
        assert_eq!(ten.page.unwrap().ids(), expected);
        assert_eq!(ten.current_page, 10);
    }

    #[tokio::test]
    async fn failed_walk_falls_back_to_fresh_search() {
        let h = Harness::new("drum", 6);
        let mut poisoned = FakeSource::page("drum", 3, 6, 5);
        poisoned.next = Some("mem://nowhere".into());
        h.cache.set_page("drum", 3, poisoned);

        let cached = h.go("drum", 3).await;
        assert_eq!(cached.resolved_by, Some(Resolution::Cached));

        let view = h.go("drum", 4).await;
        assert_eq!(view.error, None);
        assert_eq!(view.resolved_by, Some(Resolution::Fresh));
        assert_eq!(view.page.unwrap().ids(), FakeSource::page("drum", 4, 6, 5).ids());
        assert_eq!(h.searches(), 1);
    }

    #[tokio::test]
    async fn running_out_of_pages_reports_out_of_range() {
        let h = Harness::new("drum", 3);
        let view = h.go("drum", 5).await;
        assert!(!view.loading);
        assert_eq!(view.error.as_deref(), Some("There are only 3 pages of results."));
        assert_eq!(h.source.fetch_count(), 0);
        assert!(!h.cache.has_page("drum", 5));
        assert!(!h.cache.has_page("drum", 3));
    }

    #[tokio::test]
    async fn far_out_of_range_page_costs_one_request() {
        let h = Harness::new("drum", 20);
        h.go("drum", 1).await;

        let view = h.go("drum", u32::MAX).await;
        assert!(!view.loading);
        assert_eq!(view.error.as_deref(), Some("There are only 20 pages of results."));
        assert_eq!(view.current_page, u32::MAX);
        assert_eq!(h.searches(), 2);
        assert_eq!(h.source.fetch_count(), 0);
    }

    #[tokio::test]
    async fn walk_still_catches_a_short_result_count() {
        let mut source = FakeSource::build("drum", 3, 5);
        // Server claims more results than it links to.
        for page in source.pages.values_mut() {
            page.count = 100;
        }
        let h = Harness::with_source(source);

        let view = h.go("drum", 5).await;
        assert_eq!(view.error.as_deref(), Some("There are only 3 pages of results."));
        assert_eq!(h.source.fetch_count(), 2);
    }

    #[tokio::test]
    async fn search_failure_is_reported_not_thrown() {
        let h = Harness::new("drum", 3);
        let view = h
            .nav
            .resolve("drum", 1, || async {
                Err(ApiError::rate_limited(429, r#"{"detail":"Slow down."}"#.into()))
            })
            .await;
        assert!(!view.loading);
        assert_eq!(view.error.as_deref(), Some("Rate limit exceeded: Slow down."));
        assert!(view.page.is_none());

        let retry = h.go("drum", 1).await;
        assert_eq!(retry.error, None);
        assert!(retry.page.is_some());
    }

    #[tokio::test]
    async fn timed_out_search_clears_loading() {
        use crate::executor::HttpExecutor;
        use crate::freesound::{FreesoundClient, SearchOptions};
        use crate::rate_limit::{RateLimitConfig, RateLimiter};
        use crate::test_support::serve;
        use axum::routing::get;
        use std::time::Duration;

        let base = serve(axum::Router::new().route(
            "/search/text/",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(2)).await;
                "{}"
            }),
        ))
        .await;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(100))
            .build()
            .unwrap();
        let limiter = Arc::new(RateLimiter::new(RateLimitConfig::default()));
        let client = FreesoundClient::new(base.as_str(), HttpExecutor::new(http, limiter)).unwrap();

        let cache = Arc::new(SoundCache::open(
            Arc::new(MemoryStore::new()),
            CacheConfig::default(),
        ));
        let nav = SearchNavigator::new(cache, Arc::new(client.clone()), NavigatorConfig::default());
        let mut rx = nav.subscribe();

        let view = nav
            .resolve("drum", 1, move || async move {
                client.text_search(&SearchOptions::text("drum")).await
            })
            .await;

        assert!(!view.loading);
        assert_eq!(
            view.error.as_deref(),
            Some("The request timed out. Please try again.")
        );
        assert!(!rx.borrow_and_update().loading);
    }

    #[tokio::test]
    async fn superseded_request_never_commits() {
        let h = Harness::new("drum", 3);
        let bass = FakeSource::page("bass", 1, 1, 5);
        let started = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());

        let slow = {
            let nav = h.nav.clone();
            let (started, release) = (started.clone(), release.clone());
            let drum = FakeSource::page("drum", 1, 3, 5);
            tokio::spawn(async move {
                nav.resolve("drum", 1, move || async move {
                    started.notify_one();
                    release.notified().await;
                    Ok(Fetched::from(drum))
                })
                .await
            })
        };
        started.notified().await;

        let fast = h
            .nav
            .resolve("bass", 1, move || async move { Ok(Fetched::from(bass)) })
            .await;
        assert_eq!(fast.page.as_ref().unwrap().ids()[0], 1);

        release.notify_one();
        let stale = slow.await.unwrap();

        assert!(!h.cache.has_page("drum", 1));
        assert!(h.cache.has_page("bass", 1));
        assert_eq!(stale, fast);
        assert_eq!(h.nav.view(), fast);
    }

    #[tokio::test]
    async fn cancel_discards_in_flight_results() {
        let h = Harness::new("drum", 3);
        let started = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());

        let pending = {
            let nav = h.nav.clone();
            let (started, release) = (started.clone(), release.clone());
            let drum = FakeSource::page("drum", 1, 3, 5);
            tokio::spawn(async move {
                nav.resolve("drum", 1, move || async move {
                    started.notify_one();
                    release.notified().await;
                    Ok(Fetched::from(drum))
                })
                .await
            })
        };
        started.notified().await;
        assert!(h.nav.view().loading);

        h.nav.cancel();
        release.notify_one();
        let view = pending.await.unwrap();

        assert!(!view.loading);
        assert!(view.page.is_none());
        assert!(!h.cache.has_page("drum", 1));
    }

    #[tokio::test]
    async fn subscribers_see_updates() {
        let h = Harness::new("drum", 3);
        let mut rx = h.nav.subscribe();

        h.go("drum", 1).await;
        assert!(rx.has_changed().unwrap());
        let seen = rx.borrow_and_update().clone();
        assert_eq!(seen.current_page, 1);
        assert!(seen.page.is_some());
    }
}
