use crate::error::ApiError;
use crate::freesound::{SearchOptions, DEFAULT_SOUND_FIELDS};
use crate::navigator::SearchView;
use crate::pagination::{page_window, PageLink};
use crate::types::*;
use crate::AppState;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{delete, get, post},
    Router,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

/// Numbered links shown in a pager strip.
pub const MAX_VISIBLE_PAGES: u32 = 7;

type HandlerError = (StatusCode, Json<ErrorResponse>);

#[derive(Debug, Serialize)]
pub struct SearchResponse {
    #[serde(flatten)]
    pub view: SearchView,
    pub total_pages: u32,
    pub pages: Vec<PageLink>,
}

impl SearchResponse {
    fn new(view: SearchView, page_size: u32) -> Self {
        let total_pages = view
            .page
            .as_ref()
            .map(|p| p.total_pages(page_size))
            .unwrap_or(1);
        let pages = page_window(view.current_page.max(1), total_pages, MAX_VISIBLE_PAGES);
        Self {
            view,
            total_pages,
            pages,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct FavoriteStatus {
    pub id: u64,
    pub favorite: bool,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(health_check))
        .route("/health", get(health_check))
        .route("/sessions", post(create_session))
        .route("/sessions/:id", get(session_view).delete(close_session))
        .route("/sessions/:id/search", get(search_handler))
        .route("/sounds/:id", get(sound_handler))
        .route("/cache", delete(clear_cache))
        .route("/cache/sweep", post(sweep_cache))
        .route("/favorites", get(list_favorites).delete(clear_favorites))
        .route(
            "/favorites/:id",
            get(favorite_status).post(add_favorite).delete(remove_favorite),
        )
        .route("/favorites/:id/toggle", post(toggle_favorite))
        .with_state(state)
}

async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "soundscout",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

fn failure(status: StatusCode, message: impl Into<String>) -> HandlerError {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}

fn api_failure(err: &ApiError, default: &str) -> HandlerError {
    let status = match err {
        ApiError::Transport { status: 404, .. } => StatusCode::NOT_FOUND,
        ApiError::RateLimited { .. } | ApiError::QuotaExhausted { .. } => {
            StatusCode::TOO_MANY_REQUESTS
        }
        ApiError::Timeout => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::BAD_GATEWAY,
    };
    failure(status, err.user_message(default))
}

/// Logical cache key plus the remote search that backs it.
fn search_target(request: &SearchRequest, page_size: u32) -> Option<(String, SearchOptions)> {
    let present = |v: &Option<String>| {
        v.as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
    };

    let (key, options) = if let Some(tag) = present(&request.tag) {
        (
            format!("tag:{}", tag),
            SearchOptions::text("").filter(format!("tag:{}", tag)),
        )
    } else if let Some(user) = present(&request.user) {
        (
            format!("user:{}", user),
            SearchOptions::text("").filter(format!("username:{}", user)),
        )
    } else {
        let query = present(&request.q)?;
        (query.clone(), SearchOptions::text(query))
    };
    Some((key, options.page_size(page_size).fields(DEFAULT_SOUND_FIELDS)))
}

async fn create_session(State(state): State<Arc<AppState>>) -> Json<SessionResponse> {
    let session = Uuid::new_v4();
    state
        .sessions
        .insert(session, Arc::new(state.navigator()))
        .await;
    info!(%session, "opened search session");
    Json(SessionResponse { session })
}

async fn session_view(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<SearchResponse>, HandlerError> {
    let navigator = state
        .sessions
        .get(&id)
        .await
        .ok_or_else(|| failure(StatusCode::NOT_FOUND, "Unknown session"))?;
    Ok(Json(SearchResponse::new(navigator.view(), state.config.page_size)))
}

async fn close_session(State(state): State<Arc<AppState>>, Path(id): Path<Uuid>) -> StatusCode {
    match state.sessions.remove(&id).await {
        Some(navigator) => {
            navigator.cancel();
            StatusCode::NO_CONTENT
        }
        None => StatusCode::NOT_FOUND,
    }
}

async fn search_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Query(request): Query<SearchRequest>,
) -> Result<Json<SearchResponse>, HandlerError> {
    let navigator = state
        .sessions
        .get(&id)
        .await
        .ok_or_else(|| failure(StatusCode::NOT_FOUND, "Unknown session"))?;
    let (key, options) = search_target(&request, state.config.page_size).ok_or_else(|| {
        failure(
            StatusCode::BAD_REQUEST,
            "One of q, tag or user is required",
        )
    })?;
    let page = request.page.unwrap_or(1);

    info!(%id, key = %key, page, "resolving search");
    let client = state.client.clone();
    let view = navigator
        .resolve(&key, page, || async move { client.text_search(&options).await })
        .await;
    Ok(Json(SearchResponse::new(view, state.config.page_size)))
}

async fn sound_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
) -> Result<Json<Sound>, HandlerError> {
    match state.sound(id).await {
        Ok(sound) => Ok(Json(sound)),
        Err(e) => {
            error!("Sound {} error: {}", id, e);
            Err(api_failure(&e, "Failed to load sound."))
        }
    }
}

async fn clear_cache(State(state): State<Arc<AppState>>) -> StatusCode {
    state.cache.clear();
    StatusCode::NO_CONTENT
}

async fn sweep_cache(State(state): State<Arc<AppState>>) -> Json<SweepResponse> {
    let stats = state.cache.sweep();
    Json(SweepResponse {
        items_removed: stats.items_removed,
        pages_removed: stats.pages_removed,
    })
}

fn favorites_body(state: &AppState) -> FavoritesResponse {
    FavoritesResponse {
        favorites: state.favorites.list(),
        cached: state.favorites.cached_sounds(&state.cache),
    }
}

async fn list_favorites(State(state): State<Arc<AppState>>) -> Json<FavoritesResponse> {
    Json(favorites_body(&state))
}

async fn clear_favorites(State(state): State<Arc<AppState>>) -> StatusCode {
    state.favorites.clear();
    StatusCode::NO_CONTENT
}

async fn favorite_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
) -> Json<FavoriteStatus> {
    Json(FavoriteStatus {
        id,
        favorite: state.favorites.contains(id),
    })
}

async fn add_favorite(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
) -> Json<FavoritesResponse> {
    state.favorites.add(id);
    Json(favorites_body(&state))
}

async fn remove_favorite(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
) -> Json<FavoritesResponse> {
    state.favorites.remove(id);
    Json(favorites_body(&state))
}

async fn toggle_favorite(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
) -> Json<FavoriteStatus> {
    let favorite = state.favorites.toggle(id);
    Json(FavoriteStatus { id, favorite })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::state_for_mock;
    use crate::test_support::serve;
    use url::Url;

    async fn spawn() -> (Arc<AppState>, Url) {
        let state = Arc::new(state_for_mock().await);
        let url = serve(router(state.clone())).await;
        (state, url)
    }

    async fn open_session(http: &reqwest::Client, base: &Url) -> Uuid {
        http.post(base.join("sessions").unwrap())
            .send()
            .await
            .unwrap()
            .json::<SessionResponse>()
            .await
            .unwrap()
            .session
    }

    #[test]
    fn search_target_prefers_tag_then_user_then_query() {
        let request = SearchRequest {
            q: Some("ignored".into()),
            tag: Some("kick".into()),
            ..Default::default()
        };
        let (key, options) = search_target(&request, 10).unwrap();
        assert_eq!(key, "tag:kick");
        assert_eq!(options.filter.as_deref(), Some("tag:kick"));
        assert_eq!(options.query, "");

        let request = SearchRequest {
            user: Some("drummer".into()),
            ..Default::default()
        };
        let (key, options) = search_target(&request, 10).unwrap();
        assert_eq!(key, "user:drummer");
        assert_eq!(options.filter.as_deref(), Some("username:drummer"));

        let request = SearchRequest {
            q: Some("  ".into()),
            ..Default::default()
        };
        assert!(search_target(&request, 10).is_none());
    }

    #[test]
    fn search_response_adds_pager() {
        let view = SearchView {
            page: Some(Page {
                count: 95,
                ..Page::default()
            }),
            current_page: 5,
            ..SearchView::default()
        };
        let response = SearchResponse::new(view, 10);
        assert_eq!(response.total_pages, 10);
        assert_eq!(
            response.pages,
            vec![
                PageLink::Number(1),
                PageLink::Gap,
                PageLink::Number(4),
                PageLink::Number(5),
                PageLink::Number(6),
                PageLink::Gap,
                PageLink::Number(10),
            ]
        );
    }

    #[test]
    fn pager_survives_a_failed_out_of_range_request() {
        let view = SearchView {
            page: Some(Page {
                count: 100,
                ..Page::default()
            }),
            error: Some("There are only 20 pages of results.".into()),
            current_page: u32::MAX,
            ..SearchView::default()
        };
        let response = SearchResponse::new(view, 5);
        assert_eq!(response.total_pages, 20);
        assert_eq!(response.pages.first(), Some(&PageLink::Number(1)));
        assert_eq!(response.pages.last(), Some(&PageLink::Number(20)));
    }

    #[tokio::test]
    async fn out_of_range_page_reports_an_error() {
        let (_, base) = spawn().await;
        let http = reqwest::Client::new();
        let session = open_session(&http, &base).await;

        let first = base
            .join(&format!("sessions/{}/search?q=drum&page=1", session))
            .unwrap();
        http.get(first).send().await.unwrap();

        let url = base
            .join(&format!("sessions/{}/search?q=drum&page=4294967295", session))
            .unwrap();
        let response = http.get(url).send().await.unwrap();
        assert_eq!(response.status(), 200);
        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["error"], "There are only 5 pages of results.");
        assert_eq!(body["loading"], false);
        assert_eq!(body["total_pages"], 5);
    }

    #[tokio::test]
    async fn session_search_walks_and_caches() {
        let (state, base) = spawn().await;
        let http = reqwest::Client::new();
        let session = open_session(&http, &base).await;

        let url = base
            .join(&format!("sessions/{}/search?q=drum&page=2", session))
            .unwrap();
        let body: serde_json::Value = http.get(url).send().await.unwrap().json().await.unwrap();

        assert_eq!(body["current_page"], 2);
        assert_eq!(body["loading"], false);
        assert_eq!(body["total_pages"], 5);
        assert_eq!(body["page"]["results"][0]["id"], 11);
        assert!(state.cache.has_page("drum", 2));
        assert!(state.cache.has_item(11));
    }

    #[tokio::test]
    async fn unknown_or_closed_sessions_are_not_found() {
        let (_, base) = spawn().await;
        let http = reqwest::Client::new();

        let missing = base
            .join(&format!("sessions/{}/search?q=drum", Uuid::new_v4()))
            .unwrap();
        assert_eq!(http.get(missing).send().await.unwrap().status(), 404);

        let session = open_session(&http, &base).await;
        let url = base.join(&format!("sessions/{}", session)).unwrap();
        assert_eq!(http.delete(url.clone()).send().await.unwrap().status(), 204);
        assert_eq!(http.get(url).send().await.unwrap().status(), 404);
    }

    #[tokio::test]
    async fn search_without_terms_is_rejected() {
        let (_, base) = spawn().await;
        let http = reqwest::Client::new();
        let session = open_session(&http, &base).await;
        let url = base.join(&format!("sessions/{}/search", session)).unwrap();
        assert_eq!(http.get(url).send().await.unwrap().status(), 400);
    }

    #[tokio::test]
    async fn sound_route_maps_upstream_errors() {
        let (_, base) = spawn().await;
        let http = reqwest::Client::new();

        let ok = http.get(base.join("sounds/3").unwrap()).send().await.unwrap();
        assert_eq!(ok.status(), 200);
        assert_eq!(ok.json::<Sound>().await.unwrap().id, 3);

        let missing = http.get(base.join("sounds/404").unwrap()).send().await.unwrap();
        assert_eq!(missing.status(), 404);
        let body: ErrorResponse = missing.json().await.unwrap();
        assert_eq!(body.error, "API Error: Not found.");
    }

    #[tokio::test]
    async fn favorites_round_trip_through_routes() {
        let (state, base) = spawn().await;
        let http = reqwest::Client::new();

        http.get(base.join("sounds/3").unwrap()).send().await.unwrap();
        http.post(base.join("favorites/3").unwrap()).send().await.unwrap();
        let body: FavoritesResponse = http
            .post(base.join("favorites/8").unwrap())
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body.favorites, vec![3, 8]);
        assert_eq!(body.cached.iter().map(|s| s.id).collect::<Vec<_>>(), vec![3]);

        let toggled: serde_json::Value = http
            .post(base.join("favorites/3/toggle").unwrap())
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(toggled["favorite"], false);
        assert!(!state.favorites.contains(3));

        let cleared = http.delete(base.join("favorites").unwrap()).send().await.unwrap();
        assert_eq!(cleared.status(), 204);
        assert!(state.favorites.list().is_empty());
    }

    #[tokio::test]
    async fn cache_routes_clear_and_sweep() {
        let (state, base) = spawn().await;
        let http = reqwest::Client::new();
        http.get(base.join("sounds/3").unwrap()).send().await.unwrap();
        assert!(state.cache.has_item(3));

        let sweep: SweepResponse = http
            .post(base.join("cache/sweep").unwrap())
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(sweep.items_removed, 0);

        let cleared = http.delete(base.join("cache").unwrap()).send().await.unwrap();
        assert_eq!(cleared.status(), 204);
        assert!(!state.cache.has_item(3));
    }
}
