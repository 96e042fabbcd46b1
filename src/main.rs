use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use soundscout::{api, config::Config, storage::FileStore, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = Config::from_env();
    info!("Starting soundscout");
    info!("Freesound API: {}", config.base_url);
    info!("Cache directory: {}", config.cache_dir.display());

    let store = FileStore::open(&config.cache_dir)?;
    let bind = config.bind.clone();
    let state = Arc::new(AppState::new(config, Arc::new(store))?);

    // Expired entries are dropped lazily too; this just keeps storage small
    let _sweeper = state.cache.spawn_sweeper();

    let app = api::router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(&bind).await?;
    info!("soundscout listening on http://{}", bind);

    axum::serve(listener, app).await?;

    Ok(())
}
