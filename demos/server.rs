//! Demo server: loads model definitions from MODELS_PATH, stores them in PostgreSQL when
//! DATABASE_URL is set (in memory otherwise), and mounts common and entity routes.

use axum::Router;
use restmodel_sdk::{
    common_routes_with_ready, entity_routes, load_from_dir, resolve, AppState, DynamicEntityService,
    EntityStore, MemoryStore, PgStore, Settings,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::limit::RequestBodyLimitLayer;
use tracing_subscriber::EnvFilter;

const BODY_LIMIT: usize = 2 * 1024 * 1024;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("restmodel_sdk=info".parse()?))
        .init();

    let settings = Settings::from_env();
    let models = load_from_dir(&settings.models_path).await?;
    let registry = Arc::new(resolve(&models)?);
    tracing::info!(models = registry.len(), path = %settings.models_path.display(), "models loaded");

    let store: Arc<dyn EntityStore> = match settings.database_url.as_deref() {
        Some(url) => {
            let store = PgStore::connect(url, &settings.schema).await?;
            store.ensure_tables(&registry).await?;
            Arc::new(store)
        }
        None => {
            tracing::warn!("DATABASE_URL not set, records are kept in memory");
            Arc::new(MemoryStore::new())
        }
    };

    let base = settings.api_base_path.clone();
    let listen = settings.listen_addr.clone();
    let state = AppState::new(DynamicEntityService::new(store, registry, settings));

    let app = Router::new()
        .merge(common_routes_with_ready(state.clone()))
        .nest(&base, entity_routes(state))
        .layer(RequestBodyLimitLayer::new(BODY_LIMIT));

    let listener = TcpListener::bind(&listen).await?;
    tracing::info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}
