mod admin;
mod graphql;
mod middleware;

use std::sync::Arc;

use axum::{
    Router,
    http::StatusCode,
    middleware::from_fn,
    routing::{delete, get, post, put},
};

use crate::application::engine::ContentEngine;
use crate::cache::{CacheBackend, CacheConfig, CacheGateway, InvalidationListener, MemoryStore};
use crate::catalog::{CatalogEngine, CatalogRepository, demo_catalog};

pub use middleware::{REQUEST_ID_HEADER, RequestContext};

#[derive(Clone)]
pub struct HttpState {
    pub gateway: CacheGateway,
    pub listener: Arc<InvalidationListener>,
    pub backend: Arc<dyn CacheBackend>,
    pub catalog: Arc<CatalogRepository>,
}

impl HttpState {
    /// Wire an in-memory store, the invalidation listener and the seeded
    /// catalog behind one gateway.
    pub fn with_demo_catalog(config: CacheConfig) -> Self {
        let backend: Arc<dyn CacheBackend> = Arc::new(MemoryStore::new(&config));
        let listener = Arc::new(InvalidationListener::new(config.clone(), backend.clone()));
        let catalog = Arc::new(demo_catalog(
            CatalogRepository::new().with_hook(listener.clone()),
        ));
        let engine: Arc<dyn ContentEngine> = Arc::new(CatalogEngine::new(catalog.clone()));

        Self {
            gateway: CacheGateway::new(config, engine, backend.clone()),
            listener,
            backend,
            catalog,
        }
    }
}

pub fn build_router(state: HttpState) -> Router {
    let admin_routes = Router::new()
        .route("/admin/products", post(admin::create_product))
        .route(
            "/admin/products/{sku}",
            put(admin::update_product).delete(admin::delete_product),
        )
        .route("/admin/categories/{id}", put(admin::update_category))
        .route("/admin/cache", delete(admin::flush_cache))
        .route("/admin/cache/stats", get(admin::cache_stats))
        .route("/admin/cache/invalidate", post(admin::invalidate_tags));

    Router::new()
        .route(
            "/graphql",
            get(graphql::graphql_get).post(graphql::graphql_post),
        )
        .route("/health", get(health))
        .merge(admin_routes)
        .with_state(state)
        .layer(from_fn(middleware::log_responses))
        .layer(from_fn(middleware::set_request_context))
}

async fn health() -> StatusCode {
    StatusCode::NO_CONTENT
}
