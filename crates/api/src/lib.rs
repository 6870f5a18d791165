//! HTTP API server for the marketplace checkout engine.
//!
//! Provides REST endpoints for carts, checkout, order cancellation and
//! seller fulfilment, with structured logging (tracing) and Prometheus
//! metrics.

pub mod auth;
pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::routing::{get, patch, post, put};
use checkout::{Collaborators, Services};
use metrics_exporter_prometheus::PrometheusHandle;
use sqlx::postgres::PgPoolOptions;
use storage::{
    InMemoryCache, InMemoryDatabase, InMemoryLockStore, InMemoryMessageBus, PostgresDatabase,
    PostgresLockStore, StorageError,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use config::Config;

/// Shared application state accessible from all handlers.
pub struct AppState {
    pub services: Services,
    /// Deadline applied to each checkout request.
    pub checkout_timeout: Duration,
}

impl AppState {
    pub fn new(collaborators: Collaborators, config: &Config) -> Arc<Self> {
        Arc::new(Self {
            services: Services::new(collaborators, config.service_config()),
            checkout_timeout: config.checkout_timeout,
        })
    }
}

/// Creates the Axum application router with all routes and shared state.
pub fn create_app(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route("/cart", get(routes::cart::get))
        .route("/cart/items", post(routes::cart::add_item))
        .route(
            "/cart/items/{product_id}",
            put(routes::cart::update_item).delete(routes::cart::remove_item),
        )
        .route("/orders/checkout", post(routes::orders::checkout))
        .route("/orders", get(routes::orders::list))
        .route("/orders/{id}", get(routes::orders::get))
        .route("/orders/{id}/cancel", post(routes::orders::cancel))
        .route("/seller/orders", get(routes::seller::list))
        .route(
            "/seller/orders/{id}/status",
            patch(routes::seller::update_status),
        )
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Storage collaborators plus the message bus the payment consumer reads.
pub struct Backend {
    pub collaborators: Collaborators,
    pub bus: InMemoryMessageBus,
}

impl Backend {
    /// A fully in-process backend. The returned database handle seeds the catalog.
    pub fn in_memory() -> (Self, InMemoryDatabase) {
        let db = InMemoryDatabase::new();
        let bus = InMemoryMessageBus::new();
        let collaborators = Collaborators::in_memory(
            &db,
            &InMemoryCache::new(),
            &InMemoryLockStore::new(),
            &bus,
        );
        (Self { collaborators, bus }, db)
    }

    /// PostgreSQL repositories and lock table, with migrations applied.
    pub async fn postgres(url: &str, max_connections: u32) -> Result<Self, StorageError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;

        let db = PostgresDatabase::new(pool.clone());
        db.run_migrations().await?;

        let db = Arc::new(db);
        let bus = InMemoryMessageBus::new();
        let collaborators = Collaborators {
            products: db.clone(),
            baskets: db.clone(),
            orders: db.clone(),
            stores: db,
            cache: Arc::new(InMemoryCache::new()),
            locks: Arc::new(PostgresLockStore::new(pool)),
            publisher: Arc::new(bus.clone()),
        };
        Ok(Self { collaborators, bus })
    }
}
