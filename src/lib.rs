pub mod auth;
pub mod config;
pub mod database;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod services;
pub mod types;

use axum::{
    extract::DefaultBodyLimit,
    http::{HeaderName, HeaderValue, Method},
    middleware::from_fn_with_state,
    routing::get,
    Router,
};
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::auth::{AccessGate, AUTH_TOKEN_HEADER};
use crate::config::{AppConfig, StoreBackend};
use crate::database::memory::MemoryConnector;
use crate::database::postgres::{PgConnector, PgSettings};
use crate::database::ConnectionRegistry;
use crate::services::{CollectionService, DocumentService, MemorySchemaCatalog, PgSchemaCatalog, SchemaCatalog};

/// Shared handles every handler and the access gate reach through `State`
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<ConnectionRegistry>,
    pub collections: Arc<CollectionService>,
    pub documents: Arc<DocumentService>,
    pub gate: Arc<AccessGate>,
    pub max_body_bytes: usize,
}

impl AppState {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        catalog: Arc<dyn SchemaCatalog>,
        config: &AppConfig,
    ) -> anyhow::Result<Self> {
        let gate = AccessGate::new(&config.security)?;
        Ok(Self {
            collections: Arc::new(CollectionService::new(registry.clone(), catalog.clone())),
            documents: Arc::new(DocumentService::new(
                registry.clone(),
                catalog,
                config.api.default_page_limit,
            )),
            registry,
            gate: Arc::new(gate),
            max_body_bytes: config.api.max_request_size_bytes,
        })
    }

    /// Wire up the configured backend: Postgres needs `DATABASE_URL` and a
    /// reachable system database for the catalog
    pub async fn from_config(config: &AppConfig) -> anyhow::Result<Self> {
        let capacity = config.database.registry_capacity;
        match config.database.backend {
            StoreBackend::Memory => {
                info!("Using in-memory document store");
                let registry = Arc::new(ConnectionRegistry::new(Arc::new(MemoryConnector::new()), capacity));
                Self::new(registry, Arc::new(MemorySchemaCatalog::new()), config)
            }
            StoreBackend::Postgres => {
                let settings = PgSettings::from_env(config.database.max_connections, config.database.connection_timeout)?;
                let system_pool = settings.connect(&config.database.system_database).await?;
                let catalog = PgSchemaCatalog::new(system_pool);
                catalog.migrate().await?;
                info!("Using Postgres document store, catalog in {}", config.database.system_database);

                let registry = Arc::new(ConnectionRegistry::new(Arc::new(PgConnector::new(settings)), capacity));
                Self::new(registry, Arc::new(catalog), config)
            }
        }
    }
}

pub fn app(state: AppState, config: &AppConfig) -> Router {
    let protected = Router::new()
        .route(
            "/api/app/:collection",
            get(handlers::app::get)
                .post(handlers::app::post)
                .put(handlers::app::put)
                .delete(handlers::app::delete),
        )
        .route_layer(from_fn_with_state(state.clone(), middleware::access_gate_middleware));

    let mut router = Router::new()
        // Public
        .route("/", get(handlers::root))
        .route("/health", get(handlers::health))
        // Protected API
        .merge(protected)
        .layer(DefaultBodyLimit::max(config.api.max_request_size_bytes))
        .with_state(state);

    if config.security.enable_cors {
        router = router.layer(cors_layer(&config.security.cors_origins));
    }
    if config.api.enable_request_logging {
        router = router.layer(TraceLayer::new_for_http());
    }
    router
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = origins.iter().filter_map(|o| o.parse().ok()).collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers(Any)
        .expose_headers([HeaderName::from_static(AUTH_TOKEN_HEADER)])
}
