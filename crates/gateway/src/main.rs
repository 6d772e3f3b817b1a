//! Query gateway HTTP server. Grounded on the teacher's
//! `crates/api/src/main.rs` bootstrap (tracing init, CORS layer from
//! config, graceful shutdown), rebuilt around this gateway's own
//! component graph instead of the teacher's single auth service.

use axum::{http::StatusCode, response::IntoResponse, Json, Router};
use dashmap::DashMap;
use qgw_core::{
    audit::{AuditLogger, DatabaseAuditRepository},
    config::{Config, CorsConfig},
    error::ErrorMetrics,
    security::{EncryptionService, PasswordHasher, TokenCodec},
};
use qgw_pool::{RateLimiter, ResultCache, SchemaCache, TenantPoolManager, TenantRegistry};
use qgw_rbac::{CentralMetadataStore, RbacService, RoleCatalog, SessionConfig, SessionManager};
use redis::aio::ConnectionManager;
use std::{
    net::SocketAddr,
    sync::{Arc, RwLock},
};
use tower::ServiceBuilder;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::{info, Level};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod error;
mod handlers;
mod middleware;
mod state;
mod translator;

use state::AppState;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    info!("starting query gateway");

    let config = Config::load()?;
    info!("configuration loaded");

    let metadata_pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .min_connections(config.database.min_connections)
        .connect(&config.database.url)
        .await?;
    info!("metadata store pool established");

    let redis_client = redis::Client::open(config.redis.url.clone())?;
    let redis = ConnectionManager::new(redis_client).await?;
    info!("redis connection established");

    let audit_repository = Arc::new(DatabaseAuditRepository::new(Arc::new(metadata_pool.clone())));
    audit_repository.initialize().await?;
    let audit = AuditLogger::new(audit_repository, Arc::new(ErrorMetrics::new()));

    let encryption = Arc::new(EncryptionService::new(&config.security)?);
    let password_hasher = Arc::new(PasswordHasher::new(&config.security)?);
    let token_codec = TokenCodec::new(&config.token);

    let metadata_store = CentralMetadataStore::new(metadata_pool);
    let catalog = Arc::new(RwLock::new(RoleCatalog::new()));
    let sessions = Arc::new(SessionManager::new(redis.clone(), SessionConfig::default()));

    let rbac = Arc::new(RbacService::new(
        metadata_store.clone(),
        sessions.clone(),
        catalog,
        (*password_hasher).clone(),
        token_codec.clone(),
        audit.clone(),
        config.token.access_ttl_seconds,
    ));

    let registry = Arc::new(TenantRegistry::new());
    let pool_manager = Arc::new(TenantPoolManager::new(config.pool.clone(), encryption.clone()));
    let schema_cache = SchemaCache::new(config.cache.schema_refresh_interval_seconds);
    let result_cache = ResultCache::new(config.cache.result_ttl_seconds, config.cache.result_max_entries_per_tenant);
    let dispatcher = Arc::new(state::build_dispatcher(registry.clone(), pool_manager.clone(), schema_cache, result_cache, audit.clone()));
    let rate_limiter = Arc::new(RateLimiter::new(redis.clone(), config.rate_limit.clone()));

    let app_state = AppState {
        config: Arc::new(config.clone()),
        rbac,
        sessions,
        token_codec,
        password_hasher,
        metadata_store,
        registry,
        pool_manager,
        dispatcher,
        rate_limiter,
        encryption,
        breakers: Arc::new(DashMap::new()),
        redis,
        audit,
        recent_queries: Arc::new(DashMap::new()),
    };

    let app = build_router(app_state, &config.cors)?;

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    info!(%addr, "listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;

    info!("shutdown complete");
    Ok(())
}

fn build_router(state: AppState, cors_config: &CorsConfig) -> Result<Router, Box<dyn std::error::Error>> {
    let protected = handlers::protected_routes()
        .layer(axum::middleware::from_fn_with_state(state.clone(), middleware::routing_middleware));

    let router = Router::new()
        .merge(handlers::public_routes())
        .merge(protected)
        .route("/health", axum::routing::get(|| async { "OK" }))
        .layer(
            ServiceBuilder::new()
                .layer(axum::middleware::from_fn(middleware::security_headers_middleware))
                .layer(axum::middleware::from_fn(middleware::request_id_middleware))
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                        .on_request(DefaultOnRequest::new().level(Level::INFO))
                        .on_response(DefaultOnResponse::new().level(Level::INFO)),
                )
                .layer(CompressionLayer::new())
                .layer(build_cors_layer(cors_config)?),
        )
        .with_state(state)
        .fallback(not_found);

    Ok(router)
}

fn build_cors_layer(cors_config: &CorsConfig) -> Result<CorsLayer, Box<dyn std::error::Error>> {
    let mut cors = CorsLayer::new();

    if cors_config.allowed_origins.iter().any(|o| o == "*") {
        cors = cors.allow_origin(Any);
    } else {
        let origins: Result<Vec<_>, _> = cors_config.allowed_origins.iter().map(|o| o.parse()).collect();
        cors = cors.allow_origin(origins?);
    }

    if cors_config.allowed_methods.iter().any(|m| m == "*") {
        cors = cors.allow_methods(Any);
    } else {
        let methods: Result<Vec<axum::http::Method>, _> = cors_config.allowed_methods.iter().map(|m| m.parse()).collect();
        cors = cors.allow_methods(methods?);
    }

    if cors_config.allowed_headers.iter().any(|h| h == "*") {
        cors = cors.allow_headers(Any);
    } else {
        let headers: Result<Vec<axum::http::HeaderName>, _> = cors_config.allowed_headers.iter().map(|h| h.parse()).collect();
        cors = cors.allow_headers(headers?);
    }

    if !cors_config.expose_headers.is_empty() {
        let expose: Result<Vec<axum::http::HeaderName>, _> = cors_config.expose_headers.iter().map(|h| h.parse()).collect();
        cors = cors.expose_headers(expose?);
    }

    cors = cors.allow_credentials(cors_config.allow_credentials);

    if let Some(max_age) = cors_config.max_age {
        cors = cors.max_age(std::time::Duration::from_secs(max_age));
    }

    Ok(cors)
}

async fn not_found() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, Json(serde_json::json!({ "error": { "kind": "NotFound" } })))
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "qgw_gateway=debug,qgw_pool=debug,qgw_rbac=debug,tower_http=debug".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("shutdown signal received");
}
