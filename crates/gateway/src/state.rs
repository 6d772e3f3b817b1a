//! Shared application state (grounded on the teacher's
//! `crates/api/src/state.rs`), expanded from its single auth service
//! into the full set of components the routing middleware and handlers
//! need: the RBAC service, the tenant registry and pool manager, the
//! per-tenant breakers, the rate limiter, and the query dispatcher.

use dashmap::DashMap;
use qgw_core::{
    audit::AuditLogger,
    config::Config,
    security::{EncryptionService, PasswordHasher, TokenCodec},
    TenantSlot,
};
use qgw_pool::{CircuitBreaker, QueryDispatcher, RateLimiter, ResultCache, SchemaCache, TenantPoolManager, TenantRegistry};
use qgw_rbac::{CentralMetadataStore, RbacService, SessionManager};
use redis::aio::ConnectionManager;
use std::sync::Arc;

use crate::translator::{HeuristicTranslator, PoolQueryExecutor};

pub type Dispatcher = QueryDispatcher<HeuristicTranslator, PoolQueryExecutor>;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub rbac: Arc<RbacService>,
    pub sessions: Arc<SessionManager>,
    pub token_codec: TokenCodec,
    pub password_hasher: Arc<PasswordHasher>,
    pub metadata_store: CentralMetadataStore,
    pub registry: Arc<TenantRegistry>,
    pub pool_manager: Arc<TenantPoolManager>,
    pub dispatcher: Arc<Dispatcher>,
    pub rate_limiter: Arc<RateLimiter>,
    pub encryption: Arc<EncryptionService>,
    pub breakers: Arc<DashMap<usize, Arc<CircuitBreaker>>>,
    pub redis: ConnectionManager,
    /// Used directly by the routing middleware for the batched
    /// request-entered event (§4.5 step 8); `rbac` uses its own internal
    /// logger for the durable events it owns.
    pub audit: AuditLogger,
    /// Short-lived lookup for `GET /query/{id}` (§6.1). The spec names
    /// the operation but not a retention window; this process-local,
    /// unbounded-by-time map is the simplest reading, capped per tenant
    /// the same way the result cache caps entries.
    pub recent_queries: Arc<DashMap<uuid::Uuid, qgw_pool::QueryResult>>,
}

impl AppState {
    /// Returns the tenant's circuit breaker, creating one on first
    /// reference (§4.7: one breaker per tenant pool, fully independent).
    pub fn breaker_for(&self, slot: TenantSlot) -> Arc<CircuitBreaker> {
        self.breakers
            .entry(slot.0)
            .or_insert_with(|| Arc::new(CircuitBreaker::new(self.config.circuit_breaker.clone())))
            .clone()
    }
}

#[allow(clippy::too_many_arguments)]
pub fn build_dispatcher(
    registry: Arc<TenantRegistry>,
    pool_manager: Arc<TenantPoolManager>,
    schema_cache: SchemaCache,
    result_cache: ResultCache,
    audit: AuditLogger,
) -> Dispatcher {
    QueryDispatcher::new(
        HeuristicTranslator,
        PoolQueryExecutor::new(registry, pool_manager),
        schema_cache,
        result_cache,
        audit,
    )
}
