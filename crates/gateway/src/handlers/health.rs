//! Health endpoints (§6.1). Grounded on the teacher's `health.rs`
//! liveness/readiness split, narrowed to this gateway's two health
//! views: a tenant's own pool/breaker state, and a global admin's view
//! across every registered tenant.

use axum::{extract::State, routing::get, Json, Router};
use qgw_core::{Error, ErrorCode, TokenBearerContext};
use qgw_pool::CircuitState;
use serde::Serialize;

use crate::{error::ApiError, state::AppState};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/health/tenant", get(tenant_health))
        .route("/health/system", get(system_health))
}

#[derive(Debug, Serialize)]
pub struct TenantHealthResponse {
    pub tenant_id: uuid::Uuid,
    pub pool_reachable: bool,
    pub breaker_state: String,
}

async fn tenant_health(State(state): State<AppState>, context: TokenBearerContext) -> Result<Json<TenantHealthResponse>, ApiError> {
    let pool_reachable = state.pool_manager.check_health(context.pool_handle).await.is_ok();
    let breaker_state = match state.breaker_for(context.pool_handle).state() {
        CircuitState::Closed => "closed",
        CircuitState::Open => "open",
        CircuitState::HalfOpen => "half_open",
    };

    Ok(Json(TenantHealthResponse {
        tenant_id: context.tenant_id.0,
        pool_reachable,
        breaker_state: breaker_state.to_string(),
    }))
}

#[derive(Debug, Serialize)]
pub struct SystemHealthResponse {
    pub metadata_store_reachable: bool,
    pub redis_reachable: bool,
    pub active_pool_count: usize,
}

async fn system_health(State(state): State<AppState>, context: TokenBearerContext) -> Result<Json<SystemHealthResponse>, ApiError> {
    if !context.is_global_admin {
        return Err(ApiError::from(Error::new(ErrorCode::Forbidden, "system health is restricted to global admins")));
    }

    let metadata_store_reachable = sqlx::query("SELECT 1").fetch_one(state.metadata_store.pool()).await.is_ok();

    let mut redis = state.redis.clone();
    let redis_reachable = redis::AsyncCommands::get::<_, Option<String>>(&mut redis, "__health_probe__")
        .await
        .is_ok();

    Ok(Json(SystemHealthResponse {
        metadata_store_reachable,
        redis_reachable,
        active_pool_count: state.pool_manager.pool_count(),
    }))
}
