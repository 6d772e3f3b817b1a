//! Schema endpoints (§6.1, §4.10): the tenant's current cached schema,
//! and an explicit refresh that forces the next query to re-extract it.

use axum::{extract::State, routing::{get, post}, Json, Router};
use qgw_core::{Error, ErrorCode, Level, Resource, TokenBearerContext};
use serde::Serialize;
use std::collections::HashMap;

use crate::{error::ApiError, handlers::query::extract_tenant_schema, state::AppState};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/schema", get(get_schema))
        .route("/schema/refresh", post(refresh_schema))
}

#[derive(Debug, Serialize)]
pub struct SchemaResponse {
    pub tables: HashMap<String, Vec<String>>,
    pub version: u64,
}

async fn get_schema(State(state): State<AppState>, context: TokenBearerContext) -> Result<Json<SchemaResponse>, ApiError> {
    if !context.allows(Resource::Schemas, Level::Read, &serde_json::Value::Null) {
        return Err(ApiError::from(Error::new(ErrorCode::Forbidden, "caller cannot read schema")));
    }

    let registry = state.registry.clone();
    let pool_manager = state.pool_manager.clone();
    let tenant_id = context.tenant_id;

    let schema = state
        .dispatcher
        .schema_cache()
        .get_or_extract(tenant_id, move || extract_tenant_schema(registry, pool_manager, tenant_id))
        .await?;

    Ok(Json(SchemaResponse { tables: schema.tables, version: schema.version }))
}

async fn refresh_schema(State(state): State<AppState>, context: TokenBearerContext) -> Result<(), ApiError> {
    if !context.allows(Resource::Schemas, Level::Write, &serde_json::Value::Null) {
        return Err(ApiError::from(Error::new(ErrorCode::Forbidden, "caller cannot refresh schema")));
    }

    state.dispatcher.schema_cache().invalidate(context.tenant_id);
    Ok(())
}
