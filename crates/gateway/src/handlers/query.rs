//! Query endpoints (§6.1, §4.9). `dispatch` does the real work; these
//! handlers translate the HTTP request into a `QueryRequest`, pick a
//! per-tenant breaker, and shape the response.

use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use qgw_core::{Error, ErrorCode, TokenBearerContext};
use qgw_pool::{dispatcher::QueryRequest, QueryResult};
use serde::{Deserialize, Serialize};
use sqlx::Row;
use std::{
    collections::HashMap,
    time::{Duration, Instant},
};
use uuid::Uuid;

use crate::{error::ApiError, state::AppState};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/query", post(run_query))
        .route("/query/:id", get(get_query))
        .route("/query/export", post(export_query))
}

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_TIMEOUT_MS: u64 = 120_000;
const DEFAULT_MAX_ROWS: usize = 1_000;
const MAX_ROWS_CEILING: usize = 10_000;

#[derive(Debug, Deserialize, Default)]
pub struct QueryOptions {
    pub timeout_ms: Option<u64>,
    pub max_rows: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct RunQueryRequest {
    pub text: String,
    #[serde(default)]
    pub options: QueryOptions,
}

#[derive(Debug, Serialize)]
pub struct RunQueryResponse {
    pub query_id: Uuid,
    pub executed_query: String,
    pub rows: serde_json::Value,
    pub cached: bool,
    pub execution_time_ms: u128,
}

impl From<&QueryResult> for RunQueryResponse {
    fn from(result: &QueryResult) -> Self {
        Self {
            query_id: result.query_id,
            executed_query: result.executed_query.clone(),
            rows: result.rows.clone(),
            cached: result.cached,
            execution_time_ms: result.execution_time.as_millis(),
        }
    }
}

async fn run_query(
    State(state): State<AppState>,
    context: TokenBearerContext,
    Json(body): Json<RunQueryRequest>,
) -> Result<Json<RunQueryResponse>, ApiError> {
    let timeout = body
        .options
        .timeout_ms
        .map(|ms| Duration::from_millis(ms.min(MAX_TIMEOUT_MS)))
        .unwrap_or(DEFAULT_TIMEOUT);
    let max_rows = body.options.max_rows.map(|n| n.min(MAX_ROWS_CEILING)).unwrap_or(DEFAULT_MAX_ROWS);

    let request = QueryRequest {
        query_id: Uuid::new_v4(),
        tenant_id: context.tenant_id,
        user_id: context.user_id,
        original_query: body.text,
        deadline: Instant::now() + timeout,
        max_rows,
    };

    let breaker = state.breaker_for(context.pool_handle);
    let role_scope_digest = role_scope_digest(&context.roles);
    let tenant_id = context.tenant_id;
    let pool_manager = state.pool_manager.clone();
    let registry = state.registry.clone();

    let result = state
        .dispatcher
        .dispatch(request, &context, &breaker, &role_scope_digest, move || {
            extract_tenant_schema(registry, pool_manager, tenant_id)
        })
        .await?;

    let response = RunQueryResponse::from(&result);
    state.recent_queries.insert(result.query_id, result);
    Ok(Json(response))
}

async fn get_query(State(state): State<AppState>, context: TokenBearerContext, Path(id): Path<Uuid>) -> Result<Json<RunQueryResponse>, ApiError> {
    let result = state
        .recent_queries
        .get(&id)
        .filter(|r| r.tenant_id == context.tenant_id)
        .ok_or_else(|| Error::new(ErrorCode::NotFound, "no such query result for this tenant"))?;

    Ok(Json(RunQueryResponse::from(result.value())))
}

#[derive(Debug, Deserialize)]
pub struct ExportQuery {
    pub format: ExportFormat,
}

#[derive(Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Csv,
    Json,
}

async fn export_query(
    State(state): State<AppState>,
    context: TokenBearerContext,
    Query(params): Query<ExportQuery>,
    Json(body): Json<RunQueryRequest>,
) -> Result<axum::response::Response, ApiError> {
    let inner = run_query(State(state), context, Json(body)).await?;
    let rows = &inner.0.rows;

    let body = match params.format {
        ExportFormat::Json => rows.to_string(),
        ExportFormat::Csv => rows_to_csv(rows),
    };

    let content_type = match params.format {
        ExportFormat::Json => "application/json",
        ExportFormat::Csv => "text/csv",
    };

    Ok(([("content-type", content_type)], body).into_response())
}

fn rows_to_csv(rows: &serde_json::Value) -> String {
    let Some(array) = rows.as_array() else {
        return String::new();
    };
    let Some(first) = array.first().and_then(|r| r.as_object()) else {
        return String::new();
    };

    let columns: Vec<&String> = first.keys().collect();
    let mut out = columns.iter().map(|c| c.as_str()).collect::<Vec<_>>().join(",");
    out.push('\n');

    for row in array {
        if let Some(object) = row.as_object() {
            let line = columns
                .iter()
                .map(|c| object.get(*c).map(value_to_csv_field).unwrap_or_default())
                .collect::<Vec<_>>()
                .join(",");
            out.push_str(&line);
            out.push('\n');
        }
    }
    out
}

fn value_to_csv_field(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => format!("\"{}\"", s.replace('"', "\"\"")),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn role_scope_digest(roles: &[String]) -> String {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    let mut sorted = roles.to_vec();
    sorted.sort();
    let mut hasher = DefaultHasher::new();
    sorted.join(",").hash(&mut hasher);
    format!("{:x}", hasher.finish())
}

/// Extracts the tenant's table/column shape via `information_schema`
/// (§4.10). The deny-list and permission check downstream of this care
/// only about table names the translator reports touching, so columns
/// are carried but not further interpreted here.
pub(crate) async fn extract_tenant_schema(
    registry: std::sync::Arc<qgw_pool::TenantRegistry>,
    pool_manager: std::sync::Arc<qgw_pool::TenantPoolManager>,
    tenant_id: qgw_core::TenantId,
) -> Result<HashMap<String, Vec<String>>, Error> {
    let descriptor = registry.require_active(tenant_id)?;
    let slot = registry.slot_for(tenant_id)?;
    let tenant_pool = pool_manager.get_pool(slot, &descriptor).await?;

    let rows = sqlx::query(
        "SELECT table_name, column_name FROM information_schema.columns
         WHERE table_schema = 'public' ORDER BY table_name, ordinal_position",
    )
    .fetch_all(tenant_pool.get())
    .await
    .map_err(Error::from)?;

    let mut tables: HashMap<String, Vec<String>> = HashMap::new();
    for row in rows {
        let table: String = row.try_get("table_name").map_err(Error::from)?;
        let column: String = row.try_get("column_name").map_err(Error::from)?;
        tables.entry(table).or_default().push(column);
    }
    Ok(tables)
}
