//! Default query translator and executor (§6.5, §4.9 step 1 and step 5).
//!
//! The translator contract is explicitly an external collaborator in the
//! spec this gateway implements: a real deployment points
//! [`QueryDispatcher`](qgw_pool::QueryDispatcher) at a translation
//! service that understands the tenant's natural-language or
//! semi-structured query surface. This module supplies the default,
//! in-process adapter that keeps the gateway runnable without that
//! service: it treats incoming text as already-valid SQL, classifies it
//! with the same keyword heuristics `qgw_pool::dispatcher`'s deny-list
//! uses, and executes it against the tenant's own pool.

use async_trait::async_trait;
use qgw_core::{error::Result, Error, ErrorCode, Level, Resource};
use qgw_pool::{
    dispatcher::{QueryClassification, QueryExecutor, QueryTranslator, TranslatedQuery},
    schema_cache::TenantSchema,
    TenantPoolManager, TenantRegistry,
};
use qgw_core::TenantId;
use serde_json::{json, Value};
use sqlx::Row;
use std::{sync::Arc, time::Instant};

/// Classifies by the same leading-keyword heuristic the query text
/// itself will later be checked against the syntactic deny-list.
/// Good enough to route `check_permission` correctly in the absence of
/// a real translator's structured classification.
pub struct HeuristicTranslator;

#[async_trait]
impl QueryTranslator for HeuristicTranslator {
    async fn translate(&self, text: &str, tenant_schema: &TenantSchema, _roles: &[String]) -> Result<TranslatedQuery> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(Error::new(ErrorCode::Untranslatable, "empty query text"));
        }

        let upper = trimmed.to_uppercase();
        let requires_write = upper.starts_with("INSERT")
            || upper.starts_with("UPDATE")
            || upper.starts_with("DELETE")
            || upper.starts_with("MERGE");

        let required_level = if requires_write { Level::Write } else { Level::Read };

        let touched_tables: Vec<String> = tenant_schema
            .tables
            .keys()
            .filter(|table| upper.contains(&table.to_uppercase()))
            .cloned()
            .collect();

        Ok(TranslatedQuery {
            query: trimmed.to_string(),
            classification: QueryClassification {
                required_level,
                resource: Resource::Queries,
                touched_tables,
                requires_write,
                deterministic: !requires_write,
                // The request-side half of `conditions_satisfied` (§4.2):
                // a `guest` permission conditioned on `{"read_only": true}`
                // is only satisfied when the query it's being checked
                // against is actually read-only.
                conditions: json!({ "read_only": !requires_write }),
            },
        })
    }
}

/// Runs the translated query against the tenant's own pool (§4.9 step
/// 5). Rows come back as a JSON array of objects, one per row, using
/// each column's text representation — a classification-agnostic
/// shape that the result filter (role-scoped column/row removal) can
/// post-process without needing to know the original column types.
pub struct PoolQueryExecutor {
    registry: Arc<TenantRegistry>,
    pools: Arc<TenantPoolManager>,
}

impl PoolQueryExecutor {
    pub fn new(registry: Arc<TenantRegistry>, pools: Arc<TenantPoolManager>) -> Self {
        Self { registry, pools }
    }
}

#[async_trait]
impl QueryExecutor for PoolQueryExecutor {
    async fn execute(&self, tenant_id: TenantId, query: &str, max_rows: usize, deadline: Instant) -> Result<Value> {
        let descriptor = self.registry.require_active(tenant_id)?;
        let slot = self.registry.slot_for(tenant_id)?;
        let tenant_pool = self.pools.get_pool(slot, &descriptor).await?;

        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(Error::new(ErrorCode::Deadline, "deadline already elapsed before execution"));
        }

        let rows = tokio::time::timeout(remaining, sqlx::query(query).fetch_all(tenant_pool.get()))
            .await
            .map_err(|_| Error::new(ErrorCode::Deadline, "query execution exceeded its deadline"))?
            .map_err(Error::from)?;

        let limited: Vec<Value> = rows.into_iter().take(max_rows).map(row_to_json).collect();
        Ok(Value::Array(limited))
    }
}

fn row_to_json(row: sqlx::postgres::PgRow) -> Value {
    use sqlx::{Column, ValueRef};

    let mut object = serde_json::Map::new();
    for column in row.columns() {
        let name = column.name().to_string();
        let value = match row.try_get_raw(column.ordinal()) {
            Ok(raw) if raw.is_null() => Value::Null,
            _ => row
                .try_get::<String, _>(column.ordinal())
                .map(Value::String)
                .or_else(|_| row.try_get::<i64, _>(column.ordinal()).map(Value::from))
                .or_else(|_| row.try_get::<f64, _>(column.ordinal()).map(Value::from))
                .or_else(|_| row.try_get::<bool, _>(column.ordinal()).map(Value::Bool))
                .unwrap_or(Value::Null),
        };
        object.insert(name, value);
    }
    Value::Object(object)
}
