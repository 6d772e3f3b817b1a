//! Query dispatcher (§4.9): translate, classify, deny-list, cache,
//! execute, filter, record. The translator itself is out of scope
//! (§6.5) — dispatcher callers supply one via [`QueryTranslator`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use qgw_core::{audit::AuditLogger, error::Result, Error, ErrorCode, Level, Resource, TenantId, TokenBearerContext, UserId};
use regex::Regex;
use serde_json::Value;
use std::time::{Duration, Instant};
use tracing::warn;
use uuid::Uuid;

use crate::{breaker::CircuitBreaker, result_cache::ResultCache, schema_cache::SchemaCache};

/// The translator's classification of a translated query (§6.5). Read
/// by the deny-list and by the permission check in step 2; the
/// dispatcher never re-derives it from the query text itself.
#[derive(Debug, Clone)]
pub struct QueryClassification {
    pub required_level: Level,
    pub resource: Resource,
    pub touched_tables: Vec<String>,
    pub requires_write: bool,
    pub deterministic: bool,
    /// The request-side conditions this query satisfies (e.g.
    /// `{"read_only": true}`), checked against the caller's matching
    /// permission's conditions in step 2 and reused to pick the role-scope
    /// result filter in step 6.
    pub conditions: Value,
}

#[derive(Debug, Clone)]
pub struct TranslatedQuery {
    pub query: String,
    pub classification: QueryClassification,
}

/// Pure function from (user text, tenant schema, roles) to a translated
/// query + classification. Per §6.5 it must not touch a connection pool
/// or perform I/O beyond the schema view it's handed.
#[async_trait]
pub trait QueryTranslator: Send + Sync {
    async fn translate(
        &self,
        text: &str,
        tenant_schema: &crate::schema_cache::TenantSchema,
        roles: &[String],
    ) -> Result<TranslatedQuery>;
}

pub struct QueryRequest {
    pub query_id: Uuid,
    pub tenant_id: TenantId,
    pub user_id: UserId,
    pub original_query: String,
    pub deadline: Instant,
    pub max_rows: usize,
}

#[derive(Debug, Clone)]
pub struct QueryResult {
    pub query_id: Uuid,
    pub tenant_id: TenantId,
    pub user_id: UserId,
    pub original_query: String,
    pub executed_query: String,
    pub rows: Value,
    pub execution_time: Duration,
    pub cached: bool,
    pub security_filtered: bool,
}

/// Runs a single connection acquire + query execution, the step the
/// dispatcher treats as replaceable per backend adapter.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    async fn execute(&self, tenant_id: TenantId, query: &str, max_rows: usize, deadline: Instant) -> Result<Value>;
}

static DENY_PATTERNS: &[&str] = &[
    r"(?i)^\s*DROP\s+",
    r"(?i)^\s*DELETE\s+FROM\s+\S+\s*(;|$)",
    r"(?i)\bGRANT\b",
    r"(?i)\bREVOKE\b",
    r"(?i)\bCREATE\s+USER\b",
    r"(?i)\bALTER\s+USER\b",
];

fn deny_listed(query: &str) -> bool {
    DENY_PATTERNS.iter().any(|pattern| {
        Regex::new(pattern)
            .expect("deny-list pattern is a fixed, tested literal")
            .is_match(query)
    })
}

pub struct QueryDispatcher<Tr: QueryTranslator, Ex: QueryExecutor> {
    translator: Tr,
    executor: Ex,
    schema_cache: SchemaCache,
    result_cache: ResultCache,
    audit: AuditLogger,
}

impl<Tr: QueryTranslator, Ex: QueryExecutor> QueryDispatcher<Tr, Ex> {
    pub fn new(translator: Tr, executor: Ex, schema_cache: SchemaCache, result_cache: ResultCache, audit: AuditLogger) -> Self {
        Self {
            translator,
            executor,
            schema_cache,
            result_cache,
            audit,
        }
    }

    /// Exposes the schema cache for callers outside `dispatch` (the
    /// `GET /schema` and `POST /schema/refresh` handlers) that need it
    /// without going through a query.
    pub fn schema_cache(&self) -> &SchemaCache {
        &self.schema_cache
    }

    pub async fn dispatch<F, Fut, E>(
        &self,
        request: QueryRequest,
        context: &TokenBearerContext,
        breaker: &CircuitBreaker,
        role_scope_digest: &str,
        extract_schema: F,
    ) -> Result<QueryResult>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = std::result::Result<std::collections::HashMap<String, Vec<String>>, E>>,
        E: std::fmt::Display,
    {
        let started = Instant::now();

        let schema = self
            .schema_cache
            .get_or_extract(request.tenant_id, extract_schema)
            .await
            .map_err(|e| Error::new(ErrorCode::Internal, format!("schema extraction failed: {e}")))?;

        let translated = self
            .translator
            .translate(&request.original_query, &schema, &context.roles)
            .await?;

        if !context.allows(
            translated.classification.resource,
            translated.classification.required_level,
            &translated.classification.conditions,
        ) {
            let _ = self
                .audit
                .log_permission_denied(
                    &context.user_id.0.to_string(),
                    &context.tenant_id.0.to_string(),
                    &format!("{:?}", translated.classification.resource),
                    &format!("{:?}", translated.classification.required_level),
                )
                .await;
            return Err(Error::new(ErrorCode::Forbidden, "query classification exceeds caller's permissions"));
        }

        let role_scope_conditions = context.covering_conditions(
            translated.classification.resource,
            translated.classification.required_level,
            &translated.classification.conditions,
        );

        if deny_listed(&translated.query) {
            return Err(Error::new(ErrorCode::QueryRejected, "query matches the syntactic deny-list"));
        }

        if let Some(cached) = self.result_cache.get(
            request.tenant_id,
            &translated.query,
            role_scope_digest,
            schema.version,
        ) {
            let (rows, security_filtered) = apply_role_scope_filter(cached, role_scope_conditions.as_ref());
            return Ok(QueryResult {
                query_id: request.query_id,
                tenant_id: request.tenant_id,
                user_id: request.user_id,
                original_query: request.original_query,
                executed_query: translated.query,
                rows,
                execution_time: started.elapsed(),
                cached: true,
                security_filtered,
            });
        }

        breaker.try_acquire()?;
        let rows = match self
            .executor
            .execute(request.tenant_id, &translated.query, request.max_rows, request.deadline)
            .await
        {
            Ok(rows) => {
                breaker.record_success();
                rows
            }
            Err(e) => {
                if e.code.counts_against_breaker() {
                    breaker.record_failure();
                }
                return Err(e);
            }
        };

        if translated.classification.requires_write {
            self.result_cache.invalidate_tenant(request.tenant_id);
        } else if translated.classification.deterministic {
            self.result_cache.put(
                request.tenant_id,
                translated.query.clone(),
                role_scope_digest.to_string(),
                schema.version,
                rows.clone(),
            );
        }

        if translated.query.len() > 100_000 {
            warn!(tenant_id = %request.tenant_id, "unusually large translated query");
        }

        let (rows, security_filtered) = apply_role_scope_filter(rows, role_scope_conditions.as_ref());

        Ok(QueryResult {
            query_id: request.query_id,
            tenant_id: request.tenant_id,
            user_id: request.user_id,
            original_query: request.original_query,
            executed_query: translated.query,
            rows,
            execution_time: started.elapsed(),
            cached: false,
            security_filtered,
        })
    }
}

/// §4.9 step 6. A permission's conditions may carry a `denied_columns`
/// array naming fields the role is never shown; anything else (e.g.
/// guest's `read_only`) is already enforced by the permission check in
/// step 2 and has no further bearing on row shape here.
fn apply_role_scope_filter(rows: Value, conditions: Option<&Value>) -> (Value, bool) {
    let denied_columns: Vec<&str> = conditions
        .and_then(|c| c.get("denied_columns"))
        .and_then(Value::as_array)
        .map(|cols| cols.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();

    if denied_columns.is_empty() {
        return (rows, false);
    }

    let mut filtered_any = false;
    let rows = match rows {
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .map(|item| match item {
                    Value::Object(mut row) => {
                        for column in &denied_columns {
                            if row.remove(*column).is_some() {
                                filtered_any = true;
                            }
                        }
                        Value::Object(row)
                    }
                    other => other,
                })
                .collect(),
        ),
        other => other,
    };

    (rows, filtered_any)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn denies_unrestricted_drop() {
        assert!(deny_listed("DROP TABLE users"));
    }

    #[test]
    fn denies_unrestricted_delete_without_where() {
        assert!(deny_listed("DELETE FROM users"));
    }

    #[test]
    fn allows_scoped_delete_with_where() {
        assert!(!deny_listed("DELETE FROM users WHERE id = 1"));
    }

    #[test]
    fn denies_grant_and_revoke() {
        assert!(deny_listed("GRANT ALL ON users TO someone"));
        assert!(deny_listed("REVOKE ALL ON users FROM someone"));
    }

    #[test]
    fn allows_ordinary_select() {
        assert!(!deny_listed("SELECT * FROM users WHERE tenant_id = $1"));
    }

    #[test]
    fn role_scope_filter_strips_denied_columns() {
        let rows = serde_json::json!([{"id": 1, "salary": 90000, "name": "a"}]);
        let conditions = serde_json::json!({"denied_columns": ["salary"]});
        let (filtered, security_filtered) = apply_role_scope_filter(rows, Some(&conditions));
        assert!(security_filtered);
        assert_eq!(filtered, serde_json::json!([{"id": 1, "name": "a"}]));
    }

    #[test]
    fn role_scope_filter_is_noop_without_denied_columns() {
        let rows = serde_json::json!([{"id": 1}]);
        let conditions = serde_json::json!({"read_only": true});
        let (filtered, security_filtered) = apply_role_scope_filter(rows.clone(), Some(&conditions));
        assert!(!security_filtered);
        assert_eq!(filtered, rows);
    }

    #[test]
    fn role_scope_filter_is_noop_for_global_admin() {
        let rows = serde_json::json!([{"id": 1}]);
        let (filtered, security_filtered) = apply_role_scope_filter(rows.clone(), None);
        assert!(!security_filtered);
        assert_eq!(filtered, rows);
    }
}
