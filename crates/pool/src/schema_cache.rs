//! Per-tenant schema cache (§4.10). A tenant's schema changes rarely but
//! costs much to re-extract, so the cache holds it until the refresh
//! interval elapses. Concurrent misses for the same tenant are
//! coalesced behind a per-tenant extraction lock rather than each
//! issuing its own query against the tenant's database.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use qgw_core::TenantId;
use std::{collections::HashMap, sync::Arc};
use tokio::sync::Mutex as AsyncMutex;

#[derive(Debug, Clone)]
pub struct TenantSchema {
    pub tables: HashMap<String, Vec<String>>,
    pub updated_at: DateTime<Utc>,
    pub version: u64,
}

struct CacheSlot {
    schema: Option<TenantSchema>,
    extraction_lock: Arc<AsyncMutex<()>>,
}

pub struct SchemaCache {
    slots: DashMap<TenantId, CacheSlot>,
    refresh_interval: chrono::Duration,
}

impl SchemaCache {
    pub fn new(refresh_interval_seconds: u64) -> Self {
        Self {
            slots: DashMap::new(),
            refresh_interval: chrono::Duration::seconds(refresh_interval_seconds as i64),
        }
    }

    /// Returns the cached schema if fresh, otherwise runs `extract` to
    /// pull a new one. Concurrent callers for the same tenant block on
    /// the tenant's extraction lock instead of each calling `extract`.
    pub async fn get_or_extract<F, Fut, E>(&self, tenant_id: TenantId, extract: F) -> Result<TenantSchema, E>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<HashMap<String, Vec<String>>, E>>,
    {
        let lock = self
            .slots
            .entry(tenant_id)
            .or_insert_with(|| CacheSlot {
                schema: None,
                extraction_lock: Arc::new(AsyncMutex::new(())),
            })
            .extraction_lock
            .clone();

        let _guard = lock.lock().await;

        if let Some(schema) = self.slots.get(&tenant_id).and_then(|s| s.schema.clone()) {
            if Utc::now() - schema.updated_at < self.refresh_interval {
                return Ok(schema);
            }
        }

        let tables = extract().await?;
        let next_version = self
            .slots
            .get(&tenant_id)
            .and_then(|s| s.schema.as_ref().map(|schema| schema.version + 1))
            .unwrap_or(1);

        let schema = TenantSchema {
            tables,
            updated_at: Utc::now(),
            version: next_version,
        };

        if let Some(mut slot) = self.slots.get_mut(&tenant_id) {
            slot.schema = Some(schema.clone());
        }

        Ok(schema)
    }

    pub fn current_version(&self, tenant_id: TenantId) -> Option<u64> {
        self.slots.get(&tenant_id).and_then(|s| s.schema.as_ref().map(|s| s.version))
    }

    pub fn invalidate(&self, tenant_id: TenantId) {
        if let Some(mut slot) = self.slots.get_mut(&tenant_id) {
            slot.schema = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn caches_extraction_result() {
        let cache = SchemaCache::new(3600);
        let tenant_id = TenantId::new();
        let mut calls = 0;

        for _ in 0..3 {
            let result: Result<TenantSchema, ()> = cache
                .get_or_extract(tenant_id, || async {
                    calls += 1;
                    Ok(HashMap::from([("users".to_string(), vec!["id".to_string()])]))
                })
                .await;
            result.unwrap();
        }

        assert_eq!(calls, 1);
    }

    #[tokio::test]
    async fn invalidate_forces_re_extraction() {
        let cache = SchemaCache::new(3600);
        let tenant_id = TenantId::new();

        let _: TenantSchema = cache
            .get_or_extract(tenant_id, || async { Ok::<_, ()>(HashMap::new()) })
            .await
            .unwrap();
        assert_eq!(cache.current_version(tenant_id), Some(1));

        cache.invalidate(tenant_id);

        let schema: TenantSchema = cache
            .get_or_extract(tenant_id, || async { Ok::<_, ()>(HashMap::new()) })
            .await
            .unwrap();
        assert_eq!(schema.version, 2);
    }
}
