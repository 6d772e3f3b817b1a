//! Per-tenant result cache (§4.11). Capped and approximately
//! least-recently-used: once a tenant is at capacity the entry with the
//! oldest `last_read` is evicted to make room. Keys fold in the tenant
//! id so a cache lookup can never cross tenants even under a bug
//! upstream that reuses a query digest.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use qgw_core::TenantId;
use serde_json::Value;

const DEFAULT_TTL_CAP_SECONDS: u64 = 1800;

#[derive(Clone)]
struct Entry {
    value: Value,
    written_at: DateTime<Utc>,
    last_read: DateTime<Utc>,
    schema_version: u64,
}

/// Composite key: (normalized_query, role_scope_digest). The tenant id
/// is the outer map key, never part of this tuple, so it cannot leak
/// into the inner key by accident.
type QueryKey = (String, String);

struct TenantBucket {
    entries: DashMap<QueryKey, Entry>,
    max_entries: usize,
}

pub struct ResultCache {
    buckets: DashMap<TenantId, TenantBucket>,
    ttl_seconds: u64,
    max_entries_per_tenant: usize,
}

impl ResultCache {
    pub fn new(ttl_seconds: u64, max_entries_per_tenant: usize) -> Self {
        Self {
            buckets: DashMap::new(),
            ttl_seconds: ttl_seconds.min(DEFAULT_TTL_CAP_SECONDS),
            max_entries_per_tenant,
        }
    }

    pub fn get(&self, tenant_id: TenantId, normalized_query: &str, role_scope_digest: &str, schema_version: u64) -> Option<Value> {
        let bucket = self.buckets.get(&tenant_id)?;
        let key = (normalized_query.to_string(), role_scope_digest.to_string());
        let mut entry = bucket.entries.get_mut(&key)?;

        if entry.schema_version != schema_version {
            return None;
        }
        let age = Utc::now() - entry.written_at;
        if age > chrono::Duration::seconds(self.ttl_seconds as i64) {
            return None;
        }

        entry.last_read = Utc::now();
        Some(entry.value.clone())
    }

    pub fn put(&self, tenant_id: TenantId, normalized_query: String, role_scope_digest: String, schema_version: u64, value: Value) {
        let max_entries = self.max_entries_per_tenant;
        let bucket = self.buckets.entry(tenant_id).or_insert_with(|| TenantBucket {
            entries: DashMap::new(),
            max_entries,
        });

        let key = (normalized_query, role_scope_digest);
        let now = Utc::now();
        bucket.entries.insert(
            key,
            Entry {
                value,
                written_at: now,
                last_read: now,
                schema_version,
            },
        );

        if bucket.entries.len() > bucket.max_entries {
            self.evict_oldest(&bucket);
        }
    }

    fn evict_oldest(&self, bucket: &TenantBucket) {
        if let Some(oldest_key) = bucket
            .entries
            .iter()
            .min_by_key(|entry| entry.last_read)
            .map(|entry| entry.key().clone())
        {
            bucket.entries.remove(&oldest_key);
        }
    }

    /// Drops every cached entry for a tenant. Called when a
    /// write-classified query executes on that tenant or on explicit
    /// invalidation (§4.11 a/c); schema-version advance is handled by
    /// `get`'s version check rather than an eager sweep.
    pub fn invalidate_tenant(&self, tenant_id: TenantId) {
        self.buckets.remove(&tenant_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_then_get_round_trips() {
        let cache = ResultCache::new(1800, 10);
        let tenant_id = TenantId::new();
        cache.put(tenant_id, "q".into(), "digest".into(), 1, Value::from(42));
        assert_eq!(cache.get(tenant_id, "q", "digest", 1), Some(Value::from(42)));
    }

    #[test]
    fn stale_schema_version_misses() {
        let cache = ResultCache::new(1800, 10);
        let tenant_id = TenantId::new();
        cache.put(tenant_id, "q".into(), "digest".into(), 1, Value::from(42));
        assert_eq!(cache.get(tenant_id, "q", "digest", 2), None);
    }

    #[test]
    fn caps_ttl_at_thirty_minutes() {
        let cache = ResultCache::new(999_999, 10);
        assert_eq!(cache.ttl_seconds, 1800);
    }

    #[test]
    fn evicts_oldest_entry_over_capacity() {
        let cache = ResultCache::new(1800, 2);
        let tenant_id = TenantId::new();
        cache.put(tenant_id, "a".into(), "d".into(), 1, Value::from(1));
        cache.put(tenant_id, "b".into(), "d".into(), 1, Value::from(2));
        cache.put(tenant_id, "c".into(), "d".into(), 1, Value::from(3));

        let bucket = cache.buckets.get(&tenant_id).unwrap();
        assert_eq!(bucket.entries.len(), 2);
    }

    #[test]
    fn invalidate_tenant_clears_its_bucket() {
        let cache = ResultCache::new(1800, 10);
        let tenant_id = TenantId::new();
        cache.put(tenant_id, "q".into(), "digest".into(), 1, Value::from(1));
        cache.invalidate_tenant(tenant_id);
        assert_eq!(cache.get(tenant_id, "q", "digest", 1), None);
    }
}
