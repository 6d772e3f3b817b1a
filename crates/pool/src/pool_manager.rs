//! Per-tenant database connection pool manager (§4.6).
//!
//! A tenant's pool is created lazily on first checkout and cached by
//! [`TenantSlot`] rather than by tenant id or schema string, so a
//! hot-path lookup never touches the string/UUID keyed tenant registry.
//! Only [`DatabaseKind::RelationalA`] (Postgres) has a live connection
//! adapter; the other kinds are registered with the tenant registry
//! today but have no adapter here.

use dashmap::DashMap;
use qgw_core::{
    config::PoolConfig, error::Result, security::EncryptionService, DatabaseKind, Error, ErrorCode,
    TenantSlot,
};
use sqlx::{postgres::PgPoolOptions, PgPool};
use std::{
    sync::Arc,
    time::Duration,
};
use tracing::{debug, info};

use crate::registry::DatabaseDescriptor;

/// A live, checked-out connection pool for one tenant.
#[derive(Clone)]
pub struct TenantPool {
    pool: PgPool,
    slot: TenantSlot,
    created_at: std::time::Instant,
}

impl TenantPool {
    pub fn get(&self) -> &PgPool {
        &self.pool
    }

    pub fn slot(&self) -> TenantSlot {
        self.slot
    }

    fn is_stale(&self, recycle_after: Duration) -> bool {
        self.created_at.elapsed() >= recycle_after
    }
}

/// Manages one Postgres pool per tenant slot, recycling pools older than
/// `recycle_after_seconds` and bounding each pool to
/// `max_connections_per_tenant` (§4.6).
pub struct TenantPoolManager {
    pools: Arc<DashMap<usize, TenantPool>>,
    config: PoolConfig,
    encryption: Arc<EncryptionService>,
}

impl TenantPoolManager {
    pub fn new(config: PoolConfig, encryption: Arc<EncryptionService>) -> Self {
        Self {
            pools: Arc::new(DashMap::new()),
            config,
            encryption,
        }
    }

    /// Retrieves or creates the pool for `descriptor`'s tenant. A cached
    /// pool older than `recycle_after_seconds` is dropped and rebuilt
    /// rather than reused, even though it would still be healthy.
    pub async fn get_pool(&self, slot: TenantSlot, descriptor: &DatabaseDescriptor) -> Result<TenantPool> {
        let recycle_after = Duration::from_secs(self.config.recycle_after_seconds);

        if let Some(entry) = self.pools.get(&slot.0) {
            if !entry.is_stale(recycle_after) {
                debug!(slot = slot.0, "using cached tenant pool");
                return Ok(entry.clone());
            }
            debug!(slot = slot.0, "recycling stale tenant pool");
        }

        let pool = self.create_pool(descriptor).await?;
        let tenant_pool = TenantPool {
            pool,
            slot,
            created_at: std::time::Instant::now(),
        };
        self.pools.insert(slot.0, tenant_pool.clone());
        Ok(tenant_pool)
    }

    async fn create_pool(&self, descriptor: &DatabaseDescriptor) -> Result<PgPool> {
        match descriptor.kind {
            DatabaseKind::RelationalA => self.create_postgres_pool(descriptor).await,
            other => Err(Error::new(
                ErrorCode::Internal,
                format!("no connection adapter registered for database kind {other:?}"),
            )),
        }
    }

    async fn create_postgres_pool(&self, descriptor: &DatabaseDescriptor) -> Result<PgPool> {
        let connection_string = self.encryption.decrypt_string(
            std::str::from_utf8(&descriptor.connection_secret)
                .map_err(|e| Error::new(ErrorCode::Internal, format!("connection secret is not utf-8: {e}")))?,
        )?;

        info!(tenant_id = %descriptor.tenant_id, "opening tenant connection pool");

        PgPoolOptions::new()
            .max_connections(self.config.max_connections_per_tenant)
            .min_connections(self.config.min_connections_per_tenant)
            .acquire_timeout(Duration::from_millis(self.config.acquire_timeout_ms))
            .connect(&connection_string)
            .await
            .map_err(|e| {
                if matches!(e, sqlx::Error::PoolTimedOut) {
                    Error::new(ErrorCode::PoolTimeout, "timed out acquiring tenant connection")
                } else {
                    Error::from(e)
                }
            })
    }

    pub fn evict(&self, slot: TenantSlot) {
        self.pools.remove(&slot.0);
    }

    pub async fn check_health(&self, slot: TenantSlot) -> Result<()> {
        let entry = self
            .pools
            .get(&slot.0)
            .ok_or_else(|| Error::new(ErrorCode::TenantNotFound, "no open pool for tenant slot"))?;
        sqlx::query("SELECT 1").fetch_one(&entry.pool).await?;
        Ok(())
    }

    pub fn pool_count(&self) -> usize {
        self.pools.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qgw_core::config::SecurityConfig;
    use qgw_core::{TenantId, TenantStatus};

    fn test_manager() -> TenantPoolManager {
        let security = SecurityConfig {
            argon2_memory_cost: 19456,
            argon2_time_cost: 2,
            argon2_parallelism: 1,
            aes_encryption_key: "01234567890123456789012345678901".to_string(),
        };
        let encryption = Arc::new(EncryptionService::new(&security).unwrap());
        let config = PoolConfig {
            min_connections_per_tenant: 1,
            max_connections_per_tenant: 5,
            acquire_timeout_ms: 5000,
            idle_reap_interval_seconds: 60,
            health_check_interval_seconds: 30,
            recycle_after_seconds: 3600,
        };
        TenantPoolManager::new(config, encryption)
    }

    #[tokio::test]
    async fn rejects_unsupported_database_kind() {
        let manager = test_manager();
        let descriptor = DatabaseDescriptor {
            tenant_id: TenantId::new(),
            kind: DatabaseKind::Document,
            connection_secret: vec![],
            status: TenantStatus::Active,
        };

        let err = manager.get_pool(TenantSlot(0), &descriptor).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::Internal);
    }

    #[test]
    fn evicting_an_unknown_slot_is_a_no_op() {
        let manager = test_manager();
        manager.evict(TenantSlot(42));
        assert_eq!(manager.pool_count(), 0);
    }
}
