//! Central metadata store (§3.1, §4.1): the durable source of truth for
//! users, tenants, role assignments, sessions, access requests, and the
//! audit log. Everything else in this crate and in `qgw-pool` holds only
//! a cache of what lives here. Grounded on the teacher's
//! `crates/auth/src/repository.rs` `sqlx::query_as` idiom, generalized
//! from its per-tenant-schema pool lookup to a single global pool since
//! this store is itself tenant-agnostic (it is what tells everything
//! else which tenants exist).

use crate::models::{
    AccessRequestRow, MappingRow, RoleAssignmentRow, SessionRow, TenantRow, UserRow,
    ACCESS_REQUEST_APPROVED, ACCESS_REQUEST_PENDING, ACCESS_REQUEST_REJECTED,
    MAPPING_STATUS_ACTIVE, MAPPING_STATUS_REVOKED, SESSION_STATE_ACTIVE, SESSION_STATE_REVOKED,
};
use chrono::{DateTime, Utc};
use qgw_core::{
    audit::{AuditEvent, EventOutcome, EventType},
    error::Result,
    Error, ErrorCode,
};
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

/// Tenant descriptor as seen by the store. Connection parameters are
/// opaque here (§4.1): the store persists them, the pool manager is the
/// only component that interprets them.
#[derive(Debug, Clone)]
pub struct TenantDescriptor {
    pub name: String,
    pub database_type: String,
    pub connection_params: Value,
    pub subscription_tier: String,
    pub quotas: Value,
}

#[derive(Clone)]
pub struct CentralMetadataStore {
    pool: PgPool,
}

impl CentralMetadataStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Exposes the underlying pool for callers that need a raw
    /// connectivity check (`GET /health/system`) rather than a
    /// store-specific query.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Creates a user with the password already hashed by the caller.
    /// Fails `DuplicateIdentifier` if username or email is taken.
    pub async fn create_user(
        &self,
        username: &str,
        email: &str,
        password_hash: &str,
        full_name: &str,
        is_global_admin: bool,
    ) -> Result<Uuid> {
        let existing: Option<(Uuid,)> =
            sqlx::query_as("SELECT id FROM master_users WHERE username = $1 OR email = $2")
                .bind(username)
                .bind(email)
                .fetch_optional(&self.pool)
                .await?;

        if existing.is_some() {
            return Err(Error::new(ErrorCode::DuplicateIdentifier, "username or email already in use"));
        }

        let row: (Uuid,) = sqlx::query_as(
            "INSERT INTO master_users (username, email, password_hash, full_name, is_global_admin, is_active, created_at)
             VALUES ($1, $2, $3, $4, $5, true, $6) RETURNING id",
        )
        .bind(username)
        .bind(email)
        .bind(password_hash)
        .bind(full_name)
        .bind(is_global_admin)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;

        Ok(row.0)
    }

    /// Loads the user row by username or email, for the caller to verify
    /// the password against (§4.1 `authenticate`). This store never
    /// compares password hashes itself; `qgw-core::security::PasswordHasher`
    /// does the constant-time verification.
    pub async fn find_user_for_authentication(&self, username_or_email: &str) -> Result<UserRow> {
        sqlx::query_as::<_, UserRow>(
            "SELECT id, username, email, password_hash, full_name, is_global_admin, is_active, created_at
             FROM master_users WHERE username = $1 OR email = $1",
        )
        .bind(username_or_email)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| Error::new(ErrorCode::InvalidCredential, "invalid credentials"))
    }

    pub async fn get_user_by_id(&self, user_id: Uuid) -> Result<Option<UserRow>> {
        let user = sqlx::query_as::<_, UserRow>(
            "SELECT id, username, email, password_hash, full_name, is_global_admin, is_active, created_at
             FROM master_users WHERE id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    /// Creates or updates a tenant row. Returns the tenant id. Since the
    /// tenant identifier is generated here and the registry (§4.4) only
    /// learns of it afterward, callers always follow this with a
    /// registry `register` of the resulting descriptor.
    pub async fn upsert_tenant(&self, descriptor: &TenantDescriptor) -> Result<Uuid> {
        let row: (Uuid,) = sqlx::query_as(
            "INSERT INTO master_tenants
                (name, database_type, connection_params, subscription_tier, quotas, status, created_at)
             VALUES ($1, $2, $3, $4, $5, 'active', $6)
             ON CONFLICT (name) DO UPDATE SET
                database_type = EXCLUDED.database_type,
                connection_params = EXCLUDED.connection_params,
                subscription_tier = EXCLUDED.subscription_tier,
                quotas = EXCLUDED.quotas
             RETURNING id",
        )
        .bind(&descriptor.name)
        .bind(&descriptor.database_type)
        .bind(&descriptor.connection_params)
        .bind(&descriptor.subscription_tier)
        .bind(&descriptor.quotas)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;

        Ok(row.0)
    }

    pub async fn get_tenant_by_id(&self, tenant_id: Uuid) -> Result<Option<TenantRow>> {
        let tenant = sqlx::query_as::<_, TenantRow>(
            "SELECT id, name, database_type, connection_params, subscription_tier, quotas, status, created_at
             FROM master_tenants WHERE id = $1",
        )
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(tenant)
    }

    /// Grants `roles` to `user` at `tenant`. Fails `AlreadyGranted` if an
    /// active mapping already exists; the mapping and its role
    /// assignments are created in one transaction (§4.1).
    pub async fn grant_access(
        &self,
        user_id: Uuid,
        tenant_id: Uuid,
        roles: &[String],
        granted_by: Uuid,
    ) -> Result<Uuid> {
        let mut tx = self.pool.begin().await?;

        let existing: Option<(Uuid,)> = sqlx::query_as(
            "SELECT id FROM user_tenant_mappings WHERE user_id = $1 AND tenant_id = $2 AND status = $3",
        )
        .bind(user_id)
        .bind(tenant_id)
        .bind(MAPPING_STATUS_ACTIVE)
        .fetch_optional(&mut *tx)
        .await?;

        if existing.is_some() {
            return Err(Error::new(ErrorCode::AlreadyGranted, "user already has an active mapping to this tenant"));
        }

        let mapping: (Uuid,) = sqlx::query_as(
            "INSERT INTO user_tenant_mappings (user_id, tenant_id, status, granted_by, created_at)
             VALUES ($1, $2, $3, $4, $5) RETURNING id",
        )
        .bind(user_id)
        .bind(tenant_id)
        .bind(MAPPING_STATUS_ACTIVE)
        .bind(granted_by)
        .bind(Utc::now())
        .fetch_one(&mut *tx)
        .await?;

        for role_name in roles {
            sqlx::query("INSERT INTO user_tenant_roles (id, mapping_id, role_name) VALUES ($1, $2, $3)")
                .bind(Uuid::new_v4())
                .bind(mapping.0)
                .bind(role_name)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(mapping.0)
    }

    /// Revokes the active mapping for (user, tenant) and invalidates all
    /// of its open sessions in the same transaction.
    pub async fn revoke_access(&self, user_id: Uuid, tenant_id: Uuid) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let mapping: Option<(Uuid,)> = sqlx::query_as(
            "UPDATE user_tenant_mappings SET status = $1 WHERE user_id = $2 AND tenant_id = $3 AND status = $4 RETURNING id",
        )
        .bind(MAPPING_STATUS_REVOKED)
        .bind(user_id)
        .bind(tenant_id)
        .bind(MAPPING_STATUS_ACTIVE)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(_mapping) = mapping else {
            return Err(Error::new(ErrorCode::NoAccess, "no active mapping to revoke"));
        };

        sqlx::query(
            "UPDATE tenant_access_sessions SET state = $1 WHERE user_id = $2 AND tenant_id = $3 AND state = $4",
        )
        .bind(SESSION_STATE_REVOKED)
        .bind(user_id)
        .bind(tenant_id)
        .bind(SESSION_STATE_ACTIVE)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Returns the role names currently assigned to (user, tenant)
    /// through an active mapping.
    pub async fn get_user_roles(&self, user_id: Uuid, tenant_id: Uuid) -> Result<Vec<String>> {
        let rows = sqlx::query_as::<_, RoleAssignmentRow>(
            "SELECT utr.id, utr.mapping_id, utr.role_name
             FROM user_tenant_roles utr
             INNER JOIN user_tenant_mappings utm ON utm.id = utr.mapping_id
             WHERE utm.user_id = $1 AND utm.tenant_id = $2 AND utm.status = $3",
        )
        .bind(user_id)
        .bind(tenant_id)
        .bind(MAPPING_STATUS_ACTIVE)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|r| r.role_name).collect())
    }

    pub async fn has_active_mapping(&self, user_id: Uuid, tenant_id: Uuid) -> Result<bool> {
        let existing: Option<(Uuid,)> = sqlx::query_as(
            "SELECT id FROM user_tenant_mappings WHERE user_id = $1 AND tenant_id = $2 AND status = $3",
        )
        .bind(user_id)
        .bind(tenant_id)
        .bind(MAPPING_STATUS_ACTIVE)
        .fetch_optional(&self.pool)
        .await?;
        Ok(existing.is_some())
    }

    /// Records the durable session row. The Redis-backed
    /// [`crate::session_manager::SessionManager`] mirrors this for the hot
    /// path; this row is what `invalidate_sessions` and audits consult.
    /// Fails `NoAccess` if no active mapping exists (§4.1).
    pub async fn open_session(
        &self,
        user_id: Uuid,
        tenant_id: Uuid,
        session_id: Uuid,
        fingerprint: &str,
        expires_at: DateTime<Utc>,
        client_ip: Option<&str>,
        user_agent: Option<&str>,
    ) -> Result<SessionRow> {
        if !self.has_active_mapping(user_id, tenant_id).await? {
            return Err(Error::new(ErrorCode::NoAccess, "no active mapping for user at tenant"));
        }

        let row = sqlx::query_as::<_, SessionRow>(
            "INSERT INTO tenant_access_sessions
                (id, user_id, tenant_id, fingerprint, state, issued_at, expires_at, client_ip, user_agent)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
             RETURNING id, user_id, tenant_id, fingerprint, state, issued_at, expires_at, client_ip, user_agent",
        )
        .bind(session_id)
        .bind(user_id)
        .bind(tenant_id)
        .bind(fingerprint)
        .bind(SESSION_STATE_ACTIVE)
        .bind(Utc::now())
        .bind(expires_at)
        .bind(client_ip)
        .bind(user_agent)
        .fetch_one(&self.pool)
        .await?;

        Ok(row)
    }

    pub async fn close_session(&self, session_id: Uuid) -> Result<()> {
        sqlx::query("UPDATE tenant_access_sessions SET state = 'logged_out' WHERE id = $1 AND state = $2")
            .bind(session_id)
            .bind(SESSION_STATE_ACTIVE)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Marks every active session for (user, tenant) with `reason`. Used
    /// on revoke/deactivate (§4.1, invariant I1).
    pub async fn invalidate_sessions(&self, user_id: Uuid, tenant_id: Uuid, reason: &str) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE tenant_access_sessions SET state = $1 WHERE user_id = $2 AND tenant_id = $3 AND state = $4",
        )
        .bind(reason)
        .bind(user_id)
        .bind(tenant_id)
        .bind(SESSION_STATE_ACTIVE)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Submits a pending access request.
    pub async fn submit_access_request(
        &self,
        user_id: Uuid,
        tenant_id: Uuid,
        requested_roles: &[String],
    ) -> Result<Uuid> {
        let row: (Uuid,) = sqlx::query_as(
            "INSERT INTO tenant_access_requests (id, user_id, tenant_id, requested_roles, status, created_at)
             VALUES ($1, $2, $3, $4, $5, $6) RETURNING id",
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(tenant_id)
        .bind(requested_roles)
        .bind(ACCESS_REQUEST_PENDING)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;

        Ok(row.0)
    }

    /// Decides a pending access request. Approving creates the
    /// underlying grant in the same transaction. Invariant I6: once
    /// decided, deciding again fails `Conflict`.
    pub async fn decide_access_request(&self, request_id: Uuid, approve: bool, decided_by: Uuid) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let request: Option<AccessRequestRow> = sqlx::query_as(
            "SELECT id, user_id, tenant_id, requested_roles, status, decided_by, created_at, decided_at
             FROM tenant_access_requests WHERE id = $1 FOR UPDATE",
        )
        .bind(request_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(request) = request else {
            return Err(Error::new(ErrorCode::NotFound, "access request not found"));
        };

        if request.status != ACCESS_REQUEST_PENDING {
            return Err(Error::new(ErrorCode::Conflict, "access request already decided"));
        }

        let new_status = if approve { ACCESS_REQUEST_APPROVED } else { ACCESS_REQUEST_REJECTED };

        sqlx::query("UPDATE tenant_access_requests SET status = $1, decided_by = $2, decided_at = $3 WHERE id = $4")
            .bind(new_status)
            .bind(decided_by)
            .bind(Utc::now())
            .bind(request_id)
            .execute(&mut *tx)
            .await?;

        if approve {
            let mapping: (Uuid,) = sqlx::query_as(
                "INSERT INTO user_tenant_mappings (user_id, tenant_id, status, granted_by, created_at)
                 VALUES ($1, $2, $3, $4, $5) RETURNING id",
            )
            .bind(request.user_id)
            .bind(request.tenant_id)
            .bind(MAPPING_STATUS_ACTIVE)
            .bind(decided_by)
            .bind(Utc::now())
            .fetch_one(&mut *tx)
            .await?;

            for role_name in &request.requested_roles {
                sqlx::query("INSERT INTO user_tenant_roles (id, mapping_id, role_name) VALUES ($1, $2, $3)")
                    .bind(Uuid::new_v4())
                    .bind(mapping.0)
                    .bind(role_name)
                    .execute(&mut *tx)
                    .await?;
            }
        }

        tx.commit().await?;
        Ok(())
    }

    pub async fn get_mapping(&self, mapping_id: Uuid) -> Result<Option<MappingRow>> {
        let mapping = sqlx::query_as::<_, MappingRow>(
            "SELECT id, user_id, tenant_id, status, granted_by, created_at FROM user_tenant_mappings WHERE id = $1",
        )
        .bind(mapping_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(mapping)
    }
}

/// Convenience builder for the events §4.12 requires to be durable before
/// the triggering response returns (login, grant/revoke, permission
/// denial, session lifecycle, tenant activation/decommission). Uses
/// `qgw_core::audit::AuditLogger::log_sensitive_event` for the actual
/// durable write; this just shapes the event consistently.
pub fn durable_event(
    event_type: EventType,
    description: impl Into<String>,
    user_id: Option<Uuid>,
    tenant_id: Option<Uuid>,
    session_id: Option<Uuid>,
    outcome: EventOutcome,
    details: Value,
) -> AuditEvent {
    let mut builder = AuditEvent::builder(event_type, description).outcome(outcome).new_values(details);
    if let Some(user_id) = user_id {
        builder = builder.actor_id(user_id.to_string());
    }
    if let Some(tenant_id) = tenant_id {
        builder = builder.tenant_id(tenant_id.to_string());
    }
    if let Some(session_id) = session_id {
        builder = builder.resource("session", session_id.to_string());
    }
    builder.build()
}
