//! Row types for the central metadata store (§3.1, §4.1). Fields that
//! are typed enums or opaque ids at the domain layer are kept as plain
//! `Uuid`/`String` here — `sqlx::FromRow` maps columns directly onto
//! these, and `metadata_store.rs` converts at the boundary, the same
//! split the row/domain types elsewhere in this codebase use.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct UserRow {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub full_name: String,
    pub is_global_admin: bool,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct TenantRow {
    pub id: Uuid,
    pub name: String,
    pub database_type: String,
    pub connection_params: serde_json::Value,
    pub subscription_tier: String,
    pub quotas: serde_json::Value,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct MappingRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub tenant_id: Uuid,
    pub status: String,
    pub granted_by: Uuid,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct RoleAssignmentRow {
    pub id: Uuid,
    pub mapping_id: Uuid,
    pub role_name: String,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct SessionRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub tenant_id: Uuid,
    pub fingerprint: String,
    pub state: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub client_ip: Option<String>,
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct AccessRequestRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub tenant_id: Uuid,
    pub requested_roles: Vec<String>,
    pub status: String,
    pub decided_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub decided_at: Option<DateTime<Utc>>,
}

pub const MAPPING_STATUS_ACTIVE: &str = "active";
pub const MAPPING_STATUS_REVOKED: &str = "revoked";

pub const SESSION_STATE_ACTIVE: &str = "active";
pub const SESSION_STATE_EXPIRED: &str = "expired";
pub const SESSION_STATE_REVOKED: &str = "revoked";
pub const SESSION_STATE_LOGGED_OUT: &str = "logged_out";

pub const ACCESS_REQUEST_PENDING: &str = "pending";
pub const ACCESS_REQUEST_APPROVED: &str = "approved";
pub const ACCESS_REQUEST_REJECTED: &str = "rejected";
