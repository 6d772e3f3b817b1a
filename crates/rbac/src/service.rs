//! RBAC orchestration (§4.3): ties the central metadata store, the role
//! catalog, the session manager, and the token codec together into the
//! login / switch-tenant / access-decision flows the gateway calls into.
//! Grounded on the teacher's `crates/auth/src/service.rs` `login`
//! method (password verify, session create, token issue, audit), scaled
//! down to this core's narrower token shape (no 2FA, no refresh-token
//! rotation, no email workflows — all out of scope here).

use crate::{
    metadata_store::{CentralMetadataStore, TenantDescriptor},
    roles::RoleCatalog,
    session_manager::SessionManager,
};
use chrono::Utc;
use qgw_core::{
    audit::{AuditEvent, AuditLogger, EventOutcome, EventType},
    error::Result,
    security::{PasswordHasher, TokenCodec},
    Error, ErrorCode, Level, Resource, TenantId, TokenBearerContext, TokenClaims, UserId,
};
use rand::RngCore;
use std::sync::{Arc, RwLock};
use tracing::info;
use uuid::Uuid;

/// Outcome of a successful login or tenant switch: a signed token plus
/// the context the gateway attaches to the request.
pub struct IssuedToken {
    pub token: String,
    pub claims: TokenClaims,
}

pub struct RbacService {
    store: CentralMetadataStore,
    sessions: Arc<SessionManager>,
    catalog: Arc<RwLock<RoleCatalog>>,
    password_hasher: PasswordHasher,
    token_codec: TokenCodec,
    audit: AuditLogger,
    access_ttl_seconds: i64,
}

impl RbacService {
    pub fn new(
        store: CentralMetadataStore,
        sessions: Arc<SessionManager>,
        catalog: Arc<RwLock<RoleCatalog>>,
        password_hasher: PasswordHasher,
        token_codec: TokenCodec,
        audit: AuditLogger,
        access_ttl_seconds: i64,
    ) -> Self {
        Self { store, sessions, catalog, password_hasher, token_codec, audit, access_ttl_seconds }
    }

    /// `login` (§4.1 `authenticate` + §4.3 session issue). Verifies the
    /// password with a constant-time comparison, opens a session in both
    /// the durable store and the Redis mirror, and returns a signed token.
    pub async fn login(
        &self,
        username_or_email: &str,
        password: &str,
        tenant_id: Uuid,
        client_ip: Option<String>,
        user_agent: Option<String>,
    ) -> Result<IssuedToken> {
        let user = self.store.find_user_for_authentication(username_or_email).await?;

        if !user.is_active {
            return Err(Error::new(ErrorCode::InvalidCredential, "account is disabled"));
        }

        if !self.password_hasher.verify_password(password, &user.password_hash)? {
            return Err(Error::new(ErrorCode::InvalidCredential, "invalid credentials"));
        }

        if !user.is_global_admin && !self.store.has_active_mapping(user.id, tenant_id).await? {
            return Err(Error::new(ErrorCode::NoAccess, "no active mapping for user at this tenant"));
        }

        let roles = self.store.get_user_roles(user.id, tenant_id).await?;
        let issued = self.issue_session(user.id, tenant_id, &roles, client_ip, user_agent).await?;

        self.audit
            .log_sensitive_event(
                AuditEvent::builder(EventType::AuthenticationSuccess, "user authenticated")
                    .outcome(EventOutcome::Success)
                    .actor_id(user.id.to_string())
                    .tenant_id(tenant_id.to_string())
                    .build(),
            )
            .await?;

        info!(user_id = %user.id, tenant_id = %tenant_id, "login succeeded");
        Ok(issued)
    }

    /// `switch_tenant` (§4.3): opens a new session after an access check
    /// at the target tenant, then logs out the current session. Both
    /// steps share the same durable-audit guarantee as login.
    pub async fn switch_tenant(
        &self,
        current: &TokenBearerContext,
        new_tenant_id: Uuid,
        client_ip: Option<String>,
        user_agent: Option<String>,
    ) -> Result<IssuedToken> {
        let user_id = current.user_id.0;

        if !current.is_global_admin && !self.store.has_active_mapping(user_id, new_tenant_id).await? {
            return Err(Error::new(ErrorCode::NoAccess, "no active mapping for user at requested tenant"));
        }

        let roles = self.store.get_user_roles(user_id, new_tenant_id).await?;
        let issued = self.issue_session(user_id, new_tenant_id, &roles, client_ip, user_agent).await?;

        self.sessions
            .invalidate_session(current.tenant_id, &current.session_id.to_string(), crate::session_manager::SessionState::LoggedOut)
            .await?;
        self.store.close_session(current.session_id.0).await?;

        self.audit
            .log_sensitive_event(
                AuditEvent::builder(EventType::SessionTerminated, "session ended by tenant switch")
                    .outcome(EventOutcome::Success)
                    .actor_id(user_id.to_string())
                    .tenant_id(current.tenant_id.to_string())
                    .build(),
            )
            .await?;

        Ok(issued)
    }

    /// Logs the session out everywhere: durable store row, Redis mirror,
    /// and (the caller's responsibility) token invalidation downstream.
    pub async fn logout(&self, tenant_id: TenantId, session_id: Uuid) -> Result<()> {
        self.sessions
            .invalidate_session(tenant_id, &session_id.to_string(), crate::session_manager::SessionState::LoggedOut)
            .await?;
        self.store.close_session(session_id).await?;

        self.audit
            .log_sensitive_event(
                AuditEvent::builder(EventType::SessionTerminated, "user logged out")
                    .outcome(EventOutcome::Success)
                    .tenant_id(tenant_id.to_string())
                    .build(),
            )
            .await?;

        Ok(())
    }

    /// Creates a new tenant (§4.1 `upsert_tenant`). Does not activate it
    /// in the runtime registry — that happens once a clone is reported
    /// ready (§4.4), which is outside this service's responsibility.
    pub async fn upsert_tenant(&self, descriptor: TenantDescriptor) -> Result<Uuid> {
        self.store.upsert_tenant(&descriptor).await
    }

    /// `grant_access` (§4.1). Roles must be names present in the
    /// catalog; unknown role names are rejected before the store call so
    /// a typo never creates a silently-empty role assignment.
    pub async fn grant_access(&self, user_id: Uuid, tenant_id: Uuid, roles: &[String], granted_by: Uuid) -> Result<Uuid> {
        {
            let catalog = self.catalog.read().expect("role catalog lock poisoned");
            for role in roles {
                if catalog.get(role).is_none() {
                    return Err(Error::new(ErrorCode::NotFound, format!("unknown role template: {role}")));
                }
            }
        }

        let mapping_id = self.store.grant_access(user_id, tenant_id, roles, granted_by).await?;

        self.audit
            .log_sensitive_event(
                AuditEvent::builder(EventType::AccessGranted, "access granted")
                    .outcome(EventOutcome::Success)
                    .actor_id(granted_by.to_string())
                    .tenant_id(tenant_id.to_string())
                    .resource("user", user_id.to_string())
                    .build(),
            )
            .await?;

        Ok(mapping_id)
    }

    /// `revoke_access` (§4.1): marks the mapping revoked and invalidates
    /// the user's open sessions at the tenant, in both the durable store
    /// and the Redis mirror.
    pub async fn revoke_access(&self, user_id: Uuid, tenant_id: Uuid, revoked_by: Uuid) -> Result<()> {
        self.store.revoke_access(user_id, tenant_id).await?;
        self.sessions.invalidate_user_sessions(TenantId(tenant_id), user_id, crate::session_manager::SessionState::Revoked).await?;

        self.audit
            .log_sensitive_event(
                AuditEvent::builder(EventType::AccessRevoked, "access revoked")
                    .outcome(EventOutcome::Success)
                    .actor_id(revoked_by.to_string())
                    .tenant_id(tenant_id.to_string())
                    .resource("user", user_id.to_string())
                    .build(),
            )
            .await?;

        Ok(())
    }

    /// `submit_access_request` / `decide_access_request` (§4.1,
    /// invariant I6: a decided request is terminal). Approval emits the
    /// same durable `AccessGranted` event as a direct grant.
    pub async fn submit_access_request(&self, user_id: Uuid, tenant_id: Uuid, requested_roles: Vec<String>) -> Result<Uuid> {
        self.store.submit_access_request(user_id, tenant_id, &requested_roles).await
    }

    pub async fn decide_access_request(&self, request_id: Uuid, approve: bool, decided_by: Uuid) -> Result<()> {
        self.store.decide_access_request(request_id, approve, decided_by).await?;

        if approve {
            self.audit
                .log_sensitive_event(
                    AuditEvent::builder(EventType::AccessGranted, "access request approved")
                        .outcome(EventOutcome::Success)
                        .actor_id(decided_by.to_string())
                        .resource("access_request", request_id.to_string())
                        .build(),
                )
                .await?;
        }

        Ok(())
    }

    /// Resolves a user's effective permissions at a tenant, combining the
    /// catalog's `effective_permissions` with the tenant-scoped role
    /// assignment (§4.2 `effective(user, tenant)`).
    pub fn effective_permissions(&self, role_names: &[String]) -> Vec<qgw_core::Permission> {
        self.catalog.read().expect("role catalog lock poisoned").effective_permissions(role_names)
    }

    pub fn is_global_admin_role(&self, role_names: &[String]) -> bool {
        self.catalog.read().expect("role catalog lock poisoned").is_global_admin(role_names)
    }

    /// `check_permission` (§4.2), exposed for callers (e.g. admin
    /// handlers) that need it outside the routing middleware's own pass.
    pub fn check_permission(
        &self,
        role_names: &[String],
        resource: Resource,
        required_level: Level,
        conditions: &serde_json::Value,
    ) -> bool {
        self.catalog
            .read()
            .expect("role catalog lock poisoned")
            .effective_permissions(role_names)
            .iter()
            .any(|p| p.covers(resource, required_level, conditions))
    }

    async fn issue_session(
        &self,
        user_id: Uuid,
        tenant_id: Uuid,
        roles: &[String],
        client_ip: Option<String>,
        user_agent: Option<String>,
    ) -> Result<IssuedToken> {
        let fingerprint = random_fingerprint();
        let session = self
            .sessions
            .create_session(TenantId(tenant_id), user_id, client_ip.clone(), user_agent.clone(), Some(fingerprint.clone()))
            .await?;

        let expires_at = Utc::now() + chrono::Duration::seconds(self.access_ttl_seconds);
        self.store
            .open_session(
                user_id,
                tenant_id,
                Uuid::parse_str(&session.session_id).map_err(|e| Error::new(ErrorCode::Internal, e.to_string()))?,
                &fingerprint,
                expires_at,
                client_ip.as_deref(),
                user_agent.as_deref(),
            )
            .await?;

        let claims = TokenClaims {
            version: TokenCodec::current_version(),
            session_id: qgw_core::SessionId(Uuid::parse_str(&session.session_id).map_err(|e| Error::new(ErrorCode::Internal, e.to_string()))?),
            user_id: UserId(user_id),
            tenant_id: TenantId(tenant_id),
            roles: roles.to_vec(),
            issued_at: Utc::now().timestamp(),
            expires_at: expires_at.timestamp(),
            fingerprint,
        };

        let token = self.token_codec.encode(&claims)?;
        Ok(IssuedToken { token, claims })
    }
}

fn random_fingerprint() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex_encode(&bytes)
}

fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(out, "{b:02x}");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_unpredictable_length() {
        let a = random_fingerprint();
        let b = random_fingerprint();
        assert_eq!(a.len(), 64);
        assert_ne!(a, b);
    }
}
