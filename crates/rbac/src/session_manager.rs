pub mod cleanup;

pub use cleanup::{SessionCleanupService, SessionStatsSnapshot, AggregatedSessionStats, CleanupServiceHealth};

use chrono::{DateTime, Duration, Utc};
use qgw_core::{error::Result, Error, ErrorCode, TenantId};
use redis::{aio::ConnectionManager, AsyncCommands};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Session data stored in Redis, keyed per tenant (§4.3). This is the
/// runtime Redis mirror of a central-store [`crate::models::SessionRow`];
/// the store remains the source of truth, this is what the routing
/// middleware actually reads on the hot path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionData {
    pub session_id: String,
    pub user_id: Uuid,
    pub tenant_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub client_ip: Option<String>,
    pub user_agent: Option<String>,
    pub metadata: HashMap<String, serde_json::Value>,
    pub state: SessionState,
    pub token_version: u32,
    pub device_fingerprint: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum SessionState {
    Active,
    LoggedOut,
    Expired,
    Revoked,
    Suspended,
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub inactivity_timeout: Duration,
    pub absolute_timeout: Duration,
    pub cleanup_interval: Duration,
    pub max_sessions_per_user: u32,
    pub enable_sliding_window: bool,
    pub require_device_consistency: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            inactivity_timeout: Duration::minutes(30),
            absolute_timeout: Duration::hours(12),
            cleanup_interval: Duration::minutes(5),
            max_sessions_per_user: 10,
            enable_sliding_window: true,
            require_device_consistency: false,
        }
    }
}

/// Session manager for handling user sessions with Redis storage
/// (§4.3). The central metadata store holds the durable session row;
/// this manager is the fast Redis-backed mirror the middleware consults
/// on every request.
pub struct SessionManager {
    redis: ConnectionManager,
    config: SessionConfig,
}

impl SessionManager {
    pub fn new(redis: ConnectionManager, config: SessionConfig) -> Self {
        Self { redis, config }
    }

    pub async fn create_session(
        &self,
        tenant_id: TenantId,
        user_id: Uuid,
        client_ip: Option<String>,
        user_agent: Option<String>,
        device_fingerprint: Option<String>,
    ) -> Result<SessionData> {
        let now = Utc::now();
        let session_id = Uuid::new_v4().to_string();

        self.enforce_session_limit(tenant_id, user_id).await?;

        let session = SessionData {
            session_id: session_id.clone(),
            user_id,
            tenant_id: tenant_id.0,
            created_at: now,
            last_activity: now,
            expires_at: now + self.config.absolute_timeout,
            client_ip: client_ip.clone(),
            user_agent: user_agent.clone(),
            metadata: HashMap::new(),
            state: SessionState::Active,
            token_version: 1,
            device_fingerprint: device_fingerprint.clone(),
        };

        self.store_session(&session).await?;
        self.add_to_user_sessions(tenant_id, user_id, &session_id).await?;

        info!(
            tenant_id = %tenant_id,
            user_id = %user_id,
            session_id = %session_id,
            client_ip = ?client_ip,
            "session created"
        );

        Ok(session)
    }

    pub async fn get_session(&self, tenant_id: TenantId, session_id: &str) -> Result<Option<SessionData>> {
        let session_key = Self::session_key(tenant_id, session_id);
        let mut conn = self.redis.clone();

        let session_data: Option<String> = conn.get(&session_key).await?;

        match session_data {
            Some(data) => {
                let mut session: SessionData =
                    serde_json::from_str(&data).map_err(|e| Error::new(ErrorCode::Internal, e.to_string()))?;

                if !self.is_session_valid(&session) {
                    self.invalidate_session(tenant_id, session_id, SessionState::Expired).await?;
                    return Ok(None);
                }

                if self.config.enable_sliding_window {
                    session.last_activity = Utc::now();
                    self.store_session(&session).await?;
                }

                Ok(Some(session))
            }
            None => Ok(None),
        }
    }

    pub async fn update_session_metadata(
        &self,
        tenant_id: TenantId,
        session_id: &str,
        key: String,
        value: serde_json::Value,
    ) -> Result<()> {
        let mut session = match self.get_session(tenant_id, session_id).await? {
            Some(s) => s,
            None => return Err(Error::new(ErrorCode::NotFound, "session not found")),
        };

        session.metadata.insert(key, value);
        session.last_activity = Utc::now();

        self.store_session(&session).await?;
        Ok(())
    }

    pub async fn invalidate_session(&self, tenant_id: TenantId, session_id: &str, reason: SessionState) -> Result<()> {
        let session_key = Self::session_key(tenant_id, session_id);
        let mut conn = self.redis.clone();

        let session_data: Option<String> = conn.get(&session_key).await?;

        if let Some(data) = session_data {
            if let Ok(session) = serde_json::from_str::<SessionData>(&data) {
                self.remove_from_user_sessions(tenant_id, session.user_id, session_id).await?;

                info!(
                    tenant_id = %tenant_id,
                    user_id = %session.user_id,
                    session_id = %session_id,
                    reason = ?reason,
                    "session invalidated"
                );
            }
        }

        let _: u32 = conn.del(&session_key).await?;
        Ok(())
    }

    pub async fn invalidate_user_sessions(&self, tenant_id: TenantId, user_id: Uuid, reason: SessionState) -> Result<u32> {
        let user_sessions_key = Self::user_sessions_key(tenant_id, user_id);
        let mut conn = self.redis.clone();

        let session_ids: Vec<String> = conn.smembers(&user_sessions_key).await?;
        let mut invalidated_count = 0;

        for session_id in session_ids {
            if self.invalidate_session(tenant_id, &session_id, reason.clone()).await.is_ok() {
                invalidated_count += 1;
            }
        }

        let _: u32 = conn.del(&user_sessions_key).await?;

        info!(
            tenant_id = %tenant_id,
            user_id = %user_id,
            invalidated_count = invalidated_count,
            reason = ?reason,
            "all user sessions invalidated"
        );

        Ok(invalidated_count)
    }

    pub async fn get_user_sessions(&self, tenant_id: TenantId, user_id: Uuid) -> Result<Vec<SessionData>> {
        let user_sessions_key = Self::user_sessions_key(tenant_id, user_id);
        let mut conn = self.redis.clone();

        let session_ids: Vec<String> = conn.smembers(&user_sessions_key).await?;
        let mut sessions = Vec::new();

        for session_id in session_ids {
            if let Some(session) = self.get_session(tenant_id, &session_id).await? {
                if session.state == SessionState::Active {
                    sessions.push(session);
                }
            }
        }

        Ok(sessions)
    }

    pub async fn cleanup_expired_sessions(&self, tenant_id: TenantId) -> Result<u32> {
        let pattern = format!("session:{}:*", tenant_id);
        let mut conn = self.redis.clone();

        let session_keys = self.scan_keys(&mut conn, &pattern).await?;
        let mut cleaned_up = 0;

        for session_key in session_keys {
            if let Ok(Some(data)) = conn.get::<&str, Option<String>>(&session_key).await {
                if let Ok(session) = serde_json::from_str::<SessionData>(&data) {
                    if !self.is_session_valid(&session) {
                        let _: u32 = conn.del(&session_key).await?;

                        let user_sessions_key = Self::user_sessions_key(tenant_id, session.user_id);
                        let _: u32 = conn.srem(&user_sessions_key, &session.session_id).await?;

                        cleaned_up += 1;
                    }
                }
            }
        }

        if cleaned_up > 0 {
            info!(tenant_id = %tenant_id, cleaned_up_count = cleaned_up, "cleaned up expired sessions");
        }

        Ok(cleaned_up)
    }

    pub async fn get_session_stats(&self, tenant_id: TenantId) -> Result<SessionStats> {
        let pattern = format!("session:{}:*", tenant_id);
        let mut conn = self.redis.clone();

        let session_keys = self.scan_keys(&mut conn, &pattern).await?;
        let mut stats = SessionStats::default();

        for session_key in session_keys {
            if let Ok(Some(data)) = conn.get::<&str, Option<String>>(&session_key).await {
                if let Ok(session) = serde_json::from_str::<SessionData>(&data) {
                    stats.total_sessions += 1;

                    match session.state {
                        SessionState::Active => {
                            if self.is_session_valid(&session) {
                                stats.active_sessions += 1;
                            } else {
                                stats.expired_sessions += 1;
                            }
                        }
                        SessionState::Expired => stats.expired_sessions += 1,
                        SessionState::LoggedOut => stats.logged_out_sessions += 1,
                        SessionState::Revoked => stats.revoked_sessions += 1,
                        SessionState::Suspended => stats.suspended_sessions += 1,
                    }
                }
            }
        }

        Ok(stats)
    }

    // Private helpers

    async fn scan_keys(&self, conn: &mut redis::aio::ConnectionManager, pattern: &str) -> Result<Vec<String>> {
        use redis::Cmd;

        let mut cursor: u64 = 0;
        let mut keys = Vec::new();

        loop {
            let mut cmd = Cmd::new();
            cmd.arg("SCAN").arg(cursor).arg("MATCH").arg(pattern).arg("COUNT").arg(100);

            let result: Vec<redis::Value> = cmd
                .query_async(conn)
                .await
                .map_err(|e| Error::new(ErrorCode::Internal, format!("redis SCAN failed: {e}")))?;

            if let [redis::Value::BulkString(cursor_bytes), redis::Value::Array(key_values)] = &result[..] {
                cursor = String::from_utf8_lossy(cursor_bytes).parse().unwrap_or(0);

                for key_value in key_values {
                    if let redis::Value::BulkString(key_bytes) = key_value {
                        keys.push(String::from_utf8_lossy(key_bytes).to_string());
                    }
                }
            }

            if cursor == 0 {
                break;
            }
        }

        Ok(keys)
    }

    fn session_key(tenant_id: TenantId, session_id: &str) -> String {
        format!("session:{tenant_id}:{session_id}")
    }

    fn user_sessions_key(tenant_id: TenantId, user_id: Uuid) -> String {
        format!("user_sessions:{tenant_id}:{user_id}")
    }

    async fn store_session(&self, session: &SessionData) -> Result<()> {
        let session_key = Self::session_key(TenantId(session.tenant_id), &session.session_id);
        let mut conn = self.redis.clone();

        let serialized = serde_json::to_string(session).map_err(|e| Error::new(ErrorCode::Internal, e.to_string()))?;

        let ttl = session.expires_at.signed_duration_since(Utc::now()).num_seconds().max(1) as u64;

        conn.set_ex::<_, _, ()>(&session_key, serialized, ttl).await?;

        debug!("stored session: {} with TTL: {}s", session.session_id, ttl);
        Ok(())
    }

    async fn add_to_user_sessions(&self, tenant_id: TenantId, user_id: Uuid, session_id: &str) -> Result<()> {
        let user_sessions_key = Self::user_sessions_key(tenant_id, user_id);
        let mut conn = self.redis.clone();

        let _: u32 = conn.sadd(&user_sessions_key, session_id).await?;

        let ttl = self.config.absolute_timeout.num_seconds().max(1);
        let _: u32 = conn.expire(&user_sessions_key, ttl).await?;

        Ok(())
    }

    async fn remove_from_user_sessions(&self, tenant_id: TenantId, user_id: Uuid, session_id: &str) -> Result<()> {
        let user_sessions_key = Self::user_sessions_key(tenant_id, user_id);
        let mut conn = self.redis.clone();

        let _: u32 = conn.srem(&user_sessions_key, session_id).await?;
        Ok(())
    }

    async fn enforce_session_limit(&self, tenant_id: TenantId, user_id: Uuid) -> Result<()> {
        let user_sessions = self.get_user_sessions(tenant_id, user_id).await?;

        if user_sessions.len() >= self.config.max_sessions_per_user as usize {
            let mut sessions_to_remove = user_sessions;
            sessions_to_remove.sort_by(|a, b| a.created_at.cmp(&b.created_at));

            let excess_count = sessions_to_remove.len() - self.config.max_sessions_per_user as usize + 1;

            for session in sessions_to_remove.iter().take(excess_count) {
                warn!(
                    tenant_id = %tenant_id,
                    user_id = %user_id,
                    session_id = %session.session_id,
                    "removing session due to session limit exceeded"
                );

                self.invalidate_session(tenant_id, &session.session_id, SessionState::Revoked).await?;
            }
        }

        Ok(())
    }

    fn is_session_valid(&self, session: &SessionData) -> bool {
        let now = Utc::now();

        if session.state != SessionState::Active {
            return false;
        }

        if now > session.expires_at {
            return false;
        }

        if self.config.enable_sliding_window {
            let inactivity_limit = session.last_activity + self.config.inactivity_timeout;
            if now > inactivity_limit {
                return false;
            }
        }

        true
    }
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct SessionStats {
    pub total_sessions: u32,
    pub active_sessions: u32,
    pub expired_sessions: u32,
    pub logged_out_sessions: u32,
    pub revoked_sessions: u32,
    pub suspended_sessions: u32,
}
