//! Login and tenant-switch handlers (§6.1). Grounded on the teacher's
//! `handlers/auth.rs` routing shape (`*_routes() -> Router<AppState>`,
//! a thin handler that maps a DTO onto the service layer), trimmed to
//! this gateway's actual auth model: one access token per session, no
//! 2FA, no refresh-token rotation.

use axum::{
    extract::State,
    http::HeaderMap,
    routing::post,
    Json, Router,
};
use qgw_pool::rate_limiter::RateLimitScope;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{error::ApiError, state::AppState};

/// `/auth/login` is public: the caller has no token yet.
pub fn public_routes() -> Router<AppState> {
    Router::new().route("/login", post(login))
}

/// `/auth/switch-tenant` requires an existing bearer token, so it runs
/// behind the routing middleware like every other protected route.
pub fn protected_routes() -> Router<AppState> {
    Router::new().route("/auth/switch-tenant", post(switch_tenant))
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub identifier: String,
    pub password: String,
    pub tenant_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct SwitchTenantRequest {
    pub tenant_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub token: String,
    pub user_id: Uuid,
    pub tenant_id: Uuid,
    pub roles: Vec<String>,
    pub expires_at: i64,
}

/// `POST /auth/login`. Public: rate-limited by client IP rather than by
/// the (not yet known) user identity (§4.8).
async fn login(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<LoginRequest>,
) -> Result<Json<TokenResponse>, ApiError> {
    let client_ip = client_ip(&headers);
    state
        .rate_limiter
        .check(RateLimitScope::Ip, client_ip.as_deref().unwrap_or("unknown"))
        .await?;

    let user_agent = user_agent(&headers);
    let issued = state
        .rbac
        .login(&body.identifier, &body.password, body.tenant_id, client_ip, user_agent)
        .await?;

    Ok(Json(TokenResponse {
        token: issued.token,
        user_id: issued.claims.user_id.0,
        tenant_id: issued.claims.tenant_id.0,
        roles: issued.claims.roles,
        expires_at: issued.claims.expires_at,
    }))
}

/// `POST /auth/switch-tenant`. Requires an existing bearer token; the
/// routing middleware has already authenticated the caller at their
/// current tenant before this handler runs.
async fn switch_tenant(
    State(state): State<AppState>,
    context: qgw_core::TokenBearerContext,
    headers: HeaderMap,
    Json(body): Json<SwitchTenantRequest>,
) -> Result<Json<TokenResponse>, ApiError> {
    let client_ip = client_ip(&headers);
    let user_agent = user_agent(&headers);

    let issued = state
        .rbac
        .switch_tenant(&context, body.tenant_id, client_ip, user_agent)
        .await?;

    Ok(Json(TokenResponse {
        token: issued.token,
        user_id: issued.claims.user_id.0,
        tenant_id: issued.claims.tenant_id.0,
        roles: issued.claims.roles,
        expires_at: issued.claims.expires_at,
    }))
}

fn client_ip(headers: &HeaderMap) -> Option<String> {
    for header_name in ["x-forwarded-for", "x-real-ip"] {
        if let Some(value) = headers.get(header_name).and_then(|v| v.to_str().ok()) {
            let ip = value.split(',').next().unwrap_or(value).trim();
            if !ip.is_empty() {
                return Some(ip.to_string());
            }
        }
    }
    None
}

fn user_agent(headers: &HeaderMap) -> Option<String> {
    headers.get("user-agent").and_then(|v| v.to_str().ok()).map(str::to_string)
}
