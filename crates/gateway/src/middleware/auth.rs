//! The routing middleware (§4.5): the only place tenant identity enters
//! the pipeline. Grounded on the teacher's
//! `api_middleware/tenant_context.rs` for the header-extraction shape,
//! but the policy is deliberately stricter than the teacher's permissive
//! fallback chain (subdomain, then JWT, then a logged-and-continued
//! absence) — per §6.1, a non-public request without a matching
//! `X-Tenant` header is rejected outright rather than allowed through
//! with a warning.

use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use qgw_core::{Error, ErrorCode, TenantId, TenantStatus, TokenBearerContext};
use qgw_pool::rate_limiter::RateLimitScope;
use uuid::Uuid;

use crate::{error::ApiError, state::AppState};

const TENANT_HEADER: &str = "x-tenant";

/// Steps 1-8 of §4.5, run for every non-public route. Handlers that
/// declare a required permission run `TokenBearerContext::allows`
/// themselves (step 7) since axum has no per-route metadata hook here;
/// this middleware performs every step that is common to all of them.
pub async fn routing_middleware(State(state): State<AppState>, mut request: Request, next: Next) -> Result<Response, ApiError> {
    let context = authenticate(&state, request.headers()).await.map_err(ApiError::from)?;

    // §4.8: every endpoint behind this middleware is additionally
    // rate-limited by the now-known authenticated user id, on top of the
    // IP-based limiting `/auth/login` applies before identity is known.
    state
        .rate_limiter
        .check(RateLimitScope::User, &context.user_id.0.to_string())
        .await
        .map_err(ApiError::from)?;

    request.extensions_mut().insert(context.clone());

    // Step 8: batched request-entered audit event. Not in the durable
    // set (§4.12), so `log_event` rather than `log_sensitive_event`.
    state
        .audit
        .log_event(
            qgw_core::audit::AuditEvent::builder(
                qgw_core::audit::EventType::Custom("request_entered".to_string()),
                "request entered gateway",
            )
            .actor_id(context.user_id.0.to_string())
            .tenant_id(context.tenant_id.0.to_string())
            .request_id(context.request_id.clone())
            .build(),
        )
        .await
        .map_err(ApiError::from)?;

    Ok(next.run(request).await)
}

async fn authenticate(state: &AppState, headers: &HeaderMap) -> qgw_core::error::Result<TokenBearerContext> {
    // Step 1: extract bearer token.
    let token = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or_else(|| Error::new(ErrorCode::Unauthenticated, "missing bearer token"))?;

    // Step 2: decode and verify the token's signature/expiry/version.
    let claims = state.token_codec.decode(token)?;

    // Step 3: load the session by id; fail if missing, expired, or not Active.
    let session = state
        .sessions
        .get_session(claims.tenant_id, &claims.session_id.0.to_string())
        .await?
        .ok_or_else(|| Error::new(ErrorCode::Unauthenticated, "session is missing, expired, or inactive"))?;

    // Step 4: fingerprint must match the session's.
    if session.device_fingerprint.as_deref() != Some(claims.fingerprint.as_str()) {
        return Err(Error::new(ErrorCode::Unauthenticated, "token fingerprint does not match session"));
    }

    // Step 5: resolve the tenant from the token; refuse if not active.
    let descriptor = state
        .registry
        .descriptor(claims.tenant_id)
        .map_err(|_| Error::new(ErrorCode::Unauthenticated, "tenant is not registered"))?;
    if descriptor.status != TenantStatus::Active {
        return Err(Error::new(ErrorCode::Unauthenticated, "tenant is not active"));
    }

    // §6.1: the X-Tenant header must match the token's tenant claim.
    if let Err(err) = require_matching_tenant_header(headers, claims.tenant_id) {
        let _ = state
            .audit
            .log_permission_denied(&claims.user_id.0.to_string(), &claims.tenant_id.0.to_string(), "tenant", "matching_x_tenant_header")
            .await;
        return Err(err);
    }

    // Step 6: load effective permissions and assemble the context.
    let is_global_admin = state.rbac.is_global_admin_role(&claims.roles);
    let allowed_operations = state.rbac.effective_permissions(&claims.roles);
    let pool_handle = state.registry.slot_for(claims.tenant_id)?;

    Ok(TokenBearerContext {
        user_id: claims.user_id,
        tenant_id: claims.tenant_id,
        roles: claims.roles,
        allowed_operations,
        session_id: claims.session_id,
        is_global_admin,
        pool_handle,
        request_id: Uuid::new_v4().to_string(),
    })
}

fn require_matching_tenant_header(headers: &HeaderMap, token_tenant_id: TenantId) -> qgw_core::error::Result<()> {
    let header_value = headers
        .get(TENANT_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| Error::new(ErrorCode::Forbidden, "missing X-Tenant header"))?;

    let header_tenant_id =
        Uuid::parse_str(header_value).map_err(|_| Error::new(ErrorCode::Forbidden, "X-Tenant header is not a valid tenant id"))?;

    if header_tenant_id != token_tenant_id.0 {
        return Err(Error::new(ErrorCode::Forbidden, "X-Tenant header does not match the token's tenant claim"));
    }

    Ok(())
}
