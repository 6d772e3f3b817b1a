//! User and access management handlers (§6.1's "admin-gated" block).
//! Each handler runs the routing middleware's permission check (§4.5
//! step 7) itself, since this block is gated as a whole rather than
//! per-resource: every route here requires `Resource::Users` at
//! `Level::Admin`, via the same `TokenBearerContext::allows` the
//! dispatcher uses for query classification.

use axum::{
    extract::{Path, State},
    routing::post,
    Json, Router,
};
use qgw_core::{Error, ErrorCode, Level, Resource, TokenBearerContext};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{error::ApiError, state::AppState};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/users", post(create_user))
        .route("/access/grant", post(grant_access))
        .route("/access/revoke", post(revoke_access))
        .route("/access/request", post(submit_access_request))
        .route("/access/requests/:id/approve", post(approve_access_request))
        .route("/access/requests/:id/reject", post(reject_access_request))
}

fn require_admin(context: &TokenBearerContext) -> Result<(), ApiError> {
    if context.allows(Resource::Users, Level::Admin, &serde_json::Value::Null) {
        Ok(())
    } else {
        Err(ApiError::from(Error::new(ErrorCode::Forbidden, "caller lacks admin access to user management")))
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub username: String,
    pub email: String,
    pub password: String,
    pub full_name: String,
    #[serde(default)]
    pub is_global_admin: bool,
}

#[derive(Debug, Serialize)]
pub struct CreateUserResponse {
    pub user_id: Uuid,
}

async fn create_user(
    State(state): State<AppState>,
    context: TokenBearerContext,
    Json(body): Json<CreateUserRequest>,
) -> Result<Json<CreateUserResponse>, ApiError> {
    require_admin(&context)?;

    let password_hash = state.password_hasher.hash_password(&body.password)?;
    let user_id = state
        .metadata_store
        .create_user(&body.username, &body.email, &password_hash, &body.full_name, body.is_global_admin)
        .await?;

    Ok(Json(CreateUserResponse { user_id }))
}

#[derive(Debug, Deserialize)]
pub struct GrantAccessRequest {
    pub user_id: Uuid,
    pub tenant_id: Uuid,
    pub roles: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct GrantAccessResponse {
    pub mapping_id: Uuid,
}

async fn grant_access(
    State(state): State<AppState>,
    context: TokenBearerContext,
    Json(body): Json<GrantAccessRequest>,
) -> Result<Json<GrantAccessResponse>, ApiError> {
    require_admin(&context)?;

    let mapping_id = state
        .rbac
        .grant_access(body.user_id, body.tenant_id, &body.roles, context.user_id.0)
        .await?;

    Ok(Json(GrantAccessResponse { mapping_id }))
}

#[derive(Debug, Deserialize)]
pub struct RevokeAccessRequest {
    pub user_id: Uuid,
    pub tenant_id: Uuid,
}

async fn revoke_access(
    State(state): State<AppState>,
    context: TokenBearerContext,
    Json(body): Json<RevokeAccessRequest>,
) -> Result<(), ApiError> {
    require_admin(&context)?;
    state.rbac.revoke_access(body.user_id, body.tenant_id, context.user_id.0).await?;
    Ok(())
}

#[derive(Debug, Deserialize)]
pub struct AccessRequestBody {
    pub user_id: Uuid,
    pub tenant_id: Uuid,
    pub requested_roles: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct AccessRequestResponse {
    pub request_id: Uuid,
}

async fn submit_access_request(
    State(state): State<AppState>,
    context: TokenBearerContext,
    Json(body): Json<AccessRequestBody>,
) -> Result<Json<AccessRequestResponse>, ApiError> {
    require_admin(&context)?;

    let request_id = state
        .rbac
        .submit_access_request(body.user_id, body.tenant_id, body.requested_roles)
        .await?;

    Ok(Json(AccessRequestResponse { request_id }))
}

async fn approve_access_request(
    State(state): State<AppState>,
    context: TokenBearerContext,
    Path(id): Path<Uuid>,
) -> Result<(), ApiError> {
    require_admin(&context)?;
    state.rbac.decide_access_request(id, true, context.user_id.0).await?;
    Ok(())
}

async fn reject_access_request(
    State(state): State<AppState>,
    context: TokenBearerContext,
    Path(id): Path<Uuid>,
) -> Result<(), ApiError> {
    require_admin(&context)?;
    state.rbac.decide_access_request(id, false, context.user_id.0).await?;
    Ok(())
}
