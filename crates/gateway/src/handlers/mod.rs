pub mod admin;
pub mod auth;
pub mod health;
pub mod query;
pub mod schema;

use axum::Router;

use crate::state::AppState;

/// Assembles every handler module's routes into the full §6.1 surface.
/// `main.rs` mounts `public_routes()` without the routing middleware
/// and `protected_routes()` behind it.
pub fn public_routes() -> Router<AppState> {
    Router::new().nest("/auth", auth::public_routes())
}

pub fn protected_routes() -> Router<AppState> {
    Router::new()
        .merge(auth::protected_routes())
        .merge(admin::routes())
        .merge(query::routes())
        .merge(schema::routes())
        .merge(health::routes())
}
