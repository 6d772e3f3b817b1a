//! Wraps `qgw_core::Error` for axum's `IntoResponse` (grounded on the
//! teacher's `crates/api/src/error.rs`). The teacher's version calls a
//! `to_api_response_with_environment` method and checks for a set of
//! authentication/authorization `ErrorCode` variants that don't exist on
//! this core's own error taxonomy; this is the adapted version against
//! the real 21-variant `ErrorCode` and the real single-argument
//! `Error::to_api_response`.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use qgw_core::{Error, ErrorCode};
use tracing::{error, warn};

pub struct ApiError(pub Error);

impl ApiError {
    /// Kinds worth a second look even when nothing crashed: failed
    /// logins, denied authorization, and rejected queries are ordinary
    /// operation, but a spike in them is itself a signal.
    fn is_security_relevant(&self) -> bool {
        matches!(
            self.0.code,
            ErrorCode::Unauthenticated
                | ErrorCode::BadToken
                | ErrorCode::ExpiredToken
                | ErrorCode::Forbidden
                | ErrorCode::NoAccess
                | ErrorCode::InvalidCredential
                | ErrorCode::RateLimited
                | ErrorCode::QueryRejected
        )
    }

    fn log(&self) {
        let status = self.0.http_status();
        if status >= 500 {
            error!(
                error_id = %self.0.context.error_id,
                code = %self.0.code,
                "{}",
                self.0.message
            );
        } else if self.is_security_relevant() {
            warn!(
                error_id = %self.0.context.error_id,
                code = %self.0.code,
                request_id = ?self.0.context.request_id,
                tenant_id = ?self.0.context.tenant_id,
                "{}",
                self.0.message
            );
        }
    }
}

impl From<Error> for ApiError {
    fn from(error: Error) -> Self {
        Self(error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        self.log();
        let status = StatusCode::from_u16(self.0.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = self.0.to_api_response();
        (status, Json(body)).into_response()
    }
}
