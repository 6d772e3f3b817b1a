use serde::{Deserialize, Serialize};
use std::fmt;

/// Error kinds for the query gateway core. Names and numeric bands are
/// normative: callers branch on the variant, not on the message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Authentication / session (1000-1999)
    Unauthenticated = 1000,
    BadToken = 1001,
    ExpiredToken = 1002,

    // Authorization (2000-2999)
    Forbidden = 2000,
    NoAccess = 2001,
    AlreadyGranted = 2002,

    // Identity / credentials (3000-3999)
    InvalidCredential = 3000,
    DuplicateIdentifier = 3001,

    // Tenant routing (4000-4999)
    TenantInactive = 4000,
    TenantNotFound = 4001,

    // Pool / circuit (5000-5999)
    PoolTimeout = 5000,
    CircuitOpen = 5001,

    // Query dispatch (6000-6999)
    Untranslatable = 6000,
    QueryRejected = 6001,
    QueryExecutionFailed = 6002,

    // Deadline / cancellation (7000-7999)
    Deadline = 7000,
    Cancelled = 7001,

    // Rate limiting (8000-8999)
    RateLimited = 8000,

    // Generic (9000-9999)
    Conflict = 9000,
    NotFound = 9001,
    Internal = 9002,
}

impl ErrorCode {
    /// HTTP status this kind maps to on the gateway surface.
    pub fn http_status(&self) -> u16 {
        match self {
            ErrorCode::Unauthenticated
            | ErrorCode::BadToken
            | ErrorCode::ExpiredToken
            | ErrorCode::InvalidCredential
            | ErrorCode::NoAccess => 401,

            ErrorCode::Forbidden => 403,

            ErrorCode::AlreadyGranted | ErrorCode::DuplicateIdentifier | ErrorCode::Conflict => 409,

            ErrorCode::TenantNotFound | ErrorCode::NotFound => 404,
            ErrorCode::TenantInactive => 503,

            ErrorCode::PoolTimeout | ErrorCode::Deadline => 504,
            ErrorCode::CircuitOpen => 503,

            ErrorCode::Untranslatable => 422,
            ErrorCode::QueryRejected => 400,
            ErrorCode::QueryExecutionFailed => 502,

            ErrorCode::Cancelled => 499,
            ErrorCode::RateLimited => 429,

            ErrorCode::Internal => 500,
        }
    }

    /// Coarse category, used for metrics and log routing.
    pub fn category(&self) -> &'static str {
        match self {
            ErrorCode::Unauthenticated | ErrorCode::BadToken | ErrorCode::ExpiredToken => "auth",
            ErrorCode::Forbidden | ErrorCode::NoAccess | ErrorCode::AlreadyGranted => "access",
            ErrorCode::InvalidCredential | ErrorCode::DuplicateIdentifier => "identity",
            ErrorCode::TenantInactive | ErrorCode::TenantNotFound => "tenant",
            ErrorCode::PoolTimeout | ErrorCode::CircuitOpen => "pool",
            ErrorCode::Untranslatable | ErrorCode::QueryRejected | ErrorCode::QueryExecutionFailed => "query",
            ErrorCode::Deadline | ErrorCode::Cancelled => "timing",
            ErrorCode::RateLimited => "rate_limit",
            ErrorCode::Conflict | ErrorCode::NotFound => "resource",
            ErrorCode::Internal => "system",
        }
    }

    /// Whether a caller may retry the same request unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorCode::PoolTimeout
                | ErrorCode::QueryExecutionFailed
                | ErrorCode::CircuitOpen
                | ErrorCode::Deadline
        )
    }

    /// Whether this kind is charged against a tenant's circuit breaker.
    /// Per the error classifier, only pool/dispatch failures count;
    /// cancellation never does.
    pub fn counts_against_breaker(&self) -> bool {
        matches!(self, ErrorCode::PoolTimeout | ErrorCode::QueryExecutionFailed)
    }

    pub fn should_log_as_error(&self) -> bool {
        matches!(
            self,
            ErrorCode::Internal | ErrorCode::QueryExecutionFailed | ErrorCode::PoolTimeout
        )
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}
