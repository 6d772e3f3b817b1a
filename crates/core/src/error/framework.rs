use super::{ErrorCode, ErrorContext};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error as ThisError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Auth,
    Access,
    Identity,
    Tenant,
    Pool,
    Query,
    Timing,
    RateLimit,
    Resource,
    System,
}

/// The single error type threaded through the gateway. Carries the
/// normative [`ErrorCode`], a message, optional cause chain, and enough
/// context to correlate a response with the audit/error log.
#[derive(Debug, ThisError, Clone)]
pub struct Error {
    pub code: ErrorCode,
    pub message: String,
    pub details: Option<String>,
    pub context: ErrorContext,
    pub severity: ErrorSeverity,
    pub cause: Option<Box<Error>>,
    /// Seconds the caller should wait before retrying, for the handful of
    /// kinds that carry one (`RateLimited`, `CircuitOpen`).
    pub retry_after: Option<u64>,
}

impl Error {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
            context: ErrorContext::new(),
            severity: Self::default_severity_for_code(code),
            cause: None,
            retry_after: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_context(mut self, context: ErrorContext) -> Self {
        self.context = context;
        self
    }

    pub fn with_severity(mut self, severity: ErrorSeverity) -> Self {
        self.severity = severity;
        self
    }

    pub fn with_cause(mut self, cause: Error) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    pub fn with_retry_after(mut self, seconds: u64) -> Self {
        self.retry_after = Some(seconds);
        self
    }

    pub fn add_trace(mut self, trace: impl Into<String>) -> Self {
        self.context = self.context.add_trace(trace.into());
        self
    }

    pub fn add_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.context.add_metadata(key.into(), value);
        self
    }

    pub fn http_status(&self) -> u16 {
        self.code.http_status()
    }

    pub fn category(&self) -> ErrorCategory {
        match self.code.category() {
            "auth" => ErrorCategory::Auth,
            "access" => ErrorCategory::Access,
            "identity" => ErrorCategory::Identity,
            "tenant" => ErrorCategory::Tenant,
            "pool" => ErrorCategory::Pool,
            "query" => ErrorCategory::Query,
            "timing" => ErrorCategory::Timing,
            "rate_limit" => ErrorCategory::RateLimit,
            "resource" => ErrorCategory::Resource,
            _ => ErrorCategory::System,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.code.is_retryable()
    }

    pub fn counts_against_breaker(&self) -> bool {
        self.code.counts_against_breaker()
    }

    pub fn should_log_as_error(&self) -> bool {
        self.code.should_log_as_error() || matches!(self.severity, ErrorSeverity::High | ErrorSeverity::Critical)
    }

    /// Sanitized response body. Per the error-handling design, `Internal`
    /// is the only kind that omits structured detail; everything else
    /// returns its stable kind, message, and correlation id unconditionally.
    pub fn to_api_response(&self) -> serde_json::Value {
        let (message, details) = if matches!(self.code, ErrorCode::Internal) {
            ("An internal error occurred".to_string(), None)
        } else {
            (self.message.clone(), self.details.clone())
        };

        serde_json::json!({
            "error": {
                "kind": self.code,
                "message": message,
                "details": details,
                "correlation_id": self.context.error_id,
                "retry_after": self.retry_after,
            }
        })
    }

    /// Full detail for the audit/error log — never sent to a caller.
    pub fn to_debug_json(&self) -> serde_json::Value {
        serde_json::json!({
            "error": {
                "code": self.code,
                "message": self.message,
                "details": self.details,
                "context": self.context,
                "severity": self.severity,
                "retry_after": self.retry_after,
                "cause": self.cause.as_ref().map(|c| c.to_debug_json())
            }
        })
    }

    fn default_severity_for_code(code: ErrorCode) -> ErrorSeverity {
        match code {
            ErrorCode::NotFound | ErrorCode::TenantNotFound | ErrorCode::Cancelled => ErrorSeverity::Low,

            ErrorCode::Unauthenticated
            | ErrorCode::BadToken
            | ErrorCode::ExpiredToken
            | ErrorCode::Forbidden
            | ErrorCode::NoAccess
            | ErrorCode::InvalidCredential
            | ErrorCode::DuplicateIdentifier
            | ErrorCode::AlreadyGranted
            | ErrorCode::Conflict
            | ErrorCode::RateLimited
            | ErrorCode::QueryRejected
            | ErrorCode::Untranslatable => ErrorSeverity::Medium,

            ErrorCode::TenantInactive
            | ErrorCode::PoolTimeout
            | ErrorCode::CircuitOpen
            | ErrorCode::Deadline => ErrorSeverity::High,

            ErrorCode::QueryExecutionFailed | ErrorCode::Internal => ErrorSeverity::Critical,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)?;
        if let Some(details) = &self.details {
            write!(f, ": {}", details)?;
        }
        Ok(())
    }
}

impl Serialize for Error {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        #[derive(Serialize)]
        struct ErrorSer {
            code: ErrorCode,
            message: String,
            details: Option<String>,
            context: ErrorContext,
            severity: ErrorSeverity,
            retry_after: Option<u64>,
        }

        ErrorSer {
            code: self.code,
            message: self.message.clone(),
            details: self.details.clone(),
            context: self.context.clone(),
            severity: self.severity,
            retry_after: self.retry_after,
        }
        .serialize(serializer)
    }
}

impl Error {
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Internal, message)
    }

    pub fn unauthenticated(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Unauthenticated, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Forbidden, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotFound, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Conflict, message)
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::RateLimited, message)
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        let code = match &err {
            sqlx::Error::RowNotFound => ErrorCode::NotFound,
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => ErrorCode::Conflict,
            sqlx::Error::PoolTimedOut => ErrorCode::PoolTimeout,
            _ => ErrorCode::Internal,
        };

        Self::new(code, err.to_string()).add_trace("sqlx::Error conversion")
    }
}

impl From<redis::RedisError> for Error {
    fn from(err: redis::RedisError) -> Self {
        Self::new(ErrorCode::Internal, err.to_string()).add_trace("redis::RedisError conversion")
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::new(ErrorCode::Internal, err.to_string()).add_trace("serde_json::Error conversion")
    }
}

impl From<config::ConfigError> for Error {
    fn from(err: config::ConfigError) -> Self {
        Self::new(ErrorCode::Internal, err.to_string()).add_trace("config::ConfigError conversion")
    }
}
