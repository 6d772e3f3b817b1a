pub mod audit;
pub mod config;
pub mod error;
pub mod security;
pub mod types;

pub use audit::{AuditEvent, AuditLogger, AuditRepository};
pub use config::Config;
pub use error::{Error, ErrorCode, ErrorContext, ErrorMetrics, Result};
pub use types::*;

// Re-export commonly used types from dependencies
pub use uuid::Uuid;
pub use chrono::{DateTime, Utc};
