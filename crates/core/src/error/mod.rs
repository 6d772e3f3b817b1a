//! Error handling framework for the query gateway core.
//!
//! The error kinds in [`codes::ErrorCode`] are normative: every component
//! maps its failures onto this fixed taxonomy so callers can branch on
//! `error.code` rather than parsing messages. [`framework::Error`] adds
//! severity, a cause chain, and a correlation id; [`context`] carries the
//! request-scoped data used to populate it.

pub mod codes;
pub mod context;
pub mod framework;
pub mod metrics;

pub use codes::ErrorCode;
pub use context::{ErrorContext, RequestContext};
pub use framework::{Error, ErrorCategory, ErrorSeverity, Result};
pub use metrics::ErrorMetrics;
