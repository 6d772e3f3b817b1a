use super::{Error, ErrorCategory, ErrorSeverity};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Tracks per-tenant-agnostic error counts; per-tenant error-rate feeding
/// the circuit breaker lives in `qgw_pool::breaker`, not here.
#[derive(Debug)]
pub struct ErrorMetrics {
    error_counts: Arc<RwLock<HashMap<ErrorCategory, AtomicU64>>>,
    severity_counts: Arc<RwLock<HashMap<ErrorSeverity, AtomicU64>>>,
    error_rate_tracker: Arc<RwLock<ErrorRateTracker>>,
}

#[derive(Debug)]
struct ErrorRateTracker {
    error_timestamps: Vec<chrono::DateTime<chrono::Utc>>,
    window_size: u64,
}

impl ErrorMetrics {
    pub fn new() -> Self {
        Self {
            error_counts: Arc::new(RwLock::new(HashMap::new())),
            severity_counts: Arc::new(RwLock::new(HashMap::new())),
            error_rate_tracker: Arc::new(RwLock::new(ErrorRateTracker {
                error_timestamps: Vec::new(),
                window_size: 300,
            })),
        }
    }

    pub async fn record_error(&self, error: &Error) {
        {
            let mut counts = self.error_counts.write().await;
            counts
                .entry(error.category())
                .or_insert_with(|| AtomicU64::new(0))
                .fetch_add(1, Ordering::Relaxed);
        }
        {
            let mut counts = self.severity_counts.write().await;
            counts
                .entry(error.severity)
                .or_insert_with(|| AtomicU64::new(0))
                .fetch_add(1, Ordering::Relaxed);
        }
        {
            let mut tracker = self.error_rate_tracker.write().await;
            tracker.record_error();
        }

        if error.should_log_as_error() {
            tracing::error!(
                error_id = %error.context.error_id,
                error_code = ?error.code,
                message = %error.message,
                "error recorded"
            );
        } else {
            tracing::debug!(
                error_id = %error.context.error_id,
                error_code = ?error.code,
                "error recorded"
            );
        }
    }

    pub async fn get_error_count(&self, category: ErrorCategory) -> u64 {
        let counts = self.error_counts.read().await;
        counts.get(&category).map(|c| c.load(Ordering::Relaxed)).unwrap_or(0)
    }

    pub async fn get_error_rate(&self) -> f64 {
        self.error_rate_tracker.read().await.get_error_rate()
    }

    pub async fn reset(&self) {
        self.error_counts.write().await.clear();
        self.severity_counts.write().await.clear();
        self.error_rate_tracker.write().await.error_timestamps.clear();
    }
}

impl ErrorRateTracker {
    fn record_error(&mut self) {
        let now = chrono::Utc::now();
        self.error_timestamps.push(now);
        let cutoff = now - chrono::Duration::seconds(self.window_size as i64);
        self.error_timestamps.retain(|&ts| ts > cutoff);
    }

    fn get_error_rate(&self) -> f64 {
        let window_minutes = self.window_size as f64 / 60.0;
        self.error_timestamps.len() as f64 / window_minutes
    }
}

impl Default for ErrorMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    #[tokio::test]
    async fn records_category_and_severity() {
        let metrics = ErrorMetrics::new();
        let error = Error::new(ErrorCode::QueryRejected, "denylisted pattern");
        metrics.record_error(&error).await;

        assert_eq!(metrics.get_error_count(ErrorCategory::Query).await, 1);
    }

    #[tokio::test]
    async fn tracks_error_rate_window() {
        let metrics = ErrorMetrics::new();
        for _ in 0..5 {
            metrics.record_error(&Error::new(ErrorCode::Internal, "boom")).await;
        }
        assert!(metrics.get_error_rate().await > 0.0);
    }
}
