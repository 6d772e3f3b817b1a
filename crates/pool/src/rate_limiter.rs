//! Request rate limiting, per authenticated user and per client IP
//! (§4.8). A sliding one-minute counter in Redis tracks the sustained
//! rate; `burst_size` is added on top of the per-minute ceiling so a
//! short spike doesn't trip the limit the instant it crosses the
//! average.

use qgw_core::{config::RateLimitConfig, error::Result, Error, ErrorCode};
use redis::aio::ConnectionManager;
use tracing::warn;

const WINDOW_SECONDS: i64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitScope {
    User,
    Ip,
}

/// Redis-backed rate limiter, one counter key per (scope, identifier,
/// window). On a Redis error the request is allowed through — the same
/// fail-open choice as the counter this is grounded on, since rate
/// limiting protects capacity, not correctness.
pub struct RateLimiter {
    redis: ConnectionManager,
    config: RateLimitConfig,
}

impl RateLimiter {
    pub fn new(redis: ConnectionManager, config: RateLimitConfig) -> Self {
        Self { redis, config }
    }

    pub async fn check(&self, scope: RateLimitScope, identifier: &str) -> Result<()> {
        let (requests_per_minute, burst_size) = match scope {
            RateLimitScope::User => (self.config.per_user_requests_per_minute, self.config.per_user_burst_size),
            RateLimitScope::Ip => (self.config.per_ip_requests_per_minute, self.config.per_ip_burst_size),
        };
        let ceiling = requests_per_minute + burst_size;

        let key = format!("rate_limit:{}:{}", scope_name(scope), identifier);
        let mut conn = self.redis.clone();

        let count: i64 = match redis::AsyncCommands::incr(&mut conn, &key, 1).await {
            Ok(count) => count,
            Err(e) => {
                warn!("rate limit check failed, allowing request: {e}");
                return Ok(());
            }
        };

        if count == 1 {
            let _: std::result::Result<(), _> =
                redis::AsyncCommands::expire(&mut conn, &key, WINDOW_SECONDS).await;
        }

        if count > ceiling as i64 {
            let retry_after = redis::AsyncCommands::ttl(&mut conn, &key)
                .await
                .ok()
                .filter(|ttl: &i64| *ttl > 0)
                .map(|ttl| ttl as u64)
                .unwrap_or(WINDOW_SECONDS as u64);
            return Err(Error::new(ErrorCode::RateLimited, "request rate exceeded").with_retry_after(retry_after));
        }

        Ok(())
    }
}

fn scope_name(scope: RateLimitScope) -> &'static str {
    match scope {
        RateLimitScope::User => "user",
        RateLimitScope::Ip => "ip",
    }
}
