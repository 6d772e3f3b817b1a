//! Tenant connection pooling, circuit breaking, rate limiting, and
//! result/schema caching for the query gateway (§4.4, §4.6-§4.11).

pub mod breaker;
pub mod dispatcher;
pub mod pool_manager;
pub mod rate_limiter;
pub mod registry;
pub mod result_cache;
pub mod schema_cache;

pub use breaker::{CircuitBreaker, CircuitState};
pub use dispatcher::{QueryDispatcher, QueryRequest, QueryResult, QueryTranslator};
pub use pool_manager::{TenantPool, TenantPoolManager};
pub use rate_limiter::RateLimiter;
pub use registry::{DatabaseDescriptor, DatabaseKind, TenantRegistry};
pub use result_cache::ResultCache;
pub use schema_cache::SchemaCache;
