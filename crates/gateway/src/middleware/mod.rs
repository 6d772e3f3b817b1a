pub mod auth;
pub mod request_id;
pub mod security_headers;

pub use auth::routing_middleware;
pub use request_id::request_id_middleware;
pub use security_headers::security_headers_middleware;
