//! Security response headers, grounded on the teacher's
//! `api_middleware/security_headers.rs` verbatim (this ambient concern
//! doesn't change with the domain).

use axum::{
    extract::Request,
    http::{header, HeaderValue},
    middleware::Next,
    response::Response,
};

#[derive(Debug, Clone)]
pub struct SecurityHeadersConfig {
    pub enable_hsts: bool,
    pub hsts_max_age: u64,
    pub csp: Option<String>,
    pub x_frame_options: Option<String>,
    pub x_content_type_options: bool,
    pub referrer_policy: Option<String>,
}

impl Default for SecurityHeadersConfig {
    fn default() -> Self {
        Self {
            enable_hsts: true,
            hsts_max_age: 31536000,
            csp: Some("default-src 'self'; frame-ancestors 'none'; base-uri 'self'".to_string()),
            x_frame_options: Some("DENY".to_string()),
            x_content_type_options: true,
            referrer_policy: Some("strict-origin-when-cross-origin".to_string()),
        }
    }
}

pub async fn security_headers_middleware(request: Request, next: Next) -> Response {
    let config = SecurityHeadersConfig::default();
    let mut response = next.run(request).await;
    let headers = response.headers_mut();

    if config.enable_hsts {
        if let Ok(value) = HeaderValue::from_str(&format!("max-age={}; includeSubDomains", config.hsts_max_age)) {
            headers.insert(header::STRICT_TRANSPORT_SECURITY, value);
        }
    }
    if let Some(csp) = &config.csp {
        if let Ok(value) = HeaderValue::from_str(csp) {
            headers.insert(header::CONTENT_SECURITY_POLICY, value);
        }
    }
    if let Some(x_frame_options) = &config.x_frame_options {
        if let Ok(value) = HeaderValue::from_str(x_frame_options) {
            headers.insert(header::X_FRAME_OPTIONS, value);
        }
    }
    if config.x_content_type_options {
        headers.insert(header::X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff"));
    }
    if let Some(referrer_policy) = &config.referrer_policy {
        if let Ok(value) = HeaderValue::from_str(referrer_policy) {
            headers.insert(header::REFERRER_POLICY, value);
        }
    }
    headers.remove(header::SERVER);

    response
}
