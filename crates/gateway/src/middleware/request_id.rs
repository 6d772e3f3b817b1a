//! Request ID / context middleware, grounded on the teacher's
//! `api_middleware/request_id.rs`. Trimmed to the fields
//! `qgw_core::error::RequestContext` actually carries (no separate
//! correlation-id field on this core's context type).

use axum::{
    extract::Request,
    http::{header::HeaderValue, HeaderName, StatusCode},
    middleware::Next,
    response::Response,
};
use qgw_core::error::RequestContext;
use std::str::FromStr;
use tracing::debug;
use uuid::Uuid;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

pub async fn request_id_middleware(mut request: Request, next: Next) -> Result<Response, StatusCode> {
    let request_id = extract_or_generate_request_id(&request);

    let mut context = RequestContext::new().with_request_id(request_id.clone());
    if let Some(ip) = extract_client_ip(&request) {
        context = context.with_source_ip(ip);
    }
    if let Some(user_agent) = request.headers().get("user-agent").and_then(|v| v.to_str().ok()) {
        context = context.with_user_agent(user_agent);
    }

    request.extensions_mut().insert(context);

    let mut response = next.run(request).await;

    if let Ok(header_value) = HeaderValue::from_str(&request_id) {
        response
            .headers_mut()
            .insert(HeaderName::from_str(REQUEST_ID_HEADER).unwrap(), header_value);
    }

    debug!(request_id = %request_id, status = %response.status(), "request completed");
    Ok(response)
}

fn extract_or_generate_request_id(request: &Request) -> String {
    let candidates = [REQUEST_ID_HEADER, "x-correlation-id", "x-trace-id", "request-id"];

    for header_name in candidates {
        if let Some(value) = request.headers().get(header_name) {
            if let Ok(id_str) = value.to_str() {
                if is_valid_request_id(id_str) {
                    return id_str.to_string();
                }
            }
        }
    }

    Uuid::new_v4().to_string()
}

fn extract_client_ip(request: &Request) -> Option<String> {
    let ip_headers = ["x-forwarded-for", "x-real-ip", "cf-connecting-ip", "x-client-ip"];

    for header_name in ip_headers {
        if let Some(value) = request.headers().get(header_name) {
            if let Ok(ip_str) = value.to_str() {
                let ip = if header_name == "x-forwarded-for" {
                    ip_str.split(',').next().unwrap_or(ip_str).trim()
                } else {
                    ip_str.trim()
                };
                if ip.parse::<std::net::IpAddr>().is_ok() {
                    return Some(ip.to_string());
                }
            }
        }
    }
    None
}

fn is_valid_request_id(id: &str) -> bool {
    if Uuid::from_str(id).is_ok() {
        return true;
    }
    id.len() <= 128 && id.len() >= 8 && id.chars().all(|c| c.is_alphanumeric() || c == '-' || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, routing::get, Router};
    use tower::ServiceExt;

    #[tokio::test]
    async fn generates_a_request_id_when_absent() {
        let app = Router::new()
            .route("/", get(|| async { "OK" }))
            .layer(axum::middleware::from_fn(request_id_middleware));

        let response = app
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();

        let header = response.headers().get(REQUEST_ID_HEADER).unwrap().to_str().unwrap();
        assert!(is_valid_request_id(header));
    }

    #[tokio::test]
    async fn preserves_an_existing_request_id() {
        let app = Router::new()
            .route("/", get(|| async { "OK" }))
            .layer(axum::middleware::from_fn(request_id_middleware));

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/")
                    .header(REQUEST_ID_HEADER, "existing-request-id")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        let header = response.headers().get(REQUEST_ID_HEADER).unwrap().to_str().unwrap();
        assert_eq!(header, "existing-request-id");
    }
}
