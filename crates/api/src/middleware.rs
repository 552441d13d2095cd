use std::time::Instant;

use axum::{
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};

use orderflow_core::OwnerId;

use crate::context::OwnerContext;

/// Header carrying the authenticated owner, set by the upstream auth layer.
pub const OWNER_HEADER: &str = "x-owner-id";

pub async fn owner_middleware(
    mut req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    let owner_id = extract_owner(req.headers())?;
    req.extensions_mut().insert(OwnerContext::new(owner_id));
    Ok(next.run(req).await)
}

pub async fn request_logging(req: axum::http::Request<axum::body::Body>, next: Next) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let started = Instant::now();

    let response = next.run(req).await;

    tracing::info!(
        %method,
        path,
        status = response.status().as_u16(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "request handled"
    );
    response
}

fn extract_owner(headers: &HeaderMap) -> Result<OwnerId, StatusCode> {
    let header = headers.get(OWNER_HEADER).ok_or(StatusCode::UNAUTHORIZED)?;
    let header = header.to_str().map_err(|_| StatusCode::UNAUTHORIZED)?;
    header
        .trim()
        .parse()
        .map_err(|_| StatusCode::UNAUTHORIZED)
}
