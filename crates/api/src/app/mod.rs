//! HTTP application wiring (axum router + service wiring).
//!
//! - `services.rs`: store, event log, adapters, dispatcher
//! - `routes/`: handlers, one file per area
//! - `dto.rs`: request bodies and parsing helpers
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{Extension, Router, routing::get};
use tower::ServiceBuilder;

use crate::middleware;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

pub use services::AppServices;

/// Build the full HTTP router (public entrypoint used by `main.rs` and tests).
pub fn build_app(services: Arc<AppServices>) -> Router {
    // Queue routes act on behalf of an owner.
    let owned = Router::new()
        .nest("/queue", routes::queue::router())
        .route_layer(axum::middleware::from_fn(middleware::owner_middleware));

    // Trigger for external schedulers; expected to be reachable only
    // from inside the deployment network.
    let internal = Router::new().nest("/internal", routes::internal::router());

    Router::new()
        .route("/health", get(routes::system::health))
        .merge(owned)
        .merge(internal)
        .layer(Extension(services))
        .layer(ServiceBuilder::new().layer(axum::middleware::from_fn(middleware::request_logging)))
}
