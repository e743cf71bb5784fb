//! HTTP application wiring (Axum routers + shared layers).
//!
//! - `services.rs`: stores, codec and S2S client per service
//! - `routes/`: handlers, one file per area
//! - `dto.rs`: request/response bodies
//! - `errors.rs`: error codes and JSON error responses

use std::sync::Arc;
use std::time::Duration;

use axum::{
    http::{header, StatusCode},
    routing::get,
    Extension, Router,
};
use tower::ServiceBuilder;
use tower_http::{
    sensitive_headers::SetSensitiveHeadersLayer, timeout::TimeoutLayer, trace::TraceLayer,
};

use crate::middleware::apply_gates;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

use services::{AdminServices, UserServices};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Router for the user-service.
pub fn build_user_app(services: UserServices) -> Router {
    let gates = services.gates.clone();
    let api = routes::user_router().layer(Extension(Arc::new(services)));
    finish(api, gates)
}

/// Router for the admin-service.
pub fn build_admin_app(services: AdminServices) -> Router {
    let gates = services.gates.clone();
    let api = routes::admin_router().layer(Extension(Arc::new(services)));
    finish(api, gates)
}

fn finish(api: Router, gates: crate::middleware::GateState) -> Router {
    let app = Router::new().route("/health", get(routes::system::health)).merge(api);

    apply_gates(app, gates).layer(
        ServiceBuilder::new()
            .layer(SetSensitiveHeadersLayer::new([header::AUTHORIZATION]))
            .layer(TraceLayer::new_for_http())
            .layer(TimeoutLayer::with_status_code(StatusCode::REQUEST_TIMEOUT, REQUEST_TIMEOUT)),
    )
}
