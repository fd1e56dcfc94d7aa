//! HTTP API application wiring (Axum router + service wiring).
//!
//! - `services.rs`: command side, read models and the realtime channel
//! - `routes/`: HTTP routes + handlers (one file per domain area)
//! - `dto.rs`: request DTOs and JSON mapping helpers
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{Extension, Router};
use tower::ServiceBuilder;

use crate::config::ApiConfig;
use crate::middleware;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

pub use services::AppServices;

/// Build the full HTTP router over already-built services.
pub fn router(config: &ApiConfig, services: Arc<AppServices>) -> Router {
    let jwt = Arc::new(dentaflow_auth::Hs256JwtValidator::new(config.jwt_secret.as_bytes()));
    let auth_state = middleware::AuthState { jwt };

    // Protected routes: require auth + clinic context.
    let protected = routes::router().layer(axum::middleware::from_fn_with_state(
        auth_state,
        middleware::auth_middleware,
    ));

    Router::new()
        .merge(routes::public_router())
        .merge(protected)
        .layer(ServiceBuilder::new().layer(Extension(services)))
}

/// Build services and router in one go (tests, simple embedding).
pub fn build_app(config: ApiConfig) -> std::io::Result<Router> {
    let services = Arc::new(AppServices::new(&config)?);
    Ok(router(&config, services))
}
