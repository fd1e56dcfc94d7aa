use axum::{Router, routing::get};

pub mod admin;
pub mod appointments;
pub mod bookings;
pub mod clinical_records;
pub mod common;
pub mod dashboard;
pub mod invoices;
pub mod patients;
pub mod system;
pub mod treatments;

/// Router for all authenticated (clinic-scoped) endpoints.
pub fn router() -> Router {
    Router::new()
        .route("/whoami", get(system::whoami))
        .route("/stream", get(system::stream))
        .nest("/patients", patients::router())
        .nest("/appointments", appointments::router())
        .nest("/treatments", treatments::router())
        .nest("/clinical-records", clinical_records::router())
        .nest("/invoices", invoices::router())
        .nest("/dashboard", dashboard::router())
        .nest("/admin", admin::router())
}

/// Router for endpoints reachable without a token.
pub fn public_router() -> Router {
    Router::new()
        .route("/health", get(system::health))
        .nest("/bookings", bookings::router())
}
