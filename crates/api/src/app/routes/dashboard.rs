use std::sync::Arc;

use axum::{
    Json, Router,
    extract::Extension,
    http::StatusCode,
    response::IntoResponse,
    routing::get,
};
use chrono::Utc;

use dentaflow_auth::permissions;

use crate::app::routes::common::require;
use crate::app::services::AppServices;
use crate::context::{ClinicContext, PrincipalContext};

pub fn router() -> Router {
    Router::new()
        .route("/", get(summary))
        .route("/stats", get(stats))
}

/// Everything the front-desk home screen shows, in one response.
pub async fn summary(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(clinic): Extension<ClinicContext>,
    Extension(principal): Extension<PrincipalContext>,
) -> axum::response::Response {
    if let Err(resp) = require(&clinic, &principal, permissions::DASHBOARD_READ) {
        return resp;
    }

    let summary = services.dashboard().summary(clinic.clinic_id(), Utc::now());
    (StatusCode::OK, Json(summary)).into_response()
}

pub async fn stats(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(clinic): Extension<ClinicContext>,
    Extension(principal): Extension<PrincipalContext>,
) -> axum::response::Response {
    if let Err(resp) = require(&clinic, &principal, permissions::DASHBOARD_READ) {
        return resp;
    }

    let stats = services.dashboard().stats(clinic.clinic_id(), Utc::now());
    (StatusCode::OK, Json(stats)).into_response()
}
