//! Clinic administration endpoints.
//!
//! Only principals holding the wildcard permission (`admin`, `superadmin`)
//! get through.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::Extension,
    http::StatusCode,
    response::IntoResponse,
    routing::post,
};
use serde_json::json;

use dentaflow_auth::permissions;

use crate::app::errors;
use crate::app::routes::common::require;
use crate::app::services::AppServices;
use crate::context::{ClinicContext, PrincipalContext};

pub fn router() -> Router {
    Router::new().route("/projections/rebuild", post(rebuild_projections))
}

/// POST /admin/projections/rebuild - replay the caller's clinic into fresh read models
pub async fn rebuild_projections(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(clinic): Extension<ClinicContext>,
    Extension(principal): Extension<PrincipalContext>,
) -> axum::response::Response {
    if let Err(resp) = require(&clinic, &principal, permissions::ALL) {
        return resp;
    }

    match services.rebuild_projections(clinic.clinic_id()) {
        Ok(replayed) => (
            StatusCode::OK,
            Json(json!({ "clinic_id": clinic.clinic_id().to_string(), "events_replayed": replayed })),
        )
            .into_response(),
        Err(e) => {
            tracing::error!(clinic_id = %clinic.clinic_id(), error = %e, "projection rebuild failed");
            errors::json_error(StatusCode::INTERNAL_SERVER_ERROR, "rebuild_failed", e.to_string())
        }
    }
}
