use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use chrono::Utc;
use serde_json::json;

use dentaflow_auth::permissions;
use dentaflow_catalog::{
    CreateTreatment, DeactivateTreatment, ReactivateTreatment, TREATMENT_CATEGORIES, Treatment,
    TreatmentCommand, TreatmentDetails, TreatmentDetailsPatch, TreatmentId, UpdateTreatment,
};
use dentaflow_core::AggregateId;
use dentaflow_infra::projections::treatments::AGGREGATE_TYPE;

use crate::app::routes::common::{CmdAuth, require};
use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::{ClinicContext, PrincipalContext};

pub fn router() -> Router {
    Router::new()
        .route("/", post(create_treatment).get(list_treatments))
        .route("/categories", get(list_categories))
        .route("/:id", get(get_treatment).patch(update_treatment))
        .route("/:id/deactivate", post(deactivate_treatment))
        .route("/:id/reactivate", post(reactivate_treatment))
}

fn parse_treatment_id(raw: &str) -> Result<TreatmentId, axum::response::Response> {
    errors::parse_id(raw, "treatment id").map(TreatmentId::new)
}

fn execute(
    services: &AppServices,
    clinic: &ClinicContext,
    principal: &PrincipalContext,
    treatment_id: TreatmentId,
    command: TreatmentCommand,
    status: StatusCode,
) -> axum::response::Response {
    let cmd = match CmdAuth::new(command, permissions::CATALOG_WRITE).authorized(clinic, principal) {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    match services.execute::<Treatment>(clinic.clinic_id(), treatment_id.0, AGGREGATE_TYPE, cmd, |_, id| {
        Treatment::empty(TreatmentId::new(id))
    }) {
        Ok(committed) => (
            status,
            Json(json!({ "id": treatment_id.0.to_string(), "events_committed": committed.len() })),
        )
            .into_response(),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}

pub async fn create_treatment(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(clinic): Extension<ClinicContext>,
    Extension(principal): Extension<PrincipalContext>,
    Json(body): Json<dto::CreateTreatmentRequest>,
) -> axum::response::Response {
    let treatment_id = TreatmentId::new(AggregateId::new());
    let command = TreatmentCommand::CreateTreatment(CreateTreatment {
        clinic_id: clinic.clinic_id(),
        treatment_id,
        details: TreatmentDetails {
            code: body.code,
            name: body.name,
            description: body.description,
            standard_cost: body.standard_cost,
            category: body.category,
            duration_minutes: body.duration_minutes,
        },
        active: body.active.unwrap_or(true),
        occurred_at: Utc::now(),
    });
    execute(&services, &clinic, &principal, treatment_id, command, StatusCode::CREATED)
}

pub async fn update_treatment(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(clinic): Extension<ClinicContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::UpdateTreatmentRequest>,
) -> axum::response::Response {
    let treatment_id = match parse_treatment_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let command = TreatmentCommand::UpdateTreatment(UpdateTreatment {
        clinic_id: clinic.clinic_id(),
        treatment_id,
        changes: TreatmentDetailsPatch {
            code: body.code,
            name: body.name,
            description: body.description,
            standard_cost: body.standard_cost,
            category: body.category,
            duration_minutes: body.duration_minutes,
        },
        occurred_at: Utc::now(),
    });
    execute(&services, &clinic, &principal, treatment_id, command, StatusCode::OK)
}

pub async fn deactivate_treatment(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(clinic): Extension<ClinicContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let treatment_id = match parse_treatment_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let command = TreatmentCommand::DeactivateTreatment(DeactivateTreatment {
        clinic_id: clinic.clinic_id(),
        treatment_id,
        occurred_at: Utc::now(),
    });
    execute(&services, &clinic, &principal, treatment_id, command, StatusCode::OK)
}

pub async fn reactivate_treatment(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(clinic): Extension<ClinicContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let treatment_id = match parse_treatment_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let command = TreatmentCommand::ReactivateTreatment(ReactivateTreatment {
        clinic_id: clinic.clinic_id(),
        treatment_id,
        occurred_at: Utc::now(),
    });
    execute(&services, &clinic, &principal, treatment_id, command, StatusCode::OK)
}

pub async fn get_treatment(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(clinic): Extension<ClinicContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    if let Err(resp) = require(&clinic, &principal, permissions::CATALOG_READ) {
        return resp;
    }
    let treatment_id = match parse_treatment_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.treatments().get(clinic.clinic_id(), &treatment_id) {
        Some(rm) => (StatusCode::OK, Json(rm)).into_response(),
        None => errors::json_error(StatusCode::NOT_FOUND, "not_found", "treatment not found"),
    }
}

pub async fn list_treatments(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(clinic): Extension<ClinicContext>,
    Extension(principal): Extension<PrincipalContext>,
    Query(query): Query<dto::TreatmentListQuery>,
) -> axum::response::Response {
    if let Err(resp) = require(&clinic, &principal, permissions::CATALOG_READ) {
        return resp;
    }

    let category = query.category.as_deref().map(str::trim).filter(|c| !c.is_empty());
    let items = if query.include_inactive {
        services
            .treatments()
            .all(clinic.clinic_id())
            .into_iter()
            .filter(|t| category.is_none_or(|c| t.details.category.eq_ignore_ascii_case(c)))
            .collect()
    } else {
        services.treatments().active(clinic.clinic_id(), category)
    };

    (StatusCode::OK, Json(json!({ "items": items }))).into_response()
}

/// Categories in use by active treatments, plus the canonical list for pickers.
pub async fn list_categories(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(clinic): Extension<ClinicContext>,
    Extension(principal): Extension<PrincipalContext>,
) -> axum::response::Response {
    if let Err(resp) = require(&clinic, &principal, permissions::CATALOG_READ) {
        return resp;
    }

    (
        StatusCode::OK,
        Json(json!({
            "in_use": services.treatments().categories(clinic.clinic_id()),
            "canonical": TREATMENT_CATEGORIES,
        })),
    )
        .into_response()
}
