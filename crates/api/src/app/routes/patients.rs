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
use dentaflow_core::AggregateId;
use dentaflow_infra::projections::{InvoiceFilter, patients::AGGREGATE_TYPE};
use dentaflow_patients::{
    ArchivePatient, Gender, Patient, PatientCommand, PatientDetails, PatientDetailsPatch, PatientId,
    RegisterPatient, RegistrationSource, UpdatePatientDetails,
};

use crate::app::routes::common::{CmdAuth, require};
use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::{ClinicContext, PrincipalContext};

pub fn router() -> Router {
    Router::new()
        .route("/", post(register_patient).get(list_patients))
        .route("/:id", get(get_patient).patch(update_patient))
        .route("/:id/archive", post(archive_patient))
        .route("/:id/appointments", get(patient_appointments))
        .route("/:id/clinical-records", get(patient_clinical_records))
        .route("/:id/invoices", get(patient_invoices))
}

fn parse_gender(raw: Option<&str>) -> Result<Option<Gender>, axum::response::Response> {
    raw.filter(|s| !s.trim().is_empty())
        .map(errors::parse_value::<Gender>)
        .transpose()
}

fn parse_patient_id(raw: &str) -> Result<PatientId, axum::response::Response> {
    errors::parse_id(raw, "patient id").map(PatientId::new)
}

pub async fn register_patient(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(clinic): Extension<ClinicContext>,
    Extension(principal): Extension<PrincipalContext>,
    Json(body): Json<dto::RegisterPatientRequest>,
) -> axum::response::Response {
    let gender = match parse_gender(body.gender.as_deref()) {
        Ok(g) => g,
        Err(resp) => return resp,
    };

    let patient_id = PatientId::new(AggregateId::new());
    let cmd = CmdAuth::new(
        PatientCommand::RegisterPatient(RegisterPatient {
            clinic_id: clinic.clinic_id(),
            patient_id,
            details: PatientDetails {
                first_name: body.first_name,
                last_name: body.last_name,
                email: body.email,
                phone: body.phone,
                date_of_birth: body.date_of_birth,
                reported_age: None,
                gender,
                address: body.address,
                allergies: body.allergies,
                notes: body.notes,
            },
            source: RegistrationSource::FrontDesk,
            occurred_at: Utc::now(),
        }),
        permissions::PATIENTS_WRITE,
    );
    let cmd = match cmd.authorized(&clinic, &principal) {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    match services.execute::<Patient>(clinic.clinic_id(), patient_id.0, AGGREGATE_TYPE, cmd, |_, id| {
        Patient::empty(PatientId::new(id))
    }) {
        Ok(_) => (StatusCode::CREATED, Json(json!({ "id": patient_id.0.to_string() }))).into_response(),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}

pub async fn update_patient(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(clinic): Extension<ClinicContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::UpdatePatientRequest>,
) -> axum::response::Response {
    let patient_id = match parse_patient_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let gender = match parse_gender(body.gender.as_deref()) {
        Ok(g) => g,
        Err(resp) => return resp,
    };

    let cmd = CmdAuth::new(
        PatientCommand::UpdatePatientDetails(UpdatePatientDetails {
            clinic_id: clinic.clinic_id(),
            patient_id,
            changes: PatientDetailsPatch {
                first_name: body.first_name,
                last_name: body.last_name,
                email: body.email,
                phone: body.phone,
                date_of_birth: body.date_of_birth,
                reported_age: None,
                gender,
                address: body.address,
                allergies: body.allergies,
                notes: body.notes,
            },
            occurred_at: Utc::now(),
        }),
        permissions::PATIENTS_WRITE,
    );
    let cmd = match cmd.authorized(&clinic, &principal) {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    match services.execute::<Patient>(clinic.clinic_id(), patient_id.0, AGGREGATE_TYPE, cmd, |_, id| {
        Patient::empty(PatientId::new(id))
    }) {
        Ok(committed) => (
            StatusCode::OK,
            Json(json!({ "id": patient_id.0.to_string(), "events_committed": committed.len() })),
        )
            .into_response(),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}

pub async fn archive_patient(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(clinic): Extension<ClinicContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    body: Option<Json<dto::ReasonRequest>>,
) -> axum::response::Response {
    let patient_id = match parse_patient_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let reason = body.and_then(|Json(b)| b.reason);

    let cmd = CmdAuth::new(
        PatientCommand::ArchivePatient(ArchivePatient {
            clinic_id: clinic.clinic_id(),
            patient_id,
            reason,
            occurred_at: Utc::now(),
        }),
        permissions::PATIENTS_WRITE,
    );
    let cmd = match cmd.authorized(&clinic, &principal) {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    match services.execute::<Patient>(clinic.clinic_id(), patient_id.0, AGGREGATE_TYPE, cmd, |_, id| {
        Patient::empty(PatientId::new(id))
    }) {
        Ok(_) => (StatusCode::OK, Json(json!({ "id": patient_id.0.to_string(), "archived": true }))).into_response(),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}

pub async fn get_patient(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(clinic): Extension<ClinicContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    if let Err(resp) = require(&clinic, &principal, permissions::PATIENTS_READ) {
        return resp;
    }
    let patient_id = match parse_patient_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.patients().get(clinic.clinic_id(), &patient_id) {
        Some(rm) => (StatusCode::OK, Json(dto::patient_to_json(&rm, Utc::now().date_naive()))).into_response(),
        None => errors::json_error(StatusCode::NOT_FOUND, "not_found", "patient not found"),
    }
}

/// Directory listing, or a search when `q` is given.
pub async fn list_patients(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(clinic): Extension<ClinicContext>,
    Extension(principal): Extension<PrincipalContext>,
    Query(query): Query<dto::PatientSearchQuery>,
) -> axum::response::Response {
    if let Err(resp) = require(&clinic, &principal, permissions::PATIENTS_READ) {
        return resp;
    }

    let found = match query.q.as_deref().map(str::trim).filter(|q| !q.is_empty()) {
        Some(q) => services.patients().search(clinic.clinic_id(), q),
        None => services.patients().list(clinic.clinic_id()),
    };
    let today = Utc::now().date_naive();
    let items: Vec<_> = found.iter().map(|p| dto::patient_to_json(p, today)).collect();

    (StatusCode::OK, Json(json!({ "items": items }))).into_response()
}

pub async fn patient_appointments(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(clinic): Extension<ClinicContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    if let Err(resp) = require(&clinic, &principal, permissions::APPOINTMENTS_READ) {
        return resp;
    }
    let patient_id = match parse_patient_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let items = services.appointments().for_patient(clinic.clinic_id(), patient_id);
    (StatusCode::OK, Json(json!({ "items": items }))).into_response()
}

pub async fn patient_clinical_records(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(clinic): Extension<ClinicContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    if let Err(resp) = require(&clinic, &principal, permissions::CLINICAL_READ) {
        return resp;
    }
    let patient_id = match parse_patient_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let items = services.clinical_records().by_patient(clinic.clinic_id(), patient_id);
    (StatusCode::OK, Json(json!({ "items": items }))).into_response()
}

pub async fn patient_invoices(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(clinic): Extension<ClinicContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    if let Err(resp) = require(&clinic, &principal, permissions::INVOICES_READ) {
        return resp;
    }
    let patient_id = match parse_patient_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let filter = InvoiceFilter {
        patient_id: Some(patient_id),
        ..InvoiceFilter::default()
    };
    let items = services.invoices().list(clinic.clinic_id(), filter);
    (StatusCode::OK, Json(json!({ "items": items }))).into_response()
}
