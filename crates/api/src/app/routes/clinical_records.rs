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
use dentaflow_catalog::TreatmentId;
use dentaflow_clinical::{
    AmendClinicalRecord, ClinicalRecord, ClinicalRecordCommand, ClinicalRecordId, RemoveClinicalRecord,
};
use dentaflow_infra::projections::clinical_records::AGGREGATE_TYPE;
use dentaflow_patients::PatientId;
use dentaflow_scheduling::AppointmentId;

use crate::app::routes::common::{CmdAuth, Requires, require};
use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::{ClinicContext, PrincipalContext};

pub fn router() -> Router {
    Router::new()
        .route("/", post(record_treatment).get(list_records))
        .route("/:id", get(get_record).patch(amend_record).delete(remove_record))
}

fn parse_record_id(raw: &str) -> Result<ClinicalRecordId, axum::response::Response> {
    errors::parse_id(raw, "clinical record id").map(ClinicalRecordId::new)
}

pub async fn record_treatment(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(clinic): Extension<ClinicContext>,
    Extension(principal): Extension<PrincipalContext>,
    Json(body): Json<dto::RecordTreatmentRequest>,
) -> axum::response::Response {
    if let Err(e) = crate::authz::authorize_command(&clinic, &principal, &Requires::one(permissions::CLINICAL_WRITE)) {
        return errors::authz_error_to_response(e);
    }
    let appointment_id = match errors::parse_id(&body.appointment_id, "appointment_id") {
        Ok(v) => AppointmentId::new(v),
        Err(resp) => return resp,
    };
    let procedure_id = match errors::parse_id(&body.procedure_id, "procedure_id") {
        Ok(v) => TreatmentId::new(v),
        Err(resp) => return resp,
    };

    match services.record_treatment(
        clinic.clinic_id(),
        appointment_id,
        procedure_id,
        body.clinical(),
        principal.user_id(),
        Utc::now(),
    ) {
        Ok(record_id) => (StatusCode::CREATED, Json(json!({ "id": record_id.0.to_string() }))).into_response(),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}

pub async fn amend_record(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(clinic): Extension<ClinicContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::AmendClinicalRecordRequest>,
) -> axum::response::Response {
    let record_id = match parse_record_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let cmd = CmdAuth::new(
        ClinicalRecordCommand::AmendClinicalRecord(AmendClinicalRecord {
            clinic_id: clinic.clinic_id(),
            record_id,
            changes: body.into(),
            author_id: principal.user_id(),
            occurred_at: Utc::now(),
        }),
        permissions::CLINICAL_WRITE,
    );
    let cmd = match cmd.authorized(&clinic, &principal) {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    match services.execute::<ClinicalRecord>(clinic.clinic_id(), record_id.0, AGGREGATE_TYPE, cmd, |_, id| {
        ClinicalRecord::empty(ClinicalRecordId::new(id))
    }) {
        Ok(committed) => (
            StatusCode::OK,
            Json(json!({ "id": record_id.0.to_string(), "events_committed": committed.len() })),
        )
            .into_response(),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}

pub async fn remove_record(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(clinic): Extension<ClinicContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let record_id = match parse_record_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let cmd = CmdAuth::new(
        ClinicalRecordCommand::RemoveClinicalRecord(RemoveClinicalRecord {
            clinic_id: clinic.clinic_id(),
            record_id,
            author_id: principal.user_id(),
            occurred_at: Utc::now(),
        }),
        permissions::CLINICAL_WRITE,
    );
    let cmd = match cmd.authorized(&clinic, &principal) {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    match services.execute::<ClinicalRecord>(clinic.clinic_id(), record_id.0, AGGREGATE_TYPE, cmd, |_, id| {
        ClinicalRecord::empty(ClinicalRecordId::new(id))
    }) {
        Ok(_) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}

pub async fn get_record(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(clinic): Extension<ClinicContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    if let Err(resp) = require(&clinic, &principal, permissions::CLINICAL_READ) {
        return resp;
    }
    let record_id = match parse_record_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.clinical_records().get(clinic.clinic_id(), &record_id) {
        Some(rm) => (StatusCode::OK, Json(rm)).into_response(),
        None => errors::json_error(StatusCode::NOT_FOUND, "not_found", "clinical record not found"),
    }
}

/// Records of one appointment, of one patient, or a patient's tooth history.
pub async fn list_records(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(clinic): Extension<ClinicContext>,
    Extension(principal): Extension<PrincipalContext>,
    Query(query): Query<dto::ClinicalRecordQuery>,
) -> axum::response::Response {
    if let Err(resp) = require(&clinic, &principal, permissions::CLINICAL_READ) {
        return resp;
    }
    let appointment_id = match errors::parse_optional_id(query.appointment_id.as_deref(), "appointment_id") {
        Ok(v) => v.map(AppointmentId::new),
        Err(resp) => return resp,
    };
    let patient_id = match errors::parse_optional_id(query.patient_id.as_deref(), "patient_id") {
        Ok(v) => v.map(PatientId::new),
        Err(resp) => return resp,
    };
    let tooth = query.tooth.as_deref().map(str::trim).filter(|t| !t.is_empty());

    let records = services.clinical_records();
    let items = match (appointment_id, patient_id, tooth) {
        (Some(appointment_id), _, _) => records.by_appointment(clinic.clinic_id(), appointment_id),
        (None, Some(patient_id), Some(tooth)) => records.tooth_history(clinic.clinic_id(), patient_id, tooth),
        (None, Some(patient_id), None) => records.by_patient(clinic.clinic_id(), patient_id),
        (None, None, _) => {
            return errors::json_error(
                StatusCode::BAD_REQUEST,
                "validation_error",
                "one of appointment_id or patient_id is required",
            );
        }
    };

    (StatusCode::OK, Json(json!({ "items": items }))).into_response()
}
