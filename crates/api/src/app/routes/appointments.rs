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
use dentaflow_core::{AggregateId, UserId};
use dentaflow_infra::projections::{DayFilter, appointments::AGGREGATE_TYPE};
use dentaflow_patients::PatientId;
use dentaflow_scheduling::{
    Appointment, AppointmentCommand, AppointmentId, AppointmentStatus, ChangeAppointmentStatus,
    RescheduleAppointment, ScheduleAppointment,
};

use crate::app::routes::common::{CmdAuth, require};
use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::{ClinicContext, PrincipalContext};

const DEFAULT_UPCOMING_LIMIT: usize = 10;

pub fn router() -> Router {
    Router::new()
        .route("/", post(schedule_appointment).get(list_appointments))
        .route("/today", get(today_appointments))
        .route("/upcoming", get(upcoming_appointments))
        .route("/:id", get(get_appointment))
        .route("/:id/reschedule", post(reschedule_appointment))
        .route("/:id/status", post(change_status))
}

fn parse_appointment_id(raw: &str) -> Result<AppointmentId, axum::response::Response> {
    errors::parse_id(raw, "appointment id").map(AppointmentId::new)
}

pub async fn schedule_appointment(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(clinic): Extension<ClinicContext>,
    Extension(principal): Extension<PrincipalContext>,
    Json(body): Json<dto::ScheduleAppointmentRequest>,
) -> axum::response::Response {
    let patient_id = match errors::parse_id(&body.patient_id, "patient_id") {
        Ok(v) => PatientId::new(v),
        Err(resp) => return resp,
    };
    let doctor_id = match errors::parse_optional_id(body.doctor_id.as_deref(), "doctor_id") {
        Ok(v) => v.map(|id| UserId::from_uuid(*id.as_uuid())),
        Err(resp) => return resp,
    };

    let appointment_id = AppointmentId::new(AggregateId::new());
    let cmd = CmdAuth::new(
        AppointmentCommand::ScheduleAppointment(ScheduleAppointment {
            clinic_id: clinic.clinic_id(),
            appointment_id,
            patient_id,
            doctor_id,
            scheduled_at: body.scheduled_at,
            duration_minutes: body.duration_minutes,
            appointment_type: body.appointment_type,
            chief_complaint: body.chief_complaint,
            notes: body.notes,
            occurred_at: Utc::now(),
        }),
        permissions::APPOINTMENTS_WRITE,
    );
    let cmd = match cmd.authorized(&clinic, &principal) {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    match services.execute_for_patient::<Appointment>(
        clinic.clinic_id(),
        patient_id,
        appointment_id.0,
        AGGREGATE_TYPE,
        cmd,
        |_, id| Appointment::empty(AppointmentId::new(id)),
    ) {
        Ok(_) => (StatusCode::CREATED, Json(json!({ "id": appointment_id.0.to_string() }))).into_response(),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}

pub async fn reschedule_appointment(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(clinic): Extension<ClinicContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::RescheduleAppointmentRequest>,
) -> axum::response::Response {
    let appointment_id = match parse_appointment_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let cmd = CmdAuth::new(
        AppointmentCommand::RescheduleAppointment(RescheduleAppointment {
            clinic_id: clinic.clinic_id(),
            appointment_id,
            scheduled_at: body.scheduled_at,
            duration_minutes: body.duration_minutes,
            occurred_at: Utc::now(),
        }),
        permissions::APPOINTMENTS_WRITE,
    );
    let cmd = match cmd.authorized(&clinic, &principal) {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    match services.execute::<Appointment>(clinic.clinic_id(), appointment_id.0, AGGREGATE_TYPE, cmd, |_, id| {
        Appointment::empty(AppointmentId::new(id))
    }) {
        Ok(committed) => (
            StatusCode::OK,
            Json(json!({ "id": appointment_id.0.to_string(), "events_committed": committed.len() })),
        )
            .into_response(),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}

pub async fn change_status(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(clinic): Extension<ClinicContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::ChangeStatusRequest>,
) -> axum::response::Response {
    let appointment_id = match parse_appointment_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let status = match errors::parse_value::<AppointmentStatus>(&body.status) {
        Ok(s) => s,
        Err(resp) => return resp,
    };

    let cmd = CmdAuth::new(
        AppointmentCommand::ChangeAppointmentStatus(ChangeAppointmentStatus {
            clinic_id: clinic.clinic_id(),
            appointment_id,
            status,
            reason: body.reason,
            occurred_at: Utc::now(),
        }),
        permissions::APPOINTMENTS_WRITE,
    );
    let cmd = match cmd.authorized(&clinic, &principal) {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    match services.execute::<Appointment>(clinic.clinic_id(), appointment_id.0, AGGREGATE_TYPE, cmd, |_, id| {
        Appointment::empty(AppointmentId::new(id))
    }) {
        Ok(_) => (
            StatusCode::OK,
            Json(json!({ "id": appointment_id.0.to_string(), "status": status.as_str() })),
        )
            .into_response(),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}

pub async fn get_appointment(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(clinic): Extension<ClinicContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    if let Err(resp) = require(&clinic, &principal, permissions::APPOINTMENTS_READ) {
        return resp;
    }
    let appointment_id = match parse_appointment_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.appointments().get(clinic.clinic_id(), &appointment_id) {
        Some(rm) => (StatusCode::OK, Json(rm)).into_response(),
        None => errors::json_error(StatusCode::NOT_FOUND, "not_found", "appointment not found"),
    }
}

/// Day view when `date` is given (optionally by doctor/status), else everything.
pub async fn list_appointments(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(clinic): Extension<ClinicContext>,
    Extension(principal): Extension<PrincipalContext>,
    Query(query): Query<dto::AppointmentListQuery>,
) -> axum::response::Response {
    if let Err(resp) = require(&clinic, &principal, permissions::APPOINTMENTS_READ) {
        return resp;
    }
    let doctor_id = match errors::parse_optional_id(query.doctor_id.as_deref(), "doctor_id") {
        Ok(v) => v.map(|id| UserId::from_uuid(*id.as_uuid())),
        Err(resp) => return resp,
    };
    let status = match query.status.as_deref().filter(|s| !s.is_empty()) {
        Some(raw) => match errors::parse_value::<AppointmentStatus>(raw) {
            Ok(s) => Some(s),
            Err(resp) => return resp,
        },
        None => None,
    };

    let items = match query.date {
        Some(day) => services
            .appointments()
            .by_day(clinic.clinic_id(), day, DayFilter { doctor_id, status }),
        None => services
            .appointments()
            .list(clinic.clinic_id())
            .into_iter()
            .filter(|a| doctor_id.is_none_or(|d| a.doctor_id == Some(d)))
            .filter(|a| status.is_none_or(|s| a.status == s))
            .collect(),
    };

    (StatusCode::OK, Json(json!({ "items": items }))).into_response()
}

pub async fn today_appointments(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(clinic): Extension<ClinicContext>,
    Extension(principal): Extension<PrincipalContext>,
) -> axum::response::Response {
    if let Err(resp) = require(&clinic, &principal, permissions::APPOINTMENTS_READ) {
        return resp;
    }

    let items = services
        .appointments()
        .by_day(clinic.clinic_id(), Utc::now().date_naive(), DayFilter::default());
    (StatusCode::OK, Json(json!({ "items": items }))).into_response()
}

pub async fn upcoming_appointments(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(clinic): Extension<ClinicContext>,
    Extension(principal): Extension<PrincipalContext>,
    Query(query): Query<dto::LimitQuery>,
) -> axum::response::Response {
    if let Err(resp) = require(&clinic, &principal, permissions::APPOINTMENTS_READ) {
        return resp;
    }

    let limit = query.limit.unwrap_or(DEFAULT_UPCOMING_LIMIT);
    let items = services.appointments().upcoming(clinic.clinic_id(), Utc::now(), limit);
    (StatusCode::OK, Json(json!({ "items": items }))).into_response()
}
