//! Public online-booking webhook.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::Extension,
    http::StatusCode,
    response::IntoResponse,
    routing::get,
};
use chrono::Utc;
use serde_json::{Value as JsonValue, json};

use dentaflow_infra::booking::{BookingError, BookingRequest};
use dentaflow_infra::command_dispatcher::DispatchError;

use crate::app::services::AppServices;

pub fn router() -> Router {
    Router::new().route("/webhook", get(webhook_status).post(receive_booking))
}

pub async fn webhook_status() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "message": "Booking webhook is active",
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

fn booking_error(status: StatusCode, code: &'static str, message: impl Into<String>) -> axum::response::Response {
    (
        status,
        Json(json!({
            "success": false,
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

fn booking_error_to_response(err: BookingError) -> axum::response::Response {
    match err {
        BookingError::MissingFields | BookingError::Invalid(_) => {
            booking_error(StatusCode::BAD_REQUEST, "validation_error", err.to_string())
        }
        BookingError::NoClinic => booking_error(StatusCode::INTERNAL_SERVER_ERROR, "no_clinic", err.to_string()),
        BookingError::Dispatch(DispatchError::Validation(msg)) => {
            booking_error(StatusCode::BAD_REQUEST, "validation_error", msg)
        }
        BookingError::Dispatch(DispatchError::InvariantViolation(msg)) => {
            booking_error(StatusCode::UNPROCESSABLE_ENTITY, "invariant_violation", msg)
        }
        BookingError::Dispatch(DispatchError::Conflict(msg)) => booking_error(StatusCode::CONFLICT, "conflict", msg),
        BookingError::Dispatch(e) => {
            tracing::error!(error = %e, "booking could not be stored");
            booking_error(StatusCode::INTERNAL_SERVER_ERROR, "booking_failed", "Failed to process booking")
        }
    }
}

pub async fn receive_booking(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<JsonValue>,
) -> axum::response::Response {
    let request = match BookingRequest::from_json(body) {
        Ok(r) => r,
        Err(e) => return booking_error_to_response(e),
    };

    match services.book(&request, Utc::now()) {
        Ok(outcome) => {
            let message = if outcome.duplicate {
                "Booking already exists"
            } else {
                "Booking confirmed successfully!"
            };
            (
                StatusCode::OK,
                Json(json!({
                    "success": true,
                    "message": message,
                    "patientId": outcome.patient_id.0.to_string(),
                    "appointmentId": outcome.appointment_id.0.to_string(),
                    "patientCreated": outcome.patient_created,
                    "duplicate": outcome.duplicate,
                })),
            )
                .into_response()
        }
        Err(e) => booking_error_to_response(e),
    }
}
