use core::str::FromStr;

use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use dentaflow_auth::AuthzError;
use dentaflow_core::AggregateId;
use dentaflow_infra::billing::BillingError;
use dentaflow_infra::command_dispatcher::DispatchError;

pub fn dispatch_error_to_response(err: DispatchError) -> axum::response::Response {
    match err {
        DispatchError::Conflict(msg) => json_error(StatusCode::CONFLICT, "conflict", msg),
        DispatchError::Validation(msg) => json_error(StatusCode::BAD_REQUEST, "validation_error", msg),
        DispatchError::InvariantViolation(msg) => {
            json_error(StatusCode::UNPROCESSABLE_ENTITY, "invariant_violation", msg)
        }
        DispatchError::NotFound(what) => json_error(StatusCode::NOT_FOUND, "not_found", format!("{what} not found")),
        DispatchError::Deserialize(msg) => {
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "deserialize_error", msg)
        }
        DispatchError::Store(e) => json_error(StatusCode::INTERNAL_SERVER_ERROR, "store_error", e.to_string()),
        DispatchError::Publish(msg) => json_error(StatusCode::BAD_GATEWAY, "publish_error", msg),
        DispatchError::ClinicIsolation(msg) => json_error(StatusCode::FORBIDDEN, "clinic_isolation", msg),
    }
}

pub fn billing_error_to_response(err: BillingError) -> axum::response::Response {
    match err {
        BillingError::AppointmentNotFound => json_error(StatusCode::NOT_FOUND, "not_found", err.to_string()),
        BillingError::NoTreatments => json_error(StatusCode::BAD_REQUEST, "no_treatments", err.to_string()),
        BillingError::Dispatch(e) => dispatch_error_to_response(e),
    }
}

pub fn authz_error_to_response(err: AuthzError) -> axum::response::Response {
    match err {
        AuthzError::ClinicMismatch => json_error(StatusCode::FORBIDDEN, "clinic_mismatch", err.to_string()),
        AuthzError::Forbidden(_) => json_error(StatusCode::FORBIDDEN, "forbidden", err.to_string()),
    }
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

/// Parse a path or body identifier; `what` names it in the error message.
pub fn parse_id(raw: &str, what: &str) -> Result<AggregateId, axum::response::Response> {
    raw.trim()
        .parse::<AggregateId>()
        .map_err(|_| json_error(StatusCode::BAD_REQUEST, "invalid_id", format!("invalid {what}")))
}

pub fn parse_optional_id(raw: Option<&str>, what: &str) -> Result<Option<AggregateId>, axum::response::Response> {
    raw.filter(|s| !s.trim().is_empty())
        .map(|s| parse_id(s, what))
        .transpose()
}

/// Parse an enum-like query or body value (statuses, gender).
pub fn parse_value<T>(raw: &str) -> Result<T, axum::response::Response>
where
    T: FromStr,
    T::Err: core::fmt::Display,
{
    raw.parse::<T>()
        .map_err(|e| json_error(StatusCode::BAD_REQUEST, "validation_error", e.to_string()))
}
