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

use dentaflow_auth::{Permission, permissions};
use dentaflow_clinical::ClinicalRecordId;
use dentaflow_core::{AggregateId, Money};
use dentaflow_infra::projections::{InvoiceFilter, invoices::AGGREGATE_TYPE};
use dentaflow_invoicing::{
    CancelInvoice, Discount, Invoice, InvoiceCommand, InvoiceId, InvoiceStatus, IssueInvoice, LineItem,
    RecordPayment, RefundInvoice, ReplaceInvoiceItems, UpdateInvoiceTerms,
};
use dentaflow_patients::PatientId;
use dentaflow_scheduling::AppointmentId;

use crate::app::routes::common::{CmdAuth, require};
use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::{ClinicContext, PrincipalContext};

pub fn router() -> Router {
    Router::new()
        .route("/", post(issue_invoice).get(list_invoices))
        .route("/from-appointment", post(invoice_from_appointment))
        .route("/payments", get(list_payments))
        .route("/:id", get(get_invoice).patch(update_terms))
        .route("/:id/items", axum::routing::put(replace_items))
        .route("/:id/payments", post(record_payment))
        .route("/:id/cancel", post(cancel_invoice))
        .route("/:id/refund", post(refund_invoice))
}

fn parse_invoice_id(raw: &str) -> Result<InvoiceId, axum::response::Response> {
    errors::parse_id(raw, "invoice id").map(InvoiceId::new)
}

fn line_items(items: Vec<dto::LineItemRequest>) -> Result<Vec<LineItem>, axum::response::Response> {
    items
        .into_iter()
        .map(|item| {
            let clinical_record_id =
                errors::parse_optional_id(item.clinical_record_id.as_deref(), "clinical_record_id")?
                    .map(ClinicalRecordId::new);
            Ok(LineItem {
                description: item.description,
                quantity: item.quantity,
                unit_price: item.unit_price,
                clinical_record_id,
            })
        })
        .collect()
}

/// Authorize and dispatch a command against an existing invoice.
fn execute(
    services: &AppServices,
    clinic: &ClinicContext,
    principal: &PrincipalContext,
    invoice_id: InvoiceId,
    command: InvoiceCommand,
    required: Permission,
) -> axum::response::Response {
    let cmd = match CmdAuth::new(command, required).authorized(clinic, principal) {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    match services.execute::<Invoice>(clinic.clinic_id(), invoice_id.0, AGGREGATE_TYPE, cmd, |_, id| {
        Invoice::empty(InvoiceId::new(id))
    }) {
        Ok(committed) => (
            StatusCode::OK,
            Json(json!({ "id": invoice_id.0.to_string(), "events_committed": committed.len() })),
        )
            .into_response(),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}

pub async fn issue_invoice(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(clinic): Extension<ClinicContext>,
    Extension(principal): Extension<PrincipalContext>,
    Json(body): Json<dto::IssueInvoiceRequest>,
) -> axum::response::Response {
    let patient_id = match errors::parse_id(&body.patient_id, "patient_id") {
        Ok(v) => PatientId::new(v),
        Err(resp) => return resp,
    };
    let appointment_id = match errors::parse_optional_id(body.appointment_id.as_deref(), "appointment_id") {
        Ok(v) => v.map(AppointmentId::new),
        Err(resp) => return resp,
    };
    let items = match line_items(body.items) {
        Ok(items) => items,
        Err(resp) => return resp,
    };

    let invoice_id = InvoiceId::new(AggregateId::new());
    let cmd = CmdAuth::new(
        InvoiceCommand::IssueInvoice(IssueInvoice {
            clinic_id: clinic.clinic_id(),
            invoice_id,
            patient_id,
            appointment_id,
            items,
            discount: body.discount.unwrap_or_else(Discount::none),
            tax: body.tax.unwrap_or(Money::ZERO),
            notes: body.notes,
            due_date: body.due_date,
            occurred_at: Utc::now(),
        }),
        permissions::INVOICES_WRITE,
    );
    let cmd = match cmd.authorized(&clinic, &principal) {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    match services.issue_invoice(clinic.clinic_id(), patient_id, appointment_id, invoice_id, cmd) {
        Ok(_) => created(&services, &clinic, invoice_id),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}

pub async fn invoice_from_appointment(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(clinic): Extension<ClinicContext>,
    Extension(principal): Extension<PrincipalContext>,
    Json(body): Json<dto::InvoiceFromAppointmentRequest>,
) -> axum::response::Response {
    if let Err(resp) = require(&clinic, &principal, permissions::INVOICES_WRITE) {
        return resp;
    }
    let appointment_id = match errors::parse_id(&body.appointment_id, "appointment_id") {
        Ok(v) => AppointmentId::new(v),
        Err(resp) => return resp,
    };

    match services.invoice_appointment(clinic.clinic_id(), appointment_id, Utc::now()) {
        Ok(invoice_id) => created(&services, &clinic, invoice_id),
        Err(e) => errors::billing_error_to_response(e),
    }
}

fn created(services: &AppServices, clinic: &ClinicContext, invoice_id: InvoiceId) -> axum::response::Response {
    let invoice_number = services
        .invoices()
        .get(clinic.clinic_id(), &invoice_id)
        .map(|rm| rm.invoice_number.to_string());
    (
        StatusCode::CREATED,
        Json(json!({ "id": invoice_id.0.to_string(), "invoice_number": invoice_number })),
    )
        .into_response()
}

pub async fn record_payment(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(clinic): Extension<ClinicContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::RecordPaymentRequest>,
) -> axum::response::Response {
    let invoice_id = match parse_invoice_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let payment_id = AggregateId::new();

    let command = InvoiceCommand::RecordPayment(RecordPayment {
        clinic_id: clinic.clinic_id(),
        invoice_id,
        payment_id,
        amount: body.amount,
        method: body.method,
        reference: body.reference,
        notes: body.notes,
        paid_at: body.paid_at,
        occurred_at: Utc::now(),
    });
    let resp = execute(&services, &clinic, &principal, invoice_id, command, permissions::INVOICES_PAY);
    if resp.status() != StatusCode::OK {
        return resp;
    }

    match services.invoices().get(clinic.clinic_id(), &invoice_id) {
        Some(rm) => (
            StatusCode::CREATED,
            Json(json!({
                "id": invoice_id.0.to_string(),
                "payment_id": payment_id.to_string(),
                "status": rm.status.as_str(),
                "amount_paid": rm.amount_paid,
                "balance": rm.balance,
            })),
        )
            .into_response(),
        None => (
            StatusCode::CREATED,
            Json(json!({ "id": invoice_id.0.to_string(), "payment_id": payment_id.to_string() })),
        )
            .into_response(),
    }
}

pub async fn update_terms(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(clinic): Extension<ClinicContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::UpdateInvoiceTermsRequest>,
) -> axum::response::Response {
    let invoice_id = match parse_invoice_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let command = InvoiceCommand::UpdateInvoiceTerms(UpdateInvoiceTerms {
        clinic_id: clinic.clinic_id(),
        invoice_id,
        notes: body.notes,
        due_date: body.due_date,
        discount: body.discount,
        tax: body.tax,
        occurred_at: Utc::now(),
    });
    execute(&services, &clinic, &principal, invoice_id, command, permissions::INVOICES_WRITE)
}

pub async fn replace_items(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(clinic): Extension<ClinicContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::ReplaceInvoiceItemsRequest>,
) -> axum::response::Response {
    let invoice_id = match parse_invoice_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let items = match line_items(body.items) {
        Ok(items) => items,
        Err(resp) => return resp,
    };
    let command = InvoiceCommand::ReplaceInvoiceItems(ReplaceInvoiceItems {
        clinic_id: clinic.clinic_id(),
        invoice_id,
        items,
        occurred_at: Utc::now(),
    });
    execute(&services, &clinic, &principal, invoice_id, command, permissions::INVOICES_WRITE)
}

pub async fn cancel_invoice(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(clinic): Extension<ClinicContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    body: Option<Json<dto::ReasonRequest>>,
) -> axum::response::Response {
    let invoice_id = match parse_invoice_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let command = InvoiceCommand::CancelInvoice(CancelInvoice {
        clinic_id: clinic.clinic_id(),
        invoice_id,
        reason: body.and_then(|Json(b)| b.reason),
        occurred_at: Utc::now(),
    });
    execute(&services, &clinic, &principal, invoice_id, command, permissions::INVOICES_WRITE)
}

pub async fn refund_invoice(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(clinic): Extension<ClinicContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    body: Option<Json<dto::RefundInvoiceRequest>>,
) -> axum::response::Response {
    let invoice_id = match parse_invoice_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let body = body.map(|Json(b)| b).unwrap_or_default();
    let command = InvoiceCommand::RefundInvoice(RefundInvoice {
        clinic_id: clinic.clinic_id(),
        invoice_id,
        amount: body.amount,
        reason: body.reason,
        occurred_at: Utc::now(),
    });
    execute(&services, &clinic, &principal, invoice_id, command, permissions::INVOICES_PAY)
}

pub async fn get_invoice(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(clinic): Extension<ClinicContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    if let Err(resp) = require(&clinic, &principal, permissions::INVOICES_READ) {
        return resp;
    }
    let invoice_id = match parse_invoice_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.invoices().get(clinic.clinic_id(), &invoice_id) {
        Some(rm) => (StatusCode::OK, Json(rm)).into_response(),
        None => errors::json_error(StatusCode::NOT_FOUND, "not_found", "invoice not found"),
    }
}

pub async fn list_invoices(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(clinic): Extension<ClinicContext>,
    Extension(principal): Extension<PrincipalContext>,
    Query(query): Query<dto::InvoiceListQuery>,
) -> axum::response::Response {
    if let Err(resp) = require(&clinic, &principal, permissions::INVOICES_READ) {
        return resp;
    }
    let patient_id = match errors::parse_optional_id(query.patient_id.as_deref(), "patient_id") {
        Ok(v) => v.map(PatientId::new),
        Err(resp) => return resp,
    };
    let status = match query.status.as_deref().filter(|s| !s.is_empty()) {
        Some(raw) => match errors::parse_value::<InvoiceStatus>(raw) {
            Ok(s) => Some(s),
            Err(resp) => return resp,
        },
        None => None,
    };

    let items = services.invoices().list(
        clinic.clinic_id(),
        InvoiceFilter {
            patient_id,
            status,
            limit: query.limit,
        },
    );
    (StatusCode::OK, Json(json!({ "items": items }))).into_response()
}

/// Every payment received by the clinic, newest first.
pub async fn list_payments(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(clinic): Extension<ClinicContext>,
    Extension(principal): Extension<PrincipalContext>,
) -> axum::response::Response {
    if let Err(resp) = require(&clinic, &principal, permissions::INVOICES_READ) {
        return resp;
    }

    let items = services.invoices().payments(clinic.clinic_id());
    (StatusCode::OK, Json(json!({ "items": items }))).into_response()
}
