use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use serde_json::{Value as JsonValue, json};

use dentaflow_clinical::{ClinicalNotes, ClinicalNotesPatch};
use dentaflow_core::Money;
use dentaflow_infra::projections::PatientReadModel;
use dentaflow_invoicing::{Discount, PaymentMethod};
use dentaflow_patients::age_on;

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
pub struct RegisterPatientRequest {
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
    pub phone: String,
    pub date_of_birth: Option<NaiveDate>,
    pub gender: Option<String>,
    pub address: Option<String>,
    #[serde(default)]
    pub allergies: Vec<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdatePatientRequest {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub date_of_birth: Option<NaiveDate>,
    pub gender: Option<String>,
    pub address: Option<String>,
    pub allergies: Option<Vec<String>>,
    pub notes: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ReasonRequest {
    pub reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PatientSearchQuery {
    pub q: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ScheduleAppointmentRequest {
    pub patient_id: String,
    pub doctor_id: Option<String>,
    pub scheduled_at: DateTime<Utc>,
    pub duration_minutes: Option<u32>,
    pub appointment_type: Option<String>,
    pub chief_complaint: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RescheduleAppointmentRequest {
    pub scheduled_at: DateTime<Utc>,
    pub duration_minutes: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct ChangeStatusRequest {
    pub status: String,
    pub reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct AppointmentListQuery {
    pub date: Option<NaiveDate>,
    pub doctor_id: Option<String>,
    pub status: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct LimitQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct CreateTreatmentRequest {
    pub code: Option<String>,
    pub name: String,
    pub description: Option<String>,
    /// Minor currency units.
    pub standard_cost: Money,
    pub category: String,
    pub duration_minutes: Option<u32>,
    pub active: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateTreatmentRequest {
    pub code: Option<String>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub standard_cost: Option<Money>,
    pub category: Option<String>,
    pub duration_minutes: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
pub struct TreatmentListQuery {
    pub category: Option<String>,
    #[serde(default)]
    pub include_inactive: bool,
}

#[derive(Debug, Deserialize)]
pub struct RecordTreatmentRequest {
    pub appointment_id: String,
    pub procedure_id: String,
    pub tooth_number: Option<String>,
    pub surface: Option<String>,
    pub diagnosis: Option<String>,
    pub notes: Option<String>,
    pub cost_override: Option<Money>,
}

impl RecordTreatmentRequest {
    pub fn clinical(&self) -> ClinicalNotes {
        ClinicalNotes {
            tooth_number: self.tooth_number.clone(),
            surface: self.surface.clone(),
            diagnosis: self.diagnosis.clone(),
            notes: self.notes.clone(),
            cost_override: self.cost_override,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct AmendClinicalRecordRequest {
    pub tooth_number: Option<String>,
    pub surface: Option<String>,
    pub diagnosis: Option<String>,
    pub notes: Option<String>,
    pub cost_override: Option<Money>,
}

impl From<AmendClinicalRecordRequest> for ClinicalNotesPatch {
    fn from(r: AmendClinicalRecordRequest) -> Self {
        ClinicalNotesPatch {
            tooth_number: r.tooth_number,
            surface: r.surface,
            diagnosis: r.diagnosis,
            notes: r.notes,
            cost_override: r.cost_override,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ClinicalRecordQuery {
    pub patient_id: Option<String>,
    pub appointment_id: Option<String>,
    pub tooth: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LineItemRequest {
    pub description: String,
    pub quantity: u32,
    pub unit_price: Money,
    pub clinical_record_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct IssueInvoiceRequest {
    pub patient_id: String,
    pub appointment_id: Option<String>,
    pub items: Vec<LineItemRequest>,
    pub discount: Option<Discount>,
    pub tax: Option<Money>,
    pub notes: Option<String>,
    pub due_date: Option<NaiveDate>,
}

#[derive(Debug, Deserialize)]
pub struct InvoiceFromAppointmentRequest {
    pub appointment_id: String,
}

#[derive(Debug, Deserialize)]
pub struct RecordPaymentRequest {
    pub amount: Money,
    pub method: PaymentMethod,
    pub reference: Option<String>,
    pub notes: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateInvoiceTermsRequest {
    pub notes: Option<String>,
    pub due_date: Option<NaiveDate>,
    pub discount: Option<Discount>,
    pub tax: Option<Money>,
}

#[derive(Debug, Deserialize)]
pub struct ReplaceInvoiceItemsRequest {
    pub items: Vec<LineItemRequest>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RefundInvoiceRequest {
    pub amount: Option<Money>,
    pub reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct InvoiceListQuery {
    pub patient_id: Option<String>,
    pub status: Option<String>,
    pub limit: Option<usize>,
}

// -------------------------
// Response mapping
// -------------------------

/// Patient directory entry plus the age derived for `today`.
pub fn patient_to_json(rm: &PatientReadModel, today: NaiveDate) -> JsonValue {
    let age = match rm.details.date_of_birth {
        Some(dob) => Some(age_on(dob, today)),
        None => rm.details.reported_age.map(u32::from),
    };
    let mut value = serde_json::to_value(rm).unwrap_or_else(|_| json!({}));
    if let Some(obj) = value.as_object_mut() {
        obj.insert("full_name".into(), json!(rm.details.full_name()));
        obj.insert("age".into(), json!(age));
    }
    value
}
