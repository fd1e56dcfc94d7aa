//! Appointment → invoice derivation.
//!
//! ```text
//! Appointment (completed visit)
//!   └─ live clinical records ──► one line item per record
//!                                 └─► IssueInvoice (no discount, no tax)
//! ```

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use thiserror::Error;

use dentaflow_core::{AggregateId, ClinicId, Money};
use dentaflow_events::{EventBus, EventEnvelope};
use dentaflow_invoicing::{
    Discount, Invoice, InvoiceCommand, InvoiceId, IssueInvoice, LineItem,
};
use dentaflow_scheduling::{Appointment, AppointmentId};

use crate::admission::active_patient;
use crate::command_dispatcher::{CommandDispatcher, DispatchError};
use crate::event_store::{EventStore, StoredEvent};
use crate::projections::clinical_records::ClinicalRecordReadModel;
use crate::projections::{ClinicalRecordsProjection, invoices};
use crate::read_model::ClinicStore;

#[derive(Debug, Error)]
pub enum BillingError {
    #[error("appointment not found")]
    AppointmentNotFound,
    #[error("no treatments found for this appointment")]
    NoTreatments,
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

/// The invoice line billing one clinical record.
pub fn line_item_for(record: &ClinicalRecordReadModel) -> LineItem {
    let description = match record.clinical.tooth_number.as_deref() {
        Some(tooth) => format!("{} (Tooth {tooth})", record.procedure_name),
        None => record.procedure_name.clone(),
    };
    LineItem {
        description,
        quantity: 1,
        unit_price: record.effective_cost,
        clinical_record_id: Some(record.record_id),
    }
}

/// Issue an invoice for everything recorded during an appointment.
///
/// The appointment is read from its stream; the records come from the
/// clinical records read model. Returns the new invoice id with the
/// committed invoice events.
pub fn generate_invoice_from_appointment<S, B, R>(
    dispatcher: &CommandDispatcher<S, B>,
    records: &ClinicalRecordsProjection<R>,
    clinic_id: ClinicId,
    appointment_id: AppointmentId,
    now: DateTime<Utc>,
) -> Result<(InvoiceId, Vec<StoredEvent>), BillingError>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
    R: ClinicStore<dentaflow_clinical::ClinicalRecordId, ClinicalRecordReadModel>,
{
    let appointment = dispatcher.load(clinic_id, appointment_id.0, |_, id| {
        Appointment::empty(AppointmentId::new(id))
    })?;
    let Some(patient_id) = appointment.patient_id().filter(|_| appointment.exists()) else {
        return Err(BillingError::AppointmentNotFound);
    };

    let items: Vec<LineItem> = records
        .by_appointment(clinic_id, appointment_id)
        .iter()
        .map(line_item_for)
        .collect();
    if items.is_empty() {
        return Err(BillingError::NoTreatments);
    }

    active_patient(dispatcher, clinic_id, patient_id)?;

    let invoice_id = InvoiceId::new(AggregateId::new());
    let committed = dispatcher.dispatch(
        clinic_id,
        invoice_id.0,
        invoices::AGGREGATE_TYPE,
        InvoiceCommand::IssueInvoice(IssueInvoice {
            clinic_id,
            invoice_id,
            patient_id,
            appointment_id: Some(appointment_id),
            items,
            discount: Discount::none(),
            tax: Money::ZERO,
            notes: None,
            due_date: None,
            occurred_at: now,
        }),
        |_, id| Invoice::empty(InvoiceId::new(id)),
    )?;

    tracing::info!(
        clinic_id = %clinic_id,
        appointment_id = %appointment_id.0,
        invoice_id = %invoice_id.0,
        "invoice generated from appointment"
    );
    Ok((invoice_id, committed))
}
