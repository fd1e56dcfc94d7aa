//! Cross-aggregate checks on the patient a command is about.

use serde_json::Value as JsonValue;

use dentaflow_core::{AggregateRoot, ClinicId, DomainError};
use dentaflow_events::{EventBus, EventEnvelope};
use dentaflow_patients::{Patient, PatientId};
use dentaflow_scheduling::{Appointment, AppointmentId};

use crate::command_dispatcher::{CommandDispatcher, DispatchError};
use crate::event_store::EventStore;

/// Load a patient that may still be booked, treated or billed.
///
/// Unknown patients (including those of another clinic) are `NotFound`;
/// archived patients are an invariant violation.
pub fn active_patient<S, B>(
    dispatcher: &CommandDispatcher<S, B>,
    clinic_id: ClinicId,
    patient_id: PatientId,
) -> Result<Patient, DispatchError>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    let patient = dispatcher.load(clinic_id, patient_id.0, |_, id| Patient::empty(PatientId::new(id)))?;
    if patient.version() == 0 {
        return Err(DomainError::not_found("patient").into());
    }
    if patient.is_archived() {
        return Err(DomainError::invariant("patient is archived").into());
    }
    Ok(patient)
}

/// Load an appointment that must belong to `patient_id`.
pub fn appointment_of<S, B>(
    dispatcher: &CommandDispatcher<S, B>,
    clinic_id: ClinicId,
    appointment_id: AppointmentId,
    patient_id: PatientId,
) -> Result<Appointment, DispatchError>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    let appointment = dispatcher.load(clinic_id, appointment_id.0, |_, id| {
        Appointment::empty(AppointmentId::new(id))
    })?;
    match appointment.patient_id().filter(|_| appointment.exists()) {
        None => Err(DomainError::not_found("appointment").into()),
        Some(owner) if owner != patient_id => {
            Err(DomainError::invariant("appointment belongs to another patient").into())
        }
        Some(_) => Ok(appointment),
    }
}
