//! Public online-booking intake.
//!
//! A booking form posts a patient's name and phone with a requested slot.
//! The patient is matched on the last ten digits of the phone (updated when
//! found, registered otherwise) and an appointment is scheduled unless the
//! same patient already holds that exact slot.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use thiserror::Error;

use dentaflow_core::{Aggregate, AggregateId, ClinicId};
use dentaflow_events::{EventBus, EventEnvelope};
use dentaflow_patients::{
    Gender, Patient, PatientCommand, PatientDetails, PatientDetailsPatch, PatientId, RegisterPatient,
    RegistrationSource, UpdatePatientDetails, normalize_phone,
};
use dentaflow_scheduling::{
    Appointment, AppointmentCommand, AppointmentId, DEFAULT_APPOINTMENT_TYPE, ScheduleAppointment,
};

use crate::command_dispatcher::{CommandDispatcher, DispatchError};
use crate::event_store::{EventStore, StoredEvent};
use crate::projections::appointments::{self, AppointmentReadModel};
use crate::projections::patients::{self, PatientReadModel};
use crate::projections::{AppointmentsProjection, PatientsProjection};
use crate::read_model::ClinicStore;

pub const BOOKING_DURATION_MINUTES: u32 = 30;

/// Where online bookings land.
#[derive(Debug, Clone)]
pub struct BookingIntake {
    /// Clinic receiving public bookings; `None` rejects every booking.
    pub clinic_id: Option<ClinicId>,
    /// Prefixed to phone numbers typed without a `+`.
    pub default_country_code: String,
}

#[derive(Debug, Error)]
pub enum BookingError {
    #[error("Missing required fields: fullName, phoneNumber, date, time")]
    MissingFields,
    #[error("{0}")]
    Invalid(String),
    #[error("no clinic configured")]
    NoClinic,
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

/// Age as posted by the form: a number or a numeric string.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum FormAge {
    Number(u64),
    Text(String),
}

/// The booking form payload.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingRequest {
    pub full_name: Option<String>,
    pub phone_number: Option<String>,
    pub age: Option<FormAge>,
    pub gender: Option<String>,
    pub address: Option<String>,
    pub dental_service: Option<String>,
    /// `YYYY-MM-DD`
    pub date: Option<String>,
    /// `HH:MM`
    pub time: Option<String>,
}

impl BookingRequest {
    /// Accept the form either at the top level or nested under `data`.
    pub fn from_json(body: JsonValue) -> Result<Self, BookingError> {
        let form = match body {
            JsonValue::Object(mut map) if map.get("data").is_some_and(JsonValue::is_object) => {
                map.remove("data").unwrap_or_default()
            }
            other => other,
        };
        serde_json::from_value(form).map_err(|e| BookingError::Invalid(format!("invalid booking payload: {e}")))
    }
}

/// Result of one accepted booking.
#[derive(Debug, Clone)]
pub struct BookingOutcome {
    pub patient_id: PatientId,
    pub appointment_id: AppointmentId,
    pub patient_created: bool,
    /// The patient already held this slot; nothing was scheduled.
    pub duplicate: bool,
    /// Events appended while handling the booking, in commit order.
    pub committed: Vec<StoredEvent>,
}

/// Validated form content.
#[derive(Debug)]
struct BookingForm {
    first_name: String,
    last_name: String,
    phone: String,
    age: Option<u8>,
    gender: Option<Gender>,
    address: Option<String>,
    service: Option<String>,
    slot: DateTime<Utc>,
}

fn non_blank(v: &Option<String>) -> Option<&str> {
    v.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

impl BookingForm {
    fn parse(req: &BookingRequest, default_country_code: &str) -> Result<Self, BookingError> {
        let (Some(full_name), Some(phone), Some(date), Some(time)) = (
            non_blank(&req.full_name),
            non_blank(&req.phone_number),
            non_blank(&req.date),
            non_blank(&req.time),
        ) else {
            return Err(BookingError::MissingFields);
        };

        let (first_name, last_name) = match full_name.split_once(' ') {
            Some((first, rest)) => (first.to_string(), rest.trim().to_string()),
            None => (full_name.to_string(), String::new()),
        };

        let date = NaiveDate::parse_from_str(date, "%Y-%m-%d")
            .map_err(|_| BookingError::Invalid(format!("invalid date: {date}")))?;
        let time = NaiveTime::parse_from_str(time, "%H:%M")
            .map_err(|_| BookingError::Invalid(format!("invalid time: {time}")))?;

        let age = match &req.age {
            None => None,
            Some(FormAge::Number(n)) => Some(*n),
            Some(FormAge::Text(s)) if s.trim().is_empty() => None,
            Some(FormAge::Text(s)) => Some(
                s.trim()
                    .parse::<u64>()
                    .map_err(|_| BookingError::Invalid(format!("invalid age: {s}")))?,
            ),
        }
        .map(|n| u8::try_from(n).map_err(|_| BookingError::Invalid(format!("invalid age: {n}"))))
        .transpose()?;

        let gender = non_blank(&req.gender)
            .map(str::parse::<Gender>)
            .transpose()
            .map_err(|e| BookingError::Invalid(e.to_string()))?;

        Ok(Self {
            first_name,
            last_name,
            phone: normalize_phone(phone, default_country_code),
            age,
            gender,
            address: non_blank(&req.address).map(str::to_string),
            service: non_blank(&req.dental_service).map(str::to_string),
            slot: date.and_time(time).and_utc(),
        })
    }

    fn appointment_notes(&self) -> String {
        match &self.service {
            Some(service) => format!("Online booking - {service}"),
            None => "Online booking".to_string(),
        }
    }
}

/// Turn one booking form into a patient and an appointment.
///
/// The caller applies `committed` to its read models.
pub fn process_booking<S, B, P, A>(
    dispatcher: &CommandDispatcher<S, B>,
    patients: &PatientsProjection<P>,
    calendar: &AppointmentsProjection<A>,
    intake: &BookingIntake,
    request: &BookingRequest,
    now: DateTime<Utc>,
) -> Result<BookingOutcome, BookingError>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
    P: ClinicStore<PatientId, PatientReadModel>,
    A: ClinicStore<AppointmentId, AppointmentReadModel>,
{
    let form = BookingForm::parse(request, &intake.default_country_code)?;
    let Some(clinic_id) = intake.clinic_id else {
        tracing::error!("booking received but no intake clinic is configured");
        return Err(BookingError::NoClinic);
    };

    let mut committed = Vec::new();
    let existing = patients.find_by_phone(clinic_id, &form.phone);
    let patient_created = existing.is_none();
    let patient_id = existing
        .as_ref()
        .map(|found| found.patient_id)
        .unwrap_or_else(|| PatientId::new(AggregateId::new()));

    let duplicate = existing
        .as_ref()
        .and_then(|_| calendar.find_for_patient_at(clinic_id, patient_id, form.slot));

    // Nothing may be written for a slot the calendar would refuse: a patient
    // committed without its appointment would never reach the read models.
    let appointment_id = AppointmentId::new(AggregateId::new());
    let schedule = AppointmentCommand::ScheduleAppointment(ScheduleAppointment {
        clinic_id,
        appointment_id,
        patient_id,
        doctor_id: None,
        scheduled_at: form.slot,
        duration_minutes: Some(BOOKING_DURATION_MINUTES),
        appointment_type: Some(form.service.clone().unwrap_or_else(|| DEFAULT_APPOINTMENT_TYPE.to_string())),
        chief_complaint: None,
        notes: Some(form.appointment_notes()),
        occurred_at: now,
    });
    if duplicate.is_none() {
        Appointment::empty(appointment_id)
            .handle(&schedule)
            .map_err(DispatchError::from)?;
    }

    if patient_created {
        committed.extend(dispatcher.dispatch(
            clinic_id,
            patient_id.0,
            patients::AGGREGATE_TYPE,
            PatientCommand::RegisterPatient(RegisterPatient {
                clinic_id,
                patient_id,
                details: PatientDetails {
                    first_name: form.first_name.clone(),
                    last_name: form.last_name.clone(),
                    email: None,
                    phone: form.phone.clone(),
                    date_of_birth: None,
                    reported_age: form.age,
                    gender: form.gender,
                    address: form.address.clone(),
                    allergies: vec![],
                    notes: None,
                },
                source: RegistrationSource::OnlineBooking,
                occurred_at: now,
            }),
            |_, id| Patient::empty(PatientId::new(id)),
        )?);
        tracing::info!(clinic_id = %clinic_id, patient_id = %patient_id.0, "booking registered new patient");
    } else {
        committed.extend(dispatcher.dispatch(
            clinic_id,
            patient_id.0,
            patients::AGGREGATE_TYPE,
            PatientCommand::UpdatePatientDetails(UpdatePatientDetails {
                clinic_id,
                patient_id,
                changes: PatientDetailsPatch {
                    first_name: Some(form.first_name.clone()),
                    last_name: Some(form.last_name.clone()).filter(|n| !n.is_empty()),
                    reported_age: form.age,
                    gender: form.gender,
                    address: form.address.clone(),
                    ..PatientDetailsPatch::default()
                },
                occurred_at: now,
            }),
            |_, id| Patient::empty(PatientId::new(id)),
        )?);
        tracing::info!(clinic_id = %clinic_id, patient_id = %patient_id.0, "booking matched existing patient");
    }

    if let Some(booked) = duplicate {
        tracing::info!(
            clinic_id = %clinic_id,
            appointment_id = %booked.appointment_id.0,
            "booking already exists"
        );
        return Ok(BookingOutcome {
            patient_id,
            appointment_id: booked.appointment_id,
            patient_created: false,
            duplicate: true,
            committed,
        });
    }

    committed.extend(dispatcher.dispatch(
        clinic_id,
        appointment_id.0,
        appointments::AGGREGATE_TYPE,
        schedule,
        |_, id| Appointment::empty(AppointmentId::new(id)),
    )?);
    tracing::info!(
        clinic_id = %clinic_id,
        appointment_id = %appointment_id.0,
        scheduled_at = %form.slot,
        "online booking scheduled"
    );

    Ok(BookingOutcome {
        patient_id,
        appointment_id,
        patient_created,
        duplicate: false,
        committed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use chrono::TimeZone;
    use dentaflow_events::InMemoryEventBus;
    use dentaflow_scheduling::AppointmentStatus;
    use serde_json::json;

    use crate::event_store::InMemoryEventStore;
    use crate::projections::Projection;
    use crate::read_model::InMemoryClinicStore;

    struct Desk {
        dispatcher: CommandDispatcher<Arc<InMemoryEventStore>, Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>>,
        patients: PatientsProjection<Arc<InMemoryClinicStore<PatientId, PatientReadModel>>>,
        calendar: AppointmentsProjection<Arc<InMemoryClinicStore<AppointmentId, AppointmentReadModel>>>,
        intake: BookingIntake,
    }

    impl Desk {
        fn new() -> Self {
            Self {
                dispatcher: CommandDispatcher::new(Arc::new(InMemoryEventStore::new()), Arc::new(InMemoryEventBus::new())),
                patients: PatientsProjection::new(Arc::default()),
                calendar: AppointmentsProjection::new(Arc::default()),
                intake: BookingIntake {
                    clinic_id: Some(ClinicId::new()),
                    default_country_code: "+91".into(),
                },
            }
        }

        fn book(&self, body: JsonValue) -> Result<BookingOutcome, BookingError> {
            let request = BookingRequest::from_json(body)?;
            let now = Utc.with_ymd_and_hms(2025, 3, 1, 8, 0, 0).unwrap();
            let outcome = process_booking(&self.dispatcher, &self.patients, &self.calendar, &self.intake, &request, now)?;
            for stored in &outcome.committed {
                let env = stored.to_envelope();
                self.patients.apply_envelope(&env).unwrap();
                self.calendar.apply_envelope(&env).unwrap();
            }
            Ok(outcome)
        }

        fn clinic(&self) -> ClinicId {
            self.intake.clinic_id.unwrap()
        }
    }

    fn form() -> JsonValue {
        json!({
            "fullName": "Anita Rao Kulkarni",
            "phoneNumber": "09876543210",
            "age": "34",
            "gender": "Female",
            "dentalService": "Teeth Cleaning",
            "date": "2025-03-10",
            "time": "14:30"
        })
    }

    #[test]
    fn first_booking_registers_patient_and_schedules_slot() {
        let desk = Desk::new();
        let outcome = desk.book(form()).unwrap();
        assert!(outcome.patient_created);
        assert!(!outcome.duplicate);

        let patient = desk.patients.get(desk.clinic(), &outcome.patient_id).unwrap();
        assert_eq!(patient.details.first_name, "Anita");
        assert_eq!(patient.details.last_name, "Rao Kulkarni");
        assert_eq!(patient.details.phone, "+919876543210");
        assert_eq!(patient.details.reported_age, Some(34));
        assert_eq!(patient.source, RegistrationSource::OnlineBooking);

        let appt = desk.calendar.get(desk.clinic(), &outcome.appointment_id).unwrap();
        assert_eq!(appt.scheduled_at, Utc.with_ymd_and_hms(2025, 3, 10, 14, 30, 0).unwrap());
        assert_eq!(appt.appointment_type, "Teeth Cleaning");
        assert_eq!(appt.duration_minutes, 30);
        assert_eq!(appt.notes.as_deref(), Some("Online booking - Teeth Cleaning"));
        assert_eq!(appt.status, AppointmentStatus::Scheduled);
    }

    #[test]
    fn repeated_booking_is_reported_as_duplicate() {
        let desk = Desk::new();
        let first = desk.book(form()).unwrap();
        let mut again = form();
        again["phoneNumber"] = json!("+91 98765 43210");
        let second = desk.book(json!({ "data": again })).unwrap();

        assert!(second.duplicate);
        assert!(!second.patient_created);
        assert_eq!(second.patient_id, first.patient_id);
        assert_eq!(second.appointment_id, first.appointment_id);
        assert_eq!(desk.calendar.list(desk.clinic()).len(), 1);
    }

    #[test]
    fn single_word_name_keeps_existing_last_name() {
        let desk = Desk::new();
        let first = desk.book(form()).unwrap();
        let mut again = form();
        again["fullName"] = json!("Anitha");
        again["time"] = json!("16:00");
        again["dentalService"] = json!(null);
        let second = desk.book(again).unwrap();

        assert!(!second.duplicate);
        let patient = desk.patients.get(desk.clinic(), &first.patient_id).unwrap();
        assert_eq!(patient.details.first_name, "Anitha");
        assert_eq!(patient.details.last_name, "Rao Kulkarni");

        let appt = desk.calendar.get(desk.clinic(), &second.appointment_id).unwrap();
        assert_eq!(appt.appointment_type, "General Consultation");
        assert_eq!(appt.notes.as_deref(), Some("Online booking"));
    }

    #[test]
    fn refused_slot_writes_nothing_and_later_booking_registers_once() {
        let desk = Desk::new();
        let mut far = form();
        far["date"] = json!("2026-06-01");
        match desk.book(far) {
            Err(BookingError::Dispatch(DispatchError::Validation(msg))) => {
                assert!(msg.contains("1 year"), "{msg}")
            }
            other => panic!("expected validation error, got {other:?}"),
        }
        assert!(desk.dispatcher.store().load_clinic(desk.clinic()).unwrap().is_empty());

        let outcome = desk.book(form()).unwrap();
        assert!(outcome.patient_created);

        let log = desk.dispatcher.store().load_clinic(desk.clinic()).unwrap();
        let registrations = log.iter().filter(|e| e.aggregate_type == patients::AGGREGATE_TYPE).count();
        assert_eq!(registrations, 1);
        assert_eq!(desk.patients.list(desk.clinic()).len(), 1);
    }

    #[test]
    fn incomplete_or_unroutable_bookings_are_rejected() {
        let desk = Desk::new();
        let mut missing = form();
        missing["time"] = json!("");
        assert!(matches!(desk.book(missing), Err(BookingError::MissingFields)));

        let mut bad_age = form();
        bad_age["age"] = json!("thirty");
        assert!(matches!(desk.book(bad_age), Err(BookingError::Invalid(_))));

        let mut closed = Desk::new();
        closed.intake.clinic_id = None;
        let err = closed.book(form()).unwrap_err();
        assert_eq!(err.to_string(), "no clinic configured");
    }
}
