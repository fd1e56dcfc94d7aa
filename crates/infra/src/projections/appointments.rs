use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;

use dentaflow_core::{ClinicId, UserId};
use dentaflow_events::EventEnvelope;
use dentaflow_patients::PatientId;
use dentaflow_scheduling::{AppointmentEvent, AppointmentId, AppointmentStatus};

use crate::projections::cursor::{Projection, ProjectionError, StreamCursors, decode, ensure_same_stream};
use crate::read_model::ClinicStore;

pub const AGGREGATE_TYPE: &str = "scheduling.appointment";

/// Queryable appointment calendar entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppointmentReadModel {
    pub appointment_id: AppointmentId,
    pub patient_id: PatientId,
    pub doctor_id: Option<UserId>,
    pub scheduled_at: DateTime<Utc>,
    pub duration_minutes: u32,
    pub appointment_type: String,
    pub chief_complaint: Option<String>,
    pub notes: Option<String>,
    pub status: AppointmentStatus,
    /// Reason recorded with the last cancellation or no-show.
    pub status_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Filters for a day view of the calendar.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DayFilter {
    pub doctor_id: Option<UserId>,
    pub status: Option<AppointmentStatus>,
}

#[derive(Debug)]
pub struct AppointmentsProjection<S>
where
    S: ClinicStore<AppointmentId, AppointmentReadModel>,
{
    store: S,
    cursors: StreamCursors,
}

impl<S> AppointmentsProjection<S>
where
    S: ClinicStore<AppointmentId, AppointmentReadModel>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: StreamCursors::new(),
        }
    }

    pub fn get(&self, clinic_id: ClinicId, appointment_id: &AppointmentId) -> Option<AppointmentReadModel> {
        self.store.get(clinic_id, appointment_id)
    }

    /// All appointments ordered by time.
    pub fn list(&self, clinic_id: ClinicId) -> Vec<AppointmentReadModel> {
        let mut all = self.store.list(clinic_id);
        all.sort_by_key(|a| a.scheduled_at);
        all
    }

    /// Appointments on a UTC calendar day, ordered by time.
    pub fn by_day(&self, clinic_id: ClinicId, day: NaiveDate, filter: DayFilter) -> Vec<AppointmentReadModel> {
        self.list(clinic_id)
            .into_iter()
            .filter(|a| a.scheduled_at.date_naive() == day)
            .filter(|a| filter.doctor_id.is_none_or(|d| a.doctor_id == Some(d)))
            .filter(|a| filter.status.is_none_or(|s| a.status == s))
            .collect()
    }

    /// Scheduled or confirmed appointments at or after `from`, soonest first.
    pub fn upcoming(&self, clinic_id: ClinicId, from: DateTime<Utc>, limit: usize) -> Vec<AppointmentReadModel> {
        self.list(clinic_id)
            .into_iter()
            .filter(|a| a.scheduled_at >= from && a.status.is_upcoming())
            .take(limit)
            .collect()
    }

    /// Appointments of one patient, most recent first.
    pub fn for_patient(&self, clinic_id: ClinicId, patient_id: PatientId) -> Vec<AppointmentReadModel> {
        let mut found: Vec<_> = self
            .store
            .list(clinic_id)
            .into_iter()
            .filter(|a| a.patient_id == patient_id)
            .collect();
        found.sort_by(|a, b| b.scheduled_at.cmp(&a.scheduled_at));
        found
    }

    /// A non-cancelled appointment of `patient_id` at exactly `at`.
    pub fn find_for_patient_at(
        &self,
        clinic_id: ClinicId,
        patient_id: PatientId,
        at: DateTime<Utc>,
    ) -> Option<AppointmentReadModel> {
        self.store
            .list(clinic_id)
            .into_iter()
            .find(|a| a.patient_id == patient_id && a.scheduled_at == at && a.status != AppointmentStatus::Cancelled)
    }
}

impl<S> Projection for AppointmentsProjection<S>
where
    S: ClinicStore<AppointmentId, AppointmentReadModel>,
{
    fn name(&self) -> &'static str {
        "scheduling.calendar"
    }

    fn apply_envelope(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), ProjectionError> {
        if envelope.aggregate_type() != AGGREGATE_TYPE || !self.cursors.should_apply(envelope)? {
            return Ok(());
        }

        let ev: AppointmentEvent = decode(envelope)?;
        let (clinic_id, appointment_id) = match &ev {
            AppointmentEvent::AppointmentScheduled(e) => (e.clinic_id, e.appointment_id),
            AppointmentEvent::AppointmentRescheduled(e) => (e.clinic_id, e.appointment_id),
            AppointmentEvent::AppointmentStatusChanged(e) => (e.clinic_id, e.appointment_id),
        };
        ensure_same_stream(envelope, clinic_id, appointment_id.0)?;

        match ev {
            AppointmentEvent::AppointmentScheduled(e) => {
                self.store.upsert(
                    clinic_id,
                    appointment_id,
                    AppointmentReadModel {
                        appointment_id,
                        patient_id: e.patient_id,
                        doctor_id: e.doctor_id,
                        scheduled_at: e.scheduled_at,
                        duration_minutes: e.duration_minutes,
                        appointment_type: e.appointment_type,
                        chief_complaint: e.chief_complaint,
                        notes: e.notes,
                        status: AppointmentStatus::Scheduled,
                        status_reason: None,
                        created_at: e.occurred_at,
                        updated_at: e.occurred_at,
                        completed_at: None,
                    },
                );
            }
            AppointmentEvent::AppointmentRescheduled(e) => {
                if let Some(mut rm) = self.store.get(clinic_id, &appointment_id) {
                    rm.scheduled_at = e.scheduled_at;
                    rm.duration_minutes = e.duration_minutes;
                    rm.status = AppointmentStatus::Scheduled;
                    rm.updated_at = e.occurred_at;
                    self.store.upsert(clinic_id, appointment_id, rm);
                }
            }
            AppointmentEvent::AppointmentStatusChanged(e) => {
                if let Some(mut rm) = self.store.get(clinic_id, &appointment_id) {
                    rm.status = e.to;
                    if e.reason.is_some() {
                        rm.status_reason = e.reason;
                    }
                    if e.to == AppointmentStatus::Completed {
                        rm.completed_at = Some(e.occurred_at);
                    }
                    rm.updated_at = e.occurred_at;
                    self.store.upsert(clinic_id, appointment_id, rm);
                }
            }
        }

        self.cursors.advance(envelope);
        Ok(())
    }

    fn clear_clinic(&self, clinic_id: ClinicId) {
        self.store.clear_clinic(clinic_id);
        self.cursors.clear_clinic(clinic_id);
    }
}
