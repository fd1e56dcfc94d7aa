//! Reactors: committed events of one aggregate that cause commands on another.

use serde_json::Value as JsonValue;

use dentaflow_core::ClinicId;
use dentaflow_events::EventEnvelope;
use dentaflow_patients::{PatientCommand, PatientId, RecordVisit};
use dentaflow_scheduling::{AppointmentEvent, AppointmentStatus};

use crate::projections::cursor::decode;
use crate::projections::{ProjectionError, appointments};

/// Marks a patient as visited when one of their appointments completes.
#[derive(Debug, Default, Clone, Copy)]
pub struct VisitReactor;

impl VisitReactor {
    /// The `RecordVisit` command an envelope calls for, if any.
    pub fn react(
        &self,
        envelope: &EventEnvelope<JsonValue>,
    ) -> Result<Option<(ClinicId, PatientId, PatientCommand)>, ProjectionError> {
        if envelope.aggregate_type() != appointments::AGGREGATE_TYPE {
            return Ok(None);
        }
        let event: AppointmentEvent = decode(envelope)?;

        let AppointmentEvent::AppointmentStatusChanged(changed) = event else {
            return Ok(None);
        };
        if changed.to != AppointmentStatus::Completed {
            return Ok(None);
        }

        Ok(Some((
            changed.clinic_id,
            changed.patient_id,
            PatientCommand::RecordVisit(RecordVisit {
                clinic_id: changed.clinic_id,
                patient_id: changed.patient_id,
                appointment_id: Some(changed.appointment_id.0),
                visited_at: changed.occurred_at,
                occurred_at: changed.occurred_at,
            }),
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::{TimeZone, Utc};
    use dentaflow_core::AggregateId;
    use dentaflow_scheduling::{AppointmentId, AppointmentStatusChanged};
    use uuid::Uuid;

    fn status_change(to: AppointmentStatus) -> EventEnvelope<JsonValue> {
        let clinic_id = ClinicId::new();
        let appointment_id = AppointmentId::new(AggregateId::new());
        let ev = AppointmentEvent::AppointmentStatusChanged(AppointmentStatusChanged {
            clinic_id,
            appointment_id,
            patient_id: PatientId::new(AggregateId::new()),
            from: AppointmentStatus::InProgress,
            to,
            reason: None,
            occurred_at: Utc.with_ymd_and_hms(2025, 5, 5, 11, 30, 0).unwrap(),
        });
        EventEnvelope::new(
            Uuid::now_v7(),
            clinic_id,
            appointment_id.0,
            appointments::AGGREGATE_TYPE,
            3,
            serde_json::to_value(&ev).unwrap(),
        )
    }

    #[test]
    fn completion_records_a_visit_at_completion_time() {
        let env = status_change(AppointmentStatus::Completed);
        let (clinic_id, _, cmd) = VisitReactor.react(&env).unwrap().unwrap();
        assert_eq!(clinic_id, env.clinic_id());
        let PatientCommand::RecordVisit(visit) = cmd else {
            panic!("expected RecordVisit");
        };
        assert_eq!(visit.visited_at, Utc.with_ymd_and_hms(2025, 5, 5, 11, 30, 0).unwrap());
        assert_eq!(visit.appointment_id, Some(env.aggregate_id()));
    }

    #[test]
    fn other_transitions_and_streams_are_ignored() {
        assert!(VisitReactor.react(&status_change(AppointmentStatus::Cancelled)).unwrap().is_none());

        let env = EventEnvelope::new(
            Uuid::now_v7(),
            ClinicId::new(),
            AggregateId::new(),
            "patients.patient",
            1,
            serde_json::json!({"anything": true}),
        );
        assert!(VisitReactor.react(&env).unwrap().is_none());
    }
}
