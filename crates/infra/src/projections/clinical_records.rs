use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;

use dentaflow_catalog::TreatmentId;
use dentaflow_clinical::{ClinicalNotes, ClinicalRecordEvent, ClinicalRecordId};
use dentaflow_core::{ClinicId, Money, UserId};
use dentaflow_events::EventEnvelope;
use dentaflow_patients::PatientId;
use dentaflow_scheduling::AppointmentId;

use crate::projections::cursor::{Projection, ProjectionError, StreamCursors, decode, ensure_same_stream};
use crate::read_model::ClinicStore;

pub const AGGREGATE_TYPE: &str = "clinical.record";

/// One entry of a record's price override audit trail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CostOverrideEntry {
    pub previous_cost: Money,
    pub new_cost: Money,
    pub reason: String,
    pub author_id: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClinicalRecordReadModel {
    pub record_id: ClinicalRecordId,
    pub appointment_id: AppointmentId,
    pub patient_id: PatientId,
    pub procedure_id: TreatmentId,
    pub procedure_name: String,
    pub standard_cost: Money,
    #[serde(flatten)]
    pub clinical: ClinicalNotes,
    pub effective_cost: Money,
    pub author_id: UserId,
    pub recorded_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub cost_overrides: Vec<CostOverrideEntry>,
    #[serde(skip)]
    pub removed: bool,
}

impl ClinicalRecordReadModel {
    fn refresh_cost(&mut self) {
        self.effective_cost = self.clinical.cost_override.unwrap_or(self.standard_cost);
    }
}

/// Clinical records per patient and per visit.
///
/// Removed records are kept with a tombstone flag and never returned.
#[derive(Debug)]
pub struct ClinicalRecordsProjection<S>
where
    S: ClinicStore<ClinicalRecordId, ClinicalRecordReadModel>,
{
    store: S,
    cursors: StreamCursors,
}

impl<S> ClinicalRecordsProjection<S>
where
    S: ClinicStore<ClinicalRecordId, ClinicalRecordReadModel>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: StreamCursors::new(),
        }
    }

    fn live(&self, clinic_id: ClinicId) -> impl Iterator<Item = ClinicalRecordReadModel> {
        self.store.list(clinic_id).into_iter().filter(|r| !r.removed)
    }

    pub fn get(&self, clinic_id: ClinicId, record_id: &ClinicalRecordId) -> Option<ClinicalRecordReadModel> {
        self.store.get(clinic_id, record_id).filter(|r| !r.removed)
    }

    /// A patient's records, newest first.
    pub fn by_patient(&self, clinic_id: ClinicId, patient_id: PatientId) -> Vec<ClinicalRecordReadModel> {
        let mut records: Vec<_> = self.live(clinic_id).filter(|r| r.patient_id == patient_id).collect();
        records.sort_by(|a, b| (b.recorded_at, b.record_id.0).cmp(&(a.recorded_at, a.record_id.0)));
        records
    }

    /// Records made during one visit, in the order they were recorded.
    pub fn by_appointment(
        &self,
        clinic_id: ClinicId,
        appointment_id: AppointmentId,
    ) -> Vec<ClinicalRecordReadModel> {
        let mut records: Vec<_> = self
            .live(clinic_id)
            .filter(|r| r.appointment_id == appointment_id)
            .collect();
        records.sort_by_key(|r| (r.recorded_at, r.record_id.0));
        records
    }

    /// Everything done to one tooth of a patient, newest first.
    pub fn tooth_history(
        &self,
        clinic_id: ClinicId,
        patient_id: PatientId,
        tooth_number: &str,
    ) -> Vec<ClinicalRecordReadModel> {
        self.by_patient(clinic_id, patient_id)
            .into_iter()
            .filter(|r| r.clinical.tooth_number.as_deref() == Some(tooth_number.trim()))
            .collect()
    }
}

impl<S> Projection for ClinicalRecordsProjection<S>
where
    S: ClinicStore<ClinicalRecordId, ClinicalRecordReadModel>,
{
    fn name(&self) -> &'static str {
        "clinical.records"
    }

    fn apply_envelope(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), ProjectionError> {
        if envelope.aggregate_type() != AGGREGATE_TYPE || !self.cursors.should_apply(envelope)? {
            return Ok(());
        }

        let ev: ClinicalRecordEvent = decode(envelope)?;
        let (clinic_id, record_id) = match &ev {
            ClinicalRecordEvent::TreatmentRecorded(e) => (e.clinic_id, e.record_id),
            ClinicalRecordEvent::ClinicalRecordAmended(e) => (e.clinic_id, e.record_id),
            ClinicalRecordEvent::CostOverridden(e) => (e.clinic_id, e.record_id),
            ClinicalRecordEvent::ClinicalRecordRemoved(e) => (e.clinic_id, e.record_id),
        };
        ensure_same_stream(envelope, clinic_id, record_id.0)?;

        match ev {
            ClinicalRecordEvent::TreatmentRecorded(e) => {
                let mut rm = ClinicalRecordReadModel {
                    record_id,
                    appointment_id: e.appointment_id,
                    patient_id: e.patient_id,
                    procedure_id: e.procedure_id,
                    procedure_name: e.procedure_name,
                    standard_cost: e.standard_cost,
                    clinical: e.clinical,
                    effective_cost: e.standard_cost,
                    author_id: e.author_id,
                    recorded_at: e.occurred_at,
                    updated_at: e.occurred_at,
                    cost_overrides: vec![],
                    removed: false,
                };
                rm.refresh_cost();
                self.store.upsert(clinic_id, record_id, rm);
            }
            ClinicalRecordEvent::ClinicalRecordAmended(e) => {
                if let Some(mut rm) = self.store.get(clinic_id, &record_id) {
                    rm.clinical = e.clinical;
                    rm.refresh_cost();
                    rm.updated_at = e.occurred_at;
                    self.store.upsert(clinic_id, record_id, rm);
                }
            }
            ClinicalRecordEvent::CostOverridden(e) => {
                if let Some(mut rm) = self.store.get(clinic_id, &record_id) {
                    rm.cost_overrides.push(CostOverrideEntry {
                        previous_cost: e.previous_cost,
                        new_cost: e.new_cost,
                        reason: e.reason,
                        author_id: e.author_id,
                        occurred_at: e.occurred_at,
                    });
                    self.store.upsert(clinic_id, record_id, rm);
                }
            }
            ClinicalRecordEvent::ClinicalRecordRemoved(e) => {
                if let Some(mut rm) = self.store.get(clinic_id, &record_id) {
                    rm.removed = true;
                    rm.updated_at = e.occurred_at;
                    self.store.upsert(clinic_id, record_id, rm);
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

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use chrono::TimeZone;
    use dentaflow_clinical::{ClinicalRecordRemoved, CostOverridden, TreatmentRecorded};
    use dentaflow_core::AggregateId;
    use uuid::Uuid;

    use crate::read_model::InMemoryClinicStore;

    type Store = Arc<InMemoryClinicStore<ClinicalRecordId, ClinicalRecordReadModel>>;

    struct Chart {
        projection: ClinicalRecordsProjection<Store>,
        clinic_id: ClinicId,
        patient_id: PatientId,
        author_id: UserId,
    }

    impl Chart {
        fn new() -> Self {
            Self {
                projection: ClinicalRecordsProjection::new(Store::default()),
                clinic_id: ClinicId::new(),
                patient_id: PatientId::new(AggregateId::new()),
                author_id: UserId::new(),
            }
        }

        fn apply(&self, id: ClinicalRecordId, seq: u64, ev: ClinicalRecordEvent) {
            let env = EventEnvelope::new(
                Uuid::now_v7(),
                self.clinic_id,
                id.0,
                AGGREGATE_TYPE,
                seq,
                serde_json::to_value(&ev).unwrap(),
            );
            self.projection.apply_envelope(&env).unwrap();
        }

        fn record(&self, appointment_id: AppointmentId, tooth: Option<&str>, hour: u32, cost_override: Option<u64>) -> ClinicalRecordId {
            let id = ClinicalRecordId::new(AggregateId::new());
            self.record_as(id, appointment_id, tooth, hour, cost_override)
        }

        fn record_as(
            &self,
            id: ClinicalRecordId,
            appointment_id: AppointmentId,
            tooth: Option<&str>,
            hour: u32,
            cost_override: Option<u64>,
        ) -> ClinicalRecordId {
            self.apply(
                id,
                1,
                ClinicalRecordEvent::TreatmentRecorded(TreatmentRecorded {
                    clinic_id: self.clinic_id,
                    record_id: id,
                    appointment_id,
                    patient_id: self.patient_id,
                    procedure_id: TreatmentId::new(AggregateId::new()),
                    procedure_name: "Composite Filling".into(),
                    standard_cost: Money::from_minor(150_000),
                    clinical: ClinicalNotes {
                        tooth_number: tooth.map(str::to_string),
                        cost_override: cost_override.map(Money::from_minor),
                        ..ClinicalNotes::default()
                    },
                    author_id: self.author_id,
                    occurred_at: Utc.with_ymd_and_hms(2025, 4, 2, hour, 0, 0).unwrap(),
                }),
            );
            id
        }
    }

    #[test]
    fn visit_records_are_chronological_and_patient_history_newest_first() {
        let chart = Chart::new();
        let visit = AppointmentId::new(AggregateId::new());
        let first = chart.record(visit, Some("16"), 9, None);
        let second = chart.record(visit, Some("21"), 10, Some(120_000));
        let other_visit = chart.record(AppointmentId::new(AggregateId::new()), Some("16"), 11, None);

        let visit_records = chart.projection.by_appointment(chart.clinic_id, visit);
        assert_eq!(visit_records.iter().map(|r| r.record_id).collect::<Vec<_>>(), vec![first, second]);
        assert_eq!(visit_records[1].effective_cost, Money::from_minor(120_000));

        let history = chart.projection.tooth_history(chart.clinic_id, chart.patient_id, "16");
        assert_eq!(history.iter().map(|r| r.record_id).collect::<Vec<_>>(), vec![other_visit, first]);
    }

    #[test]
    fn records_charted_in_the_same_instant_keep_a_stable_order() {
        let chart = Chart::new();
        let visit = AppointmentId::new(AggregateId::new());
        let low = ClinicalRecordId::new(AggregateId::from_uuid(Uuid::from_u128(1)));
        let high = ClinicalRecordId::new(AggregateId::from_uuid(Uuid::from_u128(2)));
        chart.record_as(high, visit, Some("11"), 9, None);
        chart.record_as(low, visit, Some("11"), 9, None);

        let ids = |records: Vec<ClinicalRecordReadModel>| records.iter().map(|r| r.record_id).collect::<Vec<_>>();
        assert_eq!(ids(chart.projection.by_appointment(chart.clinic_id, visit)), vec![low, high]);
        assert_eq!(ids(chart.projection.by_patient(chart.clinic_id, chart.patient_id)), vec![high, low]);
        assert_eq!(ids(chart.projection.tooth_history(chart.clinic_id, chart.patient_id, "11")), vec![high, low]);
    }

    #[test]
    fn overrides_are_audited_and_removed_records_hidden() {
        let chart = Chart::new();
        let visit = AppointmentId::new(AggregateId::new());
        let id = chart.record(visit, None, 9, Some(100_000));

        chart.apply(
            id,
            2,
            ClinicalRecordEvent::CostOverridden(CostOverridden {
                clinic_id: chart.clinic_id,
                record_id: id,
                previous_cost: Money::from_minor(150_000),
                new_cost: Money::from_minor(100_000),
                reason: "Manual price override".into(),
                author_id: chart.author_id,
                occurred_at: Utc.with_ymd_and_hms(2025, 4, 2, 9, 0, 0).unwrap(),
            }),
        );
        let rm = chart.projection.get(chart.clinic_id, &id).unwrap();
        assert_eq!(rm.cost_overrides.len(), 1);
        assert_eq!(rm.cost_overrides[0].previous_cost, Money::from_minor(150_000));

        chart.apply(
            id,
            3,
            ClinicalRecordEvent::ClinicalRecordRemoved(ClinicalRecordRemoved {
                clinic_id: chart.clinic_id,
                record_id: id,
                author_id: chart.author_id,
                occurred_at: Utc.with_ymd_and_hms(2025, 4, 3, 9, 0, 0).unwrap(),
            }),
        );
        assert!(chart.projection.get(chart.clinic_id, &id).is_none());
        assert!(chart.projection.by_appointment(chart.clinic_id, visit).is_empty());
    }
}
