use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;

use dentaflow_core::ClinicId;
use dentaflow_events::EventEnvelope;
use dentaflow_patients::{PatientDetails, PatientEvent, PatientId, RegistrationSource, last_ten_digits};

use crate::projections::cursor::{Projection, ProjectionError, StreamCursors, decode, ensure_same_stream};
use crate::read_model::ClinicStore;

pub const AGGREGATE_TYPE: &str = "patients.patient";

/// Search results are capped at this many patients.
pub const SEARCH_LIMIT: usize = 50;

/// Queryable patient directory entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PatientReadModel {
    pub patient_id: PatientId,
    #[serde(flatten)]
    pub details: PatientDetails,
    pub source: RegistrationSource,
    pub registered_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_visit_at: Option<DateTime<Utc>>,
    pub archived: bool,
}

impl PatientReadModel {
    fn matches(&self, needle: &str) -> bool {
        self.details.first_name.to_lowercase().contains(needle)
            || self.details.last_name.to_lowercase().contains(needle)
            || self.details.phone.to_lowercase().contains(needle)
    }
}

/// Patient directory projection.
///
/// Archived patients stay in the store (their history is still billable
/// and reportable) but are hidden from searches and listings.
#[derive(Debug)]
pub struct PatientsProjection<S>
where
    S: ClinicStore<PatientId, PatientReadModel>,
{
    store: S,
    cursors: StreamCursors,
}

impl<S> PatientsProjection<S>
where
    S: ClinicStore<PatientId, PatientReadModel>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: StreamCursors::new(),
        }
    }

    pub fn get(&self, clinic_id: ClinicId, patient_id: &PatientId) -> Option<PatientReadModel> {
        self.store.get(clinic_id, patient_id)
    }

    /// Active patients, newest registration first.
    pub fn list(&self, clinic_id: ClinicId) -> Vec<PatientReadModel> {
        let mut patients: Vec<_> = self
            .store
            .list(clinic_id)
            .into_iter()
            .filter(|p| !p.archived)
            .collect();
        patients.sort_by(|a, b| b.registered_at.cmp(&a.registered_at));
        patients
    }

    /// Case-insensitive search on first name, last name or phone.
    ///
    /// An empty query returns the newest patients.
    pub fn search(&self, clinic_id: ClinicId, query: &str) -> Vec<PatientReadModel> {
        let needle = query.trim().to_lowercase();
        self.list(clinic_id)
            .into_iter()
            .filter(|p| needle.is_empty() || p.matches(&needle))
            .take(SEARCH_LIMIT)
            .collect()
    }

    /// The active patient whose phone shares the last ten digits with `phone`.
    pub fn find_by_phone(&self, clinic_id: ClinicId, phone: &str) -> Option<PatientReadModel> {
        let key = last_ten_digits(phone);
        if key.is_empty() {
            return None;
        }
        self.list(clinic_id)
            .into_iter()
            .find(|p| last_ten_digits(&p.details.phone) == key)
    }

    pub fn count(&self, clinic_id: ClinicId) -> usize {
        self.store.list(clinic_id).iter().filter(|p| !p.archived).count()
    }

    /// Registration instants of every patient, archived ones included.
    pub fn registrations(&self, clinic_id: ClinicId) -> Vec<DateTime<Utc>> {
        self.store
            .list(clinic_id)
            .into_iter()
            .map(|p| p.registered_at)
            .collect()
    }
}

impl<S> Projection for PatientsProjection<S>
where
    S: ClinicStore<PatientId, PatientReadModel>,
{
    fn name(&self) -> &'static str {
        "patients.directory"
    }

    fn apply_envelope(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), ProjectionError> {
        if envelope.aggregate_type() != AGGREGATE_TYPE || !self.cursors.should_apply(envelope)? {
            return Ok(());
        }

        let ev: PatientEvent = decode(envelope)?;
        let (clinic_id, patient_id) = ev.clinic_and_patient();
        ensure_same_stream(envelope, clinic_id, patient_id.0)?;

        match ev {
            PatientEvent::PatientRegistered(e) => {
                self.store.upsert(
                    clinic_id,
                    patient_id,
                    PatientReadModel {
                        patient_id,
                        details: e.details,
                        source: e.source,
                        registered_at: e.occurred_at,
                        updated_at: e.occurred_at,
                        last_visit_at: None,
                        archived: false,
                    },
                );
            }
            PatientEvent::PatientDetailsUpdated(e) => {
                if let Some(mut rm) = self.store.get(clinic_id, &patient_id) {
                    rm.details = e.details;
                    rm.updated_at = e.occurred_at;
                    self.store.upsert(clinic_id, patient_id, rm);
                }
            }
            PatientEvent::PatientVisitRecorded(e) => {
                if let Some(mut rm) = self.store.get(clinic_id, &patient_id) {
                    rm.last_visit_at = Some(e.visited_at);
                    self.store.upsert(clinic_id, patient_id, rm);
                }
            }
            PatientEvent::PatientArchived(e) => {
                if let Some(mut rm) = self.store.get(clinic_id, &patient_id) {
                    rm.archived = true;
                    rm.updated_at = e.occurred_at;
                    self.store.upsert(clinic_id, patient_id, rm);
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

    use chrono::{NaiveDate, TimeZone};
    use dentaflow_core::AggregateId;
    use dentaflow_patients::{PatientArchived, PatientRegistered};
    use uuid::Uuid;

    use crate::read_model::InMemoryClinicStore;

    type Store = Arc<InMemoryClinicStore<PatientId, PatientReadModel>>;

    fn envelope(clinic_id: ClinicId, patient_id: PatientId, seq: u64, ev: &PatientEvent) -> EventEnvelope<JsonValue> {
        EventEnvelope::new(
            Uuid::now_v7(),
            clinic_id,
            patient_id.0,
            AGGREGATE_TYPE,
            seq,
            serde_json::to_value(ev).unwrap(),
        )
    }

    fn registered(clinic_id: ClinicId, first: &str, phone: &str, day: u32) -> (PatientId, PatientEvent) {
        let patient_id = PatientId::new(AggregateId::new());
        let ev = PatientEvent::PatientRegistered(PatientRegistered {
            clinic_id,
            patient_id,
            details: PatientDetails {
                first_name: first.into(),
                last_name: "Sharma".into(),
                email: None,
                phone: phone.into(),
                date_of_birth: NaiveDate::from_ymd_opt(1990, 1, 1),
                reported_age: None,
                gender: None,
                address: None,
                allergies: vec![],
                notes: None,
            },
            source: RegistrationSource::FrontDesk,
            occurred_at: Utc.with_ymd_and_hms(2025, 1, day, 9, 0, 0).unwrap(),
        });
        (patient_id, ev)
    }

    #[test]
    fn search_matches_names_and_phone_newest_first() {
        let projection = PatientsProjection::new(Store::default());
        let clinic_id = ClinicId::new();

        let (asha, ev) = registered(clinic_id, "Asha", "+919876543210", 1);
        projection.apply_envelope(&envelope(clinic_id, asha, 1, &ev)).unwrap();
        let (ravi, ev) = registered(clinic_id, "Ravi", "+919811111111", 2);
        projection.apply_envelope(&envelope(clinic_id, ravi, 1, &ev)).unwrap();

        let all = projection.search(clinic_id, "sharma");
        assert_eq!(all.iter().map(|p| p.patient_id).collect::<Vec<_>>(), vec![ravi, asha]);

        let by_phone = projection.search(clinic_id, "98765");
        assert_eq!(by_phone.len(), 1);
        assert_eq!(by_phone[0].patient_id, asha);

        assert_eq!(projection.search(clinic_id, "ASHA")[0].patient_id, asha);
        assert!(projection.search(ClinicId::new(), "asha").is_empty());
    }

    #[test]
    fn phone_lookup_uses_last_ten_digits_and_skips_archived() {
        let projection = PatientsProjection::new(Store::default());
        let clinic_id = ClinicId::new();

        let (asha, ev) = registered(clinic_id, "Asha", "+919876543210", 1);
        projection.apply_envelope(&envelope(clinic_id, asha, 1, &ev)).unwrap();

        let found = projection.find_by_phone(clinic_id, "09876543210").unwrap();
        assert_eq!(found.patient_id, asha);

        let archived = PatientEvent::PatientArchived(PatientArchived {
            clinic_id,
            patient_id: asha,
            reason: None,
            occurred_at: Utc.with_ymd_and_hms(2025, 2, 1, 9, 0, 0).unwrap(),
        });
        projection.apply_envelope(&envelope(clinic_id, asha, 2, &archived)).unwrap();

        assert!(projection.find_by_phone(clinic_id, "9876543210").is_none());
        assert_eq!(projection.count(clinic_id), 0);
        assert!(projection.get(clinic_id, &asha).unwrap().archived);
    }

    #[test]
    fn redelivered_events_are_ignored_and_rebuild_restores_state() {
        let projection = PatientsProjection::new(Store::default());
        let clinic_id = ClinicId::new();

        let (asha, ev) = registered(clinic_id, "Asha", "+919876543210", 1);
        let env = envelope(clinic_id, asha, 1, &ev);
        projection.apply_envelope(&env).unwrap();
        projection.apply_envelope(&env).unwrap();
        assert_eq!(projection.count(clinic_id), 1);

        projection.rebuild_from_scratch(vec![env]).unwrap();
        assert_eq!(projection.count(clinic_id), 1);
    }
}
