use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;

use dentaflow_catalog::{TreatmentDetails, TreatmentEvent, TreatmentId};
use dentaflow_core::ClinicId;
use dentaflow_events::EventEnvelope;

use crate::projections::cursor::{Projection, ProjectionError, StreamCursors, decode, ensure_same_stream};
use crate::read_model::ClinicStore;

pub const AGGREGATE_TYPE: &str = "catalog.treatment";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TreatmentReadModel {
    pub treatment_id: TreatmentId,
    #[serde(flatten)]
    pub details: TreatmentDetails,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Treatment catalog projection.
#[derive(Debug)]
pub struct TreatmentsProjection<S>
where
    S: ClinicStore<TreatmentId, TreatmentReadModel>,
{
    store: S,
    cursors: StreamCursors,
}

impl<S> TreatmentsProjection<S>
where
    S: ClinicStore<TreatmentId, TreatmentReadModel>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: StreamCursors::new(),
        }
    }

    pub fn get(&self, clinic_id: ClinicId, treatment_id: &TreatmentId) -> Option<TreatmentReadModel> {
        self.store.get(clinic_id, treatment_id)
    }

    /// Every treatment, ordered by category then name.
    pub fn all(&self, clinic_id: ClinicId) -> Vec<TreatmentReadModel> {
        let mut all = self.store.list(clinic_id);
        all.sort_by(|a, b| {
            (&a.details.category, &a.details.name).cmp(&(&b.details.category, &b.details.name))
        });
        all
    }

    /// Active treatments, optionally of one category (case-insensitive).
    pub fn active(&self, clinic_id: ClinicId, category: Option<&str>) -> Vec<TreatmentReadModel> {
        self.all(clinic_id)
            .into_iter()
            .filter(|t| t.active)
            .filter(|t| category.is_none_or(|c| t.details.category.eq_ignore_ascii_case(c.trim())))
            .collect()
    }

    /// Distinct categories of the active treatments, sorted.
    pub fn categories(&self, clinic_id: ClinicId) -> Vec<String> {
        let mut categories: Vec<String> = self
            .active(clinic_id, None)
            .into_iter()
            .map(|t| t.details.category)
            .collect();
        categories.dedup();
        categories
    }
}

impl<S> Projection for TreatmentsProjection<S>
where
    S: ClinicStore<TreatmentId, TreatmentReadModel>,
{
    fn name(&self) -> &'static str {
        "catalog.treatments"
    }

    fn apply_envelope(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), ProjectionError> {
        if envelope.aggregate_type() != AGGREGATE_TYPE || !self.cursors.should_apply(envelope)? {
            return Ok(());
        }

        let ev: TreatmentEvent = decode(envelope)?;
        let (clinic_id, treatment_id) = match &ev {
            TreatmentEvent::TreatmentCreated(e) => (e.clinic_id, e.treatment_id),
            TreatmentEvent::TreatmentUpdated(e) => (e.clinic_id, e.treatment_id),
            TreatmentEvent::TreatmentDeactivated(e) => (e.clinic_id, e.treatment_id),
            TreatmentEvent::TreatmentReactivated(e) => (e.clinic_id, e.treatment_id),
        };
        ensure_same_stream(envelope, clinic_id, treatment_id.0)?;

        match ev {
            TreatmentEvent::TreatmentCreated(e) => {
                self.store.upsert(
                    clinic_id,
                    treatment_id,
                    TreatmentReadModel {
                        treatment_id,
                        details: e.details,
                        active: e.active,
                        created_at: e.occurred_at,
                        updated_at: e.occurred_at,
                    },
                );
            }
            TreatmentEvent::TreatmentUpdated(e) => {
                if let Some(mut rm) = self.store.get(clinic_id, &treatment_id) {
                    rm.details = e.details;
                    rm.updated_at = e.occurred_at;
                    self.store.upsert(clinic_id, treatment_id, rm);
                }
            }
            TreatmentEvent::TreatmentDeactivated(e) => {
                if let Some(mut rm) = self.store.get(clinic_id, &treatment_id) {
                    rm.active = false;
                    rm.updated_at = e.occurred_at;
                    self.store.upsert(clinic_id, treatment_id, rm);
                }
            }
            TreatmentEvent::TreatmentReactivated(e) => {
                if let Some(mut rm) = self.store.get(clinic_id, &treatment_id) {
                    rm.active = true;
                    rm.updated_at = e.occurred_at;
                    self.store.upsert(clinic_id, treatment_id, rm);
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
    use dentaflow_catalog::{TreatmentCreated, TreatmentDeactivated};
    use dentaflow_core::{AggregateId, Money};
    use uuid::Uuid;

    use crate::read_model::InMemoryClinicStore;

    type Store = Arc<InMemoryClinicStore<TreatmentId, TreatmentReadModel>>;

    fn apply(p: &TreatmentsProjection<Store>, clinic_id: ClinicId, id: TreatmentId, seq: u64, ev: TreatmentEvent) {
        let env = EventEnvelope::new(
            Uuid::now_v7(),
            clinic_id,
            id.0,
            AGGREGATE_TYPE,
            seq,
            serde_json::to_value(&ev).unwrap(),
        );
        p.apply_envelope(&env).unwrap();
    }

    fn create(p: &TreatmentsProjection<Store>, clinic_id: ClinicId, name: &str, category: &str) -> TreatmentId {
        let id = TreatmentId::new(AggregateId::new());
        apply(
            p,
            clinic_id,
            id,
            1,
            TreatmentEvent::TreatmentCreated(TreatmentCreated {
                clinic_id,
                treatment_id: id,
                details: TreatmentDetails {
                    code: None,
                    name: name.into(),
                    description: None,
                    standard_cost: Money::from_minor(50_000),
                    category: category.into(),
                    duration_minutes: None,
                },
                active: true,
                occurred_at: Utc.with_ymd_and_hms(2025, 1, 1, 9, 0, 0).unwrap(),
            }),
        );
        id
    }

    #[test]
    fn catalog_is_ordered_and_filtered() {
        let p = TreatmentsProjection::new(Store::default());
        let clinic_id = ClinicId::new();

        create(&p, clinic_id, "Scaling", "Preventive");
        let rct = create(&p, clinic_id, "Root Canal", "Endodontic");
        create(&p, clinic_id, "Fluoride", "Preventive");

        let names: Vec<_> = p.all(clinic_id).into_iter().map(|t| t.details.name).collect();
        assert_eq!(names, vec!["Root Canal", "Fluoride", "Scaling"]);

        assert_eq!(p.active(clinic_id, Some("preventive")).len(), 2);
        assert_eq!(p.categories(clinic_id), vec!["Endodontic", "Preventive"]);

        apply(
            &p,
            clinic_id,
            rct,
            2,
            TreatmentEvent::TreatmentDeactivated(TreatmentDeactivated {
                clinic_id,
                treatment_id: rct,
                occurred_at: Utc.with_ymd_and_hms(2025, 1, 2, 9, 0, 0).unwrap(),
            }),
        );
        assert_eq!(p.categories(clinic_id), vec!["Preventive"]);
        assert_eq!(p.all(clinic_id).len(), 3);
    }
}
