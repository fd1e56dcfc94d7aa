//! Per-stream cursors and the shared projection contract.
//!
//! A cursor tracks the last applied `sequence_number` per
//! `(clinic, aggregate)` stream:
//! - replays at or below the cursor are ignored (at-least-once delivery)
//! - gaps are rejected once a stream has been seen
//! - clearing a clinic's cursors allows a deterministic rebuild

use std::collections::HashMap;
use std::sync::RwLock;

use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use thiserror::Error;

use dentaflow_core::{AggregateId, ClinicId};
use dentaflow_events::EventEnvelope;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProjectionError {
    #[error("failed to deserialize {aggregate_type} event: {message}")]
    Deserialize {
        aggregate_type: String,
        message: String,
    },

    #[error("clinic isolation violation: {0}")]
    ClinicIsolation(String),

    #[error("non-monotonic sequence number (last={last}, found={found})")]
    NonMonotonicSequence { last: u64, found: u64 },
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
struct CursorKey {
    clinic_id: ClinicId,
    aggregate_id: AggregateId,
}

/// In-memory stream cursors for one projection.
#[derive(Debug, Default)]
pub struct StreamCursors {
    inner: RwLock<HashMap<CursorKey, u64>>,
}

impl StreamCursors {
    pub fn new() -> Self {
        Self::default()
    }

    fn last(&self, key: &CursorKey) -> u64 {
        self.inner
            .read()
            .map(|c| c.get(key).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    /// Whether `envelope` should be applied.
    ///
    /// `Ok(false)` means the event was already applied.
    pub fn should_apply<E>(&self, envelope: &EventEnvelope<E>) -> Result<bool, ProjectionError> {
        let key = CursorKey {
            clinic_id: envelope.clinic_id(),
            aggregate_id: envelope.aggregate_id(),
        };
        let last = self.last(&key);
        let seq = envelope.sequence_number();

        if seq == 0 {
            return Err(ProjectionError::NonMonotonicSequence { last, found: seq });
        }
        if seq <= last {
            return Ok(false);
        }
        if last != 0 && seq != last + 1 {
            return Err(ProjectionError::NonMonotonicSequence { last, found: seq });
        }
        Ok(true)
    }

    pub fn advance<E>(&self, envelope: &EventEnvelope<E>) {
        if let Ok(mut cursors) = self.inner.write() {
            cursors.insert(
                CursorKey {
                    clinic_id: envelope.clinic_id(),
                    aggregate_id: envelope.aggregate_id(),
                },
                envelope.sequence_number(),
            );
        }
    }

    pub fn clear_clinic(&self, clinic_id: ClinicId) {
        if let Ok(mut cursors) = self.inner.write() {
            cursors.retain(|k, _| k.clinic_id != clinic_id);
        }
    }
}

/// Deserialize an envelope payload into the aggregate's event enum.
pub(crate) fn decode<E: DeserializeOwned>(
    envelope: &EventEnvelope<JsonValue>,
) -> Result<E, ProjectionError> {
    serde_json::from_value(envelope.payload().clone()).map_err(|e| ProjectionError::Deserialize {
        aggregate_type: envelope.aggregate_type().to_string(),
        message: e.to_string(),
    })
}

/// Check that the ids carried inside an event match its envelope.
pub(crate) fn ensure_same_stream(
    envelope: &EventEnvelope<JsonValue>,
    clinic_id: ClinicId,
    aggregate_id: AggregateId,
) -> Result<(), ProjectionError> {
    if clinic_id != envelope.clinic_id() {
        return Err(ProjectionError::ClinicIsolation(
            "event clinic_id does not match envelope clinic_id".to_string(),
        ));
    }
    if aggregate_id != envelope.aggregate_id() {
        return Err(ProjectionError::ClinicIsolation(
            "event aggregate id does not match envelope aggregate_id".to_string(),
        ));
    }
    Ok(())
}

/// A rebuildable read model fed from published envelopes.
pub trait Projection: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &'static str;

    /// Apply one envelope; envelopes of other aggregate types are ignored.
    fn apply_envelope(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), ProjectionError>;

    /// Drop all records and cursors of a clinic.
    fn clear_clinic(&self, clinic_id: ClinicId);

    /// Clear every clinic present in `envelopes` and replay them in stream order.
    fn rebuild_from_scratch(
        &self,
        mut envelopes: Vec<EventEnvelope<JsonValue>>,
    ) -> Result<(), ProjectionError> {
        let mut clinics: Vec<ClinicId> = envelopes.iter().map(|e| e.clinic_id()).collect();
        clinics.sort();
        clinics.dedup();
        for clinic_id in clinics {
            self.clear_clinic(clinic_id);
        }

        envelopes.sort_by_key(|e| (e.clinic_id(), e.aggregate_id(), e.sequence_number()));
        for env in &envelopes {
            self.apply_envelope(env)?;
        }
        Ok(())
    }
}
