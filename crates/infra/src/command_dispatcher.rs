//! Command execution pipeline (application-level orchestration).
//!
//! ```text
//! Command
//!   ↓
//! 1. Load events from store (clinic-scoped)
//!   ↓
//! 2. Rehydrate aggregate (apply historical events to rebuild state)
//!   ↓
//! 3. Handle command (pure decision logic, produces events)
//!   ↓
//! 4. Persist events to store (append-only, optimistic concurrency check)
//!   ↓
//! 5. Publish events to bus (projections, reactors, realtime feed)
//! ```
//!
//! The dispatcher composes the `EventStore` and `EventBus` traits and
//! contains no IO itself.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use thiserror::Error;
use uuid::Uuid;

use dentaflow_core::{Aggregate, AggregateId, ClinicId, DomainError, ExpectedVersion};
use dentaflow_events::{EventBus, EventEnvelope};

use crate::event_store::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};

#[derive(Debug, Error)]
pub enum DispatchError {
    /// Optimistic concurrency failure or a repeated state transition.
    #[error("conflict: {0}")]
    Conflict(String),
    /// Clinic isolation violation (cross-clinic or cross-aggregate stream mixing).
    #[error("clinic isolation violation: {0}")]
    ClinicIsolation(String),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("invariant violated: {0}")]
    InvariantViolation(String),
    /// The target aggregate does not exist in this clinic.
    #[error("{0} not found")]
    NotFound(String),
    /// Failed to deserialize historical event payloads into the aggregate event type.
    #[error("event deserialization failed: {0}")]
    Deserialize(String),
    #[error(transparent)]
    Store(EventStoreError),
    /// Publication failed after a successful append (at-least-once; retry may duplicate).
    #[error("event publication failed: {0}")]
    Publish(String),
}

impl From<EventStoreError> for DispatchError {
    fn from(value: EventStoreError) -> Self {
        match value {
            EventStoreError::Concurrency(msg) => DispatchError::Conflict(msg),
            EventStoreError::ClinicIsolation(msg) => DispatchError::ClinicIsolation(msg),
            other => DispatchError::Store(other),
        }
    }
}

impl From<DomainError> for DispatchError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Validation(msg) => DispatchError::Validation(msg),
            DomainError::InvariantViolation(msg) => DispatchError::InvariantViolation(msg),
            DomainError::Conflict(msg) => DispatchError::Conflict(msg),
            DomainError::NotFound(what) => DispatchError::NotFound(what),
            DomainError::InvalidId(msg) => DispatchError::Validation(msg),
        }
    }
}

/// Reusable command execution engine for event-sourced aggregates.
///
/// - Events are persisted before publication; if append fails nothing is published.
/// - Each command operates on a single aggregate instance.
/// - A stale stream version surfaces as `DispatchError::Conflict`; callers may
///   retry by re-dispatching.
/// - If publication fails after a successful append the error is returned,
///   but the events are already durable (at-least-once delivery).
#[derive(Debug)]
pub struct CommandDispatcher<S, B> {
    store: S,
    bus: B,
}

impl<S, B> CommandDispatcher<S, B> {
    pub fn new(store: S, bus: B) -> Self {
        Self { store, bus }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }
}

impl<S, B> CommandDispatcher<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    /// Dispatch a command through the full event-sourcing pipeline.
    ///
    /// `make_aggregate` builds the empty aggregate that history is replayed
    /// onto (e.g. `|_, id| Patient::empty(PatientId::new(id))`).
    ///
    /// Returns the committed events with their assigned sequence numbers; an
    /// empty vector means the command was a no-op for the current state.
    pub fn dispatch<A>(
        &self,
        clinic_id: ClinicId,
        aggregate_id: AggregateId,
        aggregate_type: impl Into<String>,
        command: A::Command,
        make_aggregate: impl FnOnce(ClinicId, AggregateId) -> A,
    ) -> Result<Vec<StoredEvent>, DispatchError>
    where
        A: Aggregate<Error = DomainError>,
        A::Event: dentaflow_events::Event + Serialize + DeserializeOwned,
    {
        let aggregate_type = aggregate_type.into();
        let span = tracing::info_span!(
            "dispatch",
            clinic_id = %clinic_id,
            aggregate_type = %aggregate_type,
            aggregate_id = %aggregate_id,
        );
        let _guard = span.enter();

        // 1) Load history (clinic-scoped)
        let history = self.store.load_stream(clinic_id, aggregate_id)?;
        validate_loaded_stream(clinic_id, aggregate_id, &history)?;
        let expected = ExpectedVersion::Exact(stream_version(&history));

        // 2) Rehydrate aggregate
        let mut aggregate = make_aggregate(clinic_id, aggregate_id);
        apply_history::<A>(&mut aggregate, &history)?;

        // 3) Decide events (no mutation)
        let decided = match aggregate.handle(&command) {
            Ok(events) => events,
            Err(err) => {
                tracing::debug!(error = %err, "command rejected");
                return Err(err.into());
            }
        };
        if decided.is_empty() {
            return Ok(vec![]);
        }

        // 4) Persist (append-only, optimistic)
        let uncommitted = decided
            .iter()
            .map(|ev| {
                UncommittedEvent::from_typed(
                    clinic_id,
                    aggregate_id,
                    aggregate_type.clone(),
                    Uuid::now_v7(),
                    ev,
                )
            })
            .collect::<Result<Vec<_>, _>>()?;

        let committed = self.store.append(uncommitted, expected)?;
        tracing::info!(
            events = committed.len(),
            version = stream_version(&committed),
            "events committed"
        );

        // 5) Publish committed events (after append)
        for stored in &committed {
            self.bus.publish(stored.to_envelope()).map_err(|e| {
                tracing::warn!(error = ?e, event_id = %stored.event_id, "event publication failed");
                DispatchError::Publish(format!("{e:?}"))
            })?;
        }

        Ok(committed)
    }

    /// Rehydrate an aggregate from its stream without handling a command.
    ///
    /// Used when a decision needs another aggregate's current state (e.g.
    /// billing reads the appointment it invoices).
    pub fn load<A>(
        &self,
        clinic_id: ClinicId,
        aggregate_id: AggregateId,
        make_aggregate: impl FnOnce(ClinicId, AggregateId) -> A,
    ) -> Result<A, DispatchError>
    where
        A: Aggregate,
        A::Event: DeserializeOwned,
    {
        let history = self.store.load_stream(clinic_id, aggregate_id)?;
        validate_loaded_stream(clinic_id, aggregate_id, &history)?;

        let mut aggregate = make_aggregate(clinic_id, aggregate_id);
        apply_history::<A>(&mut aggregate, &history)?;
        Ok(aggregate)
    }
}

fn stream_version(stream: &[StoredEvent]) -> u64 {
    stream.last().map(|e| e.sequence_number).unwrap_or(0)
}

fn validate_loaded_stream(
    clinic_id: ClinicId,
    aggregate_id: AggregateId,
    stream: &[StoredEvent],
) -> Result<(), DispatchError> {
    // Enforce clinic isolation even if a buggy backend returns cross-clinic data.
    let mut last = 0u64;
    for (idx, e) in stream.iter().enumerate() {
        if e.clinic_id != clinic_id {
            return Err(DispatchError::ClinicIsolation(format!(
                "loaded stream contains wrong clinic_id at index {idx}"
            )));
        }
        if e.aggregate_id != aggregate_id {
            return Err(DispatchError::ClinicIsolation(format!(
                "loaded stream contains wrong aggregate_id at index {idx}"
            )));
        }
        if e.sequence_number <= last {
            return Err(DispatchError::Store(EventStoreError::InvalidAppend(format!(
                "non-monotonic sequence_number in loaded stream (last={last}, found={})",
                e.sequence_number
            ))));
        }
        last = e.sequence_number;
    }
    Ok(())
}

fn apply_history<A>(aggregate: &mut A, history: &[StoredEvent]) -> Result<(), DispatchError>
where
    A: Aggregate,
    A::Event: DeserializeOwned,
{
    for stored in history {
        let ev: A::Event = serde_json::from_value(stored.payload.clone())
            .map_err(|e| DispatchError::Deserialize(e.to_string()))?;
        aggregate.apply(&ev);
    }

    Ok(())
}
