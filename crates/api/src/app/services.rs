use std::{
    collections::VecDeque,
    convert::Infallible,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use chrono::{DateTime, Utc};
use serde_json::{Value as JsonValue, json};
use tokio::sync::broadcast;
use tokio_stream::{StreamExt, wrappers::BroadcastStream};

use dentaflow_catalog::TreatmentId;
use dentaflow_clinical::{ClinicalNotes, ClinicalRecord, ClinicalRecordCommand, ClinicalRecordId, RecordTreatment};
use dentaflow_core::{Aggregate, AggregateId, ClinicId, DomainError, UserId};
use dentaflow_events::{ClinicScoped, EventEnvelope, InMemoryEventBus};
use dentaflow_infra::{
    admission::{active_patient, appointment_of},
    billing::{BillingError, generate_invoice_from_appointment},
    booking::{BookingError, BookingIntake, BookingOutcome, BookingRequest, process_booking},
    command_dispatcher::{CommandDispatcher, DispatchError},
    dashboard::Dashboard,
    event_store::{EventStore, EventStoreError, InMemoryEventStore, StoredEvent},
    projections::{
        AppointmentReadModel, AppointmentsProjection, ClinicalRecordReadModel, ClinicalRecordsProjection,
        InvoiceReadModel, InvoicesProjection, PatientReadModel, PatientsProjection, Projection, ProjectionError,
        TreatmentReadModel, TreatmentsProjection, clinical_records, invoices, patients,
    },
    reactors::VisitReactor,
    read_model::InMemoryClinicStore,
    workers::{BusWorker, WorkerHandle},
};
use dentaflow_invoicing::{Invoice, InvoiceCommand, InvoiceId};
use dentaflow_patients::{Patient, PatientId};
use dentaflow_scheduling::{Appointment, AppointmentId};

use crate::config::ApiConfig;

/// Realtime message broadcasted via SSE.
#[derive(Debug, Clone, serde::Serialize)]
pub struct RealtimeMessage {
    pub clinic_id: ClinicId,
    pub topic: String,
    pub payload: JsonValue,
}

impl ClinicScoped for RealtimeMessage {
    fn clinic_id(&self) -> ClinicId {
        self.clinic_id
    }
}

/// Why a projection rebuild stopped.
#[derive(Debug, thiserror::Error)]
pub enum RebuildError {
    #[error(transparent)]
    Store(#[from] EventStoreError),

    #[error("{projection}: {source}")]
    Projection {
        projection: &'static str,
        #[source]
        source: ProjectionError,
    },
}

type Store<K, V> = Arc<InMemoryClinicStore<K, V>>;
type Bus = Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>;

pub type Dispatcher = CommandDispatcher<Arc<InMemoryEventStore>, Bus>;
pub type Patients = PatientsProjection<Store<PatientId, PatientReadModel>>;
pub type Appointments = AppointmentsProjection<Store<AppointmentId, AppointmentReadModel>>;
pub type Treatments = TreatmentsProjection<Store<TreatmentId, TreatmentReadModel>>;
pub type ClinicalRecords = ClinicalRecordsProjection<Store<ClinicalRecordId, ClinicalRecordReadModel>>;
pub type Invoices = InvoicesProjection<Store<InvoiceId, InvoiceReadModel>>;

/// Everything a request handler needs: the command side, the read models and
/// the realtime channel.
///
/// Commands run one at a time under `command_lock`; their committed events
/// are applied to every projection (and to the visit reactor) before the lock
/// is released, so a client always reads its own writes. The bus only feeds
/// the realtime channel.
pub struct AppServices {
    dispatcher: Dispatcher,
    patients: Patients,
    appointments: Appointments,
    treatments: Treatments,
    clinical_records: ClinicalRecords,
    invoices: Invoices,
    visit_reactor: VisitReactor,
    booking_intake: BookingIntake,
    command_lock: Mutex<()>,
    realtime_tx: broadcast::Sender<RealtimeMessage>,
    realtime_worker: Mutex<Option<WorkerHandle>>,
}

impl AppServices {
    pub fn new(config: &ApiConfig) -> std::io::Result<Self> {
        let store = Arc::new(InMemoryEventStore::new());
        let bus: Bus = Arc::new(InMemoryEventBus::new());

        // Lossy broadcast, clinic-filtered per SSE connection.
        let (realtime_tx, _realtime_rx) = broadcast::channel::<RealtimeMessage>(config.realtime_channel_capacity);

        let forward = realtime_tx.clone();
        let realtime_worker = BusWorker::spawn("realtime-fanout", &bus, None, move |env: EventEnvelope<JsonValue>| {
            // No subscribers is not an error.
            let _ = forward.send(realtime_message(&env));
            Ok::<(), Infallible>(())
        })?;

        Ok(Self {
            dispatcher: CommandDispatcher::new(store, bus),
            patients: PatientsProjection::new(Arc::default()),
            appointments: AppointmentsProjection::new(Arc::default()),
            treatments: TreatmentsProjection::new(Arc::default()),
            clinical_records: ClinicalRecordsProjection::new(Arc::default()),
            invoices: InvoicesProjection::new(Arc::default()),
            visit_reactor: VisitReactor,
            booking_intake: BookingIntake {
                clinic_id: config.booking_clinic_id,
                default_country_code: config.booking_default_country_code.clone(),
            },
            command_lock: Mutex::new(()),
            realtime_tx,
            realtime_worker: Mutex::new(Some(realtime_worker)),
        })
    }

    pub fn patients(&self) -> &Patients {
        &self.patients
    }

    pub fn appointments(&self) -> &Appointments {
        &self.appointments
    }

    pub fn treatments(&self) -> &Treatments {
        &self.treatments
    }

    pub fn clinical_records(&self) -> &ClinicalRecords {
        &self.clinical_records
    }

    pub fn invoices(&self) -> &Invoices {
        &self.invoices
    }

    pub fn dashboard(&self) -> Dashboard<'_, Store<PatientId, PatientReadModel>, Store<AppointmentId, AppointmentReadModel>, Store<InvoiceId, InvoiceReadModel>> {
        Dashboard::new(&self.patients, &self.appointments, &self.invoices)
    }

    pub fn realtime_tx(&self) -> &broadcast::Sender<RealtimeMessage> {
        &self.realtime_tx
    }

    /// Dispatch one command and project what it committed.
    pub fn execute<A>(
        &self,
        clinic_id: ClinicId,
        aggregate_id: AggregateId,
        aggregate_type: &'static str,
        command: A::Command,
        make_aggregate: impl FnOnce(ClinicId, AggregateId) -> A,
    ) -> Result<Vec<StoredEvent>, DispatchError>
    where
        A: Aggregate<Error = DomainError>,
        A::Event: dentaflow_events::Event + serde::Serialize + serde::de::DeserializeOwned,
    {
        self.locked(|| {
            let committed = self
                .dispatcher
                .dispatch(clinic_id, aggregate_id, aggregate_type, command, make_aggregate)?;
            self.project(&committed);
            Ok(committed)
        })
    }

    /// Like [`Self::execute`], for commands about a patient that must still be active.
    pub fn execute_for_patient<A>(
        &self,
        clinic_id: ClinicId,
        patient_id: PatientId,
        aggregate_id: AggregateId,
        aggregate_type: &'static str,
        command: A::Command,
        make_aggregate: impl FnOnce(ClinicId, AggregateId) -> A,
    ) -> Result<Vec<StoredEvent>, DispatchError>
    where
        A: Aggregate<Error = DomainError>,
        A::Event: dentaflow_events::Event + serde::Serialize + serde::de::DeserializeOwned,
    {
        self.locked(|| {
            active_patient(&self.dispatcher, clinic_id, patient_id)?;
            let committed = self
                .dispatcher
                .dispatch(clinic_id, aggregate_id, aggregate_type, command, make_aggregate)?;
            self.project(&committed);
            Ok(committed)
        })
    }

    /// Issue an invoice for an active patient, optionally against one of
    /// that patient's appointments.
    pub fn issue_invoice(
        &self,
        clinic_id: ClinicId,
        patient_id: PatientId,
        appointment_id: Option<AppointmentId>,
        invoice_id: InvoiceId,
        command: InvoiceCommand,
    ) -> Result<Vec<StoredEvent>, DispatchError> {
        self.locked(|| {
            active_patient(&self.dispatcher, clinic_id, patient_id)?;
            if let Some(appointment_id) = appointment_id {
                appointment_of(&self.dispatcher, clinic_id, appointment_id, patient_id)?;
            }
            let committed = self.dispatcher.dispatch(
                clinic_id,
                invoice_id.0,
                invoices::AGGREGATE_TYPE,
                command,
                |_, id| Invoice::empty(InvoiceId::new(id)),
            )?;
            self.project(&committed);
            Ok(committed)
        })
    }

    /// Record a catalog procedure performed during an appointment.
    ///
    /// The patient comes from the appointment; the procedure name and
    /// standard cost are snapshotted from the catalog as it is now.
    pub fn record_treatment(
        &self,
        clinic_id: ClinicId,
        appointment_id: AppointmentId,
        procedure_id: TreatmentId,
        clinical: ClinicalNotes,
        author_id: UserId,
        now: DateTime<Utc>,
    ) -> Result<ClinicalRecordId, DispatchError> {
        self.locked(|| {
            let appointment = self
                .dispatcher
                .load(clinic_id, appointment_id.0, |_, id| Appointment::empty(AppointmentId::new(id)))?;
            let Some(patient_id) = appointment.patient_id().filter(|_| appointment.exists()) else {
                return Err(DomainError::not_found("appointment").into());
            };
            let Some(procedure) = self.treatments.get(clinic_id, &procedure_id) else {
                return Err(DomainError::not_found("treatment").into());
            };
            if !procedure.active {
                return Err(DomainError::invariant("treatment is inactive").into());
            }
            active_patient(&self.dispatcher, clinic_id, patient_id)?;

            let record_id = ClinicalRecordId::new(AggregateId::new());
            let committed = self.dispatcher.dispatch(
                clinic_id,
                record_id.0,
                clinical_records::AGGREGATE_TYPE,
                ClinicalRecordCommand::RecordTreatment(RecordTreatment {
                    clinic_id,
                    record_id,
                    appointment_id,
                    patient_id,
                    procedure_id,
                    procedure_name: procedure.details.name,
                    standard_cost: procedure.details.standard_cost,
                    clinical,
                    author_id,
                    occurred_at: now,
                }),
                |_, id| ClinicalRecord::empty(ClinicalRecordId::new(id)),
            )?;
            self.project(&committed);
            Ok(record_id)
        })
    }

    pub fn invoice_appointment(
        &self,
        clinic_id: ClinicId,
        appointment_id: AppointmentId,
        now: DateTime<Utc>,
    ) -> Result<InvoiceId, BillingError> {
        self.locked(|| {
            let (invoice_id, committed) = generate_invoice_from_appointment(
                &self.dispatcher,
                &self.clinical_records,
                clinic_id,
                appointment_id,
                now,
            )?;
            self.project(&committed);
            Ok(invoice_id)
        })
    }

    pub fn book(&self, request: &BookingRequest, now: DateTime<Utc>) -> Result<BookingOutcome, BookingError> {
        self.locked(|| {
            let outcome = process_booking(
                &self.dispatcher,
                &self.patients,
                &self.appointments,
                &self.booking_intake,
                request,
                now,
            )?;
            self.project(&outcome.committed);
            Ok(outcome)
        })
    }

    /// Replay a clinic's whole event log into fresh read models.
    ///
    /// Returns the number of events replayed.
    pub fn rebuild_projections(&self, clinic_id: ClinicId) -> Result<usize, RebuildError> {
        self.locked(|| {
            let envelopes: Vec<EventEnvelope<JsonValue>> = self
                .dispatcher
                .store()
                .load_clinic(clinic_id)?
                .iter()
                .map(StoredEvent::to_envelope)
                .collect();

            for projection in self.projections() {
                projection
                    .rebuild_from_scratch(envelopes.clone())
                    .map_err(|source| RebuildError::Projection {
                        projection: projection.name(),
                        source,
                    })?;
            }

            tracing::info!(clinic_id = %clinic_id, events = envelopes.len(), "projections rebuilt");
            Ok(envelopes.len())
        })
    }

    /// Stop the realtime fan-out thread. Later calls are no-ops.
    pub fn shutdown(&self) {
        let worker = self
            .realtime_worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(worker) = worker {
            worker.shutdown();
        }
    }

    fn locked<T>(&self, f: impl FnOnce() -> T) -> T {
        let _guard = self.command_lock.lock().unwrap_or_else(PoisonError::into_inner);
        f()
    }

    fn projections(&self) -> [&dyn Projection; 5] {
        [
            &self.patients,
            &self.appointments,
            &self.treatments,
            &self.clinical_records,
            &self.invoices,
        ]
    }

    /// Apply committed events to every read model, then run the reactors on
    /// them; whatever the reactors commit is applied the same way.
    ///
    /// Called with the command lock held.
    fn project(&self, committed: &[StoredEvent]) {
        let mut pending: VecDeque<EventEnvelope<JsonValue>> = committed.iter().map(StoredEvent::to_envelope).collect();

        while let Some(env) = pending.pop_front() {
            for projection in self.projections() {
                if let Err(err) = projection.apply_envelope(&env) {
                    tracing::error!(
                        projection = projection.name(),
                        clinic_id = %env.clinic_id(),
                        aggregate_type = env.aggregate_type(),
                        aggregate_id = %env.aggregate_id(),
                        error = %err,
                        "projection failed to apply event"
                    );
                }
            }

            match self.visit_reactor.react(&env) {
                Ok(Some((clinic_id, patient_id, command))) => {
                    match self.dispatcher.dispatch(clinic_id, patient_id.0, patients::AGGREGATE_TYPE, command, |_, id| {
                        Patient::empty(PatientId::new(id))
                    }) {
                        Ok(follow_up) => pending.extend(follow_up.iter().map(StoredEvent::to_envelope)),
                        Err(err) => tracing::warn!(
                            clinic_id = %clinic_id,
                            aggregate_type = patients::AGGREGATE_TYPE,
                            aggregate_id = %patient_id.0,
                            error = %err,
                            "visit reactor command failed"
                        ),
                    }
                }
                Ok(None) => {}
                Err(err) => tracing::warn!(
                    clinic_id = %env.clinic_id(),
                    aggregate_id = %env.aggregate_id(),
                    error = %err,
                    "visit reactor could not read event"
                ),
            }
        }
    }
}

fn realtime_message(env: &EventEnvelope<JsonValue>) -> RealtimeMessage {
    RealtimeMessage {
        clinic_id: env.clinic_id(),
        topic: env.aggregate_type().to_string(),
        payload: json!({
            "aggregate_id": env.aggregate_id(),
            "sequence_number": env.sequence_number(),
            "event": env.payload(),
        }),
    }
}

pub fn clinic_sse_stream(
    services: Arc<AppServices>,
    clinic_id: ClinicId,
) -> Sse<impl tokio_stream::Stream<Item = Result<SseEvent, Infallible>>> {
    let rx = services.realtime_tx().subscribe();
    let stream = BroadcastStream::new(rx).filter_map(move |msg| match msg {
        Ok(m) if m.is_for(clinic_id) => {
            let data = serde_json::to_string(&m.payload).unwrap_or_else(|_| "{}".to_string());
            Some(Ok(SseEvent::default().event(m.topic).data(data)))
        }
        _ => None,
    });

    Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
}
