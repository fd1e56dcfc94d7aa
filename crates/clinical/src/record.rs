use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use dentaflow_catalog::TreatmentId;
use dentaflow_core::{Aggregate, AggregateId, AggregateRoot, ClinicId, DomainError, Money, UserId, text};
use dentaflow_events::Event;
use dentaflow_patients::PatientId;
use dentaflow_scheduling::AppointmentId;

pub const TOOTH_NUMBER_MAX: usize = 3;
pub const SURFACE_MAX: usize = 10;
pub const DIAGNOSIS_MAX: usize = 500;
pub const NOTES_MAX: usize = 1000;

pub const OVERRIDE_ON_RECORD_REASON: &str = "Manual price override";
pub const OVERRIDE_ON_AMEND_REASON: &str = "Price override updated";

/// Clinical record identifier (clinic-scoped via `clinic_id` fields in events/commands).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClinicalRecordId(pub AggregateId);

impl ClinicalRecordId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for ClinicalRecordId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// The charting part of a record: where, what was found, and the price charged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClinicalNotes {
    pub tooth_number: Option<String>,
    pub surface: Option<String>,
    pub diagnosis: Option<String>,
    pub notes: Option<String>,
    pub cost_override: Option<Money>,
}

impl ClinicalNotes {
    fn validated(self) -> Result<Self, DomainError> {
        Ok(Self {
            tooth_number: text::optional("tooth_number", self.tooth_number.as_deref(), TOOTH_NUMBER_MAX)?,
            surface: text::optional("surface", self.surface.as_deref(), SURFACE_MAX)?,
            diagnosis: text::optional("diagnosis", self.diagnosis.as_deref(), DIAGNOSIS_MAX)?,
            notes: text::optional("notes", self.notes.as_deref(), NOTES_MAX)?,
            cost_override: self.cost_override,
        })
    }
}

/// Partial amendment of [`ClinicalNotes`]; `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClinicalNotesPatch {
    pub tooth_number: Option<String>,
    pub surface: Option<String>,
    pub diagnosis: Option<String>,
    pub notes: Option<String>,
    pub cost_override: Option<Money>,
}

/// Aggregate root: ClinicalRecord.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClinicalRecord {
    id: ClinicalRecordId,
    clinic_id: Option<ClinicId>,
    appointment_id: Option<AppointmentId>,
    patient_id: Option<PatientId>,
    procedure_id: Option<TreatmentId>,
    procedure_name: String,
    standard_cost: Money,
    clinical: ClinicalNotes,
    removed: bool,
    version: u64,
    created: bool,
}

impl ClinicalRecord {
    /// Create an empty, not-yet-recorded aggregate instance for rehydration.
    pub fn empty(id: ClinicalRecordId) -> Self {
        Self {
            id,
            clinic_id: None,
            appointment_id: None,
            patient_id: None,
            procedure_id: None,
            procedure_name: String::new(),
            standard_cost: Money::ZERO,
            clinical: ClinicalNotes::default(),
            removed: false,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> ClinicalRecordId {
        self.id
    }

    pub fn clinic_id(&self) -> Option<ClinicId> {
        self.clinic_id
    }

    pub fn appointment_id(&self) -> Option<AppointmentId> {
        self.appointment_id
    }

    pub fn patient_id(&self) -> Option<PatientId> {
        self.patient_id
    }

    pub fn procedure_name(&self) -> &str {
        &self.procedure_name
    }

    pub fn clinical(&self) -> &ClinicalNotes {
        &self.clinical
    }

    pub fn is_removed(&self) -> bool {
        self.removed
    }

    /// The price billed for this procedure: the override if any, else the
    /// catalog price captured when the record was made.
    pub fn effective_cost(&self) -> Money {
        self.clinical.cost_override.unwrap_or(self.standard_cost)
    }
}

impl AggregateRoot for ClinicalRecord {
    type Id = ClinicalRecordId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: RecordTreatment.
///
/// `procedure_name` and `standard_cost` are the catalog values at the time of
/// recording; the caller resolves them from the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordTreatment {
    pub clinic_id: ClinicId,
    pub record_id: ClinicalRecordId,
    pub appointment_id: AppointmentId,
    pub patient_id: PatientId,
    pub procedure_id: TreatmentId,
    pub procedure_name: String,
    pub standard_cost: Money,
    pub clinical: ClinicalNotes,
    pub author_id: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AmendClinicalRecord.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AmendClinicalRecord {
    pub clinic_id: ClinicId,
    pub record_id: ClinicalRecordId,
    pub changes: ClinicalNotesPatch,
    pub author_id: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RemoveClinicalRecord.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveClinicalRecord {
    pub clinic_id: ClinicId,
    pub record_id: ClinicalRecordId,
    pub author_id: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClinicalRecordCommand {
    RecordTreatment(RecordTreatment),
    AmendClinicalRecord(AmendClinicalRecord),
    RemoveClinicalRecord(RemoveClinicalRecord),
}

/// Event: TreatmentRecorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreatmentRecorded {
    pub clinic_id: ClinicId,
    pub record_id: ClinicalRecordId,
    pub appointment_id: AppointmentId,
    pub patient_id: PatientId,
    pub procedure_id: TreatmentId,
    pub procedure_name: String,
    pub standard_cost: Money,
    pub clinical: ClinicalNotes,
    pub author_id: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ClinicalRecordAmended (full charting after the change).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClinicalRecordAmended {
    pub clinic_id: ClinicId,
    pub record_id: ClinicalRecordId,
    pub clinical: ClinicalNotes,
    pub author_id: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: CostOverridden (price audit trail).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CostOverridden {
    pub clinic_id: ClinicId,
    pub record_id: ClinicalRecordId,
    pub previous_cost: Money,
    pub new_cost: Money,
    pub reason: String,
    pub author_id: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ClinicalRecordRemoved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClinicalRecordRemoved {
    pub clinic_id: ClinicId,
    pub record_id: ClinicalRecordId,
    pub author_id: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClinicalRecordEvent {
    TreatmentRecorded(TreatmentRecorded),
    ClinicalRecordAmended(ClinicalRecordAmended),
    CostOverridden(CostOverridden),
    ClinicalRecordRemoved(ClinicalRecordRemoved),
}

impl Event for ClinicalRecordEvent {
    fn event_type(&self) -> &'static str {
        match self {
            ClinicalRecordEvent::TreatmentRecorded(_) => "clinical.record.treatment_recorded",
            ClinicalRecordEvent::ClinicalRecordAmended(_) => "clinical.record.amended",
            ClinicalRecordEvent::CostOverridden(_) => "clinical.record.cost_overridden",
            ClinicalRecordEvent::ClinicalRecordRemoved(_) => "clinical.record.removed",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            ClinicalRecordEvent::TreatmentRecorded(e) => e.occurred_at,
            ClinicalRecordEvent::ClinicalRecordAmended(e) => e.occurred_at,
            ClinicalRecordEvent::CostOverridden(e) => e.occurred_at,
            ClinicalRecordEvent::ClinicalRecordRemoved(e) => e.occurred_at,
        }
    }
}

impl Aggregate for ClinicalRecord {
    type Command = ClinicalRecordCommand;
    type Event = ClinicalRecordEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            ClinicalRecordEvent::TreatmentRecorded(e) => {
                self.id = e.record_id;
                self.clinic_id = Some(e.clinic_id);
                self.appointment_id = Some(e.appointment_id);
                self.patient_id = Some(e.patient_id);
                self.procedure_id = Some(e.procedure_id);
                self.procedure_name = e.procedure_name.clone();
                self.standard_cost = e.standard_cost;
                self.clinical = e.clinical.clone();
                self.created = true;
            }
            ClinicalRecordEvent::ClinicalRecordAmended(e) => {
                self.clinical = e.clinical.clone();
            }
            // Audit only; the override itself travels in the record/amend event.
            ClinicalRecordEvent::CostOverridden(_) => {}
            ClinicalRecordEvent::ClinicalRecordRemoved(_) => {
                self.removed = true;
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            ClinicalRecordCommand::RecordTreatment(cmd) => self.handle_record(cmd),
            ClinicalRecordCommand::AmendClinicalRecord(cmd) => self.handle_amend(cmd),
            ClinicalRecordCommand::RemoveClinicalRecord(cmd) => self.handle_remove(cmd),
        }
    }
}

impl ClinicalRecord {
    fn ensure_live(&self, clinic_id: ClinicId, record_id: ClinicalRecordId) -> Result<(), DomainError> {
        if !self.created || self.removed {
            return Err(DomainError::not_found("clinical record"));
        }
        if self.clinic_id != Some(clinic_id) {
            return Err(DomainError::invariant("clinic mismatch"));
        }
        if self.id != record_id {
            return Err(DomainError::invariant("record_id mismatch"));
        }
        Ok(())
    }

    fn handle_record(&self, cmd: &RecordTreatment) -> Result<Vec<ClinicalRecordEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("clinical record already exists"));
        }
        if self.id != cmd.record_id {
            return Err(DomainError::invariant("record_id mismatch"));
        }

        let procedure_name = text::required("procedure_name", &cmd.procedure_name, dentaflow_catalog::treatment::NAME_MAX)?;
        let clinical = cmd.clinical.clone().validated()?;

        let mut events = vec![ClinicalRecordEvent::TreatmentRecorded(TreatmentRecorded {
            clinic_id: cmd.clinic_id,
            record_id: cmd.record_id,
            appointment_id: cmd.appointment_id,
            patient_id: cmd.patient_id,
            procedure_id: cmd.procedure_id,
            procedure_name,
            standard_cost: cmd.standard_cost,
            clinical: clinical.clone(),
            author_id: cmd.author_id,
            occurred_at: cmd.occurred_at,
        })];

        if let Some(new_cost) = clinical.cost_override.filter(|c| *c != cmd.standard_cost) {
            events.push(ClinicalRecordEvent::CostOverridden(CostOverridden {
                clinic_id: cmd.clinic_id,
                record_id: cmd.record_id,
                previous_cost: cmd.standard_cost,
                new_cost,
                reason: OVERRIDE_ON_RECORD_REASON.to_string(),
                author_id: cmd.author_id,
                occurred_at: cmd.occurred_at,
            }));
        }

        Ok(events)
    }

    fn handle_amend(&self, cmd: &AmendClinicalRecord) -> Result<Vec<ClinicalRecordEvent>, DomainError> {
        self.ensure_live(cmd.clinic_id, cmd.record_id)?;

        let c = &cmd.changes;
        let current = &self.clinical;
        let clinical = ClinicalNotes {
            tooth_number: c.tooth_number.clone().or_else(|| current.tooth_number.clone()),
            surface: c.surface.clone().or_else(|| current.surface.clone()),
            diagnosis: c.diagnosis.clone().or_else(|| current.diagnosis.clone()),
            notes: c.notes.clone().or_else(|| current.notes.clone()),
            cost_override: c.cost_override.or(current.cost_override),
        }
        .validated()?;

        if &clinical == current {
            return Ok(vec![]);
        }

        let override_changed = c
            .cost_override
            .filter(|new_cost| Some(*new_cost) != current.cost_override);

        let mut events = vec![ClinicalRecordEvent::ClinicalRecordAmended(ClinicalRecordAmended {
            clinic_id: cmd.clinic_id,
            record_id: cmd.record_id,
            clinical,
            author_id: cmd.author_id,
            occurred_at: cmd.occurred_at,
        })];

        if let Some(new_cost) = override_changed {
            events.push(ClinicalRecordEvent::CostOverridden(CostOverridden {
                clinic_id: cmd.clinic_id,
                record_id: cmd.record_id,
                previous_cost: self.effective_cost(),
                new_cost,
                reason: OVERRIDE_ON_AMEND_REASON.to_string(),
                author_id: cmd.author_id,
                occurred_at: cmd.occurred_at,
            }));
        }

        Ok(events)
    }

    fn handle_remove(&self, cmd: &RemoveClinicalRecord) -> Result<Vec<ClinicalRecordEvent>, DomainError> {
        self.ensure_live(cmd.clinic_id, cmd.record_id)?;

        Ok(vec![ClinicalRecordEvent::ClinicalRecordRemoved(ClinicalRecordRemoved {
            clinic_id: cmd.clinic_id,
            record_id: cmd.record_id,
            author_id: cmd.author_id,
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use dentaflow_events::execute;

    fn test_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 4, 2, 11, 0, 0).unwrap()
    }

    fn record_cmd(clinic_id: ClinicId, record_id: ClinicalRecordId, cost_override: Option<Money>) -> RecordTreatment {
        RecordTreatment {
            clinic_id,
            record_id,
            appointment_id: AppointmentId::new(AggregateId::new()),
            patient_id: PatientId::new(AggregateId::new()),
            procedure_id: TreatmentId::new(AggregateId::new()),
            procedure_name: "Composite filling".into(),
            standard_cost: Money::from_minor(200_000),
            clinical: ClinicalNotes {
                tooth_number: Some("36".into()),
                surface: Some("MO".into()),
                diagnosis: Some("Secondary caries".into()),
                notes: None,
                cost_override,
            },
            author_id: UserId::new(),
            occurred_at: test_time(),
        }
    }

    fn recorded(clinic_id: ClinicId, cost_override: Option<Money>) -> ClinicalRecord {
        let id = ClinicalRecordId::new(AggregateId::new());
        let mut record = ClinicalRecord::empty(id);
        execute(
            &mut record,
            &ClinicalRecordCommand::RecordTreatment(record_cmd(clinic_id, id, cost_override)),
        )
        .unwrap();
        record
    }

    fn amend(record: &ClinicalRecord, clinic_id: ClinicId, changes: ClinicalNotesPatch) -> ClinicalRecordCommand {
        ClinicalRecordCommand::AmendClinicalRecord(AmendClinicalRecord {
            clinic_id,
            record_id: record.id_typed(),
            changes,
            author_id: UserId::new(),
            occurred_at: test_time(),
        })
    }

    #[test]
    fn effective_cost_falls_back_to_standard_price() {
        let record = recorded(ClinicId::new(), None);
        assert_eq!(record.effective_cost(), Money::from_minor(200_000));
        assert_eq!(record.version(), 1);
    }

    #[test]
    fn override_on_record_is_audited() {
        let clinic_id = ClinicId::new();
        let id = ClinicalRecordId::new(AggregateId::new());
        let events = ClinicalRecord::empty(id)
            .handle(&ClinicalRecordCommand::RecordTreatment(record_cmd(
                clinic_id,
                id,
                Some(Money::from_minor(150_000)),
            )))
            .unwrap();

        assert_eq!(events.len(), 2);
        match &events[1] {
            ClinicalRecordEvent::CostOverridden(e) => {
                assert_eq!(e.previous_cost, Money::from_minor(200_000));
                assert_eq!(e.new_cost, Money::from_minor(150_000));
                assert_eq!(e.reason, OVERRIDE_ON_RECORD_REASON);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn override_equal_to_standard_price_is_not_audited() {
        let clinic_id = ClinicId::new();
        let id = ClinicalRecordId::new(AggregateId::new());
        let events = ClinicalRecord::empty(id)
            .handle(&ClinicalRecordCommand::RecordTreatment(record_cmd(
                clinic_id,
                id,
                Some(Money::from_minor(200_000)),
            )))
            .unwrap();
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn amending_override_audits_previous_effective_cost() {
        let clinic_id = ClinicId::new();
        let mut record = recorded(clinic_id, Some(Money::from_minor(180_000)));

        let cmd = amend(
            &record,
            clinic_id,
            ClinicalNotesPatch {
                cost_override: Some(Money::from_minor(120_000)),
                ..Default::default()
            },
        );
        let events = execute(&mut record, &cmd).unwrap();

        match &events[1] {
            ClinicalRecordEvent::CostOverridden(e) => {
                assert_eq!(e.previous_cost, Money::from_minor(180_000));
                assert_eq!(e.reason, OVERRIDE_ON_AMEND_REASON);
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert_eq!(record.effective_cost(), Money::from_minor(120_000));
    }

    #[test]
    fn amending_notes_only_emits_no_audit() {
        let clinic_id = ClinicId::new();
        let mut record = recorded(clinic_id, None);
        let cmd = amend(
            &record,
            clinic_id,
            ClinicalNotesPatch {
                notes: Some("Patient tolerated well".into()),
                ..Default::default()
            },
        );
        let events = execute(&mut record, &cmd).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(record.clinical().tooth_number.as_deref(), Some("36"));
    }

    #[test]
    fn tooth_number_is_bounded() {
        let clinic_id = ClinicId::new();
        let record = recorded(clinic_id, None);
        let err = record
            .handle(&amend(
                &record,
                clinic_id,
                ClinicalNotesPatch {
                    tooth_number: Some("1234".into()),
                    ..Default::default()
                },
            ))
            .unwrap_err();
        assert_eq!(err, DomainError::validation("tooth_number must be at most 3 characters"));
    }

    #[test]
    fn removed_record_is_gone() {
        let clinic_id = ClinicId::new();
        let mut record = recorded(clinic_id, None);
        let cmd = ClinicalRecordCommand::RemoveClinicalRecord(RemoveClinicalRecord {
            clinic_id,
            record_id: record.id_typed(),
            author_id: UserId::new(),
            occurred_at: test_time(),
        });
        execute(&mut record, &cmd).unwrap();

        assert!(record.is_removed());
        let err = record
            .handle(&amend(&record, clinic_id, ClinicalNotesPatch::default()))
            .unwrap_err();
        assert_eq!(err, DomainError::not_found("clinical record"));
    }
}
