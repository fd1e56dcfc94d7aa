use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use dentaflow_core::{Aggregate, AggregateId, AggregateRoot, ClinicId, DomainError, Money, text};
use dentaflow_events::Event;

use crate::categories::canonical_category;

pub const CODE_MAX: usize = 20;
pub const NAME_MAX: usize = 100;
pub const DESCRIPTION_MAX: usize = 500;
pub const CATEGORY_MAX: usize = 50;
pub const MIN_DURATION_MINUTES: u32 = 5;
pub const MAX_DURATION_MINUTES: u32 = 480;

/// Treatment identifier (clinic-scoped via `clinic_id` fields in events/commands).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TreatmentId(pub AggregateId);

impl TreatmentId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for TreatmentId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Catalog entry fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreatmentDetails {
    pub code: Option<String>,
    pub name: String,
    pub description: Option<String>,
    pub standard_cost: Money,
    pub category: String,
    pub duration_minutes: Option<u32>,
}

impl TreatmentDetails {
    pub fn validated(self) -> Result<Self, DomainError> {
        let code = text::optional("code", self.code.as_deref(), CODE_MAX)?;
        let name = text::required("name", &self.name, NAME_MAX)?;
        let description = text::optional("description", self.description.as_deref(), DESCRIPTION_MAX)?;
        let category = text::required("category", &self.category, CATEGORY_MAX)?;
        // Canonical categories keep their canonical spelling so grouping is stable.
        let category = canonical_category(&category)
            .map(str::to_string)
            .unwrap_or(category);

        if let Some(minutes) = self.duration_minutes {
            if !(MIN_DURATION_MINUTES..=MAX_DURATION_MINUTES).contains(&minutes) {
                return Err(DomainError::validation(
                    "duration must be between 5 and 480 minutes",
                ));
            }
        }

        Ok(Self {
            code,
            name,
            description,
            standard_cost: self.standard_cost,
            category,
            duration_minutes: self.duration_minutes,
        })
    }
}

/// Partial update of [`TreatmentDetails`]; `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreatmentDetailsPatch {
    pub code: Option<String>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub standard_cost: Option<Money>,
    pub category: Option<String>,
    pub duration_minutes: Option<u32>,
}

/// Aggregate root: Treatment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Treatment {
    id: TreatmentId,
    clinic_id: Option<ClinicId>,
    details: Option<TreatmentDetails>,
    active: bool,
    version: u64,
    created: bool,
}

impl Treatment {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: TreatmentId) -> Self {
        Self {
            id,
            clinic_id: None,
            details: None,
            active: false,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> TreatmentId {
        self.id
    }

    pub fn clinic_id(&self) -> Option<ClinicId> {
        self.clinic_id
    }

    pub fn details(&self) -> Option<&TreatmentDetails> {
        self.details.as_ref()
    }

    pub fn is_active(&self) -> bool {
        self.active
    }
}

impl AggregateRoot for Treatment {
    type Id = TreatmentId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: CreateTreatment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateTreatment {
    pub clinic_id: ClinicId,
    pub treatment_id: TreatmentId,
    pub details: TreatmentDetails,
    pub active: bool,
    pub occurred_at: DateTime<Utc>,
}

/// Command: UpdateTreatment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateTreatment {
    pub clinic_id: ClinicId,
    pub treatment_id: TreatmentId,
    pub changes: TreatmentDetailsPatch,
    pub occurred_at: DateTime<Utc>,
}

/// Command: DeactivateTreatment (soft delete).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeactivateTreatment {
    pub clinic_id: ClinicId,
    pub treatment_id: TreatmentId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ReactivateTreatment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReactivateTreatment {
    pub clinic_id: ClinicId,
    pub treatment_id: TreatmentId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TreatmentCommand {
    CreateTreatment(CreateTreatment),
    UpdateTreatment(UpdateTreatment),
    DeactivateTreatment(DeactivateTreatment),
    ReactivateTreatment(ReactivateTreatment),
}

/// Event: TreatmentCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreatmentCreated {
    pub clinic_id: ClinicId,
    pub treatment_id: TreatmentId,
    pub details: TreatmentDetails,
    pub active: bool,
    pub occurred_at: DateTime<Utc>,
}

/// Event: TreatmentUpdated (full details after the change).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreatmentUpdated {
    pub clinic_id: ClinicId,
    pub treatment_id: TreatmentId,
    pub details: TreatmentDetails,
    pub occurred_at: DateTime<Utc>,
}

/// Event: TreatmentDeactivated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreatmentDeactivated {
    pub clinic_id: ClinicId,
    pub treatment_id: TreatmentId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: TreatmentReactivated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreatmentReactivated {
    pub clinic_id: ClinicId,
    pub treatment_id: TreatmentId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TreatmentEvent {
    TreatmentCreated(TreatmentCreated),
    TreatmentUpdated(TreatmentUpdated),
    TreatmentDeactivated(TreatmentDeactivated),
    TreatmentReactivated(TreatmentReactivated),
}

impl Event for TreatmentEvent {
    fn event_type(&self) -> &'static str {
        match self {
            TreatmentEvent::TreatmentCreated(_) => "catalog.treatment.created",
            TreatmentEvent::TreatmentUpdated(_) => "catalog.treatment.updated",
            TreatmentEvent::TreatmentDeactivated(_) => "catalog.treatment.deactivated",
            TreatmentEvent::TreatmentReactivated(_) => "catalog.treatment.reactivated",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            TreatmentEvent::TreatmentCreated(e) => e.occurred_at,
            TreatmentEvent::TreatmentUpdated(e) => e.occurred_at,
            TreatmentEvent::TreatmentDeactivated(e) => e.occurred_at,
            TreatmentEvent::TreatmentReactivated(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Treatment {
    type Command = TreatmentCommand;
    type Event = TreatmentEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            TreatmentEvent::TreatmentCreated(e) => {
                self.id = e.treatment_id;
                self.clinic_id = Some(e.clinic_id);
                self.details = Some(e.details.clone());
                self.active = e.active;
                self.created = true;
            }
            TreatmentEvent::TreatmentUpdated(e) => {
                self.details = Some(e.details.clone());
            }
            TreatmentEvent::TreatmentDeactivated(_) => self.active = false,
            TreatmentEvent::TreatmentReactivated(_) => self.active = true,
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            TreatmentCommand::CreateTreatment(cmd) => self.handle_create(cmd),
            TreatmentCommand::UpdateTreatment(cmd) => self.handle_update(cmd),
            TreatmentCommand::DeactivateTreatment(cmd) => self.handle_deactivate(cmd),
            TreatmentCommand::ReactivateTreatment(cmd) => self.handle_reactivate(cmd),
        }
    }
}

impl Treatment {
    fn ensure_existing(&self, clinic_id: ClinicId, treatment_id: TreatmentId) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found("treatment"));
        }
        if self.clinic_id != Some(clinic_id) {
            return Err(DomainError::invariant("clinic mismatch"));
        }
        if self.id != treatment_id {
            return Err(DomainError::invariant("treatment_id mismatch"));
        }
        Ok(())
    }

    fn handle_create(&self, cmd: &CreateTreatment) -> Result<Vec<TreatmentEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("treatment already exists"));
        }
        if self.id != cmd.treatment_id {
            return Err(DomainError::invariant("treatment_id mismatch"));
        }

        Ok(vec![TreatmentEvent::TreatmentCreated(TreatmentCreated {
            clinic_id: cmd.clinic_id,
            treatment_id: cmd.treatment_id,
            details: cmd.details.clone().validated()?,
            active: cmd.active,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_update(&self, cmd: &UpdateTreatment) -> Result<Vec<TreatmentEvent>, DomainError> {
        self.ensure_existing(cmd.clinic_id, cmd.treatment_id)?;
        let Some(current) = &self.details else {
            return Err(DomainError::invariant("catalog entry has no details"));
        };

        let c = &cmd.changes;
        let merged = TreatmentDetails {
            code: c.code.clone().or_else(|| current.code.clone()),
            name: c.name.clone().unwrap_or_else(|| current.name.clone()),
            description: c.description.clone().or_else(|| current.description.clone()),
            standard_cost: c.standard_cost.unwrap_or(current.standard_cost),
            category: c.category.clone().unwrap_or_else(|| current.category.clone()),
            duration_minutes: c.duration_minutes.or(current.duration_minutes),
        }
        .validated()?;

        if &merged == current {
            return Ok(vec![]);
        }

        Ok(vec![TreatmentEvent::TreatmentUpdated(TreatmentUpdated {
            clinic_id: cmd.clinic_id,
            treatment_id: cmd.treatment_id,
            details: merged,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_deactivate(&self, cmd: &DeactivateTreatment) -> Result<Vec<TreatmentEvent>, DomainError> {
        self.ensure_existing(cmd.clinic_id, cmd.treatment_id)?;
        if !self.active {
            return Err(DomainError::conflict("treatment is already inactive"));
        }
        Ok(vec![TreatmentEvent::TreatmentDeactivated(TreatmentDeactivated {
            clinic_id: cmd.clinic_id,
            treatment_id: cmd.treatment_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_reactivate(&self, cmd: &ReactivateTreatment) -> Result<Vec<TreatmentEvent>, DomainError> {
        self.ensure_existing(cmd.clinic_id, cmd.treatment_id)?;
        if self.active {
            return Err(DomainError::conflict("treatment is already active"));
        }
        Ok(vec![TreatmentEvent::TreatmentReactivated(TreatmentReactivated {
            clinic_id: cmd.clinic_id,
            treatment_id: cmd.treatment_id,
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
        Utc.with_ymd_and_hms(2025, 1, 10, 8, 0, 0).unwrap()
    }

    fn scaling() -> TreatmentDetails {
        TreatmentDetails {
            code: Some("D1110".into()),
            name: "Scaling and polishing".into(),
            description: None,
            standard_cost: Money::from_minor(150_000),
            category: "preventive".into(),
            duration_minutes: Some(45),
        }
    }

    fn created(clinic_id: ClinicId) -> Treatment {
        let id = TreatmentId::new(AggregateId::new());
        let mut t = Treatment::empty(id);
        let cmd = TreatmentCommand::CreateTreatment(CreateTreatment {
            clinic_id,
            treatment_id: id,
            details: scaling(),
            active: true,
            occurred_at: test_time(),
        });
        execute(&mut t, &cmd).unwrap();
        t
    }

    #[test]
    fn create_uses_canonical_category_spelling() {
        let t = created(ClinicId::new());
        assert_eq!(t.details().unwrap().category, "Preventive");
        assert!(t.is_active());
    }

    #[test]
    fn custom_categories_are_kept_as_typed() {
        let mut d = scaling();
        d.category = " Implantology ".into();
        assert_eq!(d.validated().unwrap().category, "Implantology");
    }

    #[test]
    fn duration_must_be_within_bounds() {
        let mut d = scaling();
        d.duration_minutes = Some(4);
        assert!(d.validated().is_err());
    }

    #[test]
    fn update_changes_price_only() {
        let clinic_id = ClinicId::new();
        let mut t = created(clinic_id);
        let cmd = TreatmentCommand::UpdateTreatment(UpdateTreatment {
            clinic_id,
            treatment_id: t.id_typed(),
            changes: TreatmentDetailsPatch {
                standard_cost: Some(Money::from_minor(175_000)),
                ..Default::default()
            },
            occurred_at: test_time(),
        });
        execute(&mut t, &cmd).unwrap();

        let d = t.details().unwrap();
        assert_eq!(d.standard_cost, Money::from_minor(175_000));
        assert_eq!(d.name, "Scaling and polishing");
        assert_eq!(t.version(), 2);
    }

    #[test]
    fn deactivate_and_reactivate_toggle() {
        let clinic_id = ClinicId::new();
        let mut t = created(clinic_id);
        let deactivate = TreatmentCommand::DeactivateTreatment(DeactivateTreatment {
            clinic_id,
            treatment_id: t.id_typed(),
            occurred_at: test_time(),
        });

        execute(&mut t, &deactivate).unwrap();
        assert!(!t.is_active());
        match t.handle(&deactivate).unwrap_err() {
            DomainError::Conflict(_) => {}
            other => panic!("expected Conflict, got {other:?}"),
        }

        let cmd = TreatmentCommand::ReactivateTreatment(ReactivateTreatment {
            clinic_id,
            treatment_id: t.id_typed(),
            occurred_at: test_time(),
        });
        execute(&mut t, &cmd).unwrap();
        assert!(t.is_active());
    }
}
