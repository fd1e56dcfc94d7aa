use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use dentaflow_core::{Aggregate, AggregateId, AggregateRoot, ClinicId, DomainError, text};
use dentaflow_events::Event;

pub const NAME_MAX: usize = 50;
pub const PHONE_MIN: usize = 10;
pub const PHONE_MAX: usize = 15;
pub const EMAIL_MAX: usize = 254;
pub const ADDRESS_MAX: usize = 200;
pub const NOTES_MAX: usize = 500;
pub const ALLERGY_MAX: usize = 100;
pub const REPORTED_AGE_MAX: u8 = 150;

/// Patient identifier (clinic-scoped via `clinic_id` fields in events/commands).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PatientId(pub AggregateId);

impl PatientId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for PatientId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Gender {
    Male,
    Female,
    Other,
}

impl core::str::FromStr for Gender {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "male" | "m" => Ok(Gender::Male),
            "female" | "f" => Ok(Gender::Female),
            "other" => Ok(Gender::Other),
            _ => Err(DomainError::validation("gender must be one of: Male, Female, Other")),
        }
    }
}

/// How the patient entered the registry.
///
/// Front-desk registration requires a full name and date of birth; online
/// bookings only capture what the public booking form asks for (a name that
/// may be a single word, an optional self-reported age).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistrationSource {
    FrontDesk,
    OnlineBooking,
}

/// Demographic and contact details of a patient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatientDetails {
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
    pub phone: String,
    pub date_of_birth: Option<NaiveDate>,
    /// Age as reported at intake when no date of birth is known.
    pub reported_age: Option<u8>,
    pub gender: Option<Gender>,
    pub address: Option<String>,
    pub allergies: Vec<String>,
    pub notes: Option<String>,
}

impl PatientDetails {
    pub fn full_name(&self) -> String {
        if self.last_name.is_empty() {
            self.first_name.clone()
        } else {
            format!("{} {}", self.first_name, self.last_name)
        }
    }

    /// Validate and normalize (trim, blank → `None`) against `today`.
    pub fn validated(self, source: RegistrationSource, today: NaiveDate) -> Result<Self, DomainError> {
        let first_name = text::bounded("first_name", &self.first_name, 1, NAME_MAX)?;
        let last_name = match source {
            RegistrationSource::FrontDesk => text::bounded("last_name", &self.last_name, 1, NAME_MAX)?,
            RegistrationSource::OnlineBooking => {
                text::bounded("last_name", &self.last_name, 0, NAME_MAX)?
            }
        };

        let email = text::optional("email", self.email.as_deref(), EMAIL_MAX)?;
        if let Some(email) = &email {
            if !is_plausible_email(email) {
                return Err(DomainError::validation("invalid email"));
            }
        }

        let phone = text::bounded("phone", &self.phone, PHONE_MIN, PHONE_MAX)?;
        if !phone
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, '+' | ' ' | '-' | '(' | ')'))
        {
            return Err(DomainError::validation("phone contains invalid characters"));
        }
        if !phone.chars().any(|c| c.is_ascii_digit()) {
            return Err(DomainError::validation("phone must contain digits"));
        }

        match (source, self.date_of_birth) {
            (RegistrationSource::FrontDesk, None) => {
                return Err(DomainError::validation("date_of_birth is required"));
            }
            (_, Some(dob)) if dob > today => {
                return Err(DomainError::validation("date_of_birth cannot be in the future"));
            }
            _ => {}
        }
        if let Some(age) = self.reported_age {
            if age > REPORTED_AGE_MAX {
                return Err(DomainError::validation("reported_age is out of range"));
            }
        }

        let address = text::optional("address", self.address.as_deref(), ADDRESS_MAX)?;
        let notes = text::optional("notes", self.notes.as_deref(), NOTES_MAX)?;

        let mut allergies: Vec<String> = Vec::with_capacity(self.allergies.len());
        for a in &self.allergies {
            if let Some(a) = text::optional("allergy", Some(a), ALLERGY_MAX)? {
                if !allergies.iter().any(|x| x.eq_ignore_ascii_case(&a)) {
                    allergies.push(a);
                }
            }
        }

        Ok(Self {
            first_name,
            last_name,
            email,
            phone,
            date_of_birth: self.date_of_birth,
            reported_age: self.reported_age,
            gender: self.gender,
            address,
            allergies,
            notes,
        })
    }
}

/// Partial update of [`PatientDetails`].
///
/// `None` leaves a field untouched. For the optional text fields an empty
/// string clears the stored value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatientDetailsPatch {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub date_of_birth: Option<NaiveDate>,
    pub reported_age: Option<u8>,
    pub gender: Option<Gender>,
    pub address: Option<String>,
    pub allergies: Option<Vec<String>>,
    pub notes: Option<String>,
}

impl PatientDetailsPatch {
    fn merge_into(&self, current: &PatientDetails) -> PatientDetails {
        let mut next = current.clone();
        if let Some(v) = &self.first_name {
            next.first_name = v.clone();
        }
        if let Some(v) = &self.last_name {
            next.last_name = v.clone();
        }
        if let Some(v) = &self.email {
            next.email = Some(v.clone());
        }
        if let Some(v) = &self.phone {
            next.phone = v.clone();
        }
        if let Some(v) = self.date_of_birth {
            next.date_of_birth = Some(v);
        }
        if let Some(v) = self.reported_age {
            next.reported_age = Some(v);
        }
        if let Some(v) = self.gender {
            next.gender = Some(v);
        }
        if let Some(v) = &self.address {
            next.address = Some(v.clone());
        }
        if let Some(v) = &self.allergies {
            next.allergies = v.clone();
        }
        if let Some(v) = &self.notes {
            next.notes = Some(v.clone());
        }
        next
    }
}

fn is_plausible_email(email: &str) -> bool {
    if email.chars().any(char::is_whitespace) {
        return false;
    }
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && domain
            .split_once('.')
            .is_some_and(|(host, tld)| !host.is_empty() && !tld.is_empty() && !tld.ends_with('.'))
}

/// Whole years between `date_of_birth` and `on`.
pub fn age_on(date_of_birth: NaiveDate, on: NaiveDate) -> u32 {
    let mut years = on.year() - date_of_birth.year();
    if (on.month(), on.day()) < (date_of_birth.month(), date_of_birth.day()) {
        years -= 1;
    }
    years.max(0) as u32
}

/// Aggregate root: Patient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Patient {
    id: PatientId,
    clinic_id: Option<ClinicId>,
    details: Option<PatientDetails>,
    registered_at: Option<DateTime<Utc>>,
    last_visit_at: Option<DateTime<Utc>>,
    archived: bool,
    version: u64,
    created: bool,
}

impl Patient {
    /// Create an empty, not-yet-registered aggregate instance for rehydration.
    pub fn empty(id: PatientId) -> Self {
        Self {
            id,
            clinic_id: None,
            details: None,
            registered_at: None,
            last_visit_at: None,
            archived: false,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> PatientId {
        self.id
    }

    pub fn clinic_id(&self) -> Option<ClinicId> {
        self.clinic_id
    }

    pub fn details(&self) -> Option<&PatientDetails> {
        self.details.as_ref()
    }

    pub fn last_visit_at(&self) -> Option<DateTime<Utc>> {
        self.last_visit_at
    }

    pub fn is_archived(&self) -> bool {
        self.archived
    }

    /// Age in whole years on `on`, from the date of birth or the intake age.
    pub fn age_on(&self, on: NaiveDate) -> Option<u32> {
        let details = self.details.as_ref()?;
        match details.date_of_birth {
            Some(dob) => Some(age_on(dob, on)),
            None => details.reported_age.map(u32::from),
        }
    }
}

impl AggregateRoot for Patient {
    type Id = PatientId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: RegisterPatient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterPatient {
    pub clinic_id: ClinicId,
    pub patient_id: PatientId,
    pub details: PatientDetails,
    pub source: RegistrationSource,
    pub occurred_at: DateTime<Utc>,
}

/// Command: UpdatePatientDetails.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdatePatientDetails {
    pub clinic_id: ClinicId,
    pub patient_id: PatientId,
    pub changes: PatientDetailsPatch,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RecordVisit (issued when an appointment completes).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordVisit {
    pub clinic_id: ClinicId,
    pub patient_id: PatientId,
    pub appointment_id: Option<AggregateId>,
    pub visited_at: DateTime<Utc>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ArchivePatient (soft delete).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchivePatient {
    pub clinic_id: ClinicId,
    pub patient_id: PatientId,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PatientCommand {
    RegisterPatient(RegisterPatient),
    UpdatePatientDetails(UpdatePatientDetails),
    RecordVisit(RecordVisit),
    ArchivePatient(ArchivePatient),
}

/// Event: PatientRegistered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatientRegistered {
    pub clinic_id: ClinicId,
    pub patient_id: PatientId,
    pub details: PatientDetails,
    pub source: RegistrationSource,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PatientDetailsUpdated (carries the full normalized details).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatientDetailsUpdated {
    pub clinic_id: ClinicId,
    pub patient_id: PatientId,
    pub details: PatientDetails,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PatientVisitRecorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatientVisitRecorded {
    pub clinic_id: ClinicId,
    pub patient_id: PatientId,
    pub appointment_id: Option<AggregateId>,
    pub visited_at: DateTime<Utc>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PatientArchived.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatientArchived {
    pub clinic_id: ClinicId,
    pub patient_id: PatientId,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PatientEvent {
    PatientRegistered(PatientRegistered),
    PatientDetailsUpdated(PatientDetailsUpdated),
    PatientVisitRecorded(PatientVisitRecorded),
    PatientArchived(PatientArchived),
}

impl PatientEvent {
    pub fn clinic_and_patient(&self) -> (ClinicId, PatientId) {
        match self {
            PatientEvent::PatientRegistered(e) => (e.clinic_id, e.patient_id),
            PatientEvent::PatientDetailsUpdated(e) => (e.clinic_id, e.patient_id),
            PatientEvent::PatientVisitRecorded(e) => (e.clinic_id, e.patient_id),
            PatientEvent::PatientArchived(e) => (e.clinic_id, e.patient_id),
        }
    }
}

impl Event for PatientEvent {
    fn event_type(&self) -> &'static str {
        match self {
            PatientEvent::PatientRegistered(_) => "patients.patient.registered",
            PatientEvent::PatientDetailsUpdated(_) => "patients.patient.details_updated",
            PatientEvent::PatientVisitRecorded(_) => "patients.patient.visit_recorded",
            PatientEvent::PatientArchived(_) => "patients.patient.archived",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            PatientEvent::PatientRegistered(e) => e.occurred_at,
            PatientEvent::PatientDetailsUpdated(e) => e.occurred_at,
            PatientEvent::PatientVisitRecorded(e) => e.occurred_at,
            PatientEvent::PatientArchived(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Patient {
    type Command = PatientCommand;
    type Event = PatientEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            PatientEvent::PatientRegistered(e) => {
                self.id = e.patient_id;
                self.clinic_id = Some(e.clinic_id);
                self.details = Some(e.details.clone());
                self.registered_at = Some(e.occurred_at);
                self.archived = false;
                self.created = true;
            }
            PatientEvent::PatientDetailsUpdated(e) => {
                self.details = Some(e.details.clone());
            }
            PatientEvent::PatientVisitRecorded(e) => {
                self.last_visit_at = Some(e.visited_at);
            }
            PatientEvent::PatientArchived(_) => {
                self.archived = true;
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            PatientCommand::RegisterPatient(cmd) => self.handle_register(cmd),
            PatientCommand::UpdatePatientDetails(cmd) => self.handle_update(cmd),
            PatientCommand::RecordVisit(cmd) => self.handle_record_visit(cmd),
            PatientCommand::ArchivePatient(cmd) => self.handle_archive(cmd),
        }
    }
}

impl Patient {
    fn ensure_clinic(&self, clinic_id: ClinicId) -> Result<(), DomainError> {
        if !self.created {
            return Ok(());
        }
        if self.clinic_id != Some(clinic_id) {
            return Err(DomainError::invariant("clinic mismatch"));
        }
        Ok(())
    }

    fn ensure_patient_id(&self, patient_id: PatientId) -> Result<(), DomainError> {
        if self.id != patient_id {
            return Err(DomainError::invariant("patient_id mismatch"));
        }
        Ok(())
    }

    fn ensure_existing(&self, clinic_id: ClinicId, patient_id: PatientId) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found("patient"));
        }
        self.ensure_clinic(clinic_id)?;
        self.ensure_patient_id(patient_id)
    }

    fn handle_register(&self, cmd: &RegisterPatient) -> Result<Vec<PatientEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("patient already exists"));
        }
        self.ensure_patient_id(cmd.patient_id)?;

        let details = cmd
            .details
            .clone()
            .validated(cmd.source, cmd.occurred_at.date_naive())?;

        Ok(vec![PatientEvent::PatientRegistered(PatientRegistered {
            clinic_id: cmd.clinic_id,
            patient_id: cmd.patient_id,
            details,
            source: cmd.source,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_update(&self, cmd: &UpdatePatientDetails) -> Result<Vec<PatientEvent>, DomainError> {
        self.ensure_existing(cmd.clinic_id, cmd.patient_id)?;
        if self.archived {
            return Err(DomainError::invariant("cannot update an archived patient"));
        }
        let Some(current) = &self.details else {
            return Err(DomainError::invariant("registered patient has no details"));
        };

        // Records created through online booking may lack a date of birth; keep
        // them updatable without forcing one.
        let source = if current.date_of_birth.is_some() && !current.last_name.is_empty() {
            RegistrationSource::FrontDesk
        } else {
            RegistrationSource::OnlineBooking
        };
        let details = cmd
            .changes
            .merge_into(current)
            .validated(source, cmd.occurred_at.date_naive())?;

        if &details == current {
            return Ok(vec![]);
        }

        Ok(vec![PatientEvent::PatientDetailsUpdated(PatientDetailsUpdated {
            clinic_id: cmd.clinic_id,
            patient_id: cmd.patient_id,
            details,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_record_visit(&self, cmd: &RecordVisit) -> Result<Vec<PatientEvent>, DomainError> {
        self.ensure_existing(cmd.clinic_id, cmd.patient_id)?;

        // Redelivered or out-of-order completions never move the marker back.
        if self.last_visit_at.is_some_and(|last| cmd.visited_at <= last) {
            return Ok(vec![]);
        }

        Ok(vec![PatientEvent::PatientVisitRecorded(PatientVisitRecorded {
            clinic_id: cmd.clinic_id,
            patient_id: cmd.patient_id,
            appointment_id: cmd.appointment_id,
            visited_at: cmd.visited_at,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_archive(&self, cmd: &ArchivePatient) -> Result<Vec<PatientEvent>, DomainError> {
        self.ensure_existing(cmd.clinic_id, cmd.patient_id)?;
        if self.archived {
            return Err(DomainError::conflict("patient is already archived"));
        }

        Ok(vec![PatientEvent::PatientArchived(PatientArchived {
            clinic_id: cmd.clinic_id,
            patient_id: cmd.patient_id,
            reason: text::optional("reason", cmd.reason.as_deref(), NOTES_MAX)?,
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use dentaflow_events::execute;

    fn test_clinic_id() -> ClinicId {
        ClinicId::new()
    }

    fn test_patient_id() -> PatientId {
        PatientId::new(AggregateId::new())
    }

    fn test_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 14, 9, 30, 0).unwrap()
    }

    fn details() -> PatientDetails {
        PatientDetails {
            first_name: " Asha ".to_string(),
            last_name: "Rao".to_string(),
            email: Some(String::new()),
            phone: "+91 9876543210".to_string(),
            date_of_birth: NaiveDate::from_ymd_opt(1990, 6, 1),
            reported_age: None,
            gender: Some(Gender::Female),
            address: None,
            allergies: vec!["Penicillin".to_string(), " ".to_string(), "penicillin".to_string()],
            notes: Some("  ".to_string()),
        }
    }

    fn registered(clinic_id: ClinicId, patient_id: PatientId) -> Patient {
        let mut patient = Patient::empty(patient_id);
        execute(
            &mut patient,
            &PatientCommand::RegisterPatient(RegisterPatient {
                clinic_id,
                patient_id,
                details: details(),
                source: RegistrationSource::FrontDesk,
                occurred_at: test_time(),
            }),
        )
        .unwrap();
        patient
    }

    #[test]
    fn register_normalizes_details() {
        let clinic_id = test_clinic_id();
        let patient_id = test_patient_id();
        let patient = registered(clinic_id, patient_id);

        let d = patient.details().unwrap();
        assert_eq!(d.first_name, "Asha");
        assert_eq!(d.email, None);
        assert_eq!(d.notes, None);
        assert_eq!(d.allergies, vec!["Penicillin".to_string()]);
        assert_eq!(patient.clinic_id(), Some(clinic_id));
        assert_eq!(patient.version(), 1);
        assert_eq!(patient.age_on(test_time().date_naive()), Some(34));
    }

    #[test]
    fn front_desk_registration_requires_date_of_birth() {
        let patient_id = test_patient_id();
        let mut d = details();
        d.date_of_birth = None;
        let err = Patient::empty(patient_id)
            .handle(&PatientCommand::RegisterPatient(RegisterPatient {
                clinic_id: test_clinic_id(),
                patient_id,
                details: d.clone(),
                source: RegistrationSource::FrontDesk,
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert_eq!(err, DomainError::validation("date_of_birth is required"));

        // Online bookings only know a single-word name and a reported age.
        d.last_name = String::new();
        d.reported_age = Some(41);
        let events = Patient::empty(patient_id)
            .handle(&PatientCommand::RegisterPatient(RegisterPatient {
                clinic_id: test_clinic_id(),
                patient_id,
                details: d,
                source: RegistrationSource::OnlineBooking,
                occurred_at: test_time(),
            }))
            .unwrap();
        assert_eq!(events.len(), 1);
    }

    fn register_with(mutate: impl FnOnce(&mut PatientDetails)) -> DomainError {
        let mut d = details();
        mutate(&mut d);
        let patient_id = test_patient_id();
        Patient::empty(patient_id)
            .handle(&PatientCommand::RegisterPatient(RegisterPatient {
                clinic_id: test_clinic_id(),
                patient_id,
                details: d,
                source: RegistrationSource::FrontDesk,
                occurred_at: test_time(),
            }))
            .unwrap_err()
    }

    #[test]
    fn rejects_invalid_contact_details() {
        assert_eq!(
            register_with(|d| d.email = Some("not-an-email".into())),
            DomainError::validation("invalid email")
        );
        assert_eq!(
            register_with(|d| d.phone = "12345".into()),
            DomainError::validation("phone must be at least 10 characters")
        );
        assert_eq!(
            register_with(|d| d.phone = "98765abc43210".into()),
            DomainError::validation("phone contains invalid characters")
        );
        assert_eq!(
            register_with(|d| d.first_name = "x".repeat(51)),
            DomainError::validation("first_name must be at most 50 characters")
        );
        assert_eq!(
            register_with(|d| d.date_of_birth = NaiveDate::from_ymd_opt(2030, 1, 1)),
            DomainError::validation("date_of_birth cannot be in the future")
        );
    }

    #[test]
    fn update_merges_patch_and_skips_no_op() {
        let clinic_id = test_clinic_id();
        let patient_id = test_patient_id();
        let mut patient = registered(clinic_id, patient_id);

        let events = execute(
            &mut patient,
            &PatientCommand::UpdatePatientDetails(UpdatePatientDetails {
                clinic_id,
                patient_id,
                changes: PatientDetailsPatch {
                    email: Some("asha@example.com".into()),
                    address: Some("12 MG Road".into()),
                    ..Default::default()
                },
                occurred_at: test_time(),
            }),
        )
        .unwrap();
        assert_eq!(events.len(), 1);
        let d = patient.details().unwrap();
        assert_eq!(d.email.as_deref(), Some("asha@example.com"));
        assert_eq!(d.last_name, "Rao");

        let events = patient
            .handle(&PatientCommand::UpdatePatientDetails(UpdatePatientDetails {
                clinic_id,
                patient_id,
                changes: PatientDetailsPatch {
                    first_name: Some("Asha".into()),
                    ..Default::default()
                },
                occurred_at: test_time(),
            }))
            .unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn visit_marker_only_moves_forward() {
        let clinic_id = test_clinic_id();
        let patient_id = test_patient_id();
        let mut patient = registered(clinic_id, patient_id);
        let visit = |at: DateTime<Utc>| {
            PatientCommand::RecordVisit(RecordVisit {
                clinic_id,
                patient_id,
                appointment_id: None,
                visited_at: at,
                occurred_at: at,
            })
        };

        execute(&mut patient, &visit(test_time())).unwrap();
        assert_eq!(patient.last_visit_at(), Some(test_time()));

        let earlier = execute(&mut patient, &visit(test_time() - Duration::days(3))).unwrap();
        assert!(earlier.is_empty());
        assert_eq!(patient.last_visit_at(), Some(test_time()));
    }

    #[test]
    fn archived_patient_cannot_be_updated_or_archived_twice() {
        let clinic_id = test_clinic_id();
        let patient_id = test_patient_id();
        let mut patient = registered(clinic_id, patient_id);
        let archive = PatientCommand::ArchivePatient(ArchivePatient {
            clinic_id,
            patient_id,
            reason: Some("moved away".into()),
            occurred_at: test_time(),
        });

        execute(&mut patient, &archive).unwrap();
        assert!(patient.is_archived());

        match patient.handle(&archive).unwrap_err() {
            DomainError::Conflict(_) => {}
            other => panic!("expected Conflict, got {other:?}"),
        }
        let err = patient
            .handle(&PatientCommand::UpdatePatientDetails(UpdatePatientDetails {
                clinic_id,
                patient_id,
                changes: PatientDetailsPatch::default(),
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert_eq!(err, DomainError::invariant("cannot update an archived patient"));
    }

    #[test]
    fn other_clinic_cannot_touch_patient() {
        let patient_id = test_patient_id();
        let patient = registered(test_clinic_id(), patient_id);
        let err = patient
            .handle(&PatientCommand::ArchivePatient(ArchivePatient {
                clinic_id: test_clinic_id(),
                patient_id,
                reason: None,
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert_eq!(err, DomainError::invariant("clinic mismatch"));
    }

    #[test]
    fn age_counts_whole_years() {
        let dob = NaiveDate::from_ymd_opt(2000, 2, 29).unwrap();
        assert_eq!(age_on(dob, NaiveDate::from_ymd_opt(2001, 2, 28).unwrap()), 0);
        assert_eq!(age_on(dob, NaiveDate::from_ymd_opt(2001, 3, 1).unwrap()), 1);
    }
}
