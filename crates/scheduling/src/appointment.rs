use chrono::{DateTime, Months, Utc};
use serde::{Deserialize, Serialize};

use dentaflow_core::{Aggregate, AggregateId, AggregateRoot, ClinicId, DomainError, UserId, text};
use dentaflow_events::Event;
use dentaflow_patients::PatientId;

use crate::status::AppointmentStatus;

pub const DEFAULT_DURATION_MINUTES: u32 = 30;
pub const MIN_DURATION_MINUTES: u32 = 15;
pub const MAX_DURATION_MINUTES: u32 = 480;
pub const DEFAULT_APPOINTMENT_TYPE: &str = "General Consultation";
pub const APPOINTMENT_TYPE_MAX: usize = 100;
pub const CHIEF_COMPLAINT_MAX: usize = 500;
pub const NOTES_MAX: usize = 1000;
pub const REASON_MAX: usize = 500;
/// How far ahead of "now" a slot may be booked.
pub const BOOKING_HORIZON_MONTHS: u32 = 12;

/// Appointment identifier (clinic-scoped via `clinic_id` fields in events/commands).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AppointmentId(pub AggregateId);

impl AppointmentId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for AppointmentId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Aggregate root: Appointment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Appointment {
    id: AppointmentId,
    clinic_id: Option<ClinicId>,
    patient_id: Option<PatientId>,
    doctor_id: Option<UserId>,
    scheduled_at: Option<DateTime<Utc>>,
    duration_minutes: u32,
    appointment_type: String,
    status: AppointmentStatus,
    version: u64,
    created: bool,
}

impl Appointment {
    /// Create an empty, not-yet-scheduled aggregate instance for rehydration.
    pub fn empty(id: AppointmentId) -> Self {
        Self {
            id,
            clinic_id: None,
            patient_id: None,
            doctor_id: None,
            scheduled_at: None,
            duration_minutes: DEFAULT_DURATION_MINUTES,
            appointment_type: String::new(),
            status: AppointmentStatus::Scheduled,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> AppointmentId {
        self.id
    }

    pub fn clinic_id(&self) -> Option<ClinicId> {
        self.clinic_id
    }

    pub fn patient_id(&self) -> Option<PatientId> {
        self.patient_id
    }

    pub fn doctor_id(&self) -> Option<UserId> {
        self.doctor_id
    }

    pub fn scheduled_at(&self) -> Option<DateTime<Utc>> {
        self.scheduled_at
    }

    pub fn duration_minutes(&self) -> u32 {
        self.duration_minutes
    }

    pub fn appointment_type(&self) -> &str {
        &self.appointment_type
    }

    pub fn status(&self) -> AppointmentStatus {
        self.status
    }

    pub fn exists(&self) -> bool {
        self.created
    }
}

impl AggregateRoot for Appointment {
    type Id = AppointmentId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: ScheduleAppointment.
///
/// `duration_minutes` and `appointment_type` fall back to 30 minutes and
/// "General Consultation" when absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleAppointment {
    pub clinic_id: ClinicId,
    pub appointment_id: AppointmentId,
    pub patient_id: PatientId,
    pub doctor_id: Option<UserId>,
    pub scheduled_at: DateTime<Utc>,
    pub duration_minutes: Option<u32>,
    pub appointment_type: Option<String>,
    pub chief_complaint: Option<String>,
    pub notes: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RescheduleAppointment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RescheduleAppointment {
    pub clinic_id: ClinicId,
    pub appointment_id: AppointmentId,
    pub scheduled_at: DateTime<Utc>,
    pub duration_minutes: Option<u32>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ChangeAppointmentStatus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeAppointmentStatus {
    pub clinic_id: ClinicId,
    pub appointment_id: AppointmentId,
    pub status: AppointmentStatus,
    /// Recorded for cancellations and no-shows.
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AppointmentCommand {
    ScheduleAppointment(ScheduleAppointment),
    RescheduleAppointment(RescheduleAppointment),
    ChangeAppointmentStatus(ChangeAppointmentStatus),
}

/// Event: AppointmentScheduled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppointmentScheduled {
    pub clinic_id: ClinicId,
    pub appointment_id: AppointmentId,
    pub patient_id: PatientId,
    pub doctor_id: Option<UserId>,
    pub scheduled_at: DateTime<Utc>,
    pub duration_minutes: u32,
    pub appointment_type: String,
    pub chief_complaint: Option<String>,
    pub notes: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: AppointmentRescheduled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppointmentRescheduled {
    pub clinic_id: ClinicId,
    pub appointment_id: AppointmentId,
    pub previous_scheduled_at: DateTime<Utc>,
    pub scheduled_at: DateTime<Utc>,
    pub duration_minutes: u32,
    pub occurred_at: DateTime<Utc>,
}

/// Event: AppointmentStatusChanged.
///
/// Carries the patient so downstream reactors (last-visit tracking) need not
/// rehydrate the appointment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppointmentStatusChanged {
    pub clinic_id: ClinicId,
    pub appointment_id: AppointmentId,
    pub patient_id: PatientId,
    pub from: AppointmentStatus,
    pub to: AppointmentStatus,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AppointmentEvent {
    AppointmentScheduled(AppointmentScheduled),
    AppointmentRescheduled(AppointmentRescheduled),
    AppointmentStatusChanged(AppointmentStatusChanged),
}

impl Event for AppointmentEvent {
    fn event_type(&self) -> &'static str {
        match self {
            AppointmentEvent::AppointmentScheduled(_) => "scheduling.appointment.scheduled",
            AppointmentEvent::AppointmentRescheduled(_) => "scheduling.appointment.rescheduled",
            AppointmentEvent::AppointmentStatusChanged(_) => "scheduling.appointment.status_changed",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            AppointmentEvent::AppointmentScheduled(e) => e.occurred_at,
            AppointmentEvent::AppointmentRescheduled(e) => e.occurred_at,
            AppointmentEvent::AppointmentStatusChanged(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Appointment {
    type Command = AppointmentCommand;
    type Event = AppointmentEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            AppointmentEvent::AppointmentScheduled(e) => {
                self.id = e.appointment_id;
                self.clinic_id = Some(e.clinic_id);
                self.patient_id = Some(e.patient_id);
                self.doctor_id = e.doctor_id;
                self.scheduled_at = Some(e.scheduled_at);
                self.duration_minutes = e.duration_minutes;
                self.appointment_type = e.appointment_type.clone();
                self.status = AppointmentStatus::Scheduled;
                self.created = true;
            }
            AppointmentEvent::AppointmentRescheduled(e) => {
                self.scheduled_at = Some(e.scheduled_at);
                self.duration_minutes = e.duration_minutes;
                self.status = AppointmentStatus::Scheduled;
            }
            AppointmentEvent::AppointmentStatusChanged(e) => {
                self.status = e.to;
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            AppointmentCommand::ScheduleAppointment(cmd) => self.handle_schedule(cmd),
            AppointmentCommand::RescheduleAppointment(cmd) => self.handle_reschedule(cmd),
            AppointmentCommand::ChangeAppointmentStatus(cmd) => self.handle_change_status(cmd),
        }
    }
}

fn validate_duration(minutes: u32) -> Result<u32, DomainError> {
    if minutes < MIN_DURATION_MINUTES {
        return Err(DomainError::validation("duration must be at least 15 minutes"));
    }
    if minutes > MAX_DURATION_MINUTES {
        return Err(DomainError::validation("duration cannot exceed 8 hours"));
    }
    Ok(minutes)
}

fn validate_horizon(scheduled_at: DateTime<Utc>, now: DateTime<Utc>) -> Result<(), DomainError> {
    let limit = now
        .checked_add_months(Months::new(BOOKING_HORIZON_MONTHS))
        .ok_or_else(|| DomainError::validation("invalid scheduling reference time"))?;
    if scheduled_at > limit {
        return Err(DomainError::validation(
            "cannot schedule more than 1 year in advance",
        ));
    }
    Ok(())
}

impl Appointment {
    fn ensure_clinic(&self, clinic_id: ClinicId) -> Result<(), DomainError> {
        if !self.created {
            return Ok(());
        }
        if self.clinic_id != Some(clinic_id) {
            return Err(DomainError::invariant("clinic mismatch"));
        }
        Ok(())
    }

    fn ensure_appointment_id(&self, appointment_id: AppointmentId) -> Result<(), DomainError> {
        if self.id != appointment_id {
            return Err(DomainError::invariant("appointment_id mismatch"));
        }
        Ok(())
    }

    fn ensure_existing(
        &self,
        clinic_id: ClinicId,
        appointment_id: AppointmentId,
    ) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found("appointment"));
        }
        self.ensure_clinic(clinic_id)?;
        self.ensure_appointment_id(appointment_id)
    }

    fn handle_schedule(&self, cmd: &ScheduleAppointment) -> Result<Vec<AppointmentEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("appointment already exists"));
        }
        self.ensure_appointment_id(cmd.appointment_id)?;

        let duration_minutes =
            validate_duration(cmd.duration_minutes.unwrap_or(DEFAULT_DURATION_MINUTES))?;
        validate_horizon(cmd.scheduled_at, cmd.occurred_at)?;

        let appointment_type = match cmd.appointment_type.as_deref().map(str::trim) {
            None | Some("") => DEFAULT_APPOINTMENT_TYPE.to_string(),
            Some(t) => text::required("type", t, APPOINTMENT_TYPE_MAX)?,
        };

        Ok(vec![AppointmentEvent::AppointmentScheduled(AppointmentScheduled {
            clinic_id: cmd.clinic_id,
            appointment_id: cmd.appointment_id,
            patient_id: cmd.patient_id,
            doctor_id: cmd.doctor_id,
            scheduled_at: cmd.scheduled_at,
            duration_minutes,
            appointment_type,
            chief_complaint: text::optional(
                "chief_complaint",
                cmd.chief_complaint.as_deref(),
                CHIEF_COMPLAINT_MAX,
            )?,
            notes: text::optional("notes", cmd.notes.as_deref(), NOTES_MAX)?,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_reschedule(
        &self,
        cmd: &RescheduleAppointment,
    ) -> Result<Vec<AppointmentEvent>, DomainError> {
        self.ensure_existing(cmd.clinic_id, cmd.appointment_id)?;
        if !self.status.can_reschedule() {
            return Err(DomainError::invariant(format!(
                "cannot reschedule a {} appointment",
                self.status.as_str()
            )));
        }
        let Some(previous_scheduled_at) = self.scheduled_at else {
            return Err(DomainError::invariant("scheduled appointment has no time"));
        };

        let duration_minutes =
            validate_duration(cmd.duration_minutes.unwrap_or(self.duration_minutes))?;
        validate_horizon(cmd.scheduled_at, cmd.occurred_at)?;

        if cmd.scheduled_at == previous_scheduled_at && duration_minutes == self.duration_minutes {
            return Err(DomainError::conflict("appointment is already at that time"));
        }

        Ok(vec![AppointmentEvent::AppointmentRescheduled(AppointmentRescheduled {
            clinic_id: cmd.clinic_id,
            appointment_id: cmd.appointment_id,
            previous_scheduled_at,
            scheduled_at: cmd.scheduled_at,
            duration_minutes,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_change_status(
        &self,
        cmd: &ChangeAppointmentStatus,
    ) -> Result<Vec<AppointmentEvent>, DomainError> {
        self.ensure_existing(cmd.clinic_id, cmd.appointment_id)?;
        self.status.ensure_transition(cmd.status)?;
        let Some(patient_id) = self.patient_id else {
            return Err(DomainError::invariant("scheduled appointment has no patient"));
        };

        Ok(vec![AppointmentEvent::AppointmentStatusChanged(AppointmentStatusChanged {
            clinic_id: cmd.clinic_id,
            appointment_id: cmd.appointment_id,
            patient_id,
            from: self.status,
            to: cmd.status,
            reason: text::optional("reason", cmd.reason.as_deref(), REASON_MAX)?,
            occurred_at: cmd.occurred_at,
        })])
    }
}
