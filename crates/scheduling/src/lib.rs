//! Appointment scheduling (event-sourced).
//!
//! A calendar slot becomes a scheduled appointment which then moves through
//! its status lifecycle. Completion is observed by the infrastructure layer to
//! maintain the patient's last-visit marker.

pub mod appointment;
pub mod status;

pub use appointment::{
    Appointment, AppointmentCommand, AppointmentEvent, AppointmentId, AppointmentRescheduled,
    AppointmentScheduled, AppointmentStatusChanged, ChangeAppointmentStatus, DEFAULT_APPOINTMENT_TYPE,
    DEFAULT_DURATION_MINUTES, RescheduleAppointment, ScheduleAppointment,
};
pub use status::AppointmentStatus;
