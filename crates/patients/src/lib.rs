//! Patient registry (event-sourced).
//!
//! Demographics, contact details and allergy notes for the people a clinic
//! treats, plus the last-visit marker maintained from completed appointments.
//! Pure domain logic: no IO, no HTTP, no storage.

pub mod patient;
pub mod phone;

pub use patient::{
    ArchivePatient, Gender, Patient, PatientArchived, PatientCommand, PatientDetails,
    PatientDetailsPatch, PatientDetailsUpdated, PatientEvent, PatientId, PatientRegistered,
    PatientVisitRecorded, RecordVisit, RegisterPatient, RegistrationSource, UpdatePatientDetails,
    age_on,
};
pub use phone::{last_ten_digits, normalize_phone};
