//! Projection implementations (read model builders).
//!
//! Projections consume published envelopes and build query-optimized read
//! models. All projections are:
//! - **Rebuildable**: can be reconstructed from the clinic's event log
//! - **Clinic-isolated**: data is partitioned by clinic
//! - **Idempotent**: safe under at-least-once delivery

pub mod appointments;
pub mod clinical_records;
pub mod cursor;
pub mod invoices;
pub mod patients;
pub mod treatments;

pub use appointments::{AppointmentReadModel, AppointmentsProjection, DayFilter};
pub use clinical_records::{ClinicalRecordReadModel, ClinicalRecordsProjection, CostOverrideEntry};
pub use cursor::{Projection, ProjectionError, StreamCursors};
pub use invoices::{InvoiceFilter, InvoiceReadModel, InvoicesProjection, PaymentEntry};
pub use patients::{PatientReadModel, PatientsProjection};
pub use treatments::{TreatmentReadModel, TreatmentsProjection};
