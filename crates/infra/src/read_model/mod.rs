//! Clinic-isolated read model storage.

pub mod clinic_store;

pub use clinic_store::{InMemoryClinicStore, ClinicStore};
