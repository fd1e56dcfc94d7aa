//! Treatment catalog (event-sourced).
//!
//! The procedures a clinic offers with their standard price. Clinical records
//! snapshot a catalog entry's name and cost at the time treatment is recorded.

pub mod categories;
pub mod treatment;

pub use categories::{TOOTH_SURFACES, TREATMENT_CATEGORIES, ToothSurface, canonical_category};
pub use treatment::{
    CreateTreatment, DeactivateTreatment, ReactivateTreatment, Treatment, TreatmentCommand,
    TreatmentCreated, TreatmentDeactivated, TreatmentDetails, TreatmentDetailsPatch,
    TreatmentEvent, TreatmentId, TreatmentReactivated, TreatmentUpdated, UpdateTreatment,
};
