//! Clinical records (event-sourced).
//!
//! One record per procedure performed during a visit. The record snapshots the
//! catalog name and standard price so later catalog edits never change what a
//! patient was charged; manual price overrides are audited in the stream.

pub mod record;

pub use record::{
    AmendClinicalRecord, ClinicalNotes, ClinicalNotesPatch, ClinicalRecord, ClinicalRecordCommand,
    ClinicalRecordEvent, ClinicalRecordAmended, ClinicalRecordId, ClinicalRecordRemoved,
    CostOverridden, RecordTreatment, RemoveClinicalRecord, TreatmentRecorded,
};
