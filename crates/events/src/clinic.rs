use dentaflow_core::ClinicId;

use crate::EventEnvelope;

/// Messages that belong to exactly one clinic.
///
/// Realtime fan-out and background reactors use this to drop messages from
/// other clinics before doing any work.
pub trait ClinicScoped {
    fn clinic_id(&self) -> ClinicId;

    fn is_for(&self, clinic_id: ClinicId) -> bool {
        self.clinic_id() == clinic_id
    }
}

impl<E> ClinicScoped for EventEnvelope<E> {
    fn clinic_id(&self) -> ClinicId {
        EventEnvelope::clinic_id(self)
    }
}
