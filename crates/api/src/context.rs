use dentaflow_auth::{PrincipalId, Role};
use dentaflow_core::{ClinicId, UserId};

/// Clinic context for a request.
///
/// Derived from the bearer token only; never from the path or body.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ClinicContext {
    clinic_id: ClinicId,
}

impl ClinicContext {
    pub fn new(clinic_id: ClinicId) -> Self {
        Self { clinic_id }
    }

    pub fn clinic_id(&self) -> ClinicId {
        self.clinic_id
    }
}

/// Principal context for a request (authenticated identity + roles).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrincipalContext {
    principal_id: PrincipalId,
    roles: Vec<Role>,
}

impl PrincipalContext {
    pub fn new(principal_id: PrincipalId, roles: Vec<Role>) -> Self {
        Self { principal_id, roles }
    }

    pub fn principal_id(&self) -> PrincipalId {
        self.principal_id
    }

    /// The principal as the staff user recorded on clinical entries.
    pub fn user_id(&self) -> UserId {
        self.principal_id.into()
    }

    pub fn roles(&self) -> &[Role] {
        &self.roles
    }
}
