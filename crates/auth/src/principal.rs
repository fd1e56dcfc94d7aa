use core::str::FromStr;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use dentaflow_core::{ClinicId, UserId};

/// Subject of a token: the staff member making the request.
///
/// Serialized as the bare UUID so it sits directly in the `sub` claim.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PrincipalId(Uuid);

impl PrincipalId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for PrincipalId {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Display for PrincipalId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for PrincipalId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Clinical records and invoices attribute work to the acting principal.
impl From<PrincipalId> for UserId {
    fn from(value: PrincipalId) -> Self {
        UserId::from_uuid(value.0)
    }
}

/// A principal's membership in a clinic: which clinic it acts within and
/// which roles/permissions are granted there.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClinicMembership {
    pub clinic_id: ClinicId,
    pub roles: Vec<crate::Role>,
    pub permissions: Vec<crate::Permission>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_maps_onto_the_acting_user() {
        let id = PrincipalId::new();
        let parsed: PrincipalId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
        assert_eq!(UserId::from(id).to_string(), id.to_string());
        assert!("not-a-uuid".parse::<PrincipalId>().is_err());
    }
}
