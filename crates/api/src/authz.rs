//! API-side authorization guard for commands.
//!
//! Enforced at the command boundary (before dispatch); domain aggregates and
//! infra stay auth-agnostic.

use dentaflow_auth::{AuthzError, ClinicMembership, CommandAuthorization, Principal, authorize, permissions_for_roles};

use crate::context::{ClinicContext, PrincipalContext};

/// Check authorization for a command in the current request context.
pub fn authorize_command<C: CommandAuthorization>(
    clinic: &ClinicContext,
    principal: &PrincipalContext,
    command: &C,
) -> Result<(), AuthzError> {
    let membership = ClinicMembership {
        clinic_id: clinic.clinic_id(),
        roles: principal.roles().to_vec(),
        permissions: permissions_for_roles(principal.roles()),
    };

    let principal = Principal {
        principal_id: principal.principal_id(),
        active_clinic_id: clinic.clinic_id(),
        membership,
    };

    for perm in command.required_permissions() {
        authorize(&principal, perm)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use dentaflow_auth::{PrincipalId, Role, permissions};
    use dentaflow_core::ClinicId;

    use crate::app::routes::common::Requires;

    #[test]
    fn doctors_cannot_take_payments() {
        let clinic = ClinicContext::new(ClinicId::new());
        let doctor = PrincipalContext::new(PrincipalId::new(), vec![Role::DOCTOR]);

        assert!(authorize_command(&clinic, &doctor, &Requires::one(permissions::CLINICAL_WRITE)).is_ok());
        assert_eq!(
            authorize_command(&clinic, &doctor, &Requires::one(permissions::INVOICES_PAY)),
            Err(AuthzError::Forbidden("invoices.pay".into()))
        );
    }

    #[test]
    fn admins_hold_every_permission() {
        let clinic = ClinicContext::new(ClinicId::new());
        let admin = PrincipalContext::new(PrincipalId::new(), vec![Role::ADMIN]);
        assert!(authorize_command(&clinic, &admin, &Requires::one(permissions::CATALOG_WRITE)).is_ok());
    }
}
