use axum::response::Response;

use dentaflow_auth::{CommandAuthorization, Permission};

use crate::app::errors;
use crate::context::{ClinicContext, PrincipalContext};

/// Small helper wrapper to associate required permissions with a command.
pub struct CmdAuth<C> {
    pub inner: C,
    pub required: Vec<Permission>,
}

impl<C> CmdAuth<C> {
    pub fn new(inner: C, required: Permission) -> Self {
        Self {
            inner,
            required: vec![required],
        }
    }

    /// Authorize the wrapped command and hand it back for dispatch.
    pub fn authorized(self, clinic: &ClinicContext, principal: &PrincipalContext) -> Result<C, Response> {
        crate::authz::authorize_command(clinic, principal, &self).map_err(errors::authz_error_to_response)?;
        Ok(self.inner)
    }
}

impl<C> CommandAuthorization for CmdAuth<C> {
    fn required_permissions(&self) -> &[Permission] {
        &self.required
    }
}

/// Permission requirement of a query or of a workflow that builds its
/// commands internally.
pub struct Requires(Vec<Permission>);

impl Requires {
    pub fn one(permission: Permission) -> Self {
        Self(vec![permission])
    }
}

impl CommandAuthorization for Requires {
    fn required_permissions(&self) -> &[Permission] {
        &self.0
    }
}

pub fn require(clinic: &ClinicContext, principal: &PrincipalContext, permission: Permission) -> Result<(), Response> {
    crate::authz::authorize_command(clinic, principal, &Requires::one(permission))
        .map_err(errors::authz_error_to_response)
}
