//! `dentaflow-auth`: authentication/authorization boundary.
//!
//! Bearer tokens are verified locally (HS256); roles are mapped to
//! permissions by a static clinic policy. Decoupled from HTTP and storage.

pub mod authorize;
pub mod claims;
pub mod jwt;
pub mod permissions;
pub mod policy;
pub mod principal;
pub mod roles;

pub use authorize::{AuthzError, CommandAuthorization, Principal, authorize};
pub use claims::{JwtClaims, TokenValidationError, validate_claims};
pub use jwt::{Hs256JwtValidator, JwtValidator};
pub use permissions::Permission;
pub use policy::permissions_for_roles;
pub use principal::{ClinicMembership, PrincipalId};
pub use roles::Role;
