use std::borrow::Cow;

use serde::{Deserialize, Serialize};

/// Permission identifier.
///
/// Permissions are opaque `area.action` strings. The wildcard `"*"` grants
/// everything and is what the administrative roles resolve to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Permission(Cow<'static, str>);

impl Permission {
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub const fn from_static(name: &'static str) -> Self {
        Self(Cow::Borrowed(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_wildcard(&self) -> bool {
        self.as_str() == "*"
    }
}

impl core::fmt::Display for Permission {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

pub const ALL: Permission = Permission::from_static("*");

pub const PATIENTS_READ: Permission = Permission::from_static("patients.read");
pub const PATIENTS_WRITE: Permission = Permission::from_static("patients.write");

pub const APPOINTMENTS_READ: Permission = Permission::from_static("appointments.read");
pub const APPOINTMENTS_WRITE: Permission = Permission::from_static("appointments.write");

pub const CATALOG_READ: Permission = Permission::from_static("catalog.read");
pub const CATALOG_WRITE: Permission = Permission::from_static("catalog.write");

pub const CLINICAL_READ: Permission = Permission::from_static("clinical.read");
pub const CLINICAL_WRITE: Permission = Permission::from_static("clinical.write");

pub const INVOICES_READ: Permission = Permission::from_static("invoices.read");
pub const INVOICES_WRITE: Permission = Permission::from_static("invoices.write");
pub const INVOICES_PAY: Permission = Permission::from_static("invoices.pay");

pub const DASHBOARD_READ: Permission = Permission::from_static("dashboard.read");
