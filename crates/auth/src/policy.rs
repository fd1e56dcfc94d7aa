//! Static role → permission policy for a clinic.

use crate::permissions::{self, Permission};
use crate::Role;

const DOCTOR: &[Permission] = &[
    permissions::PATIENTS_READ,
    permissions::APPOINTMENTS_READ,
    permissions::APPOINTMENTS_WRITE,
    permissions::CATALOG_READ,
    permissions::CLINICAL_READ,
    permissions::CLINICAL_WRITE,
    permissions::INVOICES_READ,
];

const STAFF: &[Permission] = &[
    permissions::PATIENTS_READ,
    permissions::PATIENTS_WRITE,
    permissions::APPOINTMENTS_READ,
    permissions::APPOINTMENTS_WRITE,
    permissions::CATALOG_READ,
    permissions::CLINICAL_READ,
    permissions::INVOICES_READ,
    permissions::INVOICES_WRITE,
    permissions::INVOICES_PAY,
];

/// Effective permissions for a set of roles (deduplicated, order of first grant).
///
/// `superadmin` and `admin` resolve to the wildcard. Role names are matched
/// case-insensitively; unknown roles grant nothing.
pub fn permissions_for_roles(roles: &[Role]) -> Vec<Permission> {
    let mut out: Vec<Permission> = Vec::new();
    for role in roles {
        let granted: &[Permission] = match role.as_str().to_ascii_lowercase().as_str() {
            "superadmin" | "admin" => return vec![permissions::ALL],
            "doctor" => DOCTOR,
            "staff" => STAFF,
            _ => &[],
        };
        for p in granted {
            if !out.contains(p) {
                out.push(p.clone());
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admin_roles_collapse_to_wildcard() {
        assert_eq!(permissions_for_roles(&[Role::SUPERADMIN]), vec![permissions::ALL]);
        assert_eq!(permissions_for_roles(&[Role::new("ADMIN")]), vec![permissions::ALL]);
    }

    #[test]
    fn combined_roles_union_without_duplicates() {
        let perms = permissions_for_roles(&[Role::DOCTOR, Role::STAFF]);
        assert!(perms.contains(&permissions::CLINICAL_WRITE));
        assert!(perms.contains(&permissions::INVOICES_PAY));
        let reads = perms.iter().filter(|p| **p == permissions::PATIENTS_READ).count();
        assert_eq!(reads, 1);
    }

    #[test]
    fn doctors_read_patients_but_do_not_manage_them() {
        let perms = permissions_for_roles(&[Role::DOCTOR]);
        assert!(perms.contains(&permissions::PATIENTS_READ));
        assert!(!perms.contains(&permissions::PATIENTS_WRITE));
        assert!(permissions_for_roles(&[Role::STAFF]).contains(&permissions::PATIENTS_WRITE));
    }

    #[test]
    fn unknown_role_grants_nothing() {
        assert!(permissions_for_roles(&[Role::new("viewer")]).is_empty());
    }
}
