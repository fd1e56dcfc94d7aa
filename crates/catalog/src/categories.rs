//! Reference lists offered by the catalog and charting screens.

/// Canonical treatment categories. Clinics may also use their own.
pub const TREATMENT_CATEGORIES: [&str; 10] = [
    "Preventive",
    "Restorative",
    "Endodontic",
    "Periodontic",
    "Prosthodontic",
    "Orthodontic",
    "Oral Surgery",
    "Cosmetic",
    "Diagnostic",
    "Emergency",
];

/// A tooth surface code as charted on a clinical record.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ToothSurface {
    pub code: &'static str,
    pub label: &'static str,
}

pub const TOOTH_SURFACES: [ToothSurface; 9] = [
    ToothSurface { code: "O", label: "Occlusal" },
    ToothSurface { code: "M", label: "Mesial" },
    ToothSurface { code: "D", label: "Distal" },
    ToothSurface { code: "B", label: "Buccal" },
    ToothSurface { code: "L", label: "Lingual" },
    ToothSurface { code: "I", label: "Incisal" },
    ToothSurface { code: "MOD", label: "MOD" },
    ToothSurface { code: "DO", label: "DO" },
    ToothSurface { code: "MO", label: "MO" },
];

/// The canonical spelling of `category`, if it is one of the canonical ones
/// (case-insensitive).
pub fn canonical_category(category: &str) -> Option<&'static str> {
    TREATMENT_CATEGORIES
        .iter()
        .copied()
        .find(|c| c.eq_ignore_ascii_case(category.trim()))
}
