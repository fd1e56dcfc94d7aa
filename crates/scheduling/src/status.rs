//! Appointment status lifecycle.
//!
//! ```text
//! SCHEDULED → CONFIRMED → SEATED → IN_PROGRESS → COMPLETED
//!     │           │          │
//!     ├───────────┴──────────┴──→ CANCELLED
//!     └───────────┴─────────────→ NO_SHOW
//! ```

use serde::{Deserialize, Serialize};

use dentaflow_core::DomainError;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AppointmentStatus {
    Scheduled,
    Confirmed,
    Seated,
    InProgress,
    Completed,
    Cancelled,
    NoShow,
}

impl AppointmentStatus {
    pub const ALL: [AppointmentStatus; 7] = [
        AppointmentStatus::Scheduled,
        AppointmentStatus::Confirmed,
        AppointmentStatus::Seated,
        AppointmentStatus::InProgress,
        AppointmentStatus::Completed,
        AppointmentStatus::Cancelled,
        AppointmentStatus::NoShow,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            AppointmentStatus::Scheduled => "SCHEDULED",
            AppointmentStatus::Confirmed => "CONFIRMED",
            AppointmentStatus::Seated => "SEATED",
            AppointmentStatus::InProgress => "IN_PROGRESS",
            AppointmentStatus::Completed => "COMPLETED",
            AppointmentStatus::Cancelled => "CANCELLED",
            AppointmentStatus::NoShow => "NO_SHOW",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            AppointmentStatus::Completed | AppointmentStatus::Cancelled | AppointmentStatus::NoShow
        )
    }

    /// Whether the slot still occupies the calendar as a future visit.
    pub fn is_upcoming(self) -> bool {
        matches!(self, AppointmentStatus::Scheduled | AppointmentStatus::Confirmed)
    }

    /// Whether the time may still be moved.
    pub fn can_reschedule(self) -> bool {
        self.is_upcoming()
    }

    /// Position along the active chain; `None` for the exits.
    fn rank(self) -> Option<u8> {
        match self {
            AppointmentStatus::Scheduled => Some(0),
            AppointmentStatus::Confirmed => Some(1),
            AppointmentStatus::Seated => Some(2),
            AppointmentStatus::InProgress => Some(3),
            AppointmentStatus::Completed => Some(4),
            AppointmentStatus::Cancelled | AppointmentStatus::NoShow => None,
        }
    }

    /// Check that `self → next` is a legal move.
    pub fn ensure_transition(self, next: AppointmentStatus) -> Result<(), DomainError> {
        if self == next {
            return Err(DomainError::conflict(format!(
                "appointment is already {}",
                self.as_str()
            )));
        }
        if self.is_terminal() {
            return Err(DomainError::invariant(format!(
                "appointment is {} and cannot change status",
                self.as_str()
            )));
        }

        let allowed = match next {
            AppointmentStatus::Cancelled => matches!(
                self,
                AppointmentStatus::Scheduled | AppointmentStatus::Confirmed | AppointmentStatus::Seated
            ),
            AppointmentStatus::NoShow => self.is_upcoming(),
            _ => matches!((self.rank(), next.rank()), (Some(from), Some(to)) if to > from),
        };

        if allowed {
            Ok(())
        } else {
            Err(DomainError::invariant(format!(
                "cannot move appointment from {} to {}",
                self.as_str(),
                next.as_str()
            )))
        }
    }
}

impl core::fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for AppointmentStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        AppointmentStatus::ALL
            .into_iter()
            .find(|st| st.as_str() == upper)
            .ok_or_else(|| DomainError::validation(format!("unknown appointment status: {s}")))
    }
}
