//! Value objects: equality by value, not identity.

use serde::{Deserialize, Serialize};

/// Marker trait for value objects.
///
/// Value objects are immutable and compared by value. To "modify" one, build a
/// new one.
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}

/// Basis points in one whole (100%).
pub const BPS_PER_UNIT: u32 = 10_000;

/// A non-negative amount of money in the clinic's smallest currency unit
/// (paise, cents).
///
/// All billing arithmetic is integer arithmetic on minor units; overflow is
/// surfaced as `None` rather than wrapping.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(u64);

impl ValueObject for Money {}

impl Money {
    pub const ZERO: Money = Money(0);

    pub const fn from_minor(minor: u64) -> Self {
        Self(minor)
    }

    pub const fn minor(self) -> u64 {
        self.0
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub fn checked_add(self, other: Money) -> Option<Money> {
        self.0.checked_add(other.0).map(Money)
    }

    pub fn checked_sub(self, other: Money) -> Option<Money> {
        self.0.checked_sub(other.0).map(Money)
    }

    pub fn saturating_sub(self, other: Money) -> Money {
        Money(self.0.saturating_sub(other.0))
    }

    pub fn checked_mul(self, quantity: u32) -> Option<Money> {
        self.0.checked_mul(u64::from(quantity)).map(Money)
    }

    /// `self × bps / 10 000`, rounded half-up to the nearest minor unit.
    pub fn percentage_bps(self, bps: u32) -> Option<Money> {
        let scaled = u128::from(self.0) * u128::from(bps) + u128::from(BPS_PER_UNIT / 2);
        u64::try_from(scaled / u128::from(BPS_PER_UNIT)).ok().map(Money)
    }

    /// Sum an iterator of amounts, `None` on overflow.
    pub fn checked_sum(amounts: impl IntoIterator<Item = Money>) -> Option<Money> {
        amounts
            .into_iter()
            .try_fold(Money::ZERO, |acc, m| acc.checked_add(m))
    }

    /// Sum an iterator of amounts, clamping at the largest representable amount.
    pub fn saturating_sum(amounts: impl IntoIterator<Item = Money>) -> Money {
        amounts
            .into_iter()
            .fold(Money::ZERO, |acc, m| Money(acc.0.saturating_add(m.0)))
    }
}

impl core::fmt::Display for Money {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}.{:02}", self.0 / 100, self.0 % 100)
    }
}

impl From<u64> for Money {
    fn from(value: u64) -> Self {
        Money(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn percentage_rounds_half_up() {
        // 12.5% of 1.01 = 0.12625 -> 0.13
        assert_eq!(Money::from_minor(101).percentage_bps(1_250), Some(Money::from_minor(13)));
        // 10% of 0.05 = 0.005 -> 0.01
        assert_eq!(Money::from_minor(5).percentage_bps(1_000), Some(Money::from_minor(1)));
        assert_eq!(Money::from_minor(4).percentage_bps(1_000), Some(Money::ZERO));
    }

    #[test]
    fn displays_major_and_minor_units() {
        assert_eq!(Money::from_minor(123_405).to_string(), "1234.05");
        assert_eq!(Money::ZERO.to_string(), "0.00");
    }

    #[test]
    fn sum_overflow_is_none() {
        assert_eq!(Money::checked_sum([Money::from_minor(u64::MAX), Money::from_minor(1)]), None);
    }

    proptest! {
        #[test]
        fn full_percentage_is_identity(amount in 0u64..=u64::MAX / 20_000) {
            let m = Money::from_minor(amount);
            prop_assert_eq!(m.percentage_bps(BPS_PER_UNIT), Some(m));
        }

        #[test]
        fn percentage_never_exceeds_amount(amount in 0u64..1_000_000_000, bps in 0u32..=BPS_PER_UNIT) {
            let m = Money::from_minor(amount);
            let part = m.percentage_bps(bps).unwrap();
            prop_assert!(part <= m);
        }
    }
}
