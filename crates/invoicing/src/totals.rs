//! Billing arithmetic shared by issuing, term updates and item replacement.
//!
//! ```text
//! subtotal = Σ quantity × unit_price
//! discount = fixed amount | subtotal × bps / 10 000 (half-up)
//! total    = subtotal − discount + tax
//! ```

use serde::{Deserialize, Serialize};

use dentaflow_clinical::ClinicalRecordId;
use dentaflow_core::{DomainError, Money, text};
use dentaflow_core::value_object::BPS_PER_UNIT;

pub const DESCRIPTION_MAX: usize = 200;

/// One billed line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    pub description: String,
    pub quantity: u32,
    pub unit_price: Money,
    /// The clinical record this line bills, when derived from a visit.
    pub clinical_record_id: Option<ClinicalRecordId>,
}

impl LineItem {
    pub fn total(&self) -> Option<Money> {
        self.unit_price.checked_mul(self.quantity)
    }

    fn validated(&self) -> Result<LineItem, DomainError> {
        if self.quantity == 0 {
            return Err(DomainError::validation("item quantity must be at least 1"));
        }
        Ok(LineItem {
            description: text::required("item description", &self.description, DESCRIPTION_MAX)?,
            quantity: self.quantity,
            unit_price: self.unit_price,
            clinical_record_id: self.clinical_record_id,
        })
    }
}

/// How the discount is expressed.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Discount {
    Fixed { amount: Money },
    /// Basis points of the subtotal (10 000 = 100 %).
    Percentage { bps: u32 },
}

impl Default for Discount {
    fn default() -> Self {
        Discount::Fixed { amount: Money::ZERO }
    }
}

impl Discount {
    pub fn none() -> Self {
        Self::default()
    }

    /// Discount amount for a given subtotal.
    pub fn amount_for(&self, subtotal: Money) -> Result<Money, DomainError> {
        match *self {
            Discount::Fixed { amount } => {
                if amount > subtotal {
                    return Err(DomainError::validation("discount cannot exceed the subtotal"));
                }
                Ok(amount)
            }
            Discount::Percentage { bps } => {
                if bps > BPS_PER_UNIT {
                    return Err(DomainError::validation("discount percentage cannot exceed 100%"));
                }
                subtotal
                    .percentage_bps(bps)
                    .ok_or_else(|| DomainError::invariant("discount overflow"))
            }
        }
    }
}

/// Computed amounts of an invoice.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceTotals {
    pub subtotal: Money,
    pub discount: Money,
    pub tax: Money,
    pub total: Money,
}

impl InvoiceTotals {
    /// What remains to be paid after `amount_paid`.
    pub fn balance(&self, amount_paid: Money) -> Money {
        self.total.saturating_sub(amount_paid)
    }
}

/// Validate `items` and compute the invoice totals.
///
/// Returns the normalized items alongside the totals.
pub fn compute_totals(
    items: &[LineItem],
    discount: &Discount,
    tax: Money,
) -> Result<(Vec<LineItem>, InvoiceTotals), DomainError> {
    if items.is_empty() {
        return Err(DomainError::validation("at least one item is required"));
    }

    let items = items
        .iter()
        .map(LineItem::validated)
        .collect::<Result<Vec<_>, _>>()?;

    let line_totals = items
        .iter()
        .map(|i| i.total().ok_or_else(|| DomainError::invariant("item amount overflow")))
        .collect::<Result<Vec<_>, _>>()?;
    let subtotal = Money::checked_sum(line_totals)
        .ok_or_else(|| DomainError::invariant("invoice subtotal overflow"))?;

    let discount_amount = discount.amount_for(subtotal)?;
    let total = subtotal
        .saturating_sub(discount_amount)
        .checked_add(tax)
        .ok_or_else(|| DomainError::invariant("invoice total overflow"))?;

    Ok((
        items,
        InvoiceTotals {
            subtotal,
            discount: discount_amount,
            tax,
            total,
        },
    ))
}
