//! Bill line items and the line-total calculator
//!
//! A line total applies the discount before the tax, and rounds half-up to
//! the currency's minor unit exactly once, at the end. Rounding per
//! intermediate step would drift across bills with many items.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use core_kernel::{Money, Percent};

use crate::error::BillingError;

/// Category of a billed line item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    Consultation,
    Procedure,
    Medicine,
    Test,
    Other,
}

impl ItemKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemKind::Consultation => "consultation",
            ItemKind::Procedure => "procedure",
            ItemKind::Medicine => "medicine",
            ItemKind::Test => "test",
            ItemKind::Other => "other",
        }
    }
}

impl fmt::Display for ItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ItemKind {
    type Err = BillingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "consultation" => Ok(ItemKind::Consultation),
            "procedure" => Ok(ItemKind::Procedure),
            "medicine" => Ok(ItemKind::Medicine),
            "test" => Ok(ItemKind::Test),
            "other" => Ok(ItemKind::Other),
            other => Err(BillingError::validation(format!(
                "Unknown item kind: {other}"
            ))),
        }
    }
}

/// One priced entry within a bill
///
/// Owned exclusively by its bill and destroyed with it. Construction
/// validates quantity and price, so a held `BillItem` always has a
/// well-defined line total.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BillItem {
    kind: ItemKind,
    name: String,
    quantity: u32,
    unit_price: Money,
    discount: Percent,
    tax: Percent,
}

impl BillItem {
    pub fn new(
        kind: ItemKind,
        name: impl Into<String>,
        quantity: u32,
        unit_price: Money,
        discount: Percent,
        tax: Percent,
    ) -> Result<Self, BillingError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(BillingError::validation("Item name must not be empty"));
        }
        if quantity == 0 {
            return Err(BillingError::validation("Quantity must be positive"));
        }
        if unit_price.is_negative() {
            return Err(BillingError::validation(format!(
                "Unit price must not be negative, got {unit_price}"
            )));
        }

        Ok(Self {
            kind,
            name,
            quantity,
            unit_price,
            discount,
            tax,
        })
    }

    pub fn kind(&self) -> ItemKind {
        self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn quantity(&self) -> u32 {
        self.quantity
    }

    pub fn unit_price(&self) -> Money {
        self.unit_price
    }

    pub fn discount(&self) -> Percent {
        self.discount
    }

    pub fn tax(&self) -> Percent {
        self.tax
    }

    /// The derived total for this line
    pub fn line_total(&self) -> Money {
        compute_line_total(self.quantity, self.unit_price, self.discount, self.tax)
    }
}

/// Computes `quantity * unit_price * (1 - discount) * (1 + tax)`
///
/// Discount applies before tax. The result is rounded half-up to the
/// currency's minor unit; intermediate values keep full precision.
pub fn compute_line_total(
    quantity: u32,
    unit_price: Money,
    discount: Percent,
    tax: Percent,
) -> Money {
    let gross = unit_price.multiply(Decimal::from(quantity));
    let discounted = gross.multiply(Decimal::ONE - discount.as_fraction());
    let taxed = discounted.multiply(Decimal::ONE + tax.as_fraction());
    taxed.round_half_up()
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_kernel::Currency;
    use rust_decimal_macros::dec;

    fn inr(amount: Decimal) -> Money {
        Money::new(amount, Currency::INR)
    }

    fn pct(value: Decimal) -> Percent {
        Percent::new(value).unwrap()
    }

    #[test]
    fn test_plain_line_total() {
        let total = compute_line_total(1, inr(dec!(300)), Percent::ZERO, Percent::ZERO);
        assert_eq!(total.amount(), dec!(300.00));
    }

    #[test]
    fn test_discount_applies_before_tax() {
        // 2 * 100 = 200; -10% = 180; +18% tax on the discounted base = 212.40
        let total = compute_line_total(2, inr(dec!(100)), pct(dec!(10)), pct(dec!(18)));
        assert_eq!(total.amount(), dec!(212.40));
    }

    #[test]
    fn test_rounds_half_up_once_at_the_end() {
        // 3 * 33.33 = 99.99; -7.5% = 92.49075; +5% = 97.1152875 -> 97.12
        let total = compute_line_total(3, inr(dec!(33.33)), pct(dec!(7.5)), pct(dec!(5)));
        assert_eq!(total.amount(), dec!(97.12));
    }

    #[test]
    fn test_full_discount_yields_zero() {
        let total = compute_line_total(5, inr(dec!(40)), pct(dec!(100)), pct(dec!(18)));
        assert!(total.is_zero());
    }

    #[test]
    fn test_item_rejects_zero_quantity() {
        let item = BillItem::new(
            ItemKind::Medicine,
            "Paracetamol",
            0,
            inr(dec!(2.50)),
            Percent::ZERO,
            Percent::ZERO,
        );
        assert!(matches!(item, Err(BillingError::Validation(_))));
    }

    #[test]
    fn test_item_rejects_negative_price() {
        let item = BillItem::new(
            ItemKind::Other,
            "Adjustment",
            1,
            inr(dec!(-5.00)),
            Percent::ZERO,
            Percent::ZERO,
        );
        assert!(matches!(item, Err(BillingError::Validation(_))));
    }

    #[test]
    fn test_item_rejects_blank_name() {
        let item = BillItem::new(
            ItemKind::Test,
            "   ",
            1,
            inr(dec!(150)),
            Percent::ZERO,
            Percent::ZERO,
        );
        assert!(matches!(item, Err(BillingError::Validation(_))));
    }

    #[test]
    fn test_item_kind_round_trip() {
        for kind in [
            ItemKind::Consultation,
            ItemKind::Procedure,
            ItemKind::Medicine,
            ItemKind::Test,
            ItemKind::Other,
        ] {
            assert_eq!(kind.as_str().parse::<ItemKind>().unwrap(), kind);
        }
    }
}
