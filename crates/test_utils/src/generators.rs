//! Property-Based Test Generators
//!
//! Proptest strategies for generating random billing data that maintains
//! domain invariants.

use core_kernel::{Currency, Money, Percent};
use proptest::prelude::*;
use rust_decimal::Decimal;

use domain_billing::line_item::{BillItem, ItemKind};

/// Strategy for generating valid Currency values
pub fn currency_strategy() -> impl Strategy<Value = Currency> {
    prop_oneof![
        Just(Currency::INR),
        Just(Currency::USD),
        Just(Currency::EUR),
        Just(Currency::GBP),
        Just(Currency::AED),
        Just(Currency::SGD),
    ]
}

/// Strategy for generating positive amounts in minor units
pub fn positive_amount_minor_strategy() -> impl Strategy<Value = i64> {
    1i64..100_000_000i64
}

/// Strategy for generating positive Money values in a fixed currency
pub fn positive_money_strategy(currency: Currency) -> impl Strategy<Value = Money> {
    positive_amount_minor_strategy().prop_map(move |minor| Money::from_minor(minor, currency))
}

/// Strategy for generating valid percentages (0.00 to 100.00)
pub fn percent_strategy() -> impl Strategy<Value = Percent> {
    (0u32..=10_000u32).prop_map(|n| {
        Percent::new(Decimal::new(n as i64, 2)).expect("generated value is within 0..=100")
    })
}

/// Strategy for generating item kinds
pub fn item_kind_strategy() -> impl Strategy<Value = ItemKind> {
    prop_oneof![
        Just(ItemKind::Consultation),
        Just(ItemKind::Procedure),
        Just(ItemKind::Medicine),
        Just(ItemKind::Test),
        Just(ItemKind::Other),
    ]
}

/// Strategy for generating valid bill items in a fixed currency
pub fn bill_item_strategy(currency: Currency) -> impl Strategy<Value = BillItem> {
    (
        item_kind_strategy(),
        "[A-Za-z][A-Za-z ]{2,24}",
        1u32..50u32,
        positive_money_strategy(currency),
        percent_strategy(),
        percent_strategy(),
    )
        .prop_map(|(kind, name, quantity, price, discount, tax)| {
            BillItem::new(kind, name, quantity, price, discount, tax)
                .expect("generated inputs satisfy item validation")
        })
}

/// Strategy for generating a non-empty list of bill items in one currency
pub fn bill_items_strategy(currency: Currency) -> impl Strategy<Value = Vec<BillItem>> {
    prop::collection::vec(bill_item_strategy(currency), 1..8)
}
