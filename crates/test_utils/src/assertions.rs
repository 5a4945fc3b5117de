//! Custom Test Assertions
//!
//! Assertion helpers for billing domain types that give more meaningful
//! error messages than bare `assert_eq!`.

use core_kernel::Money;
use rust_decimal::Decimal;

use domain_billing::bill::{Bill, PaymentStatus};
use domain_billing::error::BillingError;

/// Asserts that two Money values are approximately equal within a tolerance
pub fn assert_money_approx_eq(actual: &Money, expected: &Money, tolerance: Decimal) {
    assert_eq!(
        actual.currency(),
        expected.currency(),
        "Currency mismatch: actual={}, expected={}",
        actual.currency(),
        expected.currency()
    );

    let diff = (actual.amount() - expected.amount()).abs();
    assert!(
        diff <= tolerance,
        "Money amounts differ by more than tolerance: actual={}, expected={}, diff={}, tolerance={}",
        actual.amount(),
        expected.amount(),
        diff,
        tolerance
    );
}

/// Asserts the arithmetic invariants every bill must satisfy: the total
/// equals the sum of its line totals, the balance equals total minus
/// paid, and the refunded amount never exceeds the paid amount.
pub fn assert_bill_invariants(bill: &Bill) {
    let mut sum = Money::zero(bill.currency());
    for item in bill.items() {
        sum = sum
            .checked_add(&item.line_total())
            .expect("line totals share the bill currency");
    }
    assert_eq!(
        bill.total_amount(),
        sum,
        "Bill total {} does not equal the sum of line totals {}",
        bill.total_amount(),
        sum
    );

    let expected_balance = bill
        .total_amount()
        .checked_sub(&bill.paid_amount())
        .expect("total and paid share the bill currency");
    assert_eq!(
        bill.balance_amount(),
        expected_balance,
        "Balance {} does not equal total minus paid {}",
        bill.balance_amount(),
        expected_balance
    );

    assert!(
        bill.total_refunded() <= bill.paid_amount(),
        "Refunded {} exceeds paid {}",
        bill.total_refunded(),
        bill.paid_amount()
    );
}

/// Asserts that a bill carries the expected payment status
pub fn assert_payment_status(bill: &Bill, expected: PaymentStatus) {
    assert_eq!(
        bill.payment_status(),
        expected,
        "Bill {} has status {} (paid {} of {})",
        bill.id(),
        bill.payment_status(),
        bill.paid_amount(),
        bill.total_amount()
    );
}

/// Asserts that a result failed with a conflict
pub fn assert_conflict<T: std::fmt::Debug>(result: Result<T, BillingError>) {
    match result {
        Err(err) if err.is_conflict() => {}
        Err(err) => panic!("Expected a conflict error, got {err}"),
        Ok(value) => panic!("Expected a conflict error, got Ok({value:?})"),
    }
}

/// Asserts that a result failed validation
pub fn assert_validation<T: std::fmt::Debug>(result: Result<T, BillingError>) {
    match result {
        Err(BillingError::Validation(_)) => {}
        Err(err) => panic!("Expected a validation error, got {err}"),
        Ok(value) => panic!("Expected a validation error, got Ok({value:?})"),
    }
}
