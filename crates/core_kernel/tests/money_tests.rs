//! Unit tests for the Money module
//!
//! Tests cover money creation, arithmetic, rounding, ordering, and the
//! validated Percent type used for discounts and taxes.

use core_kernel::{Money, Currency, Percent, MoneyError};
use rust_decimal_macros::dec;

mod creation {
    use super::*;

    #[test]
    fn test_new_creates_money_with_correct_amount() {
        let m = Money::new(dec!(100.50), Currency::INR);
        assert_eq!(m.amount(), dec!(100.50));
        assert_eq!(m.currency(), Currency::INR);
    }

    #[test]
    fn test_new_rounds_to_four_decimal_places() {
        let m = Money::new(dec!(100.123456789), Currency::INR);
        assert_eq!(m.amount(), dec!(100.1235));
    }

    #[test]
    fn test_from_minor_converts_paise_correctly() {
        let m = Money::from_minor(10050, Currency::INR);
        assert_eq!(m.amount(), dec!(100.50));
    }

    #[test]
    fn test_zero_creates_zero_amount() {
        let m = Money::zero(Currency::EUR);
        assert!(m.is_zero());
        assert_eq!(m.currency(), Currency::EUR);
    }

    #[test]
    fn test_negative_amount_creation() {
        let m = Money::new(dec!(-100.00), Currency::INR);
        assert!(m.is_negative());
        assert_eq!(m.amount(), dec!(-100.00));
    }
}

mod arithmetic {
    use super::*;

    #[test]
    fn test_checked_add_same_currency() {
        let a = Money::new(dec!(100.00), Currency::INR);
        let b = Money::new(dec!(25.50), Currency::INR);
        assert_eq!(a.checked_add(&b).unwrap().amount(), dec!(125.50));
    }

    #[test]
    fn test_checked_add_rejects_currency_mismatch() {
        let a = Money::new(dec!(100.00), Currency::INR);
        let b = Money::new(dec!(25.50), Currency::USD);
        assert!(matches!(
            a.checked_add(&b),
            Err(MoneyError::CurrencyMismatch(_, _))
        ));
    }

    #[test]
    fn test_checked_sub_can_go_negative() {
        let a = Money::new(dec!(10.00), Currency::INR);
        let b = Money::new(dec!(25.00), Currency::INR);
        assert_eq!(a.checked_sub(&b).unwrap().amount(), dec!(-15.00));
    }

    #[test]
    fn test_saturating_sub_does_not_go_negative() {
        let a = Money::new(dec!(10.00), Currency::INR);
        let b = Money::new(dec!(25.00), Currency::INR);
        assert!(a.saturating_sub(&b).unwrap().is_zero());
    }

    #[test]
    fn test_multiply_by_quantity() {
        let unit = Money::new(dec!(19.99), Currency::INR);
        assert_eq!(unit.multiply(dec!(3)).amount(), dec!(59.97));
    }

    #[test]
    fn test_negation() {
        let m = Money::new(dec!(42.00), Currency::INR);
        assert_eq!((-m).amount(), dec!(-42.00));
    }
}

mod rounding {
    use super::*;

    #[test]
    fn test_half_up_rounds_midpoint_away_from_zero() {
        let m = Money::new(dec!(2.675), Currency::INR);
        assert_eq!(m.round_half_up().amount(), dec!(2.68));
    }

    #[test]
    fn test_half_up_rounds_below_midpoint_down() {
        let m = Money::new(dec!(2.674), Currency::INR);
        assert_eq!(m.round_half_up().amount(), dec!(2.67));
    }

    #[test]
    fn test_half_up_on_negative_amount() {
        let m = Money::new(dec!(-2.675), Currency::INR);
        assert_eq!(m.round_half_up().amount(), dec!(-2.68));
    }
}

mod ordering {
    use super::*;

    #[test]
    fn test_same_currency_orders_by_amount() {
        let a = Money::new(dec!(100.00), Currency::INR);
        let b = Money::new(dec!(99.99), Currency::INR);
        assert!(a > b);
        assert!(b < a);
    }

    #[test]
    fn test_cross_currency_is_unordered() {
        let a = Money::new(dec!(100.00), Currency::INR);
        let b = Money::new(dec!(100.00), Currency::USD);
        assert_eq!(a.partial_cmp(&b), None);
    }
}

mod percent {
    use super::*;

    #[test]
    fn test_boundaries_are_valid() {
        assert_eq!(Percent::new(dec!(0)).unwrap().value(), dec!(0));
        assert_eq!(Percent::new(dec!(100)).unwrap().value(), dec!(100));
    }

    #[test]
    fn test_out_of_range_is_rejected() {
        assert!(matches!(
            Percent::new(dec!(-1)),
            Err(MoneyError::PercentOutOfRange(_))
        ));
        assert!(matches!(
            Percent::new(dec!(100.5)),
            Err(MoneyError::PercentOutOfRange(_))
        ));
    }

    #[test]
    fn test_fraction_conversion() {
        let p = Percent::new(dec!(18)).unwrap();
        assert_eq!(p.as_fraction(), dec!(0.18));
    }

    #[test]
    fn test_serde_rejects_invalid_value() {
        let result: Result<Percent, _> = serde_json::from_str("150");
        assert!(result.is_err());

        let ok: Percent = serde_json::from_str("12.5").unwrap();
        assert_eq!(ok.value(), dec!(12.5));
    }
}
