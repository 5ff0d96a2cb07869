//! Decimal arithmetic utilities for financial calculations.

use rust_decimal::Decimal;

/// Round a price to the instrument's tick size (e.g., 0.0001 for XEMUSDT).
pub fn round_to_tick(value: Decimal, tick_size: Decimal) -> Decimal {
    if tick_size == Decimal::ZERO {
        return value;
    }
    ((value / tick_size).round() * tick_size).normalize()
}

/// Round a quantity down to the instrument's lot step.
///
/// Always rounds toward zero so an order never exceeds the intended size.
pub fn round_down_to_lot(value: Decimal, lot_size: Decimal) -> Decimal {
    if lot_size == Decimal::ZERO {
        return value;
    }
    ((value / lot_size).floor() * lot_size).normalize()
}

/// Safe division that returns zero if divisor is zero.
pub fn safe_div(numerator: Decimal, denominator: Decimal) -> Decimal {
    if denominator == Decimal::ZERO {
        Decimal::ZERO
    } else {
        numerator / denominator
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_round_to_tick() {
        assert_eq!(round_to_tick(dec!(50123.456), dec!(0.01)), dec!(50123.46));
        assert_eq!(round_to_tick(dec!(50123.456), dec!(0.10)), dec!(50123.5));
        assert_eq!(round_to_tick(dec!(50123.456), dec!(1.00)), dec!(50123));
        assert_eq!(round_to_tick(dec!(0.031337), dec!(0.0001)), dec!(0.0313));
    }

    #[test]
    fn test_round_to_tick_zero_tick_is_identity() {
        assert_eq!(round_to_tick(dec!(1.2345), Decimal::ZERO), dec!(1.2345));
    }

    #[test]
    fn test_round_down_to_lot() {
        assert_eq!(round_down_to_lot(dec!(1.567), dec!(0.001)), dec!(1.567));
        assert_eq!(round_down_to_lot(dec!(1.567), dec!(0.01)), dec!(1.56));
        assert_eq!(round_down_to_lot(dec!(1.567), dec!(0.1)), dec!(1.5));
        assert_eq!(round_down_to_lot(dec!(1799.9), dec!(1)), dec!(1799));
    }

    #[test]
    fn test_safe_div() {
        assert_eq!(safe_div(dec!(10), dec!(4)), dec!(2.5));
        assert_eq!(safe_div(dec!(10), Decimal::ZERO), Decimal::ZERO);
    }
}
