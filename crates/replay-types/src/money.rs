//! Fixed-point monetary arithmetic.
//!
//! Balances and amounts carry two fractional digits. Every arithmetic
//! result is rounded half-up (away from zero at the midpoint) back to that
//! scale, so `0.005` becomes `0.01` before it is ever accumulated.

use rust_decimal::{Decimal, RoundingStrategy};

/// Number of fractional digits carried by every monetary value.
pub const MONEY_SCALE: u32 = 2;

/// Errors raised by monetary arithmetic.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MoneyError {
    /// The result does not fit in a [`Decimal`].
    #[error("monetary overflow: {balance} {op} {amount}")]
    Overflow {
        /// Balance before the operation.
        balance: Decimal,
        /// The operator that overflowed (`+` or `-`).
        op: &'static str,
        /// The operand.
        amount: Decimal,
    },
}

/// Round `value` to [`MONEY_SCALE`] digits, half-up, and normalise its scale.
pub fn round_money(value: Decimal) -> Decimal {
    let mut rounded =
        value.round_dp_with_strategy(MONEY_SCALE, RoundingStrategy::MidpointAwayFromZero);
    rounded.rescale(MONEY_SCALE);
    rounded
}

/// The opening balance of every account: `0.00`.
pub fn zero_balance() -> Decimal {
    Decimal::new(0, MONEY_SCALE)
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    #[test]
    fn midpoint_rounds_up() {
        assert_eq!(round_money(dec!(0.005)), dec!(0.01));
        assert_eq!(round_money(dec!(2.345)), dec!(2.35));
    }

    #[test]
    fn below_midpoint_rounds_down() {
        assert_eq!(round_money(dec!(0.004)), dec!(0.00));
        assert_eq!(round_money(dec!(1.9949)), dec!(1.99));
    }

    #[test]
    fn negative_midpoint_rounds_away_from_zero() {
        assert_eq!(round_money(dec!(-0.005)), dec!(-0.01));
    }

    #[test]
    fn result_carries_two_digits() {
        assert_eq!(round_money(dec!(7)).to_string(), "7.00");
        assert_eq!(zero_balance().to_string(), "0.00");
    }
}
