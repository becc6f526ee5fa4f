//! The account summary read model.
//!
//! An [`AccountSummary`] is the queryable projection built by applying
//! account events: an identifier and a running balance. Nothing here forces
//! the balance to stay non-negative.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::ids::AccountId;
use crate::money::{MoneyError, round_money, zero_balance};

/// Balance per account, as persisted by every store adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountSummary {
    /// The account this summary describes.
    pub account_id: AccountId,
    /// Current balance, scale 2.
    pub balance: Decimal,
}

impl AccountSummary {
    /// Open a new summary at balance `0.00`.
    pub fn open(account_id: AccountId) -> Self {
        Self {
            account_id,
            balance: zero_balance(),
        }
    }

    /// Add `amount` to the balance.
    ///
    /// The amount is rounded to two digits before it is added and the sum is
    /// rounded again afterwards.
    ///
    /// # Errors
    ///
    /// Returns [`MoneyError::Overflow`] if the sum does not fit.
    pub fn credit(&mut self, amount: Decimal) -> Result<(), MoneyError> {
        let amount = round_money(amount);
        let sum = self
            .balance
            .checked_add(amount)
            .ok_or(MoneyError::Overflow {
                balance: self.balance,
                op: "+",
                amount,
            })?;
        self.balance = round_money(sum);
        Ok(())
    }

    /// Subtract `amount` from the balance.
    ///
    /// # Errors
    ///
    /// Returns [`MoneyError::Overflow`] if the difference does not fit.
    pub fn debit(&mut self, amount: Decimal) -> Result<(), MoneyError> {
        let amount = round_money(amount);
        let difference = self
            .balance
            .checked_sub(amount)
            .ok_or(MoneyError::Overflow {
                balance: self.balance,
                op: "-",
                amount,
            })?;
        self.balance = round_money(difference);
        Ok(())
    }
}
