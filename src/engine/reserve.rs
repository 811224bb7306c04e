//! Reserve - Custodied Funds
//!
//! Balances the engine holds on behalf of the game, per currency, plus the
//! fixed limit fee deducted from each winning payout.
//!
//! # Invariants
//!
//! 1. Balances never go negative: every debit is checked and an underflow
//!    aborts the whole operation before any funds move.
//! 2. Single-writer: only stake intake, deposits, settlement payouts and
//!    force-close refunds mutate balances.
//! 3. A settlement may only begin while both balances cover at least their
//!    limit fee, so a triggered round can always pay its fee-adjusted
//!    winnings without stalling mid-payout.

use crate::engine::ledger::Currency;
use serde::{Deserialize, Serialize};

/// Custodied balances and per-currency limit fees, in wei.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reserve {
    pub native_balance: u128,
    pub eth_balance: u128,
    pub native_limit_fee: u128,
    pub eth_limit_fee: u128,
}

impl Reserve {
    pub fn new(native_limit_fee: u128, eth_limit_fee: u128) -> Self {
        Self {
            native_balance: 0,
            eth_balance: 0,
            native_limit_fee,
            eth_limit_fee,
        }
    }

    pub fn balance(&self, currency: Currency) -> u128 {
        match currency {
            Currency::Native => self.native_balance,
            Currency::Eth => self.eth_balance,
        }
    }

    pub fn limit_fee(&self, currency: Currency) -> u128 {
        match currency {
            Currency::Native => self.native_limit_fee,
            Currency::Eth => self.eth_limit_fee,
        }
    }

    /// Both balances cover at least their limit fee.
    pub fn has_sufficient_reserve(&self) -> bool {
        self.native_balance >= self.native_limit_fee && self.eth_balance >= self.eth_limit_fee
    }

    pub fn credit(&mut self, currency: Currency, amount: u128) {
        match currency {
            Currency::Native => self.native_balance += amount,
            Currency::Eth => self.eth_balance += amount,
        }
    }

    /// Checked debit. Returns false and leaves the balance untouched on
    /// underflow.
    #[must_use]
    pub fn debit(&mut self, currency: Currency, amount: u128) -> bool {
        let balance = match currency {
            Currency::Native => &mut self.native_balance,
            Currency::Eth => &mut self.eth_balance,
        };
        match balance.checked_sub(amount) {
            Some(remaining) => {
                *balance = remaining;
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sufficient_reserve_requires_both_currencies() {
        let mut reserve = Reserve::new(50, 10);
        assert!(!reserve.has_sufficient_reserve());

        reserve.credit(Currency::Native, 50);
        assert!(!reserve.has_sufficient_reserve());

        reserve.credit(Currency::Eth, 10);
        assert!(reserve.has_sufficient_reserve());

        assert!(reserve.debit(Currency::Eth, 1));
        assert!(!reserve.has_sufficient_reserve());
    }

    #[test]
    fn test_debit_checked() {
        let mut reserve = Reserve::new(0, 0);
        reserve.credit(Currency::Native, 100);

        assert!(reserve.debit(Currency::Native, 60));
        assert_eq!(reserve.balance(Currency::Native), 40);

        // Underflow leaves the balance untouched.
        assert!(!reserve.debit(Currency::Native, 41));
        assert_eq!(reserve.balance(Currency::Native), 40);
    }

    #[test]
    fn test_currencies_are_independent() {
        let mut reserve = Reserve::new(5, 5);
        reserve.credit(Currency::Native, 100);
        assert_eq!(reserve.balance(Currency::Eth), 0);
        assert!(!reserve.debit(Currency::Eth, 1));
        assert_eq!(reserve.balance(Currency::Native), 100);
    }

    #[test]
    fn test_limit_fee_lookup() {
        let reserve = Reserve::new(50_000_000_000_000_000, 10_000_000_000_000_000);
        assert_eq!(reserve.limit_fee(Currency::Native), 50_000_000_000_000_000);
        assert_eq!(reserve.limit_fee(Currency::Eth), 10_000_000_000_000_000);
    }
}
