//! Witness Ledger
//!
//! Append-only record of the wagers accepted for the current round.
//!
//! # Design Principles
//!
//! 1. **Immutability**: entries are never modified after recording. The only
//!    destructive operation is `clear()`, invoked by the settlement engine
//!    at the end of a cycle (or by the force-close refund path).
//! 2. **Insertion order**: settlement iterates entries in the order they
//!    were accepted.
//! 3. **No dedup key**: a participant may hold any number of entries in one
//!    round; each settles independently.

use crate::engine::clock::UnixSeconds;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Which of the two custodied currencies a wager is denominated in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Currency {
    /// The chain-native currency.
    Native,
    /// The secondary (token) currency.
    Eth,
}

impl Currency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Currency::Native => "native",
            Currency::Eth => "eth",
        }
    }

    pub fn parse(s: &str) -> Option<Currency> {
        match s {
            "native" => Some(Currency::Native),
            "eth" => Some(Currency::Eth),
            _ => None,
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One accepted wager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WitnessEntry {
    pub id: Uuid,
    /// Identity the stake came from.
    pub participant: String,
    /// Identity a win is paid to. Usually the participant; a wager may
    /// direct winnings elsewhere.
    pub beneficiary: String,
    /// Predicted weather index in [0, 18].
    pub predicted_index: u8,
    pub currency: Currency,
    /// Stake in wei.
    pub amount: u128,
    pub accepted_at: UnixSeconds,
}

/// Insertion-ordered ledger of the current round's wagers.
///
/// The settlement engine is the only writer; state gating (wagers are only
/// accepted while the round is BE_READY) lives there.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WitnessLedger {
    entries: Vec<WitnessEntry>,
}

impl WitnessLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry. Entries are immutable once recorded.
    pub fn record(&mut self, entry: WitnessEntry) {
        self.entries.push(entry);
    }

    /// Read-only view in acceptance order.
    pub fn entries(&self) -> &[WitnessEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sum of stakes held for one currency.
    pub fn total_staked(&self, currency: Currency) -> u128 {
        self.entries
            .iter()
            .filter(|e| e.currency == currency)
            .map(|e| e.amount)
            .sum()
    }

    /// Discard all entries. End-of-cycle only.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(participant: &str, index: u8, currency: Currency, amount: u128) -> WitnessEntry {
        WitnessEntry {
            id: Uuid::new_v4(),
            participant: participant.to_string(),
            beneficiary: participant.to_string(),
            predicted_index: index,
            currency,
            amount,
            accepted_at: 1_700_000_000,
        }
    }

    #[test]
    fn test_insertion_order_preserved() {
        let mut ledger = WitnessLedger::new();
        ledger.record(entry("alice", 3, Currency::Native, 100));
        ledger.record(entry("bob", 7, Currency::Eth, 200));
        ledger.record(entry("alice", 3, Currency::Native, 300));

        let participants: Vec<&str> = ledger
            .entries()
            .iter()
            .map(|e| e.participant.as_str())
            .collect();
        assert_eq!(participants, vec!["alice", "bob", "alice"]);
    }

    #[test]
    fn test_duplicate_participant_permitted() {
        let mut ledger = WitnessLedger::new();
        ledger.record(entry("alice", 1, Currency::Native, 100));
        ledger.record(entry("alice", 2, Currency::Native, 100));
        assert_eq!(ledger.len(), 2);
    }

    #[test]
    fn test_total_staked_per_currency() {
        let mut ledger = WitnessLedger::new();
        ledger.record(entry("a", 0, Currency::Native, 100));
        ledger.record(entry("b", 1, Currency::Eth, 50));
        ledger.record(entry("c", 2, Currency::Native, 25));

        assert_eq!(ledger.total_staked(Currency::Native), 125);
        assert_eq!(ledger.total_staked(Currency::Eth), 50);
    }

    #[test]
    fn test_clear_empties() {
        let mut ledger = WitnessLedger::new();
        ledger.record(entry("a", 0, Currency::Native, 100));
        assert!(!ledger.is_empty());
        ledger.clear();
        assert!(ledger.is_empty());
        assert_eq!(ledger.total_staked(Currency::Native), 0);
    }

    #[test]
    fn test_currency_parse_roundtrip() {
        for c in [Currency::Native, Currency::Eth] {
            assert_eq!(Currency::parse(c.as_str()), Some(c));
        }
        assert_eq!(Currency::parse("doge"), None);
    }
}
