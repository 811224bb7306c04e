//! Witness-Weather Settlement Engine
//!
//! The orchestrator that owns round state: wager intake, the four-condition
//! upkeep gate, randomness request issuance, fulfillment validation, payout,
//! and the administrative switches.
//!
//! # State Machine
//!
//! ```text
//! OPEN --switch_be_ready--> BE_READY --perform_upkeep--> CALCULATING
//!   ^                          |  ^                           |
//!   |                          |  +-----fulfill_randomness----+
//!   +-------switch_open--------+
//!
//! BE_READY / CALCULATING --force_close--> CLOSE --switch_open--> OPEN
//! ```
//!
//! `perform_upkeep` never trusts the caller's claim that upkeep is due: it
//! re-evaluates all four gating conditions itself. Every rejected operation
//! leaves the engine untouched; solvency of a settlement is verified in full
//! before the first payout is recorded.

use crate::engine::clock::UnixSeconds;
use crate::engine::ledger::{Currency, WitnessEntry, WitnessLedger};
use crate::engine::noon_gate::is_noon_window;
use crate::engine::randomness::{
    derive_request_id, KeyHash, PendingRequest, RandomnessRequest, RequestId,
};
use crate::engine::reserve::Reserve;
use crate::engine::weather::{resolve_weather, WeatherOutcome, WEATHER_TYPE_COUNT};
use num_bigint::BigUint;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// =============================================================================
// ROUND STATE
// =============================================================================

/// Round state. Exactly one value is live at a time; the engine is the sole
/// writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WitnessState {
    /// Wagering halted; round not yet opened.
    Open,
    /// Accepting wagers, waiting for the daily settlement window.
    BeReady,
    /// Randomness requested; committed to resolving with whatever word
    /// eventually arrives.
    Calculating,
    /// Administratively closed (force-close escape); reopen via switch_open.
    Close,
}

impl WitnessState {
    pub fn as_str(&self) -> &'static str {
        match self {
            WitnessState::Open => "OPEN",
            WitnessState::BeReady => "BE_READY",
            WitnessState::Calculating => "CALCULATING",
            WitnessState::Close => "CLOSE",
        }
    }

    pub fn parse(s: &str) -> Option<WitnessState> {
        match s {
            "OPEN" => Some(WitnessState::Open),
            "BE_READY" => Some(WitnessState::BeReady),
            "CALCULATING" => Some(WitnessState::Calculating),
            "CLOSE" => Some(WitnessState::Close),
            _ => None,
        }
    }
}

impl fmt::Display for WitnessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// ERRORS
// =============================================================================

/// Engine error types. All synchronous and recoverable by retry; a rejected
/// operation never mutates state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// A randomness request for this round is already outstanding.
    AlreadyPending,
    /// Wager or round mutation outside the BE_READY state.
    NotAccepting { state: WitnessState },
    /// Upkeep triggered without all four gating conditions true, or an
    /// administrative switch from the wrong state.
    ConditionNotMet,
    /// Fulfillment presented an identifier that is not the pending request.
    UnknownRequest { id: RequestId },
    /// Fulfillment replayed for an already-settled request.
    AlreadyFulfilled { id: RequestId },
    /// Reserve does not cover the limit fees.
    InsufficientReserve,
    /// Predicted index outside [0, 18].
    InvalidWeatherIndex { index: u8 },
    /// Stake does not exceed the currency's limit fee, so a win could never
    /// pay out.
    StakeTooLow { amount: u128, limit_fee: u128 },
    /// A payout or refund would overdraw the reserve. Settlement aborts
    /// before any funds move.
    ReserveUnderflow { currency: Currency, amount: u128 },
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyPending => write!(f, "Randomness request already pending"),
            Self::NotAccepting { state } => {
                write!(f, "Not accepting witnesses in state {}", state)
            }
            Self::ConditionNotMet => write!(f, "Condition not met"),
            Self::UnknownRequest { id } => write!(f, "Unknown randomness request {}", id),
            Self::AlreadyFulfilled { id } => {
                write!(f, "Randomness request {} already fulfilled", id)
            }
            Self::InsufficientReserve => write!(f, "Reserve below limit fees"),
            Self::InvalidWeatherIndex { index } => {
                write!(f, "Weather index {} out of range (max {})", index, WEATHER_TYPE_COUNT - 1)
            }
            Self::StakeTooLow { amount, limit_fee } => {
                write!(f, "Stake {} does not exceed limit fee {}", amount, limit_fee)
            }
            Self::ReserveUnderflow { currency, amount } => {
                write!(f, "Reserve underflow paying {} {}", amount, currency)
            }
        }
    }
}

impl std::error::Error for EngineError {}

// =============================================================================
// UPKEEP CHECK
// =============================================================================

/// Read-only upkeep evaluation with the per-condition breakdown.
///
/// `upkeep_needed` is the conjunction of the four flags; the flags are
/// reported individually so a keeper (or an operator reading logs) can see
/// exactly which condition is holding a trigger back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpkeepCheck {
    pub upkeep_needed: bool,
    pub is_be_ready: bool,
    pub in_noon_window: bool,
    pub has_witness: bool,
    pub has_sufficient_reserve: bool,
}

// =============================================================================
// SETTLEMENT REPORT
// =============================================================================

/// One transfer out of the reserve.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payout {
    /// Identity the funds go to (the entry's beneficiary for winnings, the
    /// participant for refunds).
    pub recipient: String,
    pub currency: Currency,
    pub amount: u128,
    /// Ledger entry this transfer settles.
    pub entry_id: Uuid,
}

/// The durable record of one settlement cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementReport {
    pub request_id: RequestId,
    pub outcome: WeatherOutcome,
    /// Winner transfers, in ledger acceptance order.
    pub payouts: Vec<Payout>,
    pub total_paid_native: u128,
    pub total_paid_eth: u128,
    /// Losing stakes retained by the reserve.
    pub retained_native: u128,
    pub retained_eth: u128,
    pub settled_at: UnixSeconds,
}

/// The record of a force-close refund cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundReport {
    /// Stake returned in full to each participant, in acceptance order.
    pub refunds: Vec<Payout>,
    /// Request discarded mid-flight, if the round was CALCULATING.
    pub discarded_request: Option<RequestId>,
    pub closed_at: UnixSeconds,
}

// =============================================================================
// ENGINE
// =============================================================================

/// Per-deployment engine parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Signed timezone-like correction applied before the noon-window test.
    pub timestamp_offset: i64,
    /// Randomness-service key material, part of request-id derivation.
    pub key_hash: KeyHash,
    pub subscription_id: u64,
}

/// Serializable image of the whole engine, for durable checkpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineSnapshot {
    pub state: WitnessState,
    pub entries: Vec<WitnessEntry>,
    pub reserve: Reserve,
    pub request_nonce: u64,
    pub pending: Option<RandomnessRequest>,
    pub last_request: Option<RandomnessRequest>,
    pub last_outcome: Option<WeatherOutcome>,
}

/// The four-state settlement machine. Single-threaded with respect to
/// mutation: callers serialize access (the service holds it behind a lock),
/// and every state-changing operation runs to completion.
#[derive(Debug, Clone)]
pub struct WitnessWeatherEngine {
    config: EngineConfig,
    state: WitnessState,
    ledger: WitnessLedger,
    reserve: Reserve,
    /// Monotonic per-engine counter folded into request-id derivation.
    request_nonce: u64,
    /// The outstanding request, while CALCULATING.
    pending: Option<RandomnessRequest>,
    /// The most recently settled request, kept for replay rejection.
    last_request: Option<RandomnessRequest>,
    last_outcome: Option<WeatherOutcome>,
}

impl WitnessWeatherEngine {
    pub fn new(config: EngineConfig, reserve: Reserve) -> Self {
        Self {
            config,
            state: WitnessState::Open,
            ledger: WitnessLedger::new(),
            reserve,
            request_nonce: 0,
            pending: None,
            last_request: None,
            last_outcome: None,
        }
    }

    /// Rebuild an engine from its last durable checkpoint.
    pub fn from_snapshot(config: EngineConfig, snapshot: EngineSnapshot) -> Self {
        let mut ledger = WitnessLedger::new();
        for entry in snapshot.entries {
            ledger.record(entry);
        }
        Self {
            config,
            state: snapshot.state,
            ledger,
            reserve: snapshot.reserve,
            request_nonce: snapshot.request_nonce,
            pending: snapshot.pending,
            last_request: snapshot.last_request,
            last_outcome: snapshot.last_outcome,
        }
    }

    pub fn snapshot(&self) -> EngineSnapshot {
        EngineSnapshot {
            state: self.state,
            entries: self.ledger.entries().to_vec(),
            reserve: self.reserve.clone(),
            request_nonce: self.request_nonce,
            pending: self.pending.clone(),
            last_request: self.last_request.clone(),
            last_outcome: self.last_outcome,
        }
    }

    // -- read interface (side-effect-free) ------------------------------------

    pub fn state(&self) -> WitnessState {
        self.state
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn reserve(&self) -> &Reserve {
        &self.reserve
    }

    pub fn ledger(&self) -> &WitnessLedger {
        &self.ledger
    }

    pub fn witness_len(&self) -> usize {
        self.ledger.len()
    }

    pub fn pending_request(&self) -> Option<&RandomnessRequest> {
        self.pending.as_ref()
    }

    /// Id of the most recent request, pending or settled.
    pub fn last_request_id(&self) -> Option<RequestId> {
        self.pending
            .as_ref()
            .or(self.last_request.as_ref())
            .map(|r| r.id)
    }

    pub fn last_outcome(&self) -> Option<WeatherOutcome> {
        self.last_outcome
    }

    /// Evaluate the four upkeep conditions. Pure read; re-evaluated from
    /// scratch on every call.
    pub fn check_upkeep(&self, now: UnixSeconds) -> UpkeepCheck {
        let is_be_ready = self.state == WitnessState::BeReady;
        let in_noon_window = is_noon_window(now, self.config.timestamp_offset);
        let has_witness = !self.ledger.is_empty();
        let has_sufficient_reserve = self.reserve.has_sufficient_reserve();
        UpkeepCheck {
            upkeep_needed: is_be_ready && in_noon_window && has_witness && has_sufficient_reserve,
            is_be_ready,
            in_noon_window,
            has_witness,
            has_sufficient_reserve,
        }
    }

    // -- administrative switches ----------------------------------------------

    /// OPEN -> BE_READY: open the round for wagers.
    pub fn switch_be_ready(&mut self) -> Result<(), EngineError> {
        if self.state != WitnessState::Open {
            return Err(EngineError::ConditionNotMet);
        }
        self.state = WitnessState::BeReady;
        tracing::info!(state = %self.state, "witness state switched");
        Ok(())
    }

    /// BE_READY -> OPEN (halt wagering without settling) or CLOSE -> OPEN
    /// (reopen after a force-close).
    pub fn switch_open(&mut self) -> Result<(), EngineError> {
        match self.state {
            WitnessState::BeReady | WitnessState::Close => {
                self.state = WitnessState::Open;
                tracing::info!(state = %self.state, "witness state switched");
                Ok(())
            }
            _ => Err(EngineError::ConditionNotMet),
        }
    }

    /// External funding into the reserve.
    pub fn deposit(&mut self, currency: Currency, amount: u128) {
        self.reserve.credit(currency, amount);
        tracing::debug!(
            currency = %currency,
            amount,
            balance = self.reserve.balance(currency),
            "reserve deposit"
        );
    }

    // -- wager intake ---------------------------------------------------------

    /// Accept a wager. The stake enters the reserve immediately; the entry
    /// is immutable once recorded.
    pub fn witness(
        &mut self,
        participant: impl Into<String>,
        beneficiary: Option<String>,
        predicted_index: u8,
        currency: Currency,
        amount: u128,
        now: UnixSeconds,
    ) -> Result<Uuid, EngineError> {
        if self.state != WitnessState::BeReady {
            return Err(EngineError::NotAccepting { state: self.state });
        }
        if predicted_index >= WEATHER_TYPE_COUNT {
            return Err(EngineError::InvalidWeatherIndex {
                index: predicted_index,
            });
        }
        let limit_fee = self.reserve.limit_fee(currency);
        if amount <= limit_fee {
            return Err(EngineError::StakeTooLow { amount, limit_fee });
        }

        let participant = participant.into();
        let beneficiary = match beneficiary {
            Some(b) if !b.is_empty() => b,
            _ => participant.clone(),
        };
        let entry = WitnessEntry {
            id: Uuid::new_v4(),
            participant,
            beneficiary,
            predicted_index,
            currency,
            amount,
            accepted_at: now,
        };
        let entry_id = entry.id;
        self.reserve.credit(currency, amount);
        tracing::debug!(
            participant = %entry.participant,
            predicted_index,
            currency = %currency,
            amount,
            "witness recorded"
        );
        self.ledger.record(entry);
        Ok(entry_id)
    }

    // -- upkeep trigger -------------------------------------------------------

    /// Trigger the round's settlement: re-validate the four conditions,
    /// commit to CALCULATING, and issue the randomness request.
    ///
    /// The returned `PendingRequest` is what the oracle port submits. Once
    /// this returns Ok the round resolves only through `fulfill_randomness`
    /// or the force-close escape.
    pub fn perform_upkeep(&mut self, now: UnixSeconds) -> Result<PendingRequest, EngineError> {
        let check = self.check_upkeep(now);
        if !check.upkeep_needed {
            tracing::debug!(?check, "upkeep trigger rejected");
            return Err(EngineError::ConditionNotMet);
        }
        // A redundant trigger normally fails the state condition above; this
        // guard holds even if a restored snapshot left a request behind.
        if self.pending.is_some() {
            return Err(EngineError::AlreadyPending);
        }

        let id = derive_request_id(
            &self.config.key_hash,
            self.config.subscription_id,
            self.request_nonce,
        );
        self.request_nonce += 1;
        self.pending = Some(RandomnessRequest::new(id, now));
        self.state = WitnessState::Calculating;
        tracing::info!(
            request_id = %id,
            witnesses = self.ledger.len(),
            "upkeep performed, randomness requested"
        );
        Ok(PendingRequest {
            id,
            key_hash: self.config.key_hash.clone(),
            subscription_id: self.config.subscription_id,
            issued_at: now,
        })
    }

    // -- fulfillment & settlement ---------------------------------------------

    /// Inbound oracle callback: validate the request identifier, resolve the
    /// weather, settle every ledger entry, and return to BE_READY.
    ///
    /// All-or-nothing: solvency of the full payout set is verified against
    /// the reserve before the first debit, so a failure leaves the engine
    /// exactly as it was.
    pub fn fulfill_randomness(
        &mut self,
        request_id: RequestId,
        random_word: BigUint,
        now: UnixSeconds,
    ) -> Result<SettlementReport, EngineError> {
        match &self.pending {
            Some(request) if request.id == request_id => {}
            _ => {
                // Replay of the previous round's request is distinguishable
                // from a request that never existed.
                if let Some(last) = &self.last_request {
                    if last.id == request_id && last.fulfilled {
                        return Err(EngineError::AlreadyFulfilled { id: request_id });
                    }
                }
                return Err(EngineError::UnknownRequest { id: request_id });
            }
        }

        let outcome = resolve_weather(&random_word);

        // Dry-run the payouts against a copy of the reserve so a would-be
        // underflow rejects the whole settlement with no partial payout.
        let mut payouts = Vec::new();
        let mut trial_reserve = self.reserve.clone();
        let (mut total_native, mut total_eth) = (0u128, 0u128);
        let (mut retained_native, mut retained_eth) = (0u128, 0u128);
        for entry in self.ledger.entries() {
            if entry.predicted_index == outcome.index {
                let fee = self.reserve.limit_fee(entry.currency);
                let amount = entry.amount - fee; // intake guarantees amount > fee
                if !trial_reserve.debit(entry.currency, amount) {
                    return Err(EngineError::ReserveUnderflow {
                        currency: entry.currency,
                        amount,
                    });
                }
                match entry.currency {
                    Currency::Native => total_native += amount,
                    Currency::Eth => total_eth += amount,
                }
                payouts.push(Payout {
                    recipient: entry.beneficiary.clone(),
                    currency: entry.currency,
                    amount,
                    entry_id: entry.id,
                });
            } else {
                match entry.currency {
                    Currency::Native => retained_native += entry.amount,
                    Currency::Eth => retained_eth += entry.amount,
                }
            }
        }

        // Point of no return: commit the trial reserve and the fulfillment.
        let mut request = self.pending.take().expect("pending checked above");
        let accepted = request.mark_fulfilled(random_word);
        debug_assert!(accepted, "pending request is never pre-fulfilled");
        self.reserve = trial_reserve;
        self.ledger.clear();
        self.last_request = Some(request);
        self.last_outcome = Some(outcome);
        self.state = WitnessState::BeReady;

        tracing::info!(
            request_id = %request_id,
            weather = %outcome.weather,
            index = outcome.index,
            winners = payouts.len(),
            total_paid_native = total_native,
            total_paid_eth = total_eth,
            "witness weather settled"
        );

        Ok(SettlementReport {
            request_id,
            outcome,
            payouts,
            total_paid_native: total_native,
            total_paid_eth: total_eth,
            retained_native,
            retained_eth,
            settled_at: now,
        })
    }

    // -- liveness escape ------------------------------------------------------

    /// Administrative escape for a stuck or abandoned round: refund every
    /// stake in full, discard any outstanding request, and park in CLOSE.
    ///
    /// No fee is taken on a round the house failed to resolve. A late
    /// fulfillment for the discarded request is rejected as unknown.
    pub fn force_close(&mut self, now: UnixSeconds) -> Result<RefundReport, EngineError> {
        if !matches!(self.state, WitnessState::BeReady | WitnessState::Calculating) {
            return Err(EngineError::ConditionNotMet);
        }

        let mut refunds = Vec::new();
        let mut trial_reserve = self.reserve.clone();
        for entry in self.ledger.entries() {
            if !trial_reserve.debit(entry.currency, entry.amount) {
                return Err(EngineError::ReserveUnderflow {
                    currency: entry.currency,
                    amount: entry.amount,
                });
            }
            refunds.push(Payout {
                recipient: entry.participant.clone(),
                currency: entry.currency,
                amount: entry.amount,
                entry_id: entry.id,
            });
        }

        let discarded_request = self.pending.take().map(|r| r.id);
        self.reserve = trial_reserve;
        self.ledger.clear();
        self.state = WitnessState::Close;

        tracing::warn!(
            refunds = refunds.len(),
            discarded_request = ?discarded_request.map(|id| id.to_hex()),
            "round force-closed"
        );

        Ok(RefundReport {
            refunds,
            discarded_request,
            closed_at: now,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOON: UnixSeconds = 1_700_006_400 + 12 * 3600; // 12:00:00 of a UTC day
    const MORNING: UnixSeconds = 1_700_006_400 + 9 * 3600;

    fn test_engine() -> WitnessWeatherEngine {
        let config = EngineConfig {
            timestamp_offset: 0,
            key_hash: KeyHash::from_hex(
                "0xd89b2bf150e3b9e13446986e571fb9cab24b13cea0a43ea20a6049a85cc807cc",
            )
            .unwrap(),
            subscription_id: 1,
        };
        let mut engine = WitnessWeatherEngine::new(config, Reserve::new(50, 10));
        engine.deposit(Currency::Native, 1_000);
        engine.deposit(Currency::Eth, 1_000);
        engine
    }

    #[test]
    fn test_initial_state_is_open() {
        let engine = test_engine();
        assert_eq!(engine.state(), WitnessState::Open);
        assert!(engine.last_outcome().is_none());
        assert!(engine.last_request_id().is_none());
    }

    #[test]
    fn test_switch_transitions() {
        let mut engine = test_engine();
        engine.switch_be_ready().unwrap();
        assert_eq!(engine.state(), WitnessState::BeReady);

        // BE_READY -> BE_READY is not a transition.
        assert_eq!(engine.switch_be_ready(), Err(EngineError::ConditionNotMet));

        engine.switch_open().unwrap();
        assert_eq!(engine.state(), WitnessState::Open);
        assert_eq!(engine.switch_open(), Err(EngineError::ConditionNotMet));
    }

    #[test]
    fn test_witness_requires_be_ready() {
        let mut engine = test_engine();
        let err = engine
            .witness("alice", None, 4, Currency::Native, 500, MORNING)
            .unwrap_err();
        assert_eq!(err, EngineError::NotAccepting { state: WitnessState::Open });

        engine.switch_be_ready().unwrap();
        engine
            .witness("alice", None, 4, Currency::Native, 500, MORNING)
            .unwrap();
        assert_eq!(engine.witness_len(), 1);
    }

    #[test]
    fn test_witness_validation() {
        let mut engine = test_engine();
        engine.switch_be_ready().unwrap();

        assert_eq!(
            engine.witness("a", None, 19, Currency::Native, 500, MORNING),
            Err(EngineError::InvalidWeatherIndex { index: 19 })
        );
        // Stake must strictly exceed the limit fee (native fee is 50).
        assert_eq!(
            engine.witness("a", None, 4, Currency::Native, 50, MORNING),
            Err(EngineError::StakeTooLow { amount: 50, limit_fee: 50 })
        );
        // Rejections left nothing behind.
        assert_eq!(engine.witness_len(), 0);
        assert_eq!(engine.reserve().balance(Currency::Native), 1_000);
    }

    #[test]
    fn test_stake_enters_reserve() {
        let mut engine = test_engine();
        engine.switch_be_ready().unwrap();
        engine
            .witness("alice", None, 4, Currency::Eth, 400, MORNING)
            .unwrap();
        assert_eq!(engine.reserve().balance(Currency::Eth), 1_400);
    }

    #[test]
    fn test_beneficiary_defaults_to_participant() {
        let mut engine = test_engine();
        engine.switch_be_ready().unwrap();
        engine
            .witness("alice", Some(String::new()), 4, Currency::Native, 500, MORNING)
            .unwrap();
        engine
            .witness("bob", Some("carol".to_string()), 4, Currency::Native, 500, MORNING)
            .unwrap();
        let entries = engine.ledger().entries();
        assert_eq!(entries[0].beneficiary, "alice");
        assert_eq!(entries[1].beneficiary, "carol");
    }

    #[test]
    fn test_snapshot_roundtrip() {
        let mut engine = test_engine();
        engine.switch_be_ready().unwrap();
        engine
            .witness("alice", None, 4, Currency::Native, 500, MORNING)
            .unwrap();
        engine.perform_upkeep(NOON).unwrap();

        let snapshot = engine.snapshot();
        let restored =
            WitnessWeatherEngine::from_snapshot(engine.config().clone(), snapshot.clone());
        assert_eq!(restored.snapshot(), snapshot);
        assert_eq!(restored.state(), WitnessState::Calculating);
        assert_eq!(restored.last_request_id(), engine.last_request_id());
    }
}
