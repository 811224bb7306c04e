//! Witness Service
//!
//! Serialization point for the settlement engine. The engine itself is
//! synchronous and lock-free; this layer holds it behind an async mutex,
//! mirrors every accepted mutation to the durable store, and owns the
//! oracle port. Every state-changing entry point - wager intake, the upkeep
//! trigger, the fulfillment callback, administration - runs to completion
//! under the lock, so two settlement cycles can never interleave.

use crate::engine::clock::Clock;
use crate::engine::ledger::Currency;
use crate::engine::randomness::RequestId;
use crate::engine::reserve::Reserve;
use crate::engine::settlement::{
    EngineConfig, EngineError, RefundReport, SettlementReport, UpkeepCheck, WitnessState,
    WitnessWeatherEngine,
};
use crate::engine::weather::WeatherOutcome;
use crate::oracle::RandomnessPort;
use crate::storage::EngineStore;
use num_bigint::BigUint;
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Service error types: engine rejections keep their taxonomy (the API maps
/// them to status codes); storage failures are operational.
#[derive(Debug)]
pub enum ServiceError {
    Engine(EngineError),
    Storage(anyhow::Error),
}

impl fmt::Display for ServiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Engine(e) => write!(f, "{}", e),
            Self::Storage(e) => write!(f, "Storage failure: {}", e),
        }
    }
}

impl std::error::Error for ServiceError {}

impl From<EngineError> for ServiceError {
    fn from(e: EngineError) -> Self {
        Self::Engine(e)
    }
}

impl From<anyhow::Error> for ServiceError {
    fn from(e: anyhow::Error) -> Self {
        Self::Storage(e)
    }
}

#[derive(Clone)]
pub struct WitnessService {
    engine: Arc<Mutex<WitnessWeatherEngine>>,
    store: EngineStore,
    oracle: Arc<dyn RandomnessPort>,
    clock: Arc<dyn Clock>,
}

impl WitnessService {
    pub fn new(
        engine: WitnessWeatherEngine,
        store: EngineStore,
        oracle: Arc<dyn RandomnessPort>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            engine: Arc::new(Mutex::new(engine)),
            store,
            oracle,
            clock,
        }
    }

    /// Build the engine from the store's last checkpoint, or fresh if the
    /// store is empty.
    pub async fn restore_or_new(
        config: EngineConfig,
        reserve: Reserve,
        store: EngineStore,
        oracle: Arc<dyn RandomnessPort>,
        clock: Arc<dyn Clock>,
    ) -> anyhow::Result<Self> {
        let engine = match store.load().await? {
            Some(snapshot) => {
                tracing::info!(
                    state = %snapshot.state,
                    witnesses = snapshot.entries.len(),
                    "engine restored from checkpoint"
                );
                WitnessWeatherEngine::from_snapshot(config, snapshot)
            }
            None => WitnessWeatherEngine::new(config, reserve),
        };
        Ok(Self::new(engine, store, oracle, clock))
    }

    pub fn store(&self) -> &EngineStore {
        &self.store
    }

    // -- read interface -------------------------------------------------------

    pub async fn state(&self) -> WitnessState {
        self.engine.lock().await.state()
    }

    pub async fn check_upkeep(&self) -> UpkeepCheck {
        let now = self.clock.now();
        self.engine.lock().await.check_upkeep(now)
    }

    pub async fn last_outcome(&self) -> Option<WeatherOutcome> {
        self.engine.lock().await.last_outcome()
    }

    pub async fn last_request_id(&self) -> Option<RequestId> {
        self.engine.lock().await.last_request_id()
    }

    /// Is a randomness request outstanding?
    pub async fn check_pending(&self) -> bool {
        self.engine.lock().await.pending_request().is_some()
    }

    pub async fn witness_len(&self) -> usize {
        self.engine.lock().await.witness_len()
    }

    pub async fn reserve(&self) -> Reserve {
        self.engine.lock().await.reserve().clone()
    }

    // -- mutations ------------------------------------------------------------

    pub async fn witness(
        &self,
        participant: String,
        beneficiary: Option<String>,
        predicted_index: u8,
        currency: Currency,
        amount: u128,
    ) -> Result<Uuid, ServiceError> {
        let now = self.clock.now();
        let mut engine = self.engine.lock().await;
        let entry_id = engine.witness(
            participant,
            beneficiary,
            predicted_index,
            currency,
            amount,
            now,
        )?;
        self.store.checkpoint(&engine.snapshot(), now).await?;
        Ok(entry_id)
    }

    pub async fn deposit(&self, currency: Currency, amount: u128) -> Result<(), ServiceError> {
        let now = self.clock.now();
        let mut engine = self.engine.lock().await;
        engine.deposit(currency, amount);
        self.store.checkpoint(&engine.snapshot(), now).await?;
        Ok(())
    }

    pub async fn switch_be_ready(&self) -> Result<(), ServiceError> {
        let now = self.clock.now();
        let mut engine = self.engine.lock().await;
        engine.switch_be_ready()?;
        self.store.checkpoint(&engine.snapshot(), now).await?;
        Ok(())
    }

    pub async fn switch_open(&self) -> Result<(), ServiceError> {
        let now = self.clock.now();
        let mut engine = self.engine.lock().await;
        engine.switch_open()?;
        self.store.checkpoint(&engine.snapshot(), now).await?;
        Ok(())
    }

    /// Trigger settlement: validate, commit, checkpoint, then hand the
    /// request to the oracle port. The checkpoint lands before submission so
    /// a crash between the two recovers a round that is already committed.
    /// A failed submission does not roll the round back - the request
    /// exists, and delivery is an operations concern (or the force-close
    /// escape).
    pub async fn perform_upkeep(&self) -> Result<RequestId, ServiceError> {
        let now = self.clock.now();
        let mut engine = self.engine.lock().await;
        let pending = engine.perform_upkeep(now)?;
        self.store.checkpoint(&engine.snapshot(), now).await?;

        if let Err(e) = self.oracle.request_randomness(&pending).await {
            tracing::error!(
                request_id = %pending.id,
                error = %e,
                "oracle submission failed; round stays committed"
            );
        }
        Ok(pending.id)
    }

    /// Inbound fulfillment callback: settle, then commit the settlement
    /// record, the post-settlement snapshot, and winner credits atomically.
    pub async fn fulfill(
        &self,
        request_id: RequestId,
        random_word: BigUint,
    ) -> Result<SettlementReport, ServiceError> {
        let now = self.clock.now();
        let mut engine = self.engine.lock().await;
        let report = engine.fulfill_randomness(request_id, random_word, now)?;
        self.store
            .record_settlement(&engine.snapshot(), &report, now)
            .await?;
        Ok(report)
    }

    pub async fn force_close(&self) -> Result<RefundReport, ServiceError> {
        let now = self.clock.now();
        let mut engine = self.engine.lock().await;
        let report = engine.force_close(now)?;
        self.store
            .record_refunds(&engine.snapshot(), &report.refunds, now)
            .await?;
        Ok(report)
    }
}
