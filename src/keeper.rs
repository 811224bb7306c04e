//! Keeper & Fulfillment Loops
//!
//! The keeper is deliberately dumb: it polls the cheap read-only upkeep
//! check on an interval and invokes the trigger when the check says so. The
//! trigger re-validates everything itself, so a redundant or stale poll
//! costs a `ConditionNotMet` and nothing else. Any external automation can
//! do the same job through the HTTP surface; this loop just makes a single
//! deployment self-contained.

use crate::engine::settlement::EngineError;
use crate::oracle::Fulfillment;
use crate::service::{ServiceError, WitnessService};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, error, info, warn};

/// Poll the upkeep check every `poll_secs`, triggering when due.
pub fn spawn_keeper(service: WitnessService, poll_secs: u64) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(poll_secs, "keeper loop started");
        let mut ticker = interval(Duration::from_secs(poll_secs.max(1)));
        loop {
            ticker.tick().await;
            let check = service.check_upkeep().await;
            if !check.upkeep_needed {
                debug!(?check, "upkeep not needed");
                continue;
            }
            match service.perform_upkeep().await {
                Ok(request_id) => {
                    info!(request_id = %request_id, "keeper triggered upkeep");
                }
                // Another trigger won the race between check and perform.
                Err(ServiceError::Engine(EngineError::ConditionNotMet)) => {
                    debug!("upkeep already performed");
                }
                Err(e) => warn!(error = %e, "keeper trigger failed"),
            }
        }
    })
}

/// Drain oracle fulfillments into the engine's callback entry point.
pub fn spawn_fulfillment_loop(
    service: WitnessService,
    mut rx: mpsc::Receiver<Fulfillment>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(fulfillment) = rx.recv().await {
            match service
                .fulfill(fulfillment.request_id, fulfillment.random_word)
                .await
            {
                Ok(report) => {
                    info!(
                        request_id = %report.request_id,
                        weather = %report.outcome.weather,
                        winners = report.payouts.len(),
                        "fulfillment settled"
                    );
                }
                // Unknown or replayed ids are rejected by design.
                Err(ServiceError::Engine(e)) => {
                    warn!(request_id = %fulfillment.request_id, error = %e, "fulfillment rejected");
                }
                Err(e) => {
                    error!(request_id = %fulfillment.request_id, error = %e, "fulfillment failed");
                }
            }
        }
        info!("fulfillment channel closed");
    })
}
