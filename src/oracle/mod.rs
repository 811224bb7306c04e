//! Randomness Oracle Port
//!
//! The outbound half of the verifiable-randomness protocol. The engine only
//! ever *submits* requests through this port; fulfillments always come back
//! through the service's callback entry point, which validates the request
//! identifier before any custody action. The port has no authority to settle
//! anything.

pub mod mock;

use crate::engine::randomness::{PendingRequest, RequestId};
use async_trait::async_trait;
use num_bigint::BigUint;
use std::fmt;

pub use mock::MockVrfCoordinator;

/// An oracle answer on its way to the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fulfillment {
    pub request_id: RequestId,
    pub random_word: BigUint,
}

/// Oracle submission error types.
#[derive(Debug, Clone)]
pub enum OracleError {
    /// The request could not be handed to the randomness service. The round
    /// stays committed; delivery is retried by operations, not the engine.
    SubmissionFailed(String),
}

impl fmt::Display for OracleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SubmissionFailed(msg) => write!(f, "Randomness submission failed: {}", msg),
        }
    }
}

impl std::error::Error for OracleError {}

/// Client to an external verifiable-randomness service.
#[async_trait]
pub trait RandomnessPort: Send + Sync {
    /// Submit one request. Exactly one asynchronous fulfillment is expected
    /// per accepted submission, possibly never (oracle liveness is not this
    /// crate's to guarantee).
    async fn request_randomness(&self, request: &PendingRequest) -> Result<(), OracleError>;
}

/// Production stance: submission is handled by external infrastructure that
/// watches engine state; fulfillments arrive via the HTTP callback. The
/// port just records that a request went out.
#[derive(Debug, Clone, Copy, Default)]
pub struct CallbackOnly;

#[async_trait]
impl RandomnessPort for CallbackOnly {
    async fn request_randomness(&self, request: &PendingRequest) -> Result<(), OracleError> {
        tracing::info!(
            request_id = %request.id,
            subscription_id = request.subscription_id,
            "randomness request awaiting external fulfillment"
        );
        Ok(())
    }
}
