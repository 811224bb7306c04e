//! Randomness Request Bookkeeping
//!
//! The engine-side half of the verifiable-randomness protocol: opaque
//! request handles, the single-outstanding-request record, and the
//! derivation that ties a handle to the deployment's key material.
//!
//! The request identifier is the only valid key for mutation: a fulfillment
//! must present the pending request's id or it is rejected before any
//! custody action. Fulfillment mutates the record exactly once.

use crate::engine::clock::UnixSeconds;
use num_bigint::BigUint;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Key-material identifier for the randomness service (the VRF key hash).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyHash(pub [u8; 32]);

impl KeyHash {
    /// Parse from hex, with or without a 0x prefix.
    pub fn from_hex(s: &str) -> Option<KeyHash> {
        let s = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(s).ok()?;
        let arr: [u8; 32] = bytes.try_into().ok()?;
        Some(KeyHash(arr))
    }
}

impl fmt::Display for KeyHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

/// Opaque handle for one randomness request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(pub [u8; 32]);

impl RequestId {
    pub fn from_hex(s: &str) -> Option<RequestId> {
        let s = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(s).ok()?;
        let arr: [u8; 32] = bytes.try_into().ok()?;
        Some(RequestId(arr))
    }

    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Derive the handle for the next request from the deployment key material
/// and a per-engine nonce. Deterministic: the same (key, subscription,
/// nonce) triple always yields the same handle, so a restored engine
/// re-derives the id of its in-flight request.
pub fn derive_request_id(key_hash: &KeyHash, subscription_id: u64, nonce: u64) -> RequestId {
    let mut hasher = Sha256::new();
    hasher.update(key_hash.0);
    hasher.update(subscription_id.to_be_bytes());
    hasher.update(nonce.to_be_bytes());
    RequestId(hasher.finalize().into())
}

/// What the oracle port needs to submit a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingRequest {
    pub id: RequestId,
    pub key_hash: KeyHash,
    pub subscription_id: u64,
    pub issued_at: UnixSeconds,
}

/// The round's randomness request. At most one exists at a time; it is
/// never reused across rounds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RandomnessRequest {
    pub id: RequestId,
    pub issued_at: UnixSeconds,
    pub fulfilled: bool,
    pub result: Option<BigUint>,
}

impl RandomnessRequest {
    pub fn new(id: RequestId, issued_at: UnixSeconds) -> Self {
        Self {
            id,
            issued_at,
            fulfilled: false,
            result: None,
        }
    }

    /// Record the oracle's answer. Single-shot: returns false if the
    /// request was already fulfilled, leaving the stored result untouched.
    #[must_use]
    pub fn mark_fulfilled(&mut self, word: BigUint) -> bool {
        if self.fulfilled {
            return false;
        }
        self.fulfilled = true;
        self.result = Some(word);
        true
    }
}
