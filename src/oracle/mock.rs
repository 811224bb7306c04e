//! Mock VRF Coordinator
//!
//! Dev-mode stand-in for the external randomness service: accepts a request,
//! waits a configured delay, draws a 256-bit word from a seeded ChaCha
//! stream, and delivers the fulfillment over a channel that the service's
//! fulfillment loop drains. Duplicate-delivery and unknown-id defense lives
//! in the engine, not here - the mock deliberately delivers whatever it was
//! asked to, like the real coordinator would.

use crate::engine::randomness::PendingRequest;
use crate::oracle::{Fulfillment, OracleError, RandomnessPort};
use async_trait::async_trait;
use num_bigint::BigUint;
use parking_lot::Mutex;
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

pub struct MockVrfCoordinator {
    tx: mpsc::Sender<Fulfillment>,
    fulfill_delay: Duration,
    rng: Mutex<ChaCha20Rng>,
}

impl MockVrfCoordinator {
    /// Returns the coordinator and the receiving end of its fulfillment
    /// channel. A fixed seed makes every drawn word reproducible.
    pub fn new(seed: u64, fulfill_delay: Duration) -> (Arc<Self>, mpsc::Receiver<Fulfillment>) {
        let (tx, rx) = mpsc::channel(16);
        let coordinator = Arc::new(Self {
            tx,
            fulfill_delay,
            rng: Mutex::new(ChaCha20Rng::seed_from_u64(seed)),
        });
        (coordinator, rx)
    }

    fn draw_word(&self) -> BigUint {
        let mut bytes = [0u8; 32];
        self.rng.lock().fill_bytes(&mut bytes);
        BigUint::from_bytes_be(&bytes)
    }
}

#[async_trait]
impl RandomnessPort for MockVrfCoordinator {
    async fn request_randomness(&self, request: &PendingRequest) -> Result<(), OracleError> {
        let fulfillment = Fulfillment {
            request_id: request.id,
            random_word: self.draw_word(),
        };
        let tx = self.tx.clone();
        let delay = self.fulfill_delay;
        tracing::debug!(
            request_id = %request.id,
            delay_ms = delay.as_millis() as u64,
            "mock coordinator accepted randomness request"
        );
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if tx.send(fulfillment).await.is_err() {
                tracing::warn!("fulfillment receiver dropped; mock delivery lost");
            }
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::randomness::{derive_request_id, KeyHash};

    fn pending(nonce: u64) -> PendingRequest {
        let key_hash = KeyHash::from_hex(
            "0xd89b2bf150e3b9e13446986e571fb9cab24b13cea0a43ea20a6049a85cc807cc",
        )
        .unwrap();
        PendingRequest {
            id: derive_request_id(&key_hash, 1, nonce),
            key_hash,
            subscription_id: 1,
            issued_at: 1_700_000_000,
        }
    }

    #[tokio::test]
    async fn test_delivers_fulfillment_for_submitted_request() {
        let (coordinator, mut rx) = MockVrfCoordinator::new(7, Duration::from_millis(5));
        let request = pending(0);
        coordinator.request_randomness(&request).await.unwrap();

        let fulfillment = rx.recv().await.unwrap();
        assert_eq!(fulfillment.request_id, request.id);
    }

    #[tokio::test]
    async fn test_same_seed_same_words() {
        let (a, mut rx_a) = MockVrfCoordinator::new(42, Duration::from_millis(1));
        let (b, mut rx_b) = MockVrfCoordinator::new(42, Duration::from_millis(1));

        a.request_randomness(&pending(0)).await.unwrap();
        b.request_randomness(&pending(0)).await.unwrap();

        let word_a = rx_a.recv().await.unwrap().random_word;
        let word_b = rx_b.recv().await.unwrap().random_word;
        assert_eq!(word_a, word_b);
    }

    #[tokio::test]
    async fn test_successive_draws_differ() {
        let (coordinator, mut rx) = MockVrfCoordinator::new(42, Duration::from_millis(1));
        coordinator.request_randomness(&pending(0)).await.unwrap();
        coordinator.request_randomness(&pending(1)).await.unwrap();

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_ne!(first.random_word, second.random_word);
    }
}
