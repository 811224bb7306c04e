//! Service Configuration
//!
//! Environment-driven, with the defaults the game shipped with: a UTC-5
//! deployment offset, a 0.05-ether native limit fee and a 0.01-ether token
//! limit fee.

use crate::engine::randomness::KeyHash;
use anyhow::{anyhow, Result};

/// Default randomness-service key material.
const DEFAULT_KEY_HASH: &str =
    "0xd89b2bf150e3b9e13446986e571fb9cab24b13cea0a43ea20a6049a85cc807cc";

#[derive(Debug, Clone)]
pub enum OracleMode {
    /// In-process mock coordinator with a configurable fulfillment delay.
    Mock,
    /// Fulfillments arrive only through the HTTP callback.
    Callback,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: String,
    pub port: u16,
    /// Signed correction applied before the noon-window test.
    pub timestamp_offset: i64,
    pub native_limit_fee: u128,
    pub eth_limit_fee: u128,
    pub key_hash: KeyHash,
    pub subscription_id: u64,
    pub keeper_poll_secs: u64,
    pub oracle_mode: OracleMode,
    pub mock_fulfill_delay_ms: u64,
    pub mock_seed: u64,
    pub admin_token: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        let database_path = std::env::var("DATABASE_PATH")
            .unwrap_or_else(|_| "./witness_weather.db".to_string());

        let port = std::env::var("PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse()
            .unwrap_or(3000);

        let timestamp_offset = std::env::var("TIMESTAMP_OFFSET")
            .unwrap_or_else(|_| "-18000".to_string())
            .parse()
            .unwrap_or(-18000);

        let native_limit_fee = std::env::var("NATIVE_LIMIT_FEE")
            .unwrap_or_else(|_| "50000000000000000".to_string())
            .parse()
            .unwrap_or(50_000_000_000_000_000);

        let eth_limit_fee = std::env::var("ETH_LIMIT_FEE")
            .unwrap_or_else(|_| "10000000000000000".to_string())
            .parse()
            .unwrap_or(10_000_000_000_000_000);

        let key_hash_raw =
            std::env::var("KEY_HASH").unwrap_or_else(|_| DEFAULT_KEY_HASH.to_string());
        let key_hash = KeyHash::from_hex(&key_hash_raw)
            .ok_or_else(|| anyhow!("KEY_HASH is not a 32-byte hex string: {}", key_hash_raw))?;

        let subscription_id = std::env::var("SUBSCRIPTION_ID")
            .unwrap_or_else(|_| "1".to_string())
            .parse()
            .unwrap_or(1);

        let keeper_poll_secs = std::env::var("KEEPER_POLL_SECS")
            .unwrap_or_else(|_| "15".to_string())
            .parse()
            .unwrap_or(15);

        let oracle_mode = match std::env::var("ORACLE_MODE")
            .unwrap_or_else(|_| "mock".to_string())
            .as_str()
        {
            "callback" => OracleMode::Callback,
            _ => OracleMode::Mock,
        };

        let mock_fulfill_delay_ms = std::env::var("MOCK_FULFILL_DELAY_MS")
            .unwrap_or_else(|_| "2000".to_string())
            .parse()
            .unwrap_or(2000);

        let mock_seed = std::env::var("MOCK_SEED")
            .unwrap_or_else(|_| "0".to_string())
            .parse()
            .unwrap_or(0);

        let admin_token = std::env::var("ADMIN_TOKEN").ok().filter(|t| !t.is_empty());

        Ok(Self {
            database_path,
            port,
            timestamp_offset,
            native_limit_fee,
            eth_limit_fee,
            key_hash,
            subscription_id,
            keeper_poll_secs,
            oracle_mode,
            mock_fulfill_delay_ms,
            mock_seed,
            admin_token,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_key_hash_parses() {
        assert!(KeyHash::from_hex(DEFAULT_KEY_HASH).is_some());
    }
}
