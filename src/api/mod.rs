//! HTTP Surface
//!
//! Read getters, wager intake, the keeper endpoints, the oracle fulfillment
//! callback, and token-gated administration.

pub mod routes;

pub use routes::{router, AppState};
