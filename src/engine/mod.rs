//! Weather-Resolution & Witness-Settlement Engine
//!
//! The synchronous core of the game: round state, the witness ledger, the
//! custodied reserve, the noon settlement window, weather derivation, and
//! randomness-request bookkeeping. Everything here is deterministic and
//! lock-free; the service layer serializes access and owns the async seams
//! (oracle port, storage, API).

pub mod clock;
pub mod ledger;
pub mod noon_gate;
pub mod randomness;
pub mod reserve;
pub mod settlement;
pub mod weather;


pub use clock::{Clock, ManualClock, SystemClock, UnixSeconds};
pub use ledger::{Currency, WitnessEntry, WitnessLedger};
pub use noon_gate::is_noon_window;
pub use randomness::{
    derive_request_id, KeyHash, PendingRequest, RandomnessRequest, RequestId,
};
pub use reserve::Reserve;
pub use settlement::{
    EngineConfig, EngineError, EngineSnapshot, Payout, RefundReport, SettlementReport,
    UpkeepCheck, WitnessState, WitnessWeatherEngine,
};
pub use weather::{resolve_weather, WeatherOutcome, WeatherType, WEATHER_TYPE_COUNT};
