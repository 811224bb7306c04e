//! API Routes
//!
//! Thin handlers over the witness service. Amounts cross the wire as
//! decimal strings (wei values overflow JSON numbers); random words are
//! accepted in decimal or 0x-hex. Engine rejections map onto status codes;
//! the response body always carries the engine's own error message.

use crate::engine::ledger::Currency;
use crate::engine::randomness::RequestId;
use crate::engine::settlement::EngineError;
use crate::service::{ServiceError, WitnessService};
use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::Json,
    routing::{get, post},
    Router,
};
use num_bigint::BigUint;
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub service: WitnessService,
    pub admin_token: Option<String>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/state", get(get_state))
        .route("/api/weather", get(get_weather))
        .route("/api/request", get(get_request))
        .route("/api/witnesses", get(get_witnesses))
        .route("/api/reserve", get(get_reserve))
        .route("/api/upkeep", get(get_upkeep).post(post_upkeep))
        .route("/api/witness", post(post_witness))
        .route("/api/oracle/fulfill", post(post_fulfill))
        .route("/api/admin/be-ready", post(post_admin_be_ready))
        .route("/api/admin/open", post(post_admin_open))
        .route("/api/admin/force-close", post(post_admin_force_close))
        .route("/api/admin/deposit", post(post_admin_deposit))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// =============================================================================
// RESPONSES
// =============================================================================

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug, Serialize)]
pub struct StateResponse {
    pub state: String,
}

#[derive(Debug, Serialize)]
pub struct WeatherResponse {
    pub index: Option<u8>,
    pub weather: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RequestResponse {
    pub request_id: Option<String>,
    pub pending: bool,
}

#[derive(Debug, Serialize)]
pub struct WitnessCountResponse {
    pub count: usize,
}

#[derive(Debug, Serialize)]
pub struct ReserveResponse {
    pub native_balance: String,
    pub eth_balance: String,
    pub native_limit_fee: String,
    pub eth_limit_fee: String,
}

#[derive(Debug, Serialize)]
pub struct WitnessAccepted {
    pub entry_id: String,
}

#[derive(Debug, Serialize)]
pub struct UpkeepPerformed {
    pub request_id: String,
}

#[derive(Debug, Serialize)]
pub struct SettlementResponse {
    pub request_id: String,
    pub index: u8,
    pub weather: String,
    pub winners: usize,
    pub total_paid_native: String,
    pub total_paid_eth: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn reject(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}

fn map_service_error(e: ServiceError) -> ApiError {
    let status = match &e {
        ServiceError::Engine(engine) => match engine {
            EngineError::NotAccepting { .. }
            | EngineError::ConditionNotMet
            | EngineError::AlreadyPending
            | EngineError::AlreadyFulfilled { .. } => StatusCode::CONFLICT,
            EngineError::UnknownRequest { .. } => StatusCode::NOT_FOUND,
            EngineError::InvalidWeatherIndex { .. } | EngineError::StakeTooLow { .. } => {
                StatusCode::BAD_REQUEST
            }
            EngineError::InsufficientReserve | EngineError::ReserveUnderflow { .. } => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
        },
        ServiceError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    reject(status, e.to_string())
}

// =============================================================================
// READ HANDLERS
// =============================================================================

async fn health() -> &'static str {
    "ok"
}

async fn get_state(State(state): State<AppState>) -> Json<StateResponse> {
    Json(StateResponse {
        state: state.service.state().await.to_string(),
    })
}

async fn get_weather(State(state): State<AppState>) -> Json<WeatherResponse> {
    let outcome = state.service.last_outcome().await;
    Json(WeatherResponse {
        index: outcome.map(|o| o.index),
        weather: outcome.map(|o| o.weather.label().to_string()),
    })
}

async fn get_request(State(state): State<AppState>) -> Json<RequestResponse> {
    let service = &state.service;
    let request_id = service.last_request_id().await;
    let pending = service.check_pending().await;
    Json(RequestResponse {
        request_id: request_id.map(|id| id.to_hex()),
        pending,
    })
}

async fn get_witnesses(State(state): State<AppState>) -> Json<WitnessCountResponse> {
    Json(WitnessCountResponse {
        count: state.service.witness_len().await,
    })
}

async fn get_reserve(State(state): State<AppState>) -> Json<ReserveResponse> {
    let reserve = state.service.reserve().await;
    Json(ReserveResponse {
        native_balance: reserve.native_balance.to_string(),
        eth_balance: reserve.eth_balance.to_string(),
        native_limit_fee: reserve.native_limit_fee.to_string(),
        eth_limit_fee: reserve.eth_limit_fee.to_string(),
    })
}

async fn get_upkeep(
    State(state): State<AppState>,
) -> Json<crate::engine::settlement::UpkeepCheck> {
    Json(state.service.check_upkeep().await)
}

// =============================================================================
// WRITE HANDLERS
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct WitnessRequest {
    pub participant: String,
    pub predicted_index: u8,
    /// Optional identity winnings are directed to.
    pub beneficiary: Option<String>,
    pub currency: String,
    /// Stake in wei, decimal string.
    pub amount: String,
}

async fn post_witness(
    State(state): State<AppState>,
    Json(req): Json<WitnessRequest>,
) -> Result<Json<WitnessAccepted>, ApiError> {
    let currency = parse_currency(&req.currency)?;
    let amount = parse_amount(&req.amount)?;
    let entry_id = state
        .service
        .witness(
            req.participant,
            req.beneficiary,
            req.predicted_index,
            currency,
            amount,
        )
        .await
        .map_err(map_service_error)?;
    Ok(Json(WitnessAccepted {
        entry_id: entry_id.to_string(),
    }))
}

async fn post_upkeep(
    State(state): State<AppState>,
) -> Result<Json<UpkeepPerformed>, ApiError> {
    let request_id = state
        .service
        .perform_upkeep()
        .await
        .map_err(map_service_error)?;
    Ok(Json(UpkeepPerformed {
        request_id: request_id.to_hex(),
    }))
}

#[derive(Debug, Deserialize)]
pub struct FulfillRequest {
    pub request_id: String,
    /// Random words, decimal or 0x-hex; the first word resolves the round.
    pub random_words: Vec<String>,
}

async fn post_fulfill(
    State(state): State<AppState>,
    Json(req): Json<FulfillRequest>,
) -> Result<Json<SettlementResponse>, ApiError> {
    let request_id = RequestId::from_hex(&req.request_id)
        .ok_or_else(|| reject(StatusCode::BAD_REQUEST, "malformed request_id"))?;
    let word = req
        .random_words
        .first()
        .ok_or_else(|| reject(StatusCode::BAD_REQUEST, "random_words is empty"))?;
    let word = parse_word(word)?;

    let report = state
        .service
        .fulfill(request_id, word)
        .await
        .map_err(map_service_error)?;
    Ok(Json(SettlementResponse {
        request_id: report.request_id.to_hex(),
        index: report.outcome.index,
        weather: report.outcome.weather.label().to_string(),
        winners: report.payouts.len(),
        total_paid_native: report.total_paid_native.to_string(),
        total_paid_eth: report.total_paid_eth.to_string(),
    }))
}

// =============================================================================
// ADMIN HANDLERS
// =============================================================================

fn require_admin(state: &AppState, headers: &HeaderMap) -> Result<(), ApiError> {
    let Some(expected) = &state.admin_token else {
        return Err(reject(StatusCode::FORBIDDEN, "admin interface disabled"));
    };
    let presented = headers
        .get("x-admin-token")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if presented != expected {
        return Err(reject(StatusCode::UNAUTHORIZED, "bad admin token"));
    }
    Ok(())
}

async fn post_admin_be_ready(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<StateResponse>, ApiError> {
    require_admin(&state, &headers)?;
    state
        .service
        .switch_be_ready()
        .await
        .map_err(map_service_error)?;
    Ok(Json(StateResponse {
        state: state.service.state().await.to_string(),
    }))
}

async fn post_admin_open(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<StateResponse>, ApiError> {
    require_admin(&state, &headers)?;
    state
        .service
        .switch_open()
        .await
        .map_err(map_service_error)?;
    Ok(Json(StateResponse {
        state: state.service.state().await.to_string(),
    }))
}

#[derive(Debug, Serialize)]
pub struct ForceCloseResponse {
    pub refunds: usize,
    pub discarded_request: Option<String>,
}

async fn post_admin_force_close(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<ForceCloseResponse>, ApiError> {
    require_admin(&state, &headers)?;
    let report = state
        .service
        .force_close()
        .await
        .map_err(map_service_error)?;
    Ok(Json(ForceCloseResponse {
        refunds: report.refunds.len(),
        discarded_request: report.discarded_request.map(|id| id.to_hex()),
    }))
}

#[derive(Debug, Deserialize)]
pub struct DepositRequest {
    pub currency: String,
    pub amount: String,
}

async fn post_admin_deposit(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<DepositRequest>,
) -> Result<Json<ReserveResponse>, ApiError> {
    require_admin(&state, &headers)?;
    let currency = parse_currency(&req.currency)?;
    let amount = parse_amount(&req.amount)?;
    state
        .service
        .deposit(currency, amount)
        .await
        .map_err(map_service_error)?;
    let reserve = state.service.reserve().await;
    Ok(Json(ReserveResponse {
        native_balance: reserve.native_balance.to_string(),
        eth_balance: reserve.eth_balance.to_string(),
        native_limit_fee: reserve.native_limit_fee.to_string(),
        eth_limit_fee: reserve.eth_limit_fee.to_string(),
    }))
}

// =============================================================================
// PARSING
// =============================================================================

fn parse_currency(s: &str) -> Result<Currency, ApiError> {
    Currency::parse(s)
        .ok_or_else(|| reject(StatusCode::BAD_REQUEST, format!("unknown currency: {}", s)))
}

fn parse_amount(s: &str) -> Result<u128, ApiError> {
    s.parse::<u128>()
        .map_err(|_| reject(StatusCode::BAD_REQUEST, format!("malformed amount: {}", s)))
}

fn parse_word(s: &str) -> Result<BigUint, ApiError> {
    let parsed = match s.strip_prefix("0x") {
        Some(hex_part) => BigUint::parse_bytes(hex_part.as_bytes(), 16),
        None => BigUint::parse_bytes(s.as_bytes(), 10),
    };
    parsed.ok_or_else(|| reject(StatusCode::BAD_REQUEST, format!("malformed random word: {}", s)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_word_decimal_and_hex() {
        assert_eq!(parse_word("12345").unwrap(), BigUint::from(12345u32));
        assert_eq!(parse_word("0xff").unwrap(), BigUint::from(255u32));
        assert!(parse_word("0xzz").is_err());
        assert!(parse_word("12.5").is_err());
    }

    #[test]
    fn test_parse_amount_rejects_negative_and_garbage() {
        assert_eq!(parse_amount("500").unwrap(), 500);
        assert!(parse_amount("-5").is_err());
        assert!(parse_amount("1e18").is_err());
    }

    #[test]
    fn test_parse_currency() {
        assert_eq!(parse_currency("native").unwrap(), Currency::Native);
        assert_eq!(parse_currency("eth").unwrap(), Currency::Eth);
        assert!(parse_currency("ETH").is_err());
    }
}
