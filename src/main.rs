//! Witness-Weather - Randomness-Driven Weather Prediction Game
//!
//! Participants wager on tomorrow's weather type; a keeper triggers
//! settlement inside the daily noon window; a verifiable-randomness oracle
//! decides the weather; winners are paid stake minus the limit fee.

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use witness_weather_backend::{
    api::{router, AppState},
    config::{Config, OracleMode},
    engine::{
        clock::SystemClock,
        reserve::Reserve,
        settlement::EngineConfig,
    },
    keeper::{spawn_fulfillment_loop, spawn_keeper},
    oracle::{CallbackOnly, MockVrfCoordinator, RandomnessPort},
    service::WitnessService,
    storage::EngineStore,
};

#[derive(Debug, Parser)]
#[command(name = "witness-weather", about = "Witness-weather settlement service")]
struct Cli {
    /// Validate configuration and exit.
    #[arg(long)]
    config_check: bool,
    /// Disable the in-process keeper loop (external automation only).
    #[arg(long)]
    no_keeper: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            "witness_weather_backend=info,tower_http=warn".into()
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = Config::from_env()?;
    if cli.config_check {
        println!("{:#?}", config);
        return Ok(());
    }

    info!(
        db = %config.database_path,
        offset = config.timestamp_offset,
        poll = config.keeper_poll_secs,
        "starting witness-weather service"
    );

    let store = EngineStore::new(&config.database_path)?;
    let engine_config = EngineConfig {
        timestamp_offset: config.timestamp_offset,
        key_hash: config.key_hash.clone(),
        subscription_id: config.subscription_id,
    };
    let reserve = Reserve::new(config.native_limit_fee, config.eth_limit_fee);

    let (oracle, fulfillments): (Arc<dyn RandomnessPort>, _) = match config.oracle_mode {
        OracleMode::Mock => {
            let (coordinator, rx) = MockVrfCoordinator::new(
                config.mock_seed,
                std::time::Duration::from_millis(config.mock_fulfill_delay_ms),
            );
            info!(
                delay_ms = config.mock_fulfill_delay_ms,
                "mock VRF coordinator active"
            );
            (coordinator as Arc<dyn RandomnessPort>, Some(rx))
        }
        OracleMode::Callback => {
            info!("callback oracle mode: fulfillments via POST /api/oracle/fulfill");
            (Arc::new(CallbackOnly), None)
        }
    };

    let service = WitnessService::restore_or_new(
        engine_config,
        reserve,
        store,
        oracle,
        Arc::new(SystemClock),
    )
    .await?;

    if let Some(rx) = fulfillments {
        spawn_fulfillment_loop(service.clone(), rx);
    }
    if !cli.no_keeper {
        spawn_keeper(service.clone(), config.keeper_poll_secs);
    }

    let app = router(AppState {
        service,
        admin_token: config.admin_token.clone(),
    });

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(&addr).await?;
    info!("API server listening on {}", addr);
    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}
