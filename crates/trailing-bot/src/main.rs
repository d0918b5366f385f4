//! Trailing Bot
//!
//! Protects open Bybit positions with ratcheting stops and flattens the
//! account when the day's drawdown limit is breached.

mod check;
mod trade_log;

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use exchange_core::api::{BalanceServiceClient, BybitClient};
use exchange_core::config::Config;
use exchange_core::ExchangeGateway;
use risk_manager::{
    engine_channel, BaselineCell, BaselineClient, BaselineResolver, BaselineSource,
    DrawdownConfig, DrawdownMonitor, EventDispatcher, TrailingConfig, TrailingStopEngine,
};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use trade_log::ClosedTradeReporter;

#[derive(Parser, Debug)]
#[command(name = "trailing-bot", about = "Trailing-stop and drawdown risk manager", version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    /// Start the risk manager (default).
    Run,
    /// Verify credentials, connectivity and settings, then exit.
    Check,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    match cli.command.unwrap_or(Command::Run) {
        Command::Check => {
            let passed = check::run().await;
            Ok(if passed { ExitCode::SUCCESS } else { ExitCode::FAILURE })
        }
        Command::Run => {
            init_tracing();
            run().await?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "trailing_bot=info,risk_manager=info,exchange_core=info,tungstenite=warn,hyper=warn"
                    .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn run() -> Result<()> {
    info!("Starting trailing bot");

    let config = Config::from_env()?;
    info!(exchange = ?config.exchange, risk = ?config.risk, "Configuration loaded");

    let gateway: Arc<dyn ExchangeGateway> = Arc::new(BybitClient::new(&config.exchange)?);

    // Baseline: daily refresh plus drawdown checks share one cell.
    let baseline = BaselineCell::new();
    let source: Arc<dyn BaselineSource> = match &config.balance_service.url {
        Some(url) => {
            info!(url = %url, "Using remote balance service");
            Arc::new(BalanceServiceClient::new(url.clone())?)
        }
        None => Arc::new(
            BaselineResolver::new(gateway.clone(), config.exchange.settlement_coin.clone())
                .with_breakdown_logging(config.risk.log_calculation_breakdown),
        ),
    };
    let baseline_task = BaselineClient::new(source, baseline.clone()).spawn();

    let monitor_task = DrawdownMonitor::new(
        gateway.clone(),
        baseline,
        DrawdownConfig::from_settings(&config.risk),
    )
    .spawn();

    // Subscribe before the initial load so events during the load queue up.
    let stream = gateway.subscribe_events().await?;
    let (engine_tx, engine_rx) = engine_channel();
    let (nudge_tx, nudge_rx) = mpsc::channel(1);

    let dispatcher_task = EventDispatcher::new(stream, engine_tx)
        .with_nudge(nudge_tx)
        .spawn();
    let reporter_task =
        ClosedTradeReporter::new(gateway.clone(), chrono::Utc::now().timestamp_millis()).spawn(nudge_rx);
    let engine = TrailingStopEngine::new(gateway.clone(), TrailingConfig::from_settings(&config.risk));
    let engine_task = tokio::spawn(engine.load_and_run(engine_rx));

    info!("All tasks running");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown requested");
        }
        result = engine_task => {
            match result {
                Ok(engine) => warn!(pools = ?engine.pool_sizes(), "Engine stopped"),
                Err(e) => error!(error = %e, "Engine task failed"),
            }
        }
    }

    dispatcher_task.abort();
    reporter_task.abort();
    baseline_task.abort();
    if let Some(task) = monitor_task {
        task.abort();
    }

    info!("Trailing bot stopped");
    Ok(())
}
