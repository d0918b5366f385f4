//! `trailing-bot check`: verify credentials, connectivity and settings
//! without starting any task.

use exchange_core::api::BybitClient;
use exchange_core::config::{load_dotenv, mask_secret, ExchangeConfig, RiskSettings};
use exchange_core::types::PositionSide;
use exchange_core::ExchangeGateway;
use risk_manager::{initial_stop, step_trigger, TrailingConfig};
use rust_decimal::Decimal;

/// Prices derived from the trailing settings for a sample long entry.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkedExample {
    pub entry: Decimal,
    pub activation_price: Decimal,
    pub initial_stop: Decimal,
    pub first_trigger: Decimal,
}

pub fn worked_example(entry: Decimal, config: &TrailingConfig) -> WorkedExample {
    let stop = initial_stop(PositionSide::Long, entry, config.activation_percent);
    WorkedExample {
        entry,
        activation_price: entry * (Decimal::ONE + config.activation_percent / Decimal::ONE_HUNDRED),
        initial_stop: stop,
        first_trigger: step_trigger(PositionSide::Long, stop, config.increment_percent),
    }
}

/// Run every check, printing a report. Returns `false` if any step failed.
pub async fn run() -> bool {
    load_dotenv();

    println!("1. Environment");
    let exchange = match ExchangeConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            println!("   FAILED: {}", e);
            return false;
        }
    };
    println!("   BYBIT_API_KEY:    {}", mask_secret(&exchange.api_key));
    println!("   BYBIT_API_SECRET: {}", mask_secret(&exchange.api_secret));
    println!("   testnet: {}  settlement coin: {}", exchange.testnet, exchange.settlement_coin);

    let risk = match RiskSettings::load() {
        Ok(risk) => risk,
        Err(e) => {
            println!("   FAILED: {}", e);
            return false;
        }
    };

    println!("2. Connectivity");
    let client = match BybitClient::new(&exchange) {
        Ok(client) => client,
        Err(e) => {
            println!("   FAILED: {}", e);
            return false;
        }
    };
    match client.account_equity().await {
        Ok(equity) => println!(
            "   {} equity: {}  wallet balance: {}",
            equity.coin, equity.equity, equity.wallet_balance
        ),
        Err(e) => {
            println!("   FAILED: {}", e);
            return false;
        }
    }

    println!("3. Open positions");
    match client.open_positions().await {
        Ok(positions) if positions.is_empty() => println!("   none"),
        Ok(positions) => {
            for p in positions {
                let side = p.side.map_or_else(|| "-".to_string(), |s| s.to_string());
                println!(
                    "   {:<12} {:<5} size {:<10} entry {:<12} uPnL {}",
                    p.symbol, side, p.size, p.entry_price, p.unrealized_pnl
                );
            }
        }
        Err(e) => {
            println!("   FAILED: {}", e);
            return false;
        }
    }

    println!("4. Trailing configuration");
    let trailing = TrailingConfig::from_settings(&risk);
    println!("   activation: {}%", trailing.activation_percent);
    println!("   increment:  {}%", trailing.increment_percent);
    println!(
        "   drawdown:   {}% ({})",
        risk.drawdown_percent,
        if risk.drawdown_enabled { "enabled" } else { "disabled" }
    );

    let example = worked_example(Decimal::from(50_000), &trailing);
    println!("   example long entry {}:", example.entry);
    println!("     activates at  {}", example.activation_price.normalize());
    println!("     initial stop  {}", example.initial_stop.normalize());
    println!("     first step at {}", example.first_trigger.normalize());

    println!("All checks passed");
    true
}
