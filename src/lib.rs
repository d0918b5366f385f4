//! Trailstop: trailing-stop and drawdown risk manager for Bybit
//!
//! This is the root crate that ties the workspace together for integration
//! tests. For actual functionality, use the individual crates directly:
//!
//! - `exchange-core`: Types, configuration, Bybit gateway, balance-service client
//! - `risk-manager`: Trailing-stop engine, drawdown monitor, daily baseline
//! - `balance-service`: `GET /balance` HTTP endpoint
//! - `trailing-bot`: The bot binary

pub use exchange_core as core;
pub use risk_manager as risk;
