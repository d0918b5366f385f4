//! Configuration management for the trailing-stop system.
//!
//! Credentials and endpoints come straight from the environment; the risk
//! settings are layered (defaults, optional `trailing-bot.toml`, environment)
//! through the `config` crate.

use crate::{Error, Result};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::env;

/// Optional settings file, looked up in the working directory.
pub const SETTINGS_FILE: &str = "trailing-bot";

/// Application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub exchange: ExchangeConfig,
    pub risk: RiskSettings,
    pub balance_service: BalanceServiceConfig,
}

#[derive(Clone)]
pub struct ExchangeConfig {
    pub api_key: String,
    pub api_secret: String,
    pub testnet: bool,
    pub recv_window_ms: u64,
    pub rest_url: Option<String>,
    pub ws_url: Option<String>,
    pub settlement_coin: String,
}

impl std::fmt::Debug for ExchangeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExchangeConfig")
            .field("api_key", &mask_secret(&self.api_key))
            .field("testnet", &self.testnet)
            .field("recv_window_ms", &self.recv_window_ms)
            .field("rest_url", &self.rest_url)
            .field("ws_url", &self.ws_url)
            .field("settlement_coin", &self.settlement_coin)
            .finish()
    }
}

/// Risk parameters, in percent units (`0.30` means 0.30%).
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RiskSettings {
    pub trailing_activation_percent: Decimal,
    pub trailing_increment_percent: Decimal,
    pub drawdown_percent: Decimal,
    pub drawdown_enabled: bool,
    pub drawdown_check_interval_secs: u64,
    pub log_calculation_breakdown: bool,
}

impl Default for RiskSettings {
    fn default() -> Self {
        Self {
            trailing_activation_percent: Decimal::new(30, 2), // 0.30%
            trailing_increment_percent: Decimal::new(50, 2),  // 0.50%
            drawdown_percent: Decimal::new(5, 0),             // 5%
            drawdown_enabled: true,
            drawdown_check_interval_secs: 5,
            log_calculation_breakdown: false,
        }
    }
}

impl RiskSettings {
    /// Load risk settings from defaults, `trailing-bot.toml` and the environment.
    pub fn load() -> Result<Self> {
        let defaults = Self::default();
        let settings = config::Config::builder()
            .set_default(
                "trailing_activation_percent",
                defaults.trailing_activation_percent.to_string(),
            )?
            .set_default(
                "trailing_increment_percent",
                defaults.trailing_increment_percent.to_string(),
            )?
            .set_default("drawdown_percent", defaults.drawdown_percent.to_string())?
            .set_default("drawdown_enabled", defaults.drawdown_enabled)?
            .set_default(
                "drawdown_check_interval_secs",
                defaults.drawdown_check_interval_secs,
            )?
            .set_default(
                "log_calculation_breakdown",
                defaults.log_calculation_breakdown,
            )?
            .add_source(config::File::with_name(SETTINGS_FILE).required(false))
            .add_source(config::Environment::default())
            .build()?;

        let risk: RiskSettings = settings.try_deserialize()?;
        risk.validate()?;
        Ok(risk)
    }

    #[allow(clippy::result_large_err)]
    pub fn validate(&self) -> Result<()> {
        if self.trailing_activation_percent <= Decimal::ZERO {
            return Err(Error::Config {
                message: "TRAILING_ACTIVATION_PERCENT must be positive".to_string(),
            });
        }
        if self.trailing_increment_percent <= Decimal::ZERO
            || self.trailing_increment_percent >= Decimal::ONE_HUNDRED
        {
            return Err(Error::Config {
                message: "TRAILING_INCREMENT_PERCENT must be in (0, 100)".to_string(),
            });
        }
        if self.drawdown_percent <= Decimal::ZERO || self.drawdown_percent > Decimal::ONE_HUNDRED {
            return Err(Error::Config {
                message: "DRAWDOWN_PERCENT must be in (0, 100]".to_string(),
            });
        }
        if self.drawdown_check_interval_secs == 0 {
            return Err(Error::Config {
                message: "DRAWDOWN_CHECK_INTERVAL_SECS must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct BalanceServiceConfig {
    /// Base URL of a remote balance service; `None` resolves in-process.
    pub url: Option<String>,
    pub host: String,
    pub port: u16,
}

impl Default for BalanceServiceConfig {
    fn default() -> Self {
        Self {
            url: None,
            host: "0.0.0.0".to_string(),
            port: 5000,
        }
    }
}

impl BalanceServiceConfig {
    pub fn from_env() -> Self {
        Self {
            url: env::var("BALANCE_SERVICE_URL")
                .ok()
                .filter(|u| !u.trim().is_empty()),
            host: env::var("BALANCE_SERVICE_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env::var("BALANCE_SERVICE_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(5000),
        }
    }
}

impl ExchangeConfig {
    /// Read exchange credentials and endpoints from the environment.
    #[allow(clippy::result_large_err)]
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            api_key: required_var("BYBIT_API_KEY")?,
            api_secret: required_var("BYBIT_API_SECRET")?,
            testnet: env::var("BYBIT_TESTNET")
                .map(|v| v.eq_ignore_ascii_case("true"))
                .unwrap_or(true),
            recv_window_ms: env::var("BYBIT_RECV_WINDOW")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(5000),
            rest_url: env::var("BYBIT_REST_URL").ok(),
            ws_url: env::var("BYBIT_WS_URL").ok(),
            settlement_coin: env::var("SETTLEMENT_COIN").unwrap_or_else(|_| "USDT".to_string()),
        })
    }
}

impl Config {
    /// Load configuration from `.env.dev`, `.env` and the process environment.
    #[allow(clippy::result_large_err)]
    pub fn from_env() -> Result<Self> {
        load_dotenv();

        Ok(Self {
            exchange: ExchangeConfig::from_env()?,
            risk: RiskSettings::load()?,
            balance_service: BalanceServiceConfig::from_env(),
        })
    }

    /// Configuration for tests (no credentials are read).
    pub fn test_config() -> Self {
        Self {
            exchange: ExchangeConfig {
                api_key: "test-key".to_string(),
                api_secret: "test-secret".to_string(),
                testnet: true,
                recv_window_ms: 5000,
                rest_url: None,
                ws_url: None,
                settlement_coin: "USDT".to_string(),
            },
            risk: RiskSettings::default(),
            balance_service: BalanceServiceConfig::default(),
        }
    }
}

/// Load `.env.dev` first, then `.env`; missing files are ignored.
pub fn load_dotenv() {
    dotenvy::from_filename(".env.dev").ok();
    dotenvy::dotenv().ok();
}

#[allow(clippy::result_large_err)]
fn required_var(name: &str) -> Result<String> {
    match env::var(name) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(Error::Config {
            message: format!("{} environment variable not set", name),
        }),
    }
}

/// Mask a credential for display: first and last four characters only.
pub fn mask_secret(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    if chars.len() > 8 {
        let head: String = chars[..4].iter().collect();
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("{}...{}", head, tail)
    } else {
        "***".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_risk_settings() {
        let risk = RiskSettings::default();
        assert_eq!(risk.trailing_activation_percent, Decimal::new(30, 2));
        assert_eq!(risk.trailing_increment_percent, Decimal::new(50, 2));
        assert_eq!(risk.drawdown_percent, Decimal::new(5, 0));
        assert!(risk.drawdown_enabled);
        assert!(!risk.log_calculation_breakdown);
        assert!(risk.validate().is_ok());
    }

    #[test]
    fn test_invalid_risk_settings() {
        let risk = RiskSettings {
            trailing_activation_percent: Decimal::ZERO,
            ..Default::default()
        };
        assert!(matches!(risk.validate(), Err(Error::Config { .. })));

        let risk = RiskSettings {
            drawdown_percent: Decimal::new(150, 0),
            ..Default::default()
        };
        assert!(matches!(risk.validate(), Err(Error::Config { .. })));

        let risk = RiskSettings {
            trailing_increment_percent: Decimal::new(-1, 0),
            ..Default::default()
        };
        assert!(risk.validate().is_err());
    }

    // One test owns these variables; parallel tests would race on them.
    #[test]
    fn test_risk_settings_env_overrides() {
        let keys = [
            "DRAWDOWN_PERCENT",
            "DRAWDOWN_ENABLED",
            "TRAILING_ACTIVATION_PERCENT",
        ];

        env::set_var("DRAWDOWN_PERCENT", "10");
        env::set_var("DRAWDOWN_ENABLED", "false");
        env::set_var("TRAILING_ACTIVATION_PERCENT", "0.45");
        let loaded = RiskSettings::load();

        env::set_var("DRAWDOWN_PERCENT", "0");
        let rejected = RiskSettings::load();

        for key in keys {
            env::remove_var(key);
        }

        let risk = loaded.unwrap();
        assert_eq!(risk.drawdown_percent, Decimal::new(10, 0));
        assert!(!risk.drawdown_enabled);
        assert_eq!(risk.trailing_activation_percent, Decimal::new(45, 2));
        assert_eq!(risk.trailing_increment_percent, Decimal::new(50, 2));

        assert!(matches!(rejected, Err(Error::Config { .. })));
    }

    #[test]
    fn test_mask_secret() {
        assert_eq!(mask_secret("abcd1234efgh5678"), "abcd...5678");
        assert_eq!(mask_secret("short"), "***");
    }

    #[test]
    fn test_debug_does_not_expose_credentials() {
        let config = Config::test_config();
        let debug_str = format!("{:?}", config.exchange);
        assert!(!debug_str.contains("test-secret"));
    }
}
