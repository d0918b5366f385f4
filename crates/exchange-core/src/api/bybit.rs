//! Bybit v5 unified-account client.
//!
//! Implements [`ExchangeGateway`] over the signed REST API for linear
//! perpetuals and the private WebSocket stream (see [`super::stream`]).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::str::FromStr;
use std::time::Duration as StdDuration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::auth::sign_rest_request;
use super::stream::{spawn_private_stream, StreamCredentials};
use crate::config::ExchangeConfig;
use crate::gateway::ExchangeGateway;
use crate::types::{
    AccountEquity, ClosedTrade, GatewayEvent, LedgerEntry, LedgerEntryKind, PositionSide,
    PositionSnapshot, WalletSnapshot,
};
use crate::{Error, Result};

/// Bybit REST client for the unified trading account.
pub struct BybitClient {
    base_url: String,
    ws_url: String,
    api_key: String,
    api_secret: String,
    recv_window_ms: u64,
    settlement_coin: String,
    http_client: reqwest::Client,
}

impl BybitClient {
    pub const MAINNET_REST_URL: &'static str = "https://api.bybit.com";
    pub const TESTNET_REST_URL: &'static str = "https://api-testnet.bybit.com";
    pub const MAINNET_WS_URL: &'static str = "wss://stream.bybit.com/v5/private";
    pub const TESTNET_WS_URL: &'static str = "wss://stream-testnet.bybit.com/v5/private";

    /// Page size for paginated list endpoints.
    const PAGE_LIMIT: u32 = 50;

    /// Upper bound on pages followed for a single ledger query.
    const MAX_PAGES: usize = 20;

    #[allow(clippy::result_large_err)]
    pub fn new(config: &ExchangeConfig) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(StdDuration::from_secs(10))
            .connect_timeout(StdDuration::from_secs(5))
            .build()?;

        let (default_rest, default_ws) = if config.testnet {
            (Self::TESTNET_REST_URL, Self::TESTNET_WS_URL)
        } else {
            (Self::MAINNET_REST_URL, Self::MAINNET_WS_URL)
        };

        Ok(Self {
            base_url: config
                .rest_url
                .clone()
                .unwrap_or_else(|| default_rest.to_string()),
            ws_url: config.ws_url.clone().unwrap_or_else(|| default_ws.to_string()),
            api_key: config.api_key.clone(),
            api_secret: config.api_secret.clone(),
            recv_window_ms: config.recv_window_ms,
            settlement_coin: config.settlement_coin.clone(),
            http_client,
        })
    }

    pub fn settlement_coin(&self) -> &str {
        &self.settlement_coin
    }

    #[allow(clippy::result_large_err)]
    fn signed_headers(&self, payload: &str) -> Result<HeaderMap> {
        let timestamp = Utc::now().timestamp_millis();
        let signature = sign_rest_request(
            &self.api_key,
            &self.api_secret,
            timestamp,
            self.recv_window_ms,
            payload,
        )?;

        let mut headers = HeaderMap::new();
        headers.insert("X-BAPI-API-KEY", header_value(&self.api_key)?);
        headers.insert("X-BAPI-TIMESTAMP", header_value(&timestamp.to_string())?);
        headers.insert(
            "X-BAPI-RECV-WINDOW",
            header_value(&self.recv_window_ms.to_string())?,
        );
        headers.insert("X-BAPI-SIGN", header_value(&signature)?);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(headers)
    }

    /// Signed GET; the query string is signed exactly as sent.
    async fn get_signed<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        let query_string = build_query(query);
        let url = format!("{}{}?{}", self.base_url, path, query_string);
        let headers = self.signed_headers(&query_string)?;

        let response = self.http_client.get(&url).headers(headers).send().await?;
        Self::decode_envelope(path, response).await
    }

    /// Signed POST with a JSON body.
    async fn post_signed<T: DeserializeOwned>(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<T> {
        let payload = body.to_string();
        let url = format!("{}{}", self.base_url, path);
        let headers = self.signed_headers(&payload)?;

        let response = self
            .http_client
            .post(&url)
            .headers(headers)
            .body(payload)
            .send()
            .await?;
        Self::decode_envelope(path, response).await
    }

    async fn decode_envelope<T: DeserializeOwned>(
        path: &str,
        response: reqwest::Response,
    ) -> Result<T> {
        let status = response.status();
        if !status.is_success() {
            return Err(Error::Api {
                message: format!("{} returned HTTP {}", path, status),
                status: Some(status.as_u16()),
            });
        }

        let envelope: ApiEnvelope<T> = response.json().await?;
        envelope.into_result(path)
    }

    async fn fetch_positions(&self) -> Result<Vec<PositionSnapshot>> {
        let mut positions = Vec::new();
        let mut cursor: Option<String> = None;

        for _ in 0..Self::MAX_PAGES {
            let mut query = vec![
                ("category", "linear".to_string()),
                ("settleCoin", self.settlement_coin.clone()),
                ("limit", Self::PAGE_LIMIT.to_string()),
            ];
            if let Some(c) = &cursor {
                query.push(("cursor", c.clone()));
            }

            let page: PagedList<RawPosition> = self.get_signed("/v5/position/list", &query).await?;
            for raw in page.list {
                match PositionSnapshot::try_from(raw) {
                    Ok(snapshot) if !snapshot.is_closed() => positions.push(snapshot),
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "Skipping malformed position entry"),
                }
            }

            cursor = page.next_page_cursor.filter(|c| !c.is_empty());
            if cursor.is_none() {
                break;
            }
        }

        Ok(positions)
    }

    async fn close_position(&self, position: &PositionSnapshot, side: PositionSide) -> Result<()> {
        let body = serde_json::json!({
            "category": "linear",
            "symbol": position.symbol,
            "side": side.closing_order_side(),
            "orderType": "Market",
            "qty": position.size.normalize().to_string(),
            "reduceOnly": true,
            "positionIdx": 0,
            "orderLinkId": Uuid::new_v4().simple().to_string(),
        });

        let _: serde_json::Value = self.post_signed("/v5/order/create", &body).await?;
        info!(
            symbol = %position.symbol,
            side = %side,
            size = %position.size,
            "Submitted reduce-only market close"
        );
        Ok(())
    }
}

#[async_trait]
impl ExchangeGateway for BybitClient {
    async fn account_equity(&self) -> Result<AccountEquity> {
        debug!("Fetching wallet balance");
        let result: AccountList = self
            .get_signed(
                "/v5/account/wallet-balance",
                &[("accountType", "UNIFIED".to_string())],
            )
            .await?;

        result
            .list
            .into_iter()
            .find(|account| account.account_type == "UNIFIED")
            .ok_or_else(|| Error::data_unavailable("unified account missing from wallet balance"))?
            .coin_balance(&self.settlement_coin)
    }

    async fn open_positions(&self) -> Result<Vec<PositionSnapshot>> {
        debug!("Fetching open positions");
        self.fetch_positions().await
    }

    async fn realized_pnl_since(&self, start_time_ms: i64) -> Result<Vec<LedgerEntry>> {
        debug!(start_time_ms, "Fetching transaction log");
        let mut entries = Vec::new();
        let mut cursor: Option<String> = None;

        for _ in 0..Self::MAX_PAGES {
            let mut query = vec![
                ("accountType", "UNIFIED".to_string()),
                ("category", "linear".to_string()),
                ("startTime", start_time_ms.to_string()),
                ("limit", Self::PAGE_LIMIT.to_string()),
            ];
            if let Some(c) = &cursor {
                query.push(("cursor", c.clone()));
            }

            let page: PagedList<RawTransaction> = self
                .get_signed("/v5/account/transaction-log", &query)
                .await?;
            for raw in page.list {
                match LedgerEntry::try_from(raw) {
                    Ok(entry) => entries.push(entry),
                    Err(e) => warn!(error = %e, "Skipping malformed ledger entry"),
                }
            }

            cursor = page.next_page_cursor.filter(|c| !c.is_empty());
            if cursor.is_none() {
                break;
            }
        }

        Ok(entries)
    }

    async fn set_stop_price(&self, symbol: &str, price: Decimal) -> Result<()> {
        let body = serde_json::json!({
            "category": "linear",
            "symbol": symbol,
            "stopLoss": price.normalize().to_string(),
            "positionIdx": 0,
        });

        info!(symbol = %symbol, stop_loss = %price, "Setting stop loss");
        let _: serde_json::Value = self.post_signed("/v5/position/trading-stop", &body).await?;
        Ok(())
    }

    async fn flatten_all(&self) -> Result<()> {
        let positions = self.fetch_positions().await?;
        warn!(count = positions.len(), "Flattening all open positions");

        let mut failures = Vec::new();
        for position in &positions {
            let Some(side) = position.side else {
                warn!(symbol = %position.symbol, "Open position without side, cannot close");
                failures.push(position.symbol.clone());
                continue;
            };

            if let Err(e) = self.close_position(position, side).await {
                error!(symbol = %position.symbol, error = %e, "Failed to close position");
                failures.push(position.symbol.clone());
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(Error::Api {
                message: format!(
                    "failed to close {} of {} positions: {}",
                    failures.len(),
                    positions.len(),
                    failures.join(", ")
                ),
                status: None,
            })
        }
    }

    async fn closed_pnl_since(&self, start_time_ms: Option<i64>) -> Result<Vec<ClosedTrade>> {
        let mut query = vec![
            ("category", "linear".to_string()),
            ("limit", Self::PAGE_LIMIT.to_string()),
        ];
        if let Some(start) = start_time_ms {
            query.push(("startTime", start.to_string()));
        }

        let page: PagedList<RawClosedPnl> =
            self.get_signed("/v5/position/closed-pnl", &query).await?;

        let mut trades: Vec<ClosedTrade> = page
            .list
            .into_iter()
            .filter_map(|raw| match ClosedTrade::try_from(raw) {
                Ok(trade) => Some(trade),
                Err(e) => {
                    warn!(error = %e, "Skipping malformed closed-pnl record");
                    None
                }
            })
            .collect();
        trades.sort_by_key(|t| t.created_time_ms);
        Ok(trades)
    }

    async fn subscribe_events(&self) -> Result<mpsc::Receiver<GatewayEvent>> {
        let credentials = StreamCredentials {
            api_key: self.api_key.clone(),
            api_secret: self.api_secret.clone(),
        };
        Ok(spawn_private_stream(
            self.ws_url.clone(),
            credentials,
            self.settlement_coin.clone(),
        ))
    }
}

impl std::fmt::Debug for BybitClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BybitClient")
            .field("base_url", &self.base_url)
            .field("ws_url", &self.ws_url)
            .field("settlement_coin", &self.settlement_coin)
            .finish()
    }
}

fn build_query(query: &[(&str, String)]) -> String {
    query
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&")
}

#[allow(clippy::result_large_err)]
fn header_value(value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value).map_err(|e| Error::Signing {
        message: format!("Invalid header value: {}", e),
    })
}

#[allow(clippy::result_large_err)]
pub(crate) fn parse_decimal(field: &str, raw: &str) -> Result<Decimal> {
    Decimal::from_str(raw.trim())
        .map_err(|_| Error::data_unavailable(format!("{} is not a number: {:?}", field, raw)))
}

/// Parse an optional numeric field; empty strings mean "absent".
pub(crate) fn parse_optional_decimal(raw: &str) -> Option<Decimal> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Decimal::from_str(trimmed).ok()
    }
}

// Wire types

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiEnvelope<T> {
    ret_code: i64,
    #[serde(default)]
    ret_msg: String,
    result: Option<T>,
}

impl<T> ApiEnvelope<T> {
    #[allow(clippy::result_large_err)]
    fn into_result(self, path: &str) -> Result<T> {
        if self.ret_code != 0 {
            return Err(Error::Api {
                message: format!("{} failed: {} ({})", path, self.ret_msg, self.ret_code),
                status: None,
            });
        }
        self.result
            .ok_or_else(|| Error::data_unavailable(format!("{} returned no result", path)))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PagedList<T> {
    #[serde(default = "Vec::new")]
    list: Vec<T>,
    #[serde(default)]
    next_page_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AccountList {
    #[serde(default)]
    list: Vec<RawAccount>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub(crate) struct RawAccount {
    pub account_type: String,
    pub coin: Vec<RawCoin>,
}

impl RawAccount {
    #[allow(clippy::result_large_err)]
    pub(crate) fn coin_balance(&self, coin: &str) -> Result<AccountEquity> {
        let raw = self
            .coin
            .iter()
            .find(|c| c.coin == coin)
            .ok_or_else(|| Error::data_unavailable(format!("{} balance missing", coin)))?;

        let wallet_balance = parse_decimal("walletBalance", &raw.wallet_balance)?;
        let equity = parse_optional_decimal(&raw.equity).unwrap_or(wallet_balance);
        Ok(AccountEquity {
            coin: raw.coin.clone(),
            equity,
            wallet_balance,
        })
    }

    pub(crate) fn wallet_snapshot(&self, coin: &str) -> Option<WalletSnapshot> {
        self.coin_balance(coin).ok().map(|balance| WalletSnapshot {
            coin: balance.coin,
            equity: balance.equity,
            wallet_balance: balance.wallet_balance,
        })
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub(crate) struct RawCoin {
    pub coin: String,
    pub equity: String,
    pub wallet_balance: String,
}

/// Position as sent by REST (`avgPrice`) or the stream (`entryPrice`).
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub(crate) struct RawPosition {
    pub symbol: String,
    pub side: String,
    pub size: String,
    pub avg_price: Option<String>,
    pub entry_price: Option<String>,
    pub mark_price: String,
    pub unrealised_pnl: String,
}

impl TryFrom<RawPosition> for PositionSnapshot {
    type Error = Error;

    fn try_from(raw: RawPosition) -> Result<Self> {
        if raw.symbol.is_empty() {
            return Err(Error::data_unavailable("position without symbol"));
        }

        let size = parse_decimal("size", &raw.size)?;
        if size.is_zero() {
            return Ok(PositionSnapshot::closed(raw.symbol));
        }

        let entry_raw = raw
            .avg_price
            .as_deref()
            .filter(|p| !p.trim().is_empty())
            .or(raw.entry_price.as_deref())
            .unwrap_or_default();
        let entry_price = parse_decimal("avgPrice", entry_raw)?;
        let mark_price = parse_optional_decimal(&raw.mark_price).unwrap_or(entry_price);

        Ok(PositionSnapshot {
            side: PositionSide::from_venue(&raw.side),
            symbol: raw.symbol,
            size: size.abs(),
            entry_price,
            mark_price,
            unrealized_pnl: parse_optional_decimal(&raw.unrealised_pnl).unwrap_or_default(),
        })
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RawTransaction {
    coin: String,
    #[serde(rename = "type")]
    kind: String,
    change: String,
    cash_flow: String,
    transaction_time: String,
}

impl TryFrom<RawTransaction> for LedgerEntry {
    type Error = Error;

    fn try_from(raw: RawTransaction) -> Result<Self> {
        let amount = parse_optional_decimal(&raw.change)
            .or_else(|| parse_optional_decimal(&raw.cash_flow))
            .ok_or_else(|| Error::data_unavailable("ledger entry without amount"))?;
        let millis: i64 = raw
            .transaction_time
            .parse()
            .map_err(|_| Error::data_unavailable("ledger entry without transactionTime"))?;
        let timestamp: DateTime<Utc> = DateTime::from_timestamp_millis(millis)
            .ok_or_else(|| Error::data_unavailable("ledger timestamp out of range"))?;

        Ok(LedgerEntry {
            coin: raw.coin,
            kind: LedgerEntryKind::from_venue(&raw.kind),
            amount,
            timestamp,
        })
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RawClosedPnl {
    symbol: String,
    side: String,
    closed_size: String,
    avg_entry_price: String,
    avg_exit_price: String,
    closed_pnl: String,
    exec_type: String,
    take_profit: String,
    stop_loss: String,
    created_time: String,
}

impl TryFrom<RawClosedPnl> for ClosedTrade {
    type Error = Error;

    fn try_from(raw: RawClosedPnl) -> Result<Self> {
        let created_time_ms = raw
            .created_time
            .parse()
            .map_err(|_| Error::data_unavailable("closed-pnl record without createdTime"))?;
        let positive = |raw: &str| parse_optional_decimal(raw).filter(|p| *p > Decimal::ZERO);

        Ok(ClosedTrade {
            quantity: parse_optional_decimal(&raw.closed_size).unwrap_or_default(),
            avg_entry_price: parse_optional_decimal(&raw.avg_entry_price).unwrap_or_default(),
            avg_exit_price: parse_optional_decimal(&raw.avg_exit_price).unwrap_or_default(),
            closed_pnl: parse_optional_decimal(&raw.closed_pnl).unwrap_or_default(),
            take_profit: positive(&raw.take_profit),
            stop_loss: positive(&raw.stop_loss),
            symbol: raw.symbol,
            closing_side: raw.side,
            exec_type: raw.exec_type,
            created_time_ms,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use rust_decimal_macros::dec;

    #[test]
    fn test_client_uses_testnet_urls() {
        let client = BybitClient::new(&Config::test_config().exchange).unwrap();
        assert_eq!(client.base_url, BybitClient::TESTNET_REST_URL);
        assert_eq!(client.ws_url, BybitClient::TESTNET_WS_URL);
        assert_eq!(client.settlement_coin(), "USDT");
    }

    #[test]
    fn test_debug_does_not_expose_credentials() {
        let client = BybitClient::new(&Config::test_config().exchange).unwrap();
        let debug_str = format!("{:?}", client);
        assert!(!debug_str.contains("test-secret"));
        assert!(!debug_str.contains("test-key"));
    }

    #[test]
    fn test_build_query_keeps_order() {
        let query = build_query(&[
            ("category", "linear".to_string()),
            ("settleCoin", "USDT".to_string()),
        ]);
        assert_eq!(query, "category=linear&settleCoin=USDT");
    }

    #[test]
    fn test_envelope_error_code() {
        let envelope: ApiEnvelope<serde_json::Value> = serde_json::from_str(
            r#"{"retCode": 10001, "retMsg": "params error", "result": {}}"#,
        )
        .unwrap();
        let err = envelope.into_result("/v5/position/trading-stop").unwrap_err();
        assert!(err.is_transport());
        assert!(err.to_string().contains("params error"));
    }

    #[test]
    fn test_wallet_balance_parsing() {
        let body = r#"{
            "list": [{
                "accountType": "UNIFIED",
                "coin": [
                    {"coin": "BTC", "equity": "0.1", "walletBalance": "0.1"},
                    {"coin": "USDT", "equity": "10150.25", "walletBalance": "10100"}
                ]
            }]
        }"#;
        let accounts: AccountList = serde_json::from_str(body).unwrap();
        let balance = accounts.list[0].coin_balance("USDT").unwrap();
        assert_eq!(balance.equity, dec!(10150.25));
        assert_eq!(balance.wallet_balance, dec!(10100));

        assert!(matches!(
            accounts.list[0].coin_balance("USDC"),
            Err(Error::DataUnavailable(_))
        ));
    }

    #[test]
    fn test_rest_position_parsing() {
        let raw: RawPosition = serde_json::from_str(
            r#"{"symbol": "BTCUSDT", "side": "Buy", "size": "0.01", "avgPrice": "50000",
                "markPrice": "50200", "unrealisedPnl": "2"}"#,
        )
        .unwrap();
        let snapshot = PositionSnapshot::try_from(raw).unwrap();
        assert_eq!(snapshot.side, Some(PositionSide::Long));
        assert_eq!(snapshot.size, dec!(0.01));
        assert_eq!(snapshot.entry_price, dec!(50000));
        assert_eq!(snapshot.mark_price, dec!(50200));
        assert_eq!(snapshot.unrealized_pnl, dec!(2));
    }

    #[test]
    fn test_flat_position_parsing() {
        let raw: RawPosition = serde_json::from_str(
            r#"{"symbol": "ETHUSDT", "side": "", "size": "0", "avgPrice": "0", "markPrice": ""}"#,
        )
        .unwrap();
        let snapshot = PositionSnapshot::try_from(raw).unwrap();
        assert!(snapshot.is_closed());
        assert_eq!(snapshot.side, None);
    }

    #[test]
    fn test_position_mark_defaults_to_entry() {
        let raw: RawPosition = serde_json::from_str(
            r#"{"symbol": "SOLUSDT", "side": "Sell", "size": "3", "entryPrice": "150.5", "markPrice": ""}"#,
        )
        .unwrap();
        let snapshot = PositionSnapshot::try_from(raw).unwrap();
        assert_eq!(snapshot.side, Some(PositionSide::Short));
        assert_eq!(snapshot.mark_price, dec!(150.5));
        assert_eq!(snapshot.unrealized_pnl, Decimal::ZERO);
    }

    #[test]
    fn test_malformed_position_is_data_unavailable() {
        let raw: RawPosition =
            serde_json::from_str(r#"{"symbol": "BTCUSDT", "side": "Buy", "size": "abc"}"#).unwrap();
        assert!(matches!(
            PositionSnapshot::try_from(raw),
            Err(Error::DataUnavailable(_))
        ));
    }

    #[test]
    fn test_transaction_parsing() {
        let raw: RawTransaction = serde_json::from_str(
            r#"{"coin": "USDT", "type": "REALIZED_PNL", "change": "-20.5",
                "cashFlow": "-20", "transactionTime": "1700000000000"}"#,
        )
        .unwrap();
        let entry = LedgerEntry::try_from(raw).unwrap();
        assert!(entry.is_realized_pnl());
        assert_eq!(entry.amount, dec!(-20.5));
        assert_eq!(entry.timestamp.timestamp_millis(), 1_700_000_000_000);
    }

    #[test]
    fn test_closed_pnl_parsing() {
        let raw: RawClosedPnl = serde_json::from_str(
            r#"{"symbol": "BTCUSDT", "side": "Sell", "closedSize": "0.01",
                "avgEntryPrice": "50000", "avgExitPrice": "50500", "closedPnl": "5",
                "execType": "Trade", "createdTime": "1700000000000"}"#,
        )
        .unwrap();
        let trade = ClosedTrade::try_from(raw).unwrap();
        assert_eq!(trade.closed_pnl, dec!(5));
        assert_eq!(trade.stop_loss, None);
        assert_eq!(trade.take_profit, None);
        assert_eq!(trade.created_time_ms, 1_700_000_000_000);
    }
}
