//! Private WebSocket stream for position and wallet changes.

use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::time::Duration as StdDuration;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use super::auth::sign_ws_auth;
use super::bybit::{RawAccount, RawPosition};
use crate::types::{GatewayEvent, PositionSnapshot};
use crate::{Error, Result};

/// Buffer between the socket task and the consumer.
const EVENT_BUFFER: usize = 1000;
const PING_INTERVAL_SECS: u64 = 20;
const READ_TIMEOUT_SECS: u64 = 60;
/// Lifetime of the auth signature.
const AUTH_EXPIRY_MS: i64 = 10_000;
const MAX_BACKOFF_SECS: u64 = 60;

/// Credentials used to authenticate the private stream.
#[derive(Clone)]
pub struct StreamCredentials {
    pub api_key: String,
    pub api_secret: String,
}

/// Spawn a background task that keeps the private stream connected and
/// forwards parsed events in arrival order. The task stops once the
/// returned receiver is dropped.
pub fn spawn_private_stream(
    ws_url: String,
    credentials: StreamCredentials,
    settlement_coin: String,
) -> mpsc::Receiver<GatewayEvent> {
    let (tx, rx) = mpsc::channel(EVENT_BUFFER);
    tokio::spawn(async move {
        run_with_reconnect(ws_url, credentials, settlement_coin, tx).await;
    });
    rx
}

async fn run_with_reconnect(
    ws_url: String,
    credentials: StreamCredentials,
    settlement_coin: String,
    tx: mpsc::Sender<GatewayEvent>,
) {
    let mut attempt = 0u32;

    loop {
        match stream_loop(&ws_url, &credentials, &settlement_coin, &tx).await {
            Ok(()) => {
                info!("Private stream closed cleanly");
                attempt = 0;
            }
            Err(e) => {
                warn!(attempt = attempt + 1, error = %e, "Private stream failed");
            }
        }

        if tx.is_closed() {
            info!("Event receiver dropped, stopping private stream");
            return;
        }

        let delay_secs = std::cmp::min(2u64.saturating_pow(attempt), MAX_BACKOFF_SECS);
        warn!(delay_secs, attempt = attempt + 1, "Reconnecting private stream in {}s", delay_secs);
        tokio::time::sleep(StdDuration::from_secs(delay_secs)).await;

        attempt = attempt.saturating_add(1);
    }
}

async fn stream_loop(
    ws_url: &str,
    credentials: &StreamCredentials,
    settlement_coin: &str,
    tx: &mpsc::Sender<GatewayEvent>,
) -> Result<()> {
    let (ws_stream, _) = connect_async(ws_url).await?;
    let (mut write, mut read) = ws_stream.split();

    let expires = chrono::Utc::now().timestamp_millis() + AUTH_EXPIRY_MS;
    let signature = sign_ws_auth(&credentials.api_secret, expires)?;
    let auth_msg = serde_json::json!({
        "op": "auth",
        "args": [credentials.api_key, expires, signature],
    });
    write.send(Message::Text(auth_msg.to_string())).await?;

    let subscribe_msg = serde_json::json!({
        "op": "subscribe",
        "args": ["position", "wallet"],
    });
    write.send(Message::Text(subscribe_msg.to_string())).await?;
    info!("Subscribed to position and wallet topics");

    let mut ping_tick = tokio::time::interval(StdDuration::from_secs(PING_INTERVAL_SECS));
    ping_tick.tick().await;

    // Only reset when a frame arrives, so pings do not keep a dead socket alive.
    let read_deadline = tokio::time::sleep(StdDuration::from_secs(READ_TIMEOUT_SECS));
    tokio::pin!(read_deadline);

    loop {
        tokio::select! {
            _ = ping_tick.tick() => {
                write.send(Message::Text(r#"{"op":"ping"}"#.to_string())).await?;
            }
            _ = &mut read_deadline => {
                return Err(Error::Timeout {
                    operation: "private stream read".to_string(),
                    after_secs: READ_TIMEOUT_SECS,
                });
            }
            msg = read.next() => {
                read_deadline
                    .as_mut()
                    .reset(tokio::time::Instant::now() + StdDuration::from_secs(READ_TIMEOUT_SECS));

                let Some(msg) = msg else {
                    warn!("Private stream ended");
                    return Ok(());
                };

                match msg? {
                    Message::Text(text) => {
                        for event in parse_private_message(&text, settlement_coin)? {
                            if tx.send(event).await.is_err() {
                                warn!("Receiver dropped, closing private stream");
                                return Ok(());
                            }
                        }
                    }
                    Message::Ping(data) => {
                        write.send(Message::Pong(data)).await?;
                    }
                    Message::Close(_) => {
                        info!("Private stream closed by server");
                        return Ok(());
                    }
                    _ => {}
                }
            }
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct StreamFrame {
    op: Option<String>,
    success: Option<bool>,
    ret_msg: Option<String>,
    topic: Option<String>,
    data: Vec<serde_json::Value>,
}

/// Parse one text frame from the private stream.
///
/// Control frames (auth/subscribe acks, pongs) yield no events; a rejected
/// auth or subscribe is an error so the connection is re-established.
/// Positions in other categories and wallet entries without the settlement
/// coin are dropped.
#[allow(clippy::result_large_err)]
pub fn parse_private_message(text: &str, settlement_coin: &str) -> Result<Vec<GatewayEvent>> {
    let frame: StreamFrame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(e) => {
            debug!(error = %e, "Ignoring non-JSON stream frame");
            return Ok(Vec::new());
        }
    };

    if let Some(op) = frame.op.as_deref() {
        if frame.success == Some(false) && matches!(op, "auth" | "subscribe") {
            return Err(Error::Api {
                message: format!(
                    "private stream {} rejected: {}",
                    op,
                    frame.ret_msg.unwrap_or_default()
                ),
                status: None,
            });
        }
        debug!(op, "Stream control frame");
        return Ok(Vec::new());
    }

    let mut events = Vec::new();
    match frame.topic.as_deref() {
        Some("position") => {
            for item in frame.data {
                let category = item.get("category").and_then(|c| c.as_str()).unwrap_or("linear");
                if category != "linear" {
                    continue;
                }
                let raw: RawPosition = match serde_json::from_value(item) {
                    Ok(raw) => raw,
                    Err(e) => {
                        warn!(error = %e, "Dropping undecodable position update");
                        continue;
                    }
                };
                match PositionSnapshot::try_from(raw) {
                    Ok(snapshot) => events.push(GatewayEvent::Position(snapshot)),
                    Err(e) => warn!(error = %e, "Dropping malformed position update"),
                }
            }
        }
        Some("wallet") => {
            for item in frame.data {
                let account: RawAccount = match serde_json::from_value(item) {
                    Ok(account) => account,
                    Err(e) => {
                        warn!(error = %e, "Dropping undecodable wallet update");
                        continue;
                    }
                };
                if let Some(wallet) = account.wallet_snapshot(settlement_coin) {
                    events.push(GatewayEvent::Wallet(wallet));
                }
            }
        }
        Some(other) => debug!(topic = other, "Ignoring unsubscribed topic"),
        None => {}
    }

    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PositionSide;
    use rust_decimal_macros::dec;

    #[test]
    fn test_position_update_uses_entry_price() {
        let text = r#"{
            "id": "1", "topic": "position", "creationTime": 1700000000000,
            "data": [{
                "category": "linear", "symbol": "BTCUSDT", "side": "Buy", "size": "0.01",
                "entryPrice": "50000", "markPrice": "50300", "unrealisedPnl": "3"
            }]
        }"#;
        let events = parse_private_message(text, "USDT").unwrap();
        assert_eq!(events.len(), 1);
        match &events[0] {
            GatewayEvent::Position(p) => {
                assert_eq!(p.symbol, "BTCUSDT");
                assert_eq!(p.side, Some(PositionSide::Long));
                assert_eq!(p.entry_price, dec!(50000));
                assert_eq!(p.mark_price, dec!(50300));
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_closed_position_update() {
        let text = r#"{"topic": "position", "data": [
            {"category": "linear", "symbol": "ETHUSDT", "side": "", "size": "0", "entryPrice": "0", "markPrice": "2000"}
        ]}"#;
        let events = parse_private_message(text, "USDT").unwrap();
        assert!(matches!(&events[0], GatewayEvent::Position(p) if p.is_closed()));
    }

    #[test]
    fn test_bad_element_does_not_drop_frame() {
        let text = r#"{"topic": "position", "data": [
            "garbage",
            {"category": "linear", "symbol": "BTCUSDT", "side": "Buy", "size": "0.01",
             "entryPrice": "50000", "markPrice": "50100"}
        ]}"#;
        let events = parse_private_message(text, "USDT").unwrap();
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], GatewayEvent::Position(p) if p.symbol == "BTCUSDT"));

        let wallet = r#"{"topic": "wallet", "data": [
            42,
            {"accountType": "UNIFIED", "coin": [{"coin": "USDT", "equity": "9800", "walletBalance": "9900"}]}
        ]}"#;
        let events = parse_private_message(wallet, "USDT").unwrap();
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], GatewayEvent::Wallet(w) if w.equity == dec!(9800)));
    }

    #[test]
    fn test_other_categories_are_dropped() {
        let text = r#"{"topic": "position", "data": [
            {"category": "option", "symbol": "BTC-30DEC-50000-C", "side": "Buy", "size": "1", "entryPrice": "100"}
        ]}"#;
        assert!(parse_private_message(text, "USDT").unwrap().is_empty());
    }

    #[test]
    fn test_wallet_update() {
        let text = r#"{"topic": "wallet", "data": [{
            "accountType": "UNIFIED",
            "coin": [{"coin": "USDT", "equity": "9800", "walletBalance": "9900"}]
        }]}"#;
        let events = parse_private_message(text, "USDT").unwrap();
        match &events[0] {
            GatewayEvent::Wallet(w) => {
                assert_eq!(w.equity, dec!(9800));
                assert_eq!(w.wallet_balance, dec!(9900));
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_control_frames() {
        let ok = r#"{"success": true, "ret_msg": "", "op": "auth", "conn_id": "abc"}"#;
        assert!(parse_private_message(ok, "USDT").unwrap().is_empty());

        let pong = r#"{"op": "pong", "args": ["1700000000000"], "conn_id": "abc"}"#;
        assert!(parse_private_message(pong, "USDT").unwrap().is_empty());

        let rejected = r#"{"success": false, "ret_msg": "Invalid sign", "op": "auth"}"#;
        let err = parse_private_message(rejected, "USDT").unwrap_err();
        assert!(err.to_string().contains("Invalid sign"));
    }

    #[test]
    fn test_non_json_frame_is_ignored() {
        assert!(parse_private_message("pong", "USDT").unwrap().is_empty());
    }
}
