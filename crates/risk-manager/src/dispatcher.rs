//! Ordered hand-off of gateway events to the engine.

use exchange_core::types::GatewayEvent;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Capacity of the dispatcher → engine queue.
pub const ENGINE_QUEUE_CAPACITY: usize = 1000;

/// Queue feeding the engine.
pub fn engine_channel() -> (mpsc::Sender<GatewayEvent>, mpsc::Receiver<GatewayEvent>) {
    mpsc::channel(ENGINE_QUEUE_CAPACITY)
}

/// Forwards every event from the gateway stream to the engine, preserving
/// order, and optionally nudges a listener after each one.
pub struct EventDispatcher {
    source: mpsc::Receiver<GatewayEvent>,
    engine: mpsc::Sender<GatewayEvent>,
    nudge: Option<mpsc::Sender<()>>,
}

impl EventDispatcher {
    pub fn new(source: mpsc::Receiver<GatewayEvent>, engine: mpsc::Sender<GatewayEvent>) -> Self {
        Self {
            source,
            engine,
            nudge: None,
        }
    }

    /// Signal `nudge` after every forwarded event. Signals never block: if
    /// one is already pending the new one is dropped.
    pub fn with_nudge(mut self, nudge: mpsc::Sender<()>) -> Self {
        self.nudge = Some(nudge);
        self
    }

    /// Forward until either side closes. Returns the number of events forwarded.
    pub async fn run(mut self) -> u64 {
        let mut forwarded = 0u64;

        while let Some(event) = self.source.recv().await {
            debug!(topic = event.topic(), "Dispatching event");
            if self.engine.send(event).await.is_err() {
                warn!("Engine queue closed, dispatcher stopping");
                return forwarded;
            }
            forwarded += 1;

            if let Some(nudge) = &self.nudge {
                let _ = nudge.try_send(());
            }
        }

        info!(forwarded, "Gateway stream ended, dispatcher stopping");
        forwarded
    }

    pub fn spawn(self) -> JoinHandle<u64> {
        tokio::spawn(self.run())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use exchange_core::types::{PositionSide, PositionSnapshot, WalletSnapshot};
    use rust_decimal_macros::dec;

    fn position(symbol: &str) -> GatewayEvent {
        GatewayEvent::Position(PositionSnapshot::open(
            symbol,
            PositionSide::Long,
            dec!(1),
            dec!(100),
            dec!(101),
        ))
    }

    #[tokio::test]
    async fn test_forwards_in_order() {
        let (gateway_tx, gateway_rx) = mpsc::channel(8);
        let (engine_tx, mut engine_rx) = engine_channel();
        let handle = EventDispatcher::new(gateway_rx, engine_tx).spawn();

        let wallet = GatewayEvent::Wallet(WalletSnapshot {
            coin: "USDT".to_string(),
            equity: dec!(1000),
            wallet_balance: dec!(1000),
        });
        let sent = vec![position("BTCUSDT"), wallet, position("ETHUSDT"), position("BTCUSDT")];
        for event in sent.clone() {
            gateway_tx.send(event).await.unwrap();
        }
        drop(gateway_tx);

        let mut received = Vec::new();
        while let Some(event) = engine_rx.recv().await {
            received.push(event);
        }

        assert_eq!(received, sent);
        assert_eq!(handle.await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_nudges_coalesce() {
        let (gateway_tx, gateway_rx) = mpsc::channel(8);
        let (engine_tx, mut engine_rx) = engine_channel();
        let (nudge_tx, mut nudge_rx) = mpsc::channel(1);
        let handle = EventDispatcher::new(gateway_rx, engine_tx)
            .with_nudge(nudge_tx)
            .spawn();

        for symbol in ["BTCUSDT", "ETHUSDT", "SOLUSDT"] {
            gateway_tx.send(position(symbol)).await.unwrap();
        }
        drop(gateway_tx);
        assert_eq!(handle.await.unwrap(), 3);

        assert!(nudge_rx.recv().await.is_some());
        assert!(nudge_rx.try_recv().is_err());
        assert_eq!(engine_rx.len(), 3);
    }

    #[tokio::test]
    async fn test_stops_when_engine_closes() {
        let (gateway_tx, gateway_rx) = mpsc::channel(8);
        let (engine_tx, engine_rx) = engine_channel();
        drop(engine_rx);

        let handle = EventDispatcher::new(gateway_rx, engine_tx).spawn();
        gateway_tx.send(position("BTCUSDT")).await.unwrap();

        assert_eq!(handle.await.unwrap(), 0);
    }
}
