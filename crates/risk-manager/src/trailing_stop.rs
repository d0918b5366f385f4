//! Trailing-stop engine.
//!
//! Every open position lives in exactly one of two pools:
//!
//! - **Monitoring**: tracked, but not yet profitable enough for a stop.
//! - **Active**: protected by a stop that only ever moves in the trader's favor.
//!
//! A position enters Active once its PnL percent reaches the activation
//! threshold and the initial stop has been accepted by the venue. From then
//! on the stop is ratcheted each time the mark clears the next step. A
//! position reported with size 0 leaves whichever pool holds it.

use chrono::{DateTime, Utc};
use exchange_core::config::RiskSettings;
use exchange_core::types::{GatewayEvent, PositionSide, PositionSnapshot};
use exchange_core::{ExchangeGateway, Result};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Trailing-stop thresholds, in percent units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrailingConfig {
    /// PnL percent at which a position gets its first stop.
    pub activation_percent: Decimal,
    /// Step used both to trigger and to place ratchet updates.
    pub increment_percent: Decimal,
}

impl Default for TrailingConfig {
    fn default() -> Self {
        Self::from_settings(&RiskSettings::default())
    }
}

impl TrailingConfig {
    pub fn from_settings(settings: &RiskSettings) -> Self {
        Self {
            activation_percent: settings.trailing_activation_percent,
            increment_percent: settings.trailing_increment_percent,
        }
    }
}

/// A position waiting to reach the activation threshold.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonitoringEntry {
    pub symbol: String,
    pub side: PositionSide,
    pub entry_price: Decimal,
    pub size: Decimal,
    pub last_pnl_percent: Decimal,
    pub unrealized_pnl: Decimal,
}

/// A position with a live protective stop.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrailingEntry {
    pub symbol: String,
    pub side: PositionSide,
    pub entry_price: Decimal,
    pub size: Decimal,
    pub current_stop: Decimal,
    /// Highest mark seen for a long, lowest for a short.
    pub favorable_extreme: Decimal,
    pub last_stop_update: DateTime<Utc>,
}

/// Unrealized PnL as a percent of entry. Zero when `entry` is zero.
pub fn pnl_percent(side: PositionSide, entry: Decimal, mark: Decimal) -> Decimal {
    if entry.is_zero() {
        return Decimal::ZERO;
    }
    let move_pct = (mark - entry) / entry * Decimal::ONE_HUNDRED;
    match side {
        PositionSide::Long => move_pct,
        PositionSide::Short => -move_pct,
    }
}

/// First stop placed on activation.
///
/// Sits on the losing side of entry by half the activation percent
/// (`activation / 200`). The half-step is a tuning choice, not derived from
/// anything else; raise the activation percent to move it.
pub fn initial_stop(side: PositionSide, entry: Decimal, activation_percent: Decimal) -> Decimal {
    let offset = activation_percent / Decimal::from(200);
    match side {
        PositionSide::Long => entry * (Decimal::ONE - offset),
        PositionSide::Short => entry * (Decimal::ONE + offset),
    }
}

/// Mark price at which the stop at `current_stop` moves next.
pub fn step_trigger(side: PositionSide, current_stop: Decimal, increment_percent: Decimal) -> Decimal {
    let step = increment_percent / Decimal::ONE_HUNDRED;
    match side {
        PositionSide::Long => current_stop * (Decimal::ONE + step),
        PositionSide::Short => current_stop * (Decimal::ONE - step),
    }
}

/// Ratcheted stop for `mark`, if the mark cleared the step trigger and the
/// new stop strictly improves on `current_stop`.
pub fn next_stop(
    side: PositionSide,
    current_stop: Decimal,
    mark: Decimal,
    increment_percent: Decimal,
) -> Option<Decimal> {
    let trigger = step_trigger(side, current_stop, increment_percent);
    let step = increment_percent / Decimal::ONE_HUNDRED;

    let proposed = match side {
        PositionSide::Long if mark >= trigger => mark * (Decimal::ONE - step),
        PositionSide::Short if mark <= trigger => mark * (Decimal::ONE + step),
        _ => return None,
    };

    let improves = match side {
        PositionSide::Long => proposed > current_stop,
        PositionSide::Short => proposed < current_stop,
    };
    improves.then_some(proposed)
}

/// Pool sizes, for logging and inspection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolSizes {
    pub monitoring: usize,
    pub active: usize,
}

/// Owns both pools and applies position events to them in order.
pub struct TrailingStopEngine {
    gateway: Arc<dyn ExchangeGateway>,
    config: TrailingConfig,
    monitoring: HashMap<String, MonitoringEntry>,
    active: HashMap<String, TrailingEntry>,
}

impl TrailingStopEngine {
    pub fn new(gateway: Arc<dyn ExchangeGateway>, config: TrailingConfig) -> Self {
        Self {
            gateway,
            config,
            monitoring: HashMap::new(),
            active: HashMap::new(),
        }
    }

    pub fn config(&self) -> &TrailingConfig {
        &self.config
    }

    pub fn monitoring(&self, symbol: &str) -> Option<&MonitoringEntry> {
        self.monitoring.get(symbol)
    }

    pub fn active(&self, symbol: &str) -> Option<&TrailingEntry> {
        self.active.get(symbol)
    }

    pub fn pool_sizes(&self) -> PoolSizes {
        PoolSizes {
            monitoring: self.monitoring.len(),
            active: self.active.len(),
        }
    }

    /// Admit every currently open position. Returns how many were loaded.
    pub async fn load_initial_positions(&mut self) -> Result<usize> {
        let positions = self.gateway.open_positions().await?;
        let count = positions.len();
        for position in positions {
            self.handle_position(position).await;
        }
        info!(
            loaded = count,
            monitoring = self.monitoring.len(),
            active = self.active.len(),
            "Initial positions loaded"
        );
        Ok(count)
    }

    /// Load open positions, then consume `events`.
    ///
    /// Subscribe before calling this so that closes racing the load are
    /// queued on `events` rather than lost. A failed load is logged and the
    /// engine falls back to stream events alone.
    pub async fn load_and_run(mut self, events: mpsc::Receiver<GatewayEvent>) -> Self {
        if let Err(e) = self.load_initial_positions().await {
            warn!(error = %e, "Initial position load failed, waiting for stream events");
        }
        self.run(events).await
    }

    /// Consume events until the channel closes. Returns the engine so its
    /// final state can be inspected.
    pub async fn run(mut self, mut events: mpsc::Receiver<GatewayEvent>) -> Self {
        info!("Trailing-stop engine started");
        while let Some(event) = events.recv().await {
            self.handle_event(event).await;
        }
        info!("Event channel closed, trailing-stop engine stopping");
        self
    }

    pub async fn handle_event(&mut self, event: GatewayEvent) {
        match event {
            GatewayEvent::Position(position) => self.handle_position(position).await,
            GatewayEvent::Wallet(wallet) => {
                debug!(coin = %wallet.coin, equity = %wallet.equity, "Wallet update");
            }
        }
    }

    pub async fn handle_position(&mut self, position: PositionSnapshot) {
        if position.is_closed() {
            self.remove(&position.symbol);
            return;
        }

        let Some(side) = position.side else {
            warn!(symbol = %position.symbol, "Open position without side, skipping update");
            return;
        };

        // A side flip is a new position under the same symbol.
        let tracked_side = self
            .active
            .get(&position.symbol)
            .map(|e| e.side)
            .or_else(|| self.monitoring.get(&position.symbol).map(|e| e.side));
        if tracked_side.is_some_and(|tracked| tracked != side) {
            info!(symbol = %position.symbol, side = %side, "Position side changed, re-admitting");
            self.remove(&position.symbol);
        }

        if self.active.contains_key(&position.symbol) {
            self.update_active(&position.symbol, position.mark_price).await;
        } else if self.monitoring.contains_key(&position.symbol) {
            self.update_monitoring(position).await;
        } else {
            self.admit(position, side).await;
        }
    }

    async fn admit(&mut self, position: PositionSnapshot, side: PositionSide) {
        let entry = MonitoringEntry {
            last_pnl_percent: pnl_percent(side, position.entry_price, position.mark_price),
            symbol: position.symbol,
            side,
            entry_price: position.entry_price,
            size: position.size,
            unrealized_pnl: position.unrealized_pnl,
        };
        info!(
            symbol = %entry.symbol,
            side = %side,
            entry = %entry.entry_price,
            pnl_percent = %entry.last_pnl_percent,
            "New position"
        );

        if entry.last_pnl_percent >= self.config.activation_percent {
            self.activate(entry, position.mark_price).await;
        } else {
            self.monitoring.insert(entry.symbol.clone(), entry);
            self.log_pools();
        }
    }

    async fn update_monitoring(&mut self, position: PositionSnapshot) {
        let Some(entry) = self.monitoring.get_mut(&position.symbol) else {
            return;
        };
        // Averaging in moves the entry; a frame without a price keeps the last one.
        if !position.entry_price.is_zero() {
            entry.entry_price = position.entry_price;
        }
        entry.size = position.size;
        entry.last_pnl_percent = pnl_percent(entry.side, entry.entry_price, position.mark_price);
        entry.unrealized_pnl = position.unrealized_pnl;
        debug!(
            symbol = %entry.symbol,
            entry = %entry.entry_price,
            mark = %position.mark_price,
            pnl_percent = %entry.last_pnl_percent,
            "Monitoring update"
        );

        if entry.last_pnl_percent >= self.config.activation_percent {
            let entry = entry.clone();
            self.activate(entry, position.mark_price).await;
        }
    }

    /// Place the initial stop and move `entry` to Active. If the venue
    /// rejects the stop the position stays in Monitoring.
    async fn activate(&mut self, entry: MonitoringEntry, mark: Decimal) {
        let stop = initial_stop(entry.side, entry.entry_price, self.config.activation_percent);

        if let Err(e) = self.gateway.set_stop_price(&entry.symbol, stop).await {
            error!(
                symbol = %entry.symbol,
                stop = %stop,
                error = %e,
                "Failed to place initial stop, position stays in monitoring"
            );
            self.monitoring.insert(entry.symbol.clone(), entry);
            return;
        }

        info!(
            symbol = %entry.symbol,
            side = %entry.side,
            entry = %entry.entry_price,
            pnl_percent = %entry.last_pnl_percent,
            stop = %stop,
            "Trailing stop activated"
        );

        self.monitoring.remove(&entry.symbol);
        self.active.insert(
            entry.symbol.clone(),
            TrailingEntry {
                symbol: entry.symbol,
                side: entry.side,
                entry_price: entry.entry_price,
                size: entry.size,
                current_stop: stop,
                favorable_extreme: mark,
                last_stop_update: Utc::now(),
            },
        );
        self.log_pools();
    }

    async fn update_active(&mut self, symbol: &str, mark: Decimal) {
        let increment = self.config.increment_percent;
        let gateway = Arc::clone(&self.gateway);
        let Some(entry) = self.active.get_mut(symbol) else {
            return;
        };

        entry.favorable_extreme = match entry.side {
            PositionSide::Long => entry.favorable_extreme.max(mark),
            PositionSide::Short => entry.favorable_extreme.min(mark),
        };

        let Some(new_stop) = next_stop(entry.side, entry.current_stop, mark, increment) else {
            debug!(symbol = %symbol, mark = %mark, stop = %entry.current_stop, "Stop unchanged");
            return;
        };

        match gateway.set_stop_price(symbol, new_stop).await {
            Ok(()) => {
                info!(
                    symbol = %symbol,
                    mark = %mark,
                    old_stop = %entry.current_stop,
                    new_stop = %new_stop,
                    "Trailing stop raised"
                );
                entry.current_stop = new_stop;
                entry.last_stop_update = Utc::now();
            }
            Err(e) => {
                error!(
                    symbol = %symbol,
                    stop = %new_stop,
                    error = %e,
                    "Failed to update stop, keeping previous stop"
                );
            }
        }
    }

    fn remove(&mut self, symbol: &str) {
        let removed = self.monitoring.remove(symbol).is_some() || self.active.remove(symbol).is_some();
        if removed {
            info!(symbol = %symbol, "Position closed, removed from tracking");
            self.log_pools();
        }
    }

    fn log_pools(&self) {
        debug!(
            monitoring = self.monitoring.len(),
            active = self.active.len(),
            "Pool sizes"
        );
    }
}
