//! Change notifications delivered by the exchange stream.

use serde::{Deserialize, Serialize};

use super::{PositionSnapshot, WalletSnapshot};

/// A single notification from the private position/wallet stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "snake_case")]
pub enum GatewayEvent {
    Position(PositionSnapshot),
    Wallet(WalletSnapshot),
}

impl GatewayEvent {
    pub fn topic(&self) -> &'static str {
        match self {
            GatewayEvent::Position(_) => "position",
            GatewayEvent::Wallet(_) => "wallet",
        }
    }
}
