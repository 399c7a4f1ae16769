use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Normalized price update as republished on the event bus.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct PriceUpdate {
    /// Canonical (lower-cased) token key
    pub key: String,
    /// Latest price in SOL per token
    pub price: f64,
    /// Upstream ordering stamp, when the server sends one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence: Option<u64>,
}

impl PriceUpdate {
    pub fn new(key: impl Into<String>, price: f64) -> Self {
        Self {
            key: key.into(),
            price,
            sequence: None,
        }
    }

    pub fn with_sequence(mut self, sequence: u64) -> Self {
        self.sequence = Some(sequence);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeSide {
    Buy,
    Sell,
}

impl TradeSide {
    /// Backend tx types look like "buy", "Buy", "auto_sell", ...
    pub fn from_tx_type(tx_type: &str) -> Option<Self> {
        let lower = tx_type.to_lowercase();
        if lower.contains("buy") {
            Some(TradeSide::Buy)
        } else if lower.contains("sell") {
            Some(TradeSide::Sell)
        } else {
            None
        }
    }
}

/// Executed trade as delivered by the backend history endpoint
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TradeRecord {
    pub signature: String,
    pub token_address: String,
    pub side: TradeSide,
    pub timestamp: DateTime<Utc>,
    /// Token amount bought or sold
    pub amount: f64,
    /// SOL spent (buy) or received (sell)
    pub sol_amount: f64,
    /// Execution price in SOL per token
    pub price: f64,
}

/// Profit figures computed for one trade against the live price
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TradeProfit {
    pub signature: String,
    pub token_address: String,
    pub side: TradeSide,
    pub timestamp: DateTime<Utc>,
    pub current_price: f64,
    /// Realized profit in SOL (sells only)
    pub profit: Option<f64>,
    pub profit_percentage: Option<f64>,
    /// Unrealized profit of the position still held after this trade
    pub position_profit: f64,
    pub position_profit_percentage: f64,
}
