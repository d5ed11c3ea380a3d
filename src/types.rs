//! Shared types for the averaging bot.
//!
//! Order and side types are returned by every exchange gateway, and the
//! error taxonomy is shared by the engine, the scheduler and the binary.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Side
// ---------------------------------------------------------------------------

/// Order direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// Wire representation used by exchange REST APIs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Order
// ---------------------------------------------------------------------------

/// A market order accepted by the exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub order_id: String,
    pub symbol: String,
    pub side: Side,
    /// Quantity the engine asked for, before lot-step normalization.
    pub requested_quantity: Decimal,
    /// Quantity actually submitted to the exchange.
    pub quantity: Decimal,
    /// Average fill price reported by the exchange.
    pub fill_price: Decimal,
    pub timestamp: DateTime<Utc>,
}

impl Order {
    /// Record the pre-adjustment quantity. Gateways only see the submitted
    /// quantity, so the engine stamps this after placement.
    pub fn with_requested_quantity(mut self, requested: Decimal) -> Self {
        self.requested_quantity = requested;
        self
    }

    /// Quote-currency value of the fill. `None` if it does not fit a `Decimal`.
    pub fn notional(&self) -> Option<Decimal> {
        self.quantity.checked_mul(self.fill_price)
    }
}

impl fmt::Display for Order {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} @ {} (requested {}) [{}]",
            self.side,
            self.quantity,
            self.symbol,
            self.fill_price,
            self.requested_quantity,
            self.order_id,
        )
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Domain error taxonomy.
///
/// Tick-level failures (`FeedUnavailable`, `MetadataUnavailable`,
/// `OrderRejected`, `LimitExceeded`) are recovered inside the tick and only
/// ever reach the controller as events.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BotError {
    #[error("Price feed unavailable for {symbol}: {reason}")]
    FeedUnavailable { symbol: String, reason: String },

    #[error("Lot size unavailable for {symbol}: {reason}")]
    MetadataUnavailable { symbol: String, reason: String },

    #[error("{side} order rejected for {symbol}: {reason}")]
    OrderRejected {
        symbol: String,
        side: Side,
        reason: String,
    },

    #[error("Martingale limit reached: multiplier {multiplier} > limit {limit}")]
    LimitExceeded { multiplier: u32, limit: u32 },

    #[error("Invalid lot step size: {0}")]
    InvalidStep(Decimal),

    #[error("Bot is already running")]
    AlreadyRunning,

    #[error("Configuration error: {0}")]
    Config(String),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
