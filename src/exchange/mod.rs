//! Exchange integrations.
//!
//! Defines the `ExchangeGateway` trait and provides implementations for:
//! - Binance spot (REST, HMAC-signed orders) for live trading
//! - Paper trading: live prices, simulated fills (dry-run mode)

pub mod binance;
pub mod paper;

use anyhow::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::types::{Order, Side};

/// Abstraction over a spot exchange.
///
/// The trading engine only ever talks to the exchange through this trait,
/// one call at a time.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ExchangeGateway: Send + Sync {
    /// Last traded price for the symbol.
    async fn get_price(&self, symbol: &str) -> Result<Decimal>;

    /// Lot-size step (smallest quantity increment) for the symbol.
    async fn get_lot_step(&self, symbol: &str) -> Result<Decimal>;

    /// Place a market order for `quantity` units of the base asset.
    async fn place_market_order(&self, symbol: &str, side: Side, quantity: Decimal)
        -> Result<Order>;

    /// Gateway name for logging and identification.
    fn name(&self) -> &str;
}
