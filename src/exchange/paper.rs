//! Paper trading gateway.
//!
//! Reads prices and lot sizes from a real source but never sends orders:
//! every market order is filled immediately at the source's last price.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

use super::ExchangeGateway;
use crate::types::{Order, Side};

const GATEWAY_NAME: &str = "paper";

/// Dry-run gateway wrapping a live price source.
pub struct PaperExchange {
    source: Arc<dyn ExchangeGateway>,
    /// Step used when the source cannot report one.
    fallback_step: Option<Decimal>,
    fills: Mutex<Vec<Order>>,
}

impl PaperExchange {
    pub fn new(source: Arc<dyn ExchangeGateway>, fallback_step: Option<Decimal>) -> Self {
        Self {
            source,
            fallback_step,
            fills: Mutex::new(Vec::new()),
        }
    }

    /// Simulated fills recorded so far, oldest first.
    pub fn fills(&self) -> Vec<Order> {
        self.fills
            .lock()
            .map(|f| f.clone())
            .unwrap_or_default()
    }

    /// Net base-asset quantity held according to the simulated fills.
    pub fn net_quantity(&self) -> Decimal {
        self.fills()
            .iter()
            .map(|o| match o.side {
                Side::Buy => o.quantity,
                Side::Sell => -o.quantity,
            })
            .sum()
    }
}

#[async_trait]
impl ExchangeGateway for PaperExchange {
    async fn get_price(&self, symbol: &str) -> Result<Decimal> {
        self.source.get_price(symbol).await
    }

    async fn get_lot_step(&self, symbol: &str) -> Result<Decimal> {
        match self.source.get_lot_step(symbol).await {
            Ok(step) => Ok(step),
            Err(e) => match self.fallback_step {
                Some(step) => {
                    warn!(symbol, error = %e, step = %step, "Using configured paper step size");
                    Ok(step)
                }
                None => Err(e),
            },
        }
    }

    async fn place_market_order(
        &self,
        symbol: &str,
        side: Side,
        quantity: Decimal,
    ) -> Result<Order> {
        if quantity <= Decimal::ZERO {
            anyhow::bail!("Paper order quantity must be positive, got {quantity}");
        }

        let fill_price = self
            .source
            .get_price(symbol)
            .await
            .context("Paper fill needs a live price")?;

        let order = Order {
            order_id: format!("paper-{}", uuid::Uuid::new_v4()),
            symbol: symbol.to_string(),
            side,
            requested_quantity: quantity,
            quantity,
            fill_price,
            timestamp: Utc::now(),
        };

        info!(
            symbol,
            side = %side,
            quantity = %quantity,
            price = %fill_price,
            "[PAPER] Simulated fill"
        );

        if let Ok(mut fills) = self.fills.lock() {
            fills.push(order.clone());
        }
        Ok(order)
    }

    fn name(&self) -> &str {
        GATEWAY_NAME
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
