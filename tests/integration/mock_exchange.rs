//! Mock exchange for integration testing.
//!
//! Provides a deterministic `ExchangeGateway` that replays scripted
//! prices, fills every market order at the current price and records it,
//! all in-memory with no external dependencies.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;

use martingale_bot::config::StrategyConfig;
use martingale_bot::engine::BotEvent;
use martingale_bot::exchange::ExchangeGateway;
use martingale_bot::types::{Order, Side};

/// A scripted spot exchange.
///
/// Prices are served in order; once the script runs out the last price
/// repeats forever.
pub struct MockExchange {
    script: Mutex<VecDeque<Decimal>>,
    last_price: Mutex<Option<Decimal>>,
    lot_step: Decimal,
    orders: Mutex<Vec<Order>>,
    price_error: Mutex<Option<String>>,
    order_error: Mutex<Option<String>>,
    order_delay: Mutex<Duration>,
    price_calls: AtomicUsize,
}

impl MockExchange {
    pub fn new(prices: &[Decimal], lot_step: Decimal) -> Self {
        Self {
            script: Mutex::new(prices.iter().copied().collect()),
            last_price: Mutex::new(None),
            lot_step,
            orders: Mutex::new(Vec::new()),
            price_error: Mutex::new(None),
            order_error: Mutex::new(None),
            order_delay: Mutex::new(Duration::ZERO),
            price_calls: AtomicUsize::new(0),
        }
    }

    /// Force all subsequent price reads to fail.
    pub fn fail_prices(&self, msg: &str) {
        *self.price_error.lock().unwrap() = Some(msg.to_string());
    }

    pub fn restore_prices(&self) {
        *self.price_error.lock().unwrap() = None;
    }

    /// Force all subsequent orders to fail.
    pub fn fail_orders(&self, msg: &str) {
        *self.order_error.lock().unwrap() = Some(msg.to_string());
    }

    /// Make every order take `delay` before it is filled.
    pub fn set_order_delay(&self, delay: Duration) {
        *self.order_delay.lock().unwrap() = delay;
    }

    /// All filled orders so far.
    pub fn orders(&self) -> Vec<Order> {
        self.orders.lock().unwrap().clone()
    }

    pub fn price_calls(&self) -> usize {
        self.price_calls.load(Ordering::SeqCst)
    }

    fn current_price(&self) -> Option<Decimal> {
        *self.last_price.lock().unwrap()
    }
}

#[async_trait]
impl ExchangeGateway for MockExchange {
    async fn get_price(&self, _symbol: &str) -> Result<Decimal> {
        self.price_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.price_error.lock().unwrap().as_ref() {
            return Err(anyhow!("{err}"));
        }

        let next = self.script.lock().unwrap().pop_front();
        let mut last = self.last_price.lock().unwrap();
        if let Some(price) = next {
            *last = Some(price);
        }
        last.ok_or_else(|| anyhow!("no price scripted"))
    }

    async fn get_lot_step(&self, _symbol: &str) -> Result<Decimal> {
        Ok(self.lot_step)
    }

    async fn place_market_order(
        &self,
        symbol: &str,
        side: Side,
        quantity: Decimal,
    ) -> Result<Order> {
        let delay = *self.order_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if let Some(err) = self.order_error.lock().unwrap().as_ref() {
            return Err(anyhow!("{err}"));
        }

        let order = Order {
            order_id: uuid::Uuid::new_v4().to_string(),
            symbol: symbol.to_string(),
            side,
            requested_quantity: quantity,
            quantity,
            fill_price: self.current_price().unwrap_or_default(),
            timestamp: Utc::now(),
        };
        self.orders.lock().unwrap().push(order.clone());
        Ok(order)
    }

    fn name(&self) -> &str {
        "mock"
    }
}

/// Strategy used across the integration tests: 100 quote per order,
/// -10% average-down, +5% take-profit, breakout disabled by sitting above
/// the target.
pub fn strategy(poll_interval_ms: u64) -> StrategyConfig {
    StrategyConfig {
        symbol: "btcusdt".into(),
        buy_amount: Decimal::from(100),
        max_drop_percent: Decimal::new(10, 2),
        target_increment: Decimal::new(5, 2),
        breakout_increment: Decimal::new(8, 2),
        poll_interval_ms,
        martingale_limit: 3,
    }
}

/// Poll `cond` every few milliseconds until it holds or `timeout` expires.
pub async fn wait_for(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    cond()
}

/// Everything currently buffered on the event channel.
pub fn drain(rx: &mut UnboundedReceiver<BotEvent>) -> Vec<BotEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
