//! Martingale averaging state machine.
//!
//! Each tick reads one price and fires at most one of, in priority order:
//! the opening buy (when flat), take-profit, average-down, breakout add.
//! Failed orders never touch the position, so a failed transition is simply
//! re-evaluated on the next tick against the price at that time.

use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::debug;

use super::events::{AddTrigger, BotEvent, EventSink};
use super::position::PositionState;
use super::quantity::{Adjustment, QuantityAdjuster};
use crate::config::StrategyConfig;
use crate::exchange::ExchangeGateway;
use crate::types::{BotError, Order, Side};

/// What a single tick did.
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// Price read, no threshold crossed.
    NoAction,
    PriceUnavailable,
    Opened(Order),
    TookProfit(Order),
    Added { order: Order, trigger: AddTrigger },
    /// Martingale limit exceeded; multiplier reset, no order placed.
    LimitReset { trigger: AddTrigger },
    /// An order was attempted and failed; the position is unchanged.
    OrderFailed { side: Side },
}

impl TickOutcome {
    /// The order filled this tick, if any.
    pub fn order(&self) -> Option<&Order> {
        match self {
            TickOutcome::Opened(order)
            | TickOutcome::TookProfit(order)
            | TickOutcome::Added { order, .. } => Some(order),
            _ => None,
        }
    }
}

pub struct TradingEngine {
    config: StrategyConfig,
    gateway: Arc<dyn ExchangeGateway>,
    sink: Arc<dyn EventSink>,
    adjuster: QuantityAdjuster,
}

impl TradingEngine {
    pub fn new(
        config: StrategyConfig,
        gateway: Arc<dyn ExchangeGateway>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            config,
            gateway,
            sink,
            adjuster: QuantityAdjuster::new(),
        }
    }

    pub fn config(&self) -> &StrategyConfig {
        &self.config
    }

    pub fn gateway_name(&self) -> &str {
        self.gateway.name()
    }

    pub fn emit(&self, event: BotEvent) {
        self.sink.emit(event);
    }

    /// Fetch the current price and evaluate it against `state`.
    pub async fn tick(&mut self, state: &mut PositionState) -> TickOutcome {
        let price = match self.gateway.get_price(&self.config.symbol).await {
            Ok(price) => Ok(price),
            Err(e) => Err(BotError::FeedUnavailable {
                symbol: self.config.symbol.clone(),
                reason: format!("{e:#}"),
            }),
        };
        self.evaluate(state, price).await
    }

    /// Apply the transition rules for one observed price.
    pub async fn evaluate(
        &mut self,
        state: &mut PositionState,
        price: Result<Decimal, BotError>,
    ) -> TickOutcome {
        let price = match price {
            Ok(p) if p > Decimal::ZERO => p,
            Ok(p) => {
                self.emit(BotEvent::PriceUnavailable {
                    error: BotError::FeedUnavailable {
                        symbol: self.config.symbol.clone(),
                        reason: format!("non-positive price {p}"),
                    },
                });
                return TickOutcome::PriceUnavailable;
            }
            Err(error) => {
                self.emit(BotEvent::PriceUnavailable { error });
                return TickOutcome::PriceUnavailable;
            }
        };

        let Some(entry) = state.entry_price() else {
            return self.open(state, price).await;
        };

        let (Some(increment), Some(drop)) = (
            (price - entry).checked_div(entry),
            (entry - price).checked_div(entry),
        ) else {
            self.emit(BotEvent::PriceUnavailable {
                error: BotError::FeedUnavailable {
                    symbol: self.config.symbol.clone(),
                    reason: format!("price {price} out of range for entry {entry}"),
                },
            });
            return TickOutcome::PriceUnavailable;
        };
        debug!(
            symbol = %self.config.symbol,
            price = %price,
            entry = %entry,
            increment = %increment,
            multiplier = state.multiplier(),
            "Evaluating tick"
        );

        if increment >= self.config.target_increment {
            self.take_profit(state, price, entry, increment).await
        } else if drop >= self.config.max_drop_percent {
            self.add(state, price, AddTrigger::Drop).await
        } else if increment >= self.config.breakout_increment {
            self.add(state, price, AddTrigger::Breakout).await
        } else {
            self.emit(BotEvent::Hold { price, increment });
            TickOutcome::NoAction
        }
    }

    // -- Transitions -----------------------------------------------------

    async fn open(&mut self, state: &mut PositionState, price: Decimal) -> TickOutcome {
        self.emit(BotEvent::Opening {
            symbol: self.config.symbol.clone(),
            price,
        });

        match self.place(Side::Buy, self.config.buy_amount, price).await {
            Ok(order) => {
                state.open(price);
                self.filled(order.clone(), state);
                TickOutcome::Opened(order)
            }
            Err(_) => TickOutcome::OrderFailed { side: Side::Buy },
        }
    }

    /// Sell sized off the entry price, so the realized notional is the
    /// original `buy_amount` rather than the appreciated value.
    async fn take_profit(
        &mut self,
        state: &mut PositionState,
        price: Decimal,
        entry: Decimal,
        increment: Decimal,
    ) -> TickOutcome {
        self.emit(BotEvent::TakingProfit {
            symbol: self.config.symbol.clone(),
            price,
            entry,
            increment,
        });

        match self.place(Side::Sell, self.config.buy_amount, entry).await {
            Ok(order) => {
                state.close();
                self.filled(order.clone(), state);
                TickOutcome::TookProfit(order)
            }
            Err(_) => TickOutcome::OrderFailed { side: Side::Sell },
        }
    }

    /// Average-down and breakout share the same sizing and limit logic.
    ///
    /// Past the limit the multiplier goes back to 1 but the entry price is
    /// left where it was, so later ticks keep measuring from that stale
    /// entry.
    async fn add(
        &mut self,
        state: &mut PositionState,
        price: Decimal,
        trigger: AddTrigger,
    ) -> TickOutcome {
        let multiplier = state.multiplier();
        let limit = self.config.martingale_limit;

        if multiplier > limit {
            self.emit(BotEvent::MartingaleLimitReached {
                error: BotError::LimitExceeded { multiplier, limit },
                trigger,
            });
            state.reset_multiplier();
            return TickOutcome::LimitReset { trigger };
        }

        self.emit(BotEvent::Adding {
            symbol: self.config.symbol.clone(),
            price,
            trigger,
            multiplier,
        });

        let Some(notional) = self.config.buy_amount.checked_mul(Decimal::from(multiplier)) else {
            let error = self.rejected(
                Side::Buy,
                format!("notional overflows at x{multiplier}"),
            );
            self.emit(BotEvent::OrderFailed { error });
            return TickOutcome::OrderFailed { side: Side::Buy };
        };

        match self.place(Side::Buy, notional, price).await {
            Ok(order) => {
                state.add(price);
                self.filled(order.clone(), state);
                TickOutcome::Added { order, trigger }
            }
            Err(_) => TickOutcome::OrderFailed { side: Side::Buy },
        }
    }

    fn filled(&self, order: Order, state: &PositionState) {
        self.emit(BotEvent::OrderFilled {
            order,
            position: *state,
        });
    }

    // -- Order placement -------------------------------------------------

    /// Size `notional / reference_price`, normalize to the lot step and
    /// place a market order. Every failure is reported as `OrderRejected`.
    async fn place(
        &mut self,
        side: Side,
        notional: Decimal,
        reference_price: Decimal,
    ) -> Result<Order, BotError> {
        let result = self.try_place(side, notional, reference_price).await;
        if let Err(error) = &result {
            self.emit(BotEvent::OrderFailed {
                error: error.clone(),
            });
        }
        result
    }

    async fn try_place(
        &mut self,
        side: Side,
        notional: Decimal,
        reference_price: Decimal,
    ) -> Result<Order, BotError> {
        let symbol = &self.config.symbol;
        let raw = notional.checked_div(reference_price).ok_or_else(|| {
            self.rejected(side, format!("cannot size {notional} at {reference_price}"))
        })?;

        let adjustment = self
            .adjuster
            .normalize(self.gateway.as_ref(), symbol, raw)
            .await;
        if let Adjustment::Unadjusted { error, .. } = &adjustment {
            self.sink.emit(BotEvent::QuantityUnadjusted {
                error: error.clone(),
            });
        }

        let quantity = adjustment.quantity();
        if quantity <= Decimal::ZERO {
            return Err(self.rejected(side, format!("quantity {raw} is below the lot step")));
        }

        self.gateway
            .place_market_order(symbol, side, quantity)
            .await
            .map(|order| order.with_requested_quantity(raw))
            .map_err(|e| self.rejected(side, format!("{e:#}")))
    }

    fn rejected(&self, side: Side, reason: String) -> BotError {
        BotError::OrderRejected {
            symbol: self.config.symbol.clone(),
            side,
            reason,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
