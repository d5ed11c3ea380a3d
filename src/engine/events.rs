//! Bot events and the sinks that receive them.
//!
//! Every transition, skipped action and recovered error is emitted as a
//! `BotEvent` through an injected `EventSink`. This is the controller's only
//! view into a running loop.

use rust_decimal::Decimal;
use std::fmt;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::position::PositionState;
use crate::types::{BotError, Order};

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// Which threshold triggered an add-on buy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddTrigger {
    /// Price fell `max_drop_percent` below entry.
    Drop,
    /// Price rose `breakout_increment` above entry.
    Breakout,
}

impl fmt::Display for AddTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddTrigger::Drop => write!(f, "price drop"),
            AddTrigger::Breakout => write!(f, "bullish breakout"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum BotEvent {
    Started {
        symbol: String,
        gateway: String,
    },
    /// Loop exited. `position` is the state being discarded.
    Stopped {
        symbol: String,
        position: PositionState,
    },
    PriceUnavailable {
        error: BotError,
    },
    Opening {
        symbol: String,
        price: Decimal,
    },
    TakingProfit {
        symbol: String,
        price: Decimal,
        entry: Decimal,
        increment: Decimal,
    },
    Adding {
        symbol: String,
        price: Decimal,
        trigger: AddTrigger,
        multiplier: u32,
    },
    MartingaleLimitReached {
        error: BotError,
        trigger: AddTrigger,
    },
    QuantityUnadjusted {
        error: BotError,
    },
    OrderFilled {
        order: Order,
        position: PositionState,
    },
    OrderFailed {
        error: BotError,
    },
    Hold {
        price: Decimal,
        increment: Decimal,
    },
}

/// Log severity of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Debug,
    Info,
    Warn,
    Error,
}

impl BotEvent {
    pub fn severity(&self) -> Severity {
        match self {
            BotEvent::Hold { .. } => Severity::Debug,
            BotEvent::PriceUnavailable { .. } | BotEvent::QuantityUnadjusted { .. } => {
                Severity::Warn
            }
            BotEvent::Stopped { position, .. } if !position.is_flat() => Severity::Warn,
            BotEvent::OrderFailed { .. } => Severity::Error,
            _ => Severity::Info,
        }
    }
}

impl fmt::Display for BotEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BotEvent::Started { symbol, gateway } => {
                write!(f, "Starting trading bot on {symbol} via {gateway}")
            }
            BotEvent::Stopped { symbol, position } => match position.entry_price() {
                Some(entry) => write!(
                    f,
                    "Bot stopped with an open {symbol} position (entry {entry}, x{}); \
                     it will not be tracked after restart",
                    position.multiplier()
                ),
                None => write!(f, "Bot stopped ({symbol} flat)"),
            },
            BotEvent::PriceUnavailable { error } => write!(f, "{error}"),
            BotEvent::Opening { symbol, price } => write!(f, "Buying {symbol} at {price}"),
            BotEvent::TakingProfit {
                symbol,
                price,
                entry,
                increment,
            } => write!(
                f,
                "Selling {symbol} at {price} (entry {entry}, {})",
                percent(*increment)
            ),
            BotEvent::Adding {
                symbol,
                price,
                trigger,
                multiplier,
            } => write!(
                f,
                "Buying more {symbol} at {price} due to {trigger} (x{multiplier})"
            ),
            BotEvent::MartingaleLimitReached { error, trigger } => {
                write!(f, "{error} on {trigger}; resetting multiplier")
            }
            BotEvent::QuantityUnadjusted { error } => {
                write!(f, "{error}; using unadjusted quantity")
            }
            BotEvent::OrderFilled { order, position } => match order.notional() {
                Some(notional) => {
                    write!(f, "Order filled: {order}, notional {notional} -> {position}")
                }
                None => write!(f, "Order filled: {order} -> {position}"),
            },
            BotEvent::OrderFailed { error } => write!(f, "{error}"),
            BotEvent::Hold { price, increment } => write!(
                f,
                "No action at {price} ({} from entry)",
                percent(*increment)
            ),
        }
    }
}

/// Signed percentage of a fraction; the raw fraction if it cannot be scaled.
fn percent(fraction: Decimal) -> String {
    match fraction.checked_mul(Decimal::ONE_HUNDRED) {
        Some(pct) => format!("{pct:+.2}%"),
        None => format!("{fraction:+}x"),
    }
}

// ---------------------------------------------------------------------------
// Sinks
// ---------------------------------------------------------------------------

/// Receiver of bot events. Implementations must not block.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: BotEvent);
}

/// Writes every event to the `tracing` subscriber.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: BotEvent) {
        match event.severity() {
            Severity::Debug => debug!(target: "martingale_bot::events", "{event}"),
            Severity::Info => info!(target: "martingale_bot::events", "{event}"),
            Severity::Warn => warn!(target: "martingale_bot::events", "{event}"),
            Severity::Error => error!(target: "martingale_bot::events", "{event}"),
        }
    }
}

/// Forwards events to the controller over an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<BotEvent>,
}

impl ChannelSink {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<BotEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event: BotEvent) {
        // A dropped receiver means nobody is listening any more.
        let _ = self.tx.send(event);
    }
}
