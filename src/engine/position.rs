//! Averaging position state.
//!
//! Owned by the scheduler task for the lifetime of one run and handed to
//! each tick by `&mut`. A fresh run always starts flat.

use rust_decimal::Decimal;
use serde::Serialize;
use std::fmt;

/// The current averaging position.
///
/// `entry_price == None` means flat. The multiplier can be back at 1 while
/// a position is still held (martingale limit reset), so the two fields are
/// not tied to each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PositionState {
    entry_price: Option<Decimal>,
    multiplier: u32,
}

impl Default for PositionState {
    fn default() -> Self {
        Self::flat()
    }
}

impl PositionState {
    pub fn flat() -> Self {
        Self {
            entry_price: None,
            multiplier: 1,
        }
    }

    /// State with an open position, for resuming tests or simulations.
    pub fn held(entry_price: Decimal, multiplier: u32) -> Self {
        Self {
            entry_price: Some(entry_price),
            multiplier: multiplier.max(1),
        }
    }

    pub fn entry_price(&self) -> Option<Decimal> {
        self.entry_price
    }

    pub fn multiplier(&self) -> u32 {
        self.multiplier
    }

    pub fn is_flat(&self) -> bool {
        self.entry_price.is_none()
    }

    /// First buy filled: FLAT → HELD. The multiplier is left alone.
    pub fn open(&mut self, price: Decimal) {
        self.entry_price = Some(price);
    }

    /// Add-on buy filled: move the entry to the fill price and double the
    /// multiplier.
    pub fn add(&mut self, price: Decimal) {
        self.entry_price = Some(price);
        self.multiplier = self.multiplier.saturating_mul(2);
    }

    /// Take-profit filled: HELD → FLAT.
    pub fn close(&mut self) {
        self.entry_price = None;
        self.multiplier = 1;
    }

    /// Martingale limit exceeded. The entry price is deliberately kept.
    pub fn reset_multiplier(&mut self) {
        self.multiplier = 1;
    }
}

impl fmt::Display for PositionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.entry_price {
            Some(entry) => write!(f, "HELD entry={entry} x{}", self.multiplier),
            None => write!(f, "FLAT x{}", self.multiplier),
        }
    }
}
