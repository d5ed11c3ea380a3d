//! Lot-step quantity normalization.
//!
//! Exchanges reject quantities that are not a multiple of the symbol's
//! step size. Quantities are reduced to the step's decimal precision and
//! then floored to the step, so the adjusted quantity never exceeds the
//! requested one.

use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use tracing::debug;

use crate::exchange::ExchangeGateway;
use crate::types::BotError;

/// Max scale supported by `Decimal`.
const MAX_PRECISION: u32 = 28;

/// `floor(log10(1 / step))`, clamped to zero for steps of 1 or more.
pub fn step_precision(step: Decimal) -> u32 {
    if step > dec!(0.1) {
        return 0;
    }
    let mut precision = 0;
    let mut scaled = step * dec!(10);
    while scaled <= Decimal::ONE && precision < MAX_PRECISION {
        precision += 1;
        scaled *= dec!(10);
    }
    precision
}

/// Floor `raw` to an exact multiple of `step`.
pub fn adjust(raw: Decimal, step: Decimal) -> Result<Decimal, BotError> {
    if step <= Decimal::ZERO {
        return Err(BotError::InvalidStep(step));
    }
    let precision = step_precision(step);
    let reduced = raw.round_dp_with_strategy(precision, RoundingStrategy::ToZero);
    Ok(reduced - reduced % step)
}

/// Outcome of normalizing an order quantity.
#[derive(Debug, Clone, PartialEq)]
pub enum Adjustment {
    Adjusted { quantity: Decimal, step: Decimal },
    /// Metadata could not be resolved; the raw quantity is used as-is.
    Unadjusted { quantity: Decimal, error: BotError },
}

impl Adjustment {
    pub fn quantity(&self) -> Decimal {
        match self {
            Adjustment::Adjusted { quantity, .. } | Adjustment::Unadjusted { quantity, .. } => {
                *quantity
            }
        }
    }
}

/// Resolves the symbol's lot step through the gateway and applies it.
///
/// The step is cached after the first successful lookup; failed lookups
/// are retried on the next call.
#[derive(Debug, Default)]
pub struct QuantityAdjuster {
    step: Option<Decimal>,
}

impl QuantityAdjuster {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn cached_step(&self) -> Option<Decimal> {
        self.step
    }

    pub async fn normalize(
        &mut self,
        gateway: &dyn ExchangeGateway,
        symbol: &str,
        raw: Decimal,
    ) -> Adjustment {
        let step = match self.step {
            Some(step) => step,
            None => match gateway.get_lot_step(symbol).await {
                Ok(step) => step,
                Err(e) => {
                    return Adjustment::Unadjusted {
                        quantity: raw,
                        error: BotError::MetadataUnavailable {
                            symbol: symbol.to_string(),
                            reason: format!("{e:#}"),
                        },
                    };
                }
            },
        };

        match adjust(raw, step) {
            Ok(quantity) => {
                self.step = Some(step);
                debug!(symbol, raw = %raw, step = %step, quantity = %quantity, "Quantity adjusted");
                Adjustment::Adjusted { quantity, step }
            }
            Err(error) => Adjustment::Unadjusted {
                quantity: raw,
                error: BotError::MetadataUnavailable {
                    symbol: symbol.to_string(),
                    reason: error.to_string(),
                },
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
