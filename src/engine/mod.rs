//! Trading engine: quantity normalization, position state, the martingale
//! state machine and the polling scheduler that drives it.

pub mod events;
pub mod position;
pub mod quantity;
pub mod scheduler;
pub mod trader;

pub use events::{AddTrigger, BotEvent, ChannelSink, EventSink, TracingSink};
pub use position::PositionState;
pub use quantity::{Adjustment, QuantityAdjuster};
pub use scheduler::Scheduler;
pub use trader::{TickOutcome, TradingEngine};
