//! Polling loop with start/stop control.
//!
//! `start` spawns a Tokio task that ticks the trading engine at the
//! configured interval. `stop` signals the task over a watch channel and
//! waits for it to exit. Cancellation is only observed between ticks, so
//! an exchange call that is already in flight always completes and its
//! result is applied before the loop ends.

use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use super::events::{BotEvent, EventSink};
use super::position::PositionState;
use super::trader::TradingEngine;
use crate::config::StrategyConfig;
use crate::exchange::ExchangeGateway;
use crate::types::BotError;

/// Handle to a live run.
struct RunHandle {
    cancel: watch::Sender<bool>,
    task: JoinHandle<PositionState>,
}

/// Owns at most one running trading loop.
pub struct Scheduler {
    gateway: Arc<dyn ExchangeGateway>,
    sink: Arc<dyn EventSink>,
    run: Option<RunHandle>,
}

impl Scheduler {
    pub fn new(gateway: Arc<dyn ExchangeGateway>, sink: Arc<dyn EventSink>) -> Self {
        Self {
            gateway,
            sink,
            run: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.run
            .as_ref()
            .map_or(false, |run| !run.task.is_finished())
    }

    /// Start a new run from a flat position.
    ///
    /// Must be called from within a Tokio runtime. Fails with
    /// `AlreadyRunning` if a loop is active and with `Config` if the
    /// parameters do not validate.
    pub fn start(&mut self, config: StrategyConfig) -> Result<(), BotError> {
        if self.is_running() {
            return Err(BotError::AlreadyRunning);
        }
        let config = config.validated()?;

        info!(
            symbol = %config.symbol,
            buy_amount = %config.buy_amount,
            poll_interval_ms = config.poll_interval_ms,
            martingale_limit = config.martingale_limit,
            gateway = self.gateway.name(),
            "Starting scheduler"
        );

        let (cancel, cancel_rx) = watch::channel(false);
        let engine = TradingEngine::new(config, self.gateway.clone(), self.sink.clone());
        let task = tokio::spawn(run_loop(engine, cancel_rx));

        self.run = Some(RunHandle { cancel, task });
        Ok(())
    }

    /// Stop the active run and wait for its loop to exit.
    ///
    /// Returns the position the run ended with, or `None` when nothing was
    /// running. Calling it again is a no-op.
    pub async fn stop(&mut self) -> Option<PositionState> {
        let run = self.run.take()?;
        // The loop may already have exited; the send error is irrelevant.
        let _ = run.cancel.send(true);

        match run.task.await {
            Ok(position) => {
                info!(position = %position, "Scheduler stopped");
                Some(position)
            }
            Err(e) => {
                error!(error = %e, "Trading loop terminated abnormally");
                None
            }
        }
    }
}

/// Tick until cancelled. Returns the final position.
async fn run_loop(mut engine: TradingEngine, mut cancel: watch::Receiver<bool>) -> PositionState {
    let mut state = PositionState::flat();
    let mut interval = tokio::time::interval(engine.config().poll_interval());
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    engine.emit(BotEvent::Started {
        symbol: engine.config().symbol.clone(),
        gateway: engine.gateway_name().to_string(),
    });

    loop {
        tokio::select! {
            biased;
            changed = cancel.changed() => {
                // Sender dropped: the scheduler is gone, stop as well.
                if changed.is_err() || *cancel.borrow() {
                    break;
                }
                continue;
            }
            _ = interval.tick() => {}
        }

        if *cancel.borrow() {
            break;
        }

        let outcome = engine.tick(&mut state).await;
        debug!(outcome = ?outcome, position = %state, "Tick complete");
    }

    engine.emit(BotEvent::Stopped {
        symbol: engine.config().symbol.clone(),
        position: state,
    });
    state
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
