//! Scheduler lifecycle and end-to-end strategy runs.

use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};

use martingale_bot::engine::{AddTrigger, BotEvent, ChannelSink, PositionState, Scheduler};
use martingale_bot::types::{BotError, Side};

use crate::mock_exchange::{drain, strategy, wait_for, MockExchange};

const TIMEOUT: Duration = Duration::from_secs(2);

fn scheduler(
    exchange: &Arc<MockExchange>,
) -> (Scheduler, tokio::sync::mpsc::UnboundedReceiver<BotEvent>) {
    let (sink, rx) = ChannelSink::channel();
    (Scheduler::new(exchange.clone(), Arc::new(sink)), rx)
}

#[tokio::test]
async fn test_full_cycle_open_average_take_profit() {
    let exchange = Arc::new(MockExchange::new(
        &[dec!(100), dec!(89), dec!(94)],
        dec!(0.001),
    ));
    let (mut scheduler, mut rx) = scheduler(&exchange);

    scheduler.start(strategy(5)).unwrap();
    assert!(wait_for(TIMEOUT, || exchange.orders().len() >= 3).await);
    scheduler.stop().await;

    let orders = exchange.orders();
    assert_eq!(orders[0].side, Side::Buy);
    assert_eq!(orders[0].quantity, dec!(1));
    assert_eq!(orders[0].symbol, "BTCUSDT");

    assert_eq!(orders[1].side, Side::Buy);
    assert_eq!(orders[1].quantity, dec!(1.123));

    // Sold off the averaged entry, not the current price.
    assert_eq!(orders[2].side, Side::Sell);
    assert_eq!(orders[2].quantity, dec!(1.123));

    let events = drain(&mut rx);
    assert!(matches!(events.first(), Some(BotEvent::Started { .. })));
    assert!(events.iter().any(|e| matches!(
        e,
        BotEvent::Adding {
            trigger: AddTrigger::Drop,
            multiplier: 1,
            ..
        }
    )));
    assert!(events
        .iter()
        .any(|e| matches!(e, BotEvent::TakingProfit { .. })));
    assert!(matches!(events.last(), Some(BotEvent::Stopped { .. })));
}

#[tokio::test]
async fn test_martingale_limit_skips_one_add() {
    let exchange = Arc::new(MockExchange::new(
        &[dec!(100), dec!(89), dec!(80), dec!(71)],
        dec!(0.001),
    ));
    let (mut scheduler, mut rx) = scheduler(&exchange);

    let config = martingale_bot::config::StrategyConfig {
        martingale_limit: 1,
        ..strategy(5)
    };
    scheduler.start(config).unwrap();
    assert!(wait_for(TIMEOUT, || exchange.orders().len() >= 3).await);
    scheduler.stop().await;

    // 100 open, 89 add (x1), 80 limit reset, 71 add again at x1.
    let orders = exchange.orders();
    assert_eq!(orders[1].fill_price, dec!(89));
    assert_eq!(orders[2].fill_price, dec!(71));
    assert_eq!(orders[2].quantity, dec!(1.408));

    let events = drain(&mut rx);
    assert!(events.iter().any(|e| matches!(
        e,
        BotEvent::MartingaleLimitReached {
            error: BotError::LimitExceeded {
                multiplier: 2,
                limit: 1
            },
            ..
        }
    )));
}

#[tokio::test]
async fn test_failing_orders_never_change_state() {
    let exchange = Arc::new(MockExchange::new(&[dec!(100)], dec!(0.001)));
    exchange.fail_orders("insufficient balance");
    let (mut scheduler, mut rx) = scheduler(&exchange);

    scheduler.start(strategy(5)).unwrap();
    assert!(wait_for(TIMEOUT, || exchange.price_calls() >= 5).await);
    let position = scheduler.stop().await;

    assert_eq!(position, Some(PositionState::flat()));
    assert!(exchange.orders().is_empty());

    let events = drain(&mut rx);
    let failures = events
        .iter()
        .filter(|e| matches!(e, BotEvent::OrderFailed { .. }))
        .count();
    let openings = events
        .iter()
        .filter(|e| matches!(e, BotEvent::Opening { .. }))
        .count();
    assert!(failures >= 5);
    assert_eq!(failures, openings);
}

#[tokio::test]
async fn test_price_outage_then_recovery() {
    let exchange = Arc::new(MockExchange::new(&[dec!(100)], dec!(0.001)));
    exchange.fail_prices("503 Service Unavailable");
    let (mut scheduler, mut rx) = scheduler(&exchange);

    scheduler.start(strategy(5)).unwrap();
    assert!(wait_for(TIMEOUT, || exchange.price_calls() >= 3).await);
    assert!(scheduler.is_running());
    assert!(exchange.orders().is_empty());

    exchange.restore_prices();
    assert!(wait_for(TIMEOUT, || !exchange.orders().is_empty()).await);
    let position = scheduler.stop().await;

    assert_eq!(position, Some(PositionState::held(dec!(100), 1)));
    assert!(drain(&mut rx)
        .iter()
        .any(|e| matches!(e, BotEvent::PriceUnavailable { .. })));
}

#[tokio::test]
async fn test_no_exchange_calls_after_stop() {
    let exchange = Arc::new(MockExchange::new(&[dec!(100)], dec!(0.001)));
    let (mut scheduler, _rx) = scheduler(&exchange);

    scheduler.start(strategy(5)).unwrap();
    assert!(wait_for(TIMEOUT, || exchange.price_calls() >= 3).await);
    scheduler.stop().await;
    assert!(!scheduler.is_running());

    let calls = exchange.price_calls();
    let orders = exchange.orders().len();
    tokio::time::sleep(Duration::from_millis(40)).await;
    assert_eq!(exchange.price_calls(), calls);
    assert_eq!(exchange.orders().len(), orders);
}

#[tokio::test]
async fn test_stop_waits_for_in_flight_order() {
    let exchange = Arc::new(MockExchange::new(&[dec!(100)], dec!(0.001)));
    exchange.set_order_delay(Duration::from_millis(100));
    let (mut scheduler, mut rx) = scheduler(&exchange);

    scheduler.start(strategy(5)).unwrap();
    assert!(wait_for(TIMEOUT, || exchange.price_calls() >= 1).await);
    let position = scheduler.stop().await;

    // The order was allowed to finish and its fill was applied.
    assert_eq!(exchange.orders().len(), 1);
    assert_eq!(position, Some(PositionState::held(dec!(100), 1)));

    let events = drain(&mut rx);
    assert!(matches!(
        events.last(),
        Some(BotEvent::Stopped { position, .. }) if !position.is_flat()
    ));
}

#[tokio::test]
async fn test_restart_begins_flat() {
    let exchange = Arc::new(MockExchange::new(&[dec!(100)], dec!(0.001)));
    let (mut scheduler, _rx) = scheduler(&exchange);

    scheduler.start(strategy(5)).unwrap();
    assert!(wait_for(TIMEOUT, || exchange.orders().len() == 1).await);
    assert_eq!(
        scheduler.stop().await,
        Some(PositionState::held(dec!(100), 1))
    );

    // Same price, but the new run has no memory of the open position.
    scheduler.start(strategy(5)).unwrap();
    assert!(wait_for(TIMEOUT, || exchange.orders().len() == 2).await);
    scheduler.stop().await;

    let orders = exchange.orders();
    assert!(orders.iter().all(|o| o.side == Side::Buy));
}

#[tokio::test]
async fn test_stop_is_idempotent() {
    let exchange = Arc::new(MockExchange::new(&[dec!(100)], dec!(0.001)));
    let (mut scheduler, _rx) = scheduler(&exchange);

    assert_eq!(scheduler.stop().await, None);
    assert_ok!(scheduler.start(strategy(5)));
    let err = assert_err!(scheduler.start(strategy(5)));
    assert_eq!(err, BotError::AlreadyRunning);
    assert!(scheduler.stop().await.is_some());
    assert_eq!(scheduler.stop().await, None);
}
