//! Martingale averaging bot.
//!
//! Entry point. Loads configuration, initialises structured logging,
//! builds the exchange gateway (live or paper) and runs the scheduler
//! until Ctrl+C.

use anyhow::Result;
use secrecy::SecretString;
use std::sync::Arc;
use tracing::{info, warn};

use martingale_bot::config::{AppConfig, ExchangeConfig};
use martingale_bot::engine::events::{BotEvent, ChannelSink, EventSink, TracingSink};
use martingale_bot::engine::Scheduler;
use martingale_bot::exchange::binance::BinanceClient;
use martingale_bot::exchange::paper::PaperExchange;
use martingale_bot::exchange::ExchangeGateway;

const DEFAULT_CONFIG_PATH: &str = "config.toml";

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let cfg = AppConfig::load(&config_path)?;

    init_logging();

    info!(
        config = %config_path,
        symbol = %cfg.bot.symbol,
        buy_amount = %cfg.bot.buy_amount,
        dry_run = cfg.exchange.dry_run,
        "Martingale bot starting up"
    );

    let (gateway, paper) = build_gateway(&cfg.exchange)?;

    // Events go to the controller; the consumer task logs them.
    let (sink, mut events) = ChannelSink::channel();
    let consumer = tokio::spawn(async move {
        let log = TracingSink;
        while let Some(event) = events.recv().await {
            let stopped = matches!(event, BotEvent::Stopped { .. });
            log.emit(event);
            if stopped {
                break;
            }
        }
    });

    let mut scheduler = Scheduler::new(gateway, Arc::new(sink));
    scheduler.start(cfg.bot.clone())?;
    info!("Bot running. Press Ctrl+C to stop.");

    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for Ctrl+C, stopping now");
    }
    info!("Shutdown signal received.");

    scheduler.stop().await;
    drop(scheduler);
    if let Err(e) = consumer.await {
        warn!(error = %e, "Event consumer terminated abnormally");
    }

    if let Some(paper) = paper {
        info!(
            fills = paper.fills().len(),
            net_quantity = %paper.net_quantity(),
            "[PAPER] Simulated position at shutdown"
        );
    }

    info!("Martingale bot shut down cleanly.");
    Ok(())
}

/// Live Binance client, or a paper gateway over public Binance prices when
/// `dry_run` is set. The paper gateway is also returned on its own so its
/// fills can be reported at shutdown.
fn build_gateway(
    cfg: &ExchangeConfig,
) -> Result<(Arc<dyn ExchangeGateway>, Option<Arc<PaperExchange>>)> {
    let base_url = Some(cfg.base_url.clone());

    if cfg.dry_run {
        warn!("Dry-run mode: orders are simulated, nothing is sent to the exchange");
        let source = Arc::new(BinanceClient::public(base_url)?);
        let paper = Arc::new(PaperExchange::new(source, cfg.paper_step_size));
        let gateway: Arc<dyn ExchangeGateway> = paper.clone();
        return Ok((gateway, Some(paper)));
    }

    let api_key = AppConfig::resolve_env(&cfg.api_key_env)?;
    let api_secret = SecretString::new(AppConfig::resolve_env(&cfg.api_secret_env)?);
    let live: Arc<dyn ExchangeGateway> = Arc::new(BinanceClient::new(
        base_url,
        api_key,
        api_secret,
        cfg.recv_window_ms,
    )?);
    Ok((live, None))
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("martingale_bot=info"));

    let json_logging = std::env::var("BOT_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}
