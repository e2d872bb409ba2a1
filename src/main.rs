//! DIPBOT: Multi-pool dip-buying bot
//!
//! Entry point. Loads configuration, initialises structured logging,
//! discovers pools, restores state from disk (or creates fresh), and runs
//! the opportunity scheduler until Ctrl+C.

use anyhow::{bail, Result};
use chrono::Utc;
use secrecy::SecretString;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use dipbot::config::{self, DiscoveryConfig};
use dipbot::discovery::raydium::RaydiumDiscovery;
use dipbot::discovery::{PoolDiscovery, StaticDiscovery};
use dipbot::engine::accountant::BotState;
use dipbot::engine::scheduler::{Scheduler, StopReason};
use dipbot::execution::paper::PaperGateway;
use dipbot::feed::replay::ReplayFeed;
use dipbot::notify::telegram::TelegramNotifier;
use dipbot::notify::{BotEvent, CompositeNotifier, LogNotifier, Notifier};
use dipbot::storage;

const BANNER: &str = r#"
 ____  ___ ____  ____   ___ _____
|  _ \|_ _|  _ \| __ ) / _ \_   _|
| | | || || |_) |  _ \| | | || |
| |_| || ||  __/| |_) | |_| || |
|____/|___|_|   |____/ \___/ |_|

  Multi-pool dip buyer with MEV pump protection
  v0.1.0
"#;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let config_path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("DIPBOT_CONFIG").ok())
        .unwrap_or_else(|| "config.toml".to_string());
    let cfg = config::AppConfig::load(&config_path)?;

    init_logging();

    println!("{BANNER}");
    info!(
        bot_name = %cfg.bot.name,
        config = %config_path,
        dry_run = cfg.bot.dry_run,
        "DIPBOT starting up"
    );

    if !cfg.bot.dry_run {
        bail!("Live execution is not available in this build; set bot.dry_run = true");
    }

    let settings = cfg.engine_settings();

    // -- Pools -----------------------------------------------------------

    let discovery: Box<dyn PoolDiscovery> = match &cfg.discovery {
        DiscoveryConfig::Static { .. } => Box::new(StaticDiscovery::new(cfg.static_pools())),
        DiscoveryConfig::Raydium { tokens } => {
            Box::new(RaydiumDiscovery::new(tokens.clone(), cfg.trading.min_sol_reserve)?)
        }
    };
    let pools = discovery.list_configured_pools().await?;
    info!(count = pools.len(), "Pools discovered");

    // -- State -------------------------------------------------------------

    let state_path = cfg
        .bot
        .state_file
        .clone()
        .unwrap_or_else(|| storage::DEFAULT_STATE_FILE.to_string());
    let state = match storage::load_state(Some(&state_path))? {
        Some(s) => {
            info!(
                completed = s.trades_completed,
                win_rate = format!("{:.1}%", s.win_rate()),
                pnl = format!("{:.6} SOL", s.total_pnl_sol),
                "Resumed from saved state"
            );
            s
        }
        None => BotState::new(Utc::now()),
    };

    // -- Components ------------------------------------------------------

    let feed = Arc::new(ReplayFeed::load(
        &cfg.feed.replay_path,
        Duration::from_millis(cfg.feed.replay_interval_ms),
    )?);
    let gateway = Arc::new(PaperGateway::new());
    let notifier: Arc<dyn Notifier> = Arc::new(build_notifier(&cfg.alerts)?);

    notifier.notify(BotEvent::Started {
        pools: pools.clone(),
        price_drop_percentage: settings.price_drop_percentage,
        max_price_drop_percentage: settings.max_price_drop_percentage,
        profit_target_percentage: settings.profit_target_percentage,
        trade_amount: settings.trade_amount,
        slippage: settings.slippage,
        dry_run: cfg.bot.dry_run,
    });

    // -- Run -------------------------------------------------------------

    info!("Entering main loop. Press Ctrl+C to stop.");

    let scheduler = Scheduler::new(pools, feed, gateway, notifier.clone(), settings)
        .with_state(state)
        .with_persistence(state_path);

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
        info!("Shutdown signal received.");
    };

    let report = scheduler.run(shutdown).await?;

    let reason = match report.stop_reason {
        StopReason::Shutdown => "shutdown requested".to_string(),
        StopReason::AllPoolsExcluded => "no pools left to monitor".to_string(),
    };
    notifier.notify(BotEvent::Stopped {
        reason,
        at: Utc::now(),
    });

    info!(
        cycles = report.results.len(),
        discarded = report.triggers_discarded,
        completed = report.state.trades_completed,
        failed = report.state.trades_failed,
        pnl = format!("{:.6} SOL", report.state.total_pnl_sol),
        held = report.state.held_positions.len(),
        "DIPBOT shut down cleanly."
    );

    // Let the alert task flush the final message.
    tokio::time::sleep(Duration::from_millis(500)).await;

    Ok(())
}

/// Log notifier always; Telegram when both env vars are configured and set.
fn build_notifier(alerts: &config::AlertsConfig) -> Result<CompositeNotifier> {
    let mut composite = CompositeNotifier::new().with(Arc::new(LogNotifier));

    let (Some(token_env), Some(chat_env)) = (&alerts.telegram_bot_token_env, &alerts.telegram_chat_id_env)
    else {
        return Ok(composite);
    };

    match (
        config::AppConfig::resolve_env(token_env),
        config::AppConfig::resolve_env(chat_env),
    ) {
        (Ok(token), Ok(chat_id)) => {
            let telegram = TelegramNotifier::spawn(SecretString::new(token), chat_id)?;
            composite = composite.with(Arc::new(telegram));
            info!("Telegram alerts enabled");
        }
        _ => warn!("Telegram alert env vars not set, alerts disabled"),
    }

    Ok(composite)
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("dipbot=info"));

    let json_logging = std::env::var("DIPBOT_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt().with_env_filter(env_filter).with_target(true).init();
    }
}
