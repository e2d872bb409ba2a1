//! End-to-end dry run: recorded vault balances replayed through the
//! scheduler with paper execution and state persistence.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use dipbot::engine::retry::RetryPolicy;
use dipbot::engine::scheduler::{Scheduler, StopReason};
use dipbot::engine::EngineSettings;
use dipbot::execution::paper::PaperGateway;
use dipbot::feed::replay::{ReplayFeed, ReplayTick};
use dipbot::notify::BotEvent;
use dipbot::storage;
use dipbot::types::{ExitReason, TradeOutcome};

use crate::mocks::{pool, RecordingNotifier};

const ONE_MILLION_TOKENS: u64 = 1_000_000_000_000;

fn tick(quote_sol: u64) -> ReplayTick {
    ReplayTick {
        base_amount: ONE_MILLION_TOKENS,
        quote_amount: quote_sol * 1_000_000_000,
    }
}

fn temp_path() -> String {
    let mut p = std::env::temp_dir();
    p.push(format!("dipbot_sim_state_{}.json", uuid::Uuid::new_v4()));
    p.to_string_lossy().to_string()
}

#[tokio::test(start_paused = true)]
async fn test_replayed_dip_is_bought_and_sold() {
    // 100 SOL -> 92 SOL (8% dip), then recovery to 100 SOL.
    let mut ticks = HashMap::new();
    ticks.insert("BONK".to_string(), vec![tick(100), tick(92), tick(92), tick(100)]);
    let feed = Arc::new(ReplayFeed::new(ticks, Duration::from_millis(100)));
    let gateway = Arc::new(PaperGateway::new());
    let notifier = Arc::new(RecordingNotifier::default());
    let settings = EngineSettings {
        watcher_retry: RetryPolicy::new(3, Duration::from_millis(10), Duration::from_millis(10)),
        ..EngineSettings::default()
    };
    let path = temp_path();

    let report = Scheduler::new(vec![pool("BONK")], feed.clone(), gateway.clone(), notifier.clone(), settings)
        .with_persistence(path.clone())
        .run(futures::future::pending())
        .await
        .unwrap();

    // Replay runs dry, the watcher can no longer subscribe, and the pool is dropped.
    assert_eq!(report.stop_reason, StopReason::AllPoolsExcluded);
    assert_eq!(report.excluded.len(), 1);
    assert_eq!(feed.remaining("BONK"), 0);

    assert_eq!(report.results.len(), 1);
    let result = &report.results[0];
    assert_eq!(result.outcome, TradeOutcome::Completed);
    assert_eq!(result.exit_reason, Some(ExitReason::ProfitTarget));
    assert!((result.trigger_price - 0.000092).abs() < 1e-12);
    assert!(result.is_win());
    assert_eq!(gateway.fills(), 2);

    assert_eq!(notifier.count(|e| matches!(e, BotEvent::PoolExcluded { .. })), 1);
    assert_eq!(notifier.count(|e| matches!(e, BotEvent::BuyConfirmed { .. })), 1);
    assert_eq!(notifier.count(|e| matches!(e, BotEvent::SellConfirmed { .. })), 1);

    let saved = storage::load_state(Some(&path)).unwrap().unwrap();
    assert_eq!(saved.trades_completed, 1);
    assert_eq!(saved.wins, 1);
    assert!(saved.total_pnl_sol > rust_decimal::Decimal::ZERO);

    storage::delete_state(Some(&path)).unwrap();
}
