//! Scheduler behaviour across several pools: slot admission, discarded
//! triggers, watcher restarts and shutdown.

use std::sync::Arc;
use std::time::Duration;

use dipbot::engine::scheduler::{Scheduler, StopReason};
use dipbot::engine::EngineSettings;
use dipbot::notify::BotEvent;
use dipbot::types::{ExitReason, TradeOutcome, TradeState};

use crate::mocks::{pool, CountingGateway, RecordingNotifier, ScriptedFeed};

fn scheduler(
    pools: &[&str],
    feed: Arc<ScriptedFeed>,
    gateway: Arc<CountingGateway>,
    notifier: Arc<RecordingNotifier>,
    settings: EngineSettings,
) -> Scheduler {
    Scheduler::new(pools.iter().map(|a| pool(a)).collect(), feed, gateway, notifier, settings)
}

#[tokio::test(start_paused = true)]
async fn test_simultaneous_triggers_admit_one_cycle() {
    let feed = Arc::new(
        ScriptedFeed::new()
            .script("AAA", vec![vec![1.0, 0.9], vec![0.9, 1.0]])
            .script("BBB", vec![vec![1.0, 0.9], vec![0.9, 1.0]]),
    );
    let gateway = Arc::new(CountingGateway::new(Duration::from_secs(1)));
    let notifier = Arc::new(RecordingNotifier::default());

    let report = scheduler(
        &["AAA", "BBB"],
        feed.clone(),
        gateway.clone(),
        notifier.clone(),
        EngineSettings::default(),
    )
    .run(tokio::time::sleep(Duration::from_secs(60)))
    .await
    .unwrap();

    assert_eq!(report.stop_reason, StopReason::Shutdown);
    assert_eq!(report.results.len(), 1);
    assert_eq!(report.triggers_discarded, 1);
    assert_eq!(gateway.max_in_flight(), 1);
    assert_eq!(gateway.submitted(), 2);

    let result = &report.results[0];
    assert_eq!(result.outcome, TradeOutcome::Completed);
    assert_eq!(result.exit_reason, Some(ExitReason::ProfitTarget));
    assert!(result.is_win());

    let events = notifier.events();
    let admitted = events
        .iter()
        .find_map(|e| match e {
            BotEvent::TriggerAdmitted { trigger, .. } => Some(trigger.pool.address.clone()),
            _ => None,
        })
        .unwrap();
    let discarded = events
        .iter()
        .find_map(|e| match e {
            BotEvent::TriggerDiscarded { trigger } => Some(trigger.pool.address.clone()),
            _ => None,
        })
        .unwrap();
    assert_ne!(admitted, discarded);

    // The loser is only dealt with once the slot is free again.
    let finished_at = events.iter().position(|e| matches!(e, BotEvent::TradeFinished(_))).unwrap();
    let discarded_at = events.iter().position(|e| matches!(e, BotEvent::TriggerDiscarded { .. })).unwrap();
    assert!(finished_at < discarded_at);

    // Both watchers came back: two initial, one profit monitor, two restarts.
    assert!(feed.subscriptions() >= 5);
}

#[tokio::test(start_paused = true)]
async fn test_single_slot_under_constant_triggers() {
    let feed = Arc::new(ScriptedFeed::repeating(vec![1.0, 0.9, 1.0]));
    let gateway = Arc::new(CountingGateway::new(Duration::from_secs(1)));
    let notifier = Arc::new(RecordingNotifier::default());
    let settings = EngineSettings {
        mev_pump_threshold: 50.0,
        ..EngineSettings::default()
    };

    let report = scheduler(
        &["AAA", "BBB", "CCC", "DDD"],
        feed,
        gateway.clone(),
        notifier.clone(),
        settings,
    )
    .run(tokio::time::sleep(Duration::from_secs(30)))
    .await
    .unwrap();

    assert!(report.results.len() >= 2);
    assert!(report.triggers_discarded >= 3);
    assert_eq!(gateway.max_in_flight(), 1);
    assert!(report.results.iter().all(|r| r.outcome == TradeOutcome::Completed));

    let mut open = false;
    let mut admitted = 0;
    for event in notifier.events() {
        match event {
            BotEvent::TriggerAdmitted { .. } => {
                assert!(!open, "second cycle admitted while one was active");
                open = true;
                admitted += 1;
            }
            BotEvent::TradeFinished(_) => {
                assert!(open);
                open = false;
            }
            _ => {}
        }
    }
    assert!(!open);
    assert_eq!(admitted, report.results.len());
    assert_eq!(report.state.trades_completed as usize, report.results.len());
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_abandons_monitoring_cycle_after_grace() {
    // No further scripts: the profit monitor never sees a price.
    let feed = Arc::new(ScriptedFeed::new().script("AAA", vec![vec![1.0, 0.9]]));
    let gateway = Arc::new(CountingGateway::new(Duration::from_millis(100)));
    let notifier = Arc::new(RecordingNotifier::default());
    let settings = EngineSettings {
        shutdown_grace: Duration::from_secs(5),
        ..EngineSettings::default()
    };

    let report = scheduler(&["AAA"], feed, gateway, notifier.clone(), settings)
        .run(tokio::time::sleep(Duration::from_secs(10)))
        .await
        .unwrap();

    assert_eq!(report.stop_reason, StopReason::Shutdown);
    assert!(report.results.is_empty());
    assert!(report.abandoned.is_some());

    assert_eq!(report.state.held_positions.len(), 1);
    let held = &report.state.held_positions[0];
    assert_eq!(held.pool, "AAA/WSOL");
    assert!(held.tokens > rust_decimal::Decimal::ZERO);
    assert!(!held.needs_reconciliation);

    assert_eq!(
        notifier.count(|e| matches!(
            e,
            BotEvent::PositionAbandoned {
                state: TradeState::ProfitMonitoring,
                ..
            }
        )),
        1
    );
    assert_eq!(notifier.count(|e| matches!(e, BotEvent::TradeFinished(_))), 0);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_abandons_hung_sell() {
    let feed = Arc::new(ScriptedFeed::new().script("AAA", vec![vec![1.0, 0.9], vec![1.0]]));
    let gateway = Arc::new(CountingGateway::new(Duration::from_millis(100)).hanging_sells());
    let notifier = Arc::new(RecordingNotifier::default());
    let settings = EngineSettings {
        shutdown_grace: Duration::from_secs(5),
        ..EngineSettings::default()
    };

    let report = scheduler(&["AAA"], feed, gateway, notifier.clone(), settings)
        .run(tokio::time::sleep(Duration::from_secs(10)))
        .await
        .unwrap();

    assert!(report.abandoned.is_some());
    assert_eq!(report.state.held_positions.len(), 1);
    assert_eq!(
        notifier.count(|e| matches!(
            e,
            BotEvent::PositionAbandoned {
                state: TradeState::Selling,
                ..
            }
        )),
        1
    );
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_waits_for_cycle_within_grace() {
    let feed = Arc::new(ScriptedFeed::new().script("AAA", vec![vec![1.0, 0.9], vec![0.9, 1.0]]));
    // Each swap takes 3s; shutdown lands during the buy.
    let gateway = Arc::new(CountingGateway::new(Duration::from_secs(3)));
    let notifier = Arc::new(RecordingNotifier::default());

    let report = scheduler(&["AAA"], feed, gateway, notifier, EngineSettings::default())
        .run(tokio::time::sleep(Duration::from_secs(1)))
        .await
        .unwrap();

    assert_eq!(report.stop_reason, StopReason::Shutdown);
    assert!(report.abandoned.is_none());
    assert_eq!(report.results.len(), 1);
    assert_eq!(report.results[0].outcome, TradeOutcome::Completed);
}

#[tokio::test(start_paused = true)]
async fn test_closed_watcher_restarts_during_cycle() {
    // BBB's stream keeps ending with no prices while AAA's cycle is buying.
    let feed = Arc::new(
        ScriptedFeed::new()
            .script("AAA", vec![vec![1.0, 0.9], vec![0.9, 1.0]])
            .script("BBB", vec![vec![], vec![], vec![]]),
    );
    let gateway = Arc::new(CountingGateway::new(Duration::from_secs(5)));
    let notifier = Arc::new(RecordingNotifier::default());

    let during_buy = tokio::spawn({
        let feed = feed.clone();
        async move {
            tokio::time::sleep(Duration::from_secs(4)).await;
            feed.subscriptions()
        }
    });

    let report = scheduler(&["AAA", "BBB"], feed, gateway, notifier.clone(), EngineSettings::default())
        .run(tokio::time::sleep(Duration::from_secs(60)))
        .await
        .unwrap();

    // AAA once, BBB at 0s, 1s and 3s with the default watcher backoff.
    assert_eq!(during_buy.await.unwrap(), 4);
    assert_eq!(report.results.len(), 1);
    assert_eq!(report.triggers_discarded, 0);
    assert!(report.excluded.is_empty());
}
