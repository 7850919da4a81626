//! Orchestrator Integration Tests
//!
//! Tests whole runs against fakes:
//! - Transaction ceilings hold with concurrent workers
//! - A run ends by itself once every account is finished
//! - Start/stop conflicts and accounts that cannot start
//! - Discovery accounts buy what their detector finds

use std::sync::atomic::Ordering;
use std::time::Duration;

use sniper_operator::config::{AccountConfig, SnipeConfig};
use sniper_operator::error::AppError;
use sniper_operator::events::{LogEvent, RunPhase};
use sniper_operator::models::PurchaseTarget;

use crate::fakes::*;

fn scout(max_transactions: u32) -> AccountConfig {
    AccountConfig {
        name: "scout".to_string(),
        auth_token: Some("seed".to_string()),
        wallet_secret: Some(secret(MNEMONIC)),
        max_transactions,
        snipe: Some(SnipeConfig {
            enabled: true,
            ..Default::default()
        }),
        ..Default::default()
    }
}

// =============================================================================
// TRANSACTION CEILING
// =============================================================================

#[tokio::test]
async fn test_ceiling_holds_with_concurrent_workers() {
    let account = AccountConfig {
        threads: 3,
        max_transactions: 2,
        ..direct_account("alpha")
    };
    let rig = Rig::new(vec![account], ScriptedStore::always_orders(1_000_000_000));
    let mut events = rig.orchestrator.subscribe();

    rig.orchestrator.start().await.unwrap();
    assert!(rig.orchestrator.is_running());

    let orchestrator = rig.orchestrator.clone();
    assert!(
        eventually(Duration::from_secs(5), || !orchestrator.is_running()).await,
        "run did not stop after the ceiling"
    );

    assert_eq!(rig.chain.transfers().len(), 2);
    let stats = rig.orchestrator.statistics();
    assert_eq!(stats.total_requests, 2);
    assert_eq!(stats.sent_transactions, 2);

    let statuses = rig.orchestrator.account_statuses();
    assert_eq!(statuses.len(), 1);
    assert!(!statuses[0].active);
    assert_eq!(statuses[0].transactions_completed, 2);

    let mut phases = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let LogEvent::RunState(state) = event {
            phases.push(state.state);
        }
    }
    assert_eq!(phases, vec![RunPhase::Running, RunPhase::Stopping, RunPhase::Stopped]);
}

#[tokio::test]
async fn test_failed_purchases_do_not_count_toward_ceiling() {
    let account = AccountConfig {
        max_transactions: 1,
        ..direct_account("alpha")
    };
    let rig = Rig::new(
        vec![account],
        ScriptedStore::new(vec![unauthorized(401), unauthorized(401)], order("o", 1_000, "EQpayout")),
    );

    rig.orchestrator.start().await.unwrap();
    let orchestrator = rig.orchestrator.clone();
    assert!(eventually(Duration::from_secs(5), || !orchestrator.is_running()).await);

    let stats = rig.orchestrator.statistics();
    assert_eq!(stats.failed_requests, 1);
    assert_eq!(stats.sent_transactions, 1);
    assert_eq!(rig.chain.transfers().len(), 1);
}

#[tokio::test]
async fn test_ceiling_during_slow_start_keeps_run_alive() {
    let proxy = "10.0.0.1:3128";
    let alpha = AccountConfig {
        max_transactions: 1,
        ..direct_account("alpha")
    };
    let beta = AccountConfig {
        wallet_secret: Some(secret(
            "zoo ability able about above absent absorb abstract absurd abuse access accident",
        )),
        proxy: Some(proxy.to_string()),
        ..direct_account("beta")
    };
    let chain = RecordingChain::new(Duration::from_millis(5));
    let connector = StaticConnector::slow_for(chain.clone(), proxy.parse().unwrap(), Duration::from_millis(300));
    let rig = Rig::with_connector(
        vec![alpha, beta],
        ScriptedStore::always_orders(1_000),
        chain.clone(),
        connector,
    );

    rig.orchestrator.start().await.unwrap();
    assert_eq!(rig.orchestrator.account_activity(), (2, 2));

    let transfers = chain.clone();
    assert!(
        eventually(Duration::from_secs(3), || {
            let all = transfers.transfers();
            all.iter().any(|t| t.from == "EQabandon") && all.iter().any(|t| t.from == "EQzoo")
        })
        .await,
        "both accounts should pay"
    );

    // alpha is finished, beta keeps the run going
    let orchestrator = rig.orchestrator.clone();
    assert!(eventually(Duration::from_secs(2), || orchestrator.account_activity() == (1, 2)).await);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(rig.orchestrator.is_running());
    assert_eq!(
        chain.transfers().iter().filter(|t| t.from == "EQabandon").count(),
        1
    );

    rig.orchestrator.stop().await.unwrap();
    assert!(!rig.orchestrator.is_running());
}

// =============================================================================
// START / STOP
// =============================================================================

#[tokio::test]
async fn test_start_twice_conflicts_and_stop_ends_run() {
    let rig = Rig::new(
        vec![direct_account("alpha")],
        ScriptedStore::always_orders(1_000),
    );

    rig.orchestrator.start().await.unwrap();
    let second = rig.orchestrator.start().await;
    assert!(matches!(second, Err(AppError::Conflict(_))));

    tokio::time::sleep(Duration::from_millis(50)).await;
    rig.orchestrator.stop().await.unwrap();
    assert!(!rig.orchestrator.is_running());
    assert!(matches!(rig.orchestrator.stop().await, Err(AppError::Conflict(_))));

    // Nothing new is attempted after the stop
    let attempts = rig.orchestrator.statistics().total_requests;
    assert!(attempts > 0);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(rig.orchestrator.statistics().total_requests, attempts);
}

#[tokio::test]
async fn test_stop_when_idle_conflicts() {
    let rig = Rig::new(vec![direct_account("alpha")], ScriptedStore::always_orders(1_000));
    assert!(matches!(rig.orchestrator.stop().await, Err(AppError::Conflict(_))));
}

#[tokio::test]
async fn test_no_valid_account_refuses_to_start() {
    let broken = AccountConfig {
        collection: 0,
        ..direct_account("broken")
    };
    let rig = Rig::new(vec![broken], ScriptedStore::always_orders(1_000));

    let result = rig.orchestrator.start().await;
    assert!(matches!(result, Err(AppError::Validation(_))));
    assert!(!rig.orchestrator.is_running());
    assert!(rig.store.calls().is_empty());
}

#[tokio::test]
async fn test_misconfigured_account_is_skipped() {
    let broken = AccountConfig {
        auth_token: None,
        ..direct_account("broken")
    };
    let rig = Rig::new(
        vec![direct_account("alpha"), broken],
        ScriptedStore::always_orders(1_000),
    );

    rig.orchestrator.start().await.unwrap();
    assert_eq!(rig.orchestrator.configured_accounts(), 2);
    assert_eq!(rig.orchestrator.account_activity(), (1, 1));

    rig.orchestrator.stop().await.unwrap();
}

#[tokio::test]
async fn test_wallet_setup_failure_skips_account() {
    let chain = RecordingChain::new(Duration::from_millis(1));
    let rig = Rig::with_connector(
        vec![direct_account("alpha")],
        ScriptedStore::always_orders(1_000),
        chain.clone(),
        StaticConnector::failing(chain),
    );

    let result = rig.orchestrator.start().await;
    assert!(matches!(result, Err(AppError::Validation(_))));
    assert!(rig.store.calls().is_empty());
}

// =============================================================================
// DISCOVERY
// =============================================================================

#[tokio::test]
async fn test_discovery_buys_new_sub_item() {
    let rig = Rig::new(vec![scout(1)], ScriptedStore::always_orders(2_000_000_000));
    rig.catalog.add_item(7, "Limited Drop");
    rig.catalog.add_sub_item(7, 70, 100, 1_000_000_000);

    rig.orchestrator.start().await.unwrap();

    // First poll after the baseline
    let catalog = rig.catalog.clone();
    assert!(eventually(Duration::from_secs(2), || catalog.list_calls.load(Ordering::SeqCst) >= 2).await);
    assert!(rig.store.calls().is_empty());

    rig.catalog.add_sub_item(7, 71, 10, 3_000_000_000);

    let orchestrator = rig.orchestrator.clone();
    assert!(
        eventually(Duration::from_secs(5), || !orchestrator.is_running()).await,
        "discovery account did not finish"
    );

    let calls = rig.store.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(
        calls[0].1,
        PurchaseTarget::Discovered {
            collection: 7,
            character: 71
        }
    );

    let transfers = rig.chain.transfers();
    assert_eq!(transfers.len(), 1);
    assert_eq!(transfers[0].amount, 2_000_000_000 + 250_000_000);
    assert_eq!(rig.orchestrator.statistics().sent_transactions, 1);

    // The detector's poll loop has exited with the run
    let polls = rig.catalog.list_calls.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(80)).await;
    assert_eq!(rig.catalog.list_calls.load(Ordering::SeqCst), polls);
}
