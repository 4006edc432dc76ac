//! End-to-end scan cycles: entries, exits, settlement, halt and reset.

use chrono::{DateTime, Duration, TimeZone, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use tokio_test::{assert_err, assert_ok};

use augur::engine::scanner::{self, LoopSettings, ScanLoop};
use augur::providers::ProviderRouter;
use augur::strategy::edge::{EdgeConfig, EdgeDetector};
use augur::strategy::risk::{RiskConfig, RiskManager};
use augur::types::{ExitReason, Market, MarketCategory, PositionState, Side};

use crate::mock_venue::{make_market, MockVenue, ScriptedProvider};

struct Harness {
    venue: Arc<MockVenue>,
    fair: Arc<ScriptedProvider>,
    scan: ScanLoop,
}

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 10, 9, 0, 0).unwrap()
}

fn harness_with(markets: Vec<Market>, risk: RiskConfig, settings: LoopSettings) -> Harness {
    let venue = Arc::new(MockVenue::with_markets(markets));
    let fair = Arc::new(ScriptedProvider::default());
    let router = ProviderRouter::new().with_category(MarketCategory::Politics, fair.clone());
    let scan = ScanLoop::new(
        venue.clone(),
        venue.clone(),
        router,
        EdgeDetector::new(EdgeConfig::default()),
        RiskManager::new(risk, t0()),
        settings,
    );
    Harness { venue, fair, scan }
}

fn harness(markets: Vec<Market>) -> Harness {
    harness_with(markets, RiskConfig::default(), LoopSettings::default())
}

/// Calls time out after 50ms.
fn impatient() -> LoopSettings {
    LoopSettings {
        call_timeout: std::time::Duration::from_millis(50),
        ..LoopSettings::default()
    }
}

/// One YES position of 222 contracts at 45¢ on "PRES".
async fn opened_position() -> Harness {
    let mut h = harness(vec![make_market("PRES", dec!(0.45), dec!(0.56))]);
    h.fair.set("PRES", dec!(0.52));
    let report = h.scan.run_cycle(t0()).await;
    assert_eq!(report.activity.opened, 1);
    h
}

/// Quotes and fair value move against the YES position.
fn turn_against(h: &Harness) {
    h.venue.set_prices("PRES", dec!(0.46), dec!(0.55));
    h.fair.set("PRES", dec!(0.40));
}

// -- Entries ---------------------------------------------------------------

#[tokio::test]
async fn test_opens_222_yes_contracts() {
    let h = opened_position().await;

    let p = h.scan.book().get("PRES").unwrap();
    assert_eq!(p.side, Side::Yes);
    assert_eq!(p.size, 222);
    assert_eq!(p.entry_price, dec!(0.45));
    assert_eq!(p.entry_fair_value, dec!(0.52));
    assert_eq!(p.state, PositionState::Open);

    let state = h.scan.risk().state();
    assert_eq!(state.balance, dec!(9900.10));
    assert_eq!(state.committed, dec!(99.90));
    assert_eq!(state.open_positions, 1);
    assert!(p.cost_basis() <= dec!(10000) * dec!(0.01));

    let orders = h.venue.orders();
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].side, Side::Yes);
    assert_eq!(orders[0].size, 222);
    assert_eq!(orders[0].price, dec!(0.45));
    assert!(!orders[0].closing);
}

#[tokio::test]
async fn test_unavailable_estimate_skips_market() {
    let mut h = harness(vec![
        make_market("PRES", dec!(0.45), dec!(0.56)),
        make_market("SENATE", dec!(0.30), dec!(0.71)),
    ]);
    h.fair.set("PRES", dec!(0.52));

    let report = h.scan.run_cycle(t0()).await;
    assert_eq!(report.activity.candidates, 2);
    assert_eq!(report.activity.estimates, 1);
    assert_eq!(report.activity.unavailable, 1);
    assert_eq!(report.activity.opened, 1);
    assert!(!h.scan.book().has_position("SENATE"));
}

#[tokio::test]
async fn test_edge_below_threshold_not_traded() {
    let mut h = harness(vec![make_market("PRES", dec!(0.45), dec!(0.56))]);
    h.fair.set("PRES", dec!(0.49));

    let report = h.scan.run_cycle(t0()).await;
    assert_eq!(report.activity.estimates, 1);
    assert_eq!(report.activity.edges_found, 0);
    assert!(h.venue.orders().is_empty());
}

#[tokio::test]
async fn test_position_cap_takes_largest_edges() {
    let risk = RiskConfig {
        max_open_positions: 2,
        ..RiskConfig::default()
    };
    let mut h = harness_with(
        vec![
            make_market("A", dec!(0.45), dec!(0.56)),
            make_market("B", dec!(0.30), dec!(0.71)),
            make_market("C", dec!(0.60), dec!(0.41)),
        ],
        risk,
        LoopSettings::default(),
    );
    h.fair.set("A", dec!(0.52));
    h.fair.set("B", dec!(0.45));
    h.fair.set("C", dec!(0.50));

    let report = h.scan.run_cycle(t0()).await;
    assert_eq!(report.activity.edges_found, 3);
    assert_eq!(report.activity.opened, 2);

    let book = h.scan.book();
    assert_eq!(book.get("B").unwrap().side, Side::Yes);
    assert_eq!(book.get("C").unwrap().side, Side::No);
    assert_eq!(book.get("C").unwrap().entry_price, dec!(0.41));
    assert!(!book.has_position("A"));
}

#[tokio::test]
async fn test_failed_entry_order_is_dropped() {
    let mut h = harness(vec![make_market("PRES", dec!(0.45), dec!(0.56))]);
    h.fair.set("PRES", dec!(0.52));
    h.venue.fail_orders(true);

    let report = h.scan.run_cycle(t0()).await;
    assert_eq!(report.activity.open_failures, 1);
    assert_eq!(h.scan.book().active_count(), 0);
    assert_eq!(h.scan.risk().state().balance, dec!(10000));

    h.venue.fail_orders(false);
    let report = h.scan.run_cycle(t0() + Duration::seconds(30)).await;
    assert_eq!(report.activity.opened, 1);
}

#[tokio::test]
async fn test_slow_entry_order_times_out() {
    let settings = LoopSettings {
        call_timeout: std::time::Duration::from_millis(50),
        ..LoopSettings::default()
    };
    let mut h = harness_with(
        vec![make_market("PRES", dec!(0.45), dec!(0.56))],
        RiskConfig::default(),
        settings,
    );
    h.fair.set("PRES", dec!(0.52));
    h.venue.delay_orders(std::time::Duration::from_millis(500));

    let report = h.scan.run_cycle(t0()).await;
    assert_eq!(report.activity.open_failures, 1);
    assert_eq!(report.activity.opened, 0);
    assert_eq!(h.scan.risk().state().open_positions, 0);
}

#[tokio::test]
async fn test_no_edge_measured_at_no_price() {
    // NO costs 57 cents, so YES is implied at 43 against a fair 40.
    let mut h = harness(vec![make_market("PRES", dec!(0.45), dec!(0.57))]);
    h.fair.set("PRES", dec!(0.40));

    let report = h.scan.run_cycle(t0()).await;
    assert_eq!(report.activity.estimates, 1);
    assert_eq!(report.activity.edges_found, 0);
    assert!(h.venue.orders().is_empty());

    h.fair.set("PRES", dec!(0.38));
    let report = h.scan.run_cycle(t0() + Duration::seconds(30)).await;
    assert_eq!(report.activity.opened, 1);
    let p = h.scan.book().get("PRES").unwrap();
    assert_eq!(p.side, Side::No);
    assert_eq!(p.entry_price, dec!(0.57));
}

#[tokio::test]
async fn test_slow_estimate_skips_market() {
    let mut h = harness_with(
        vec![make_market("PRES", dec!(0.45), dec!(0.56))],
        RiskConfig::default(),
        impatient(),
    );
    h.fair.set("PRES", dec!(0.52));
    h.fair.delay(std::time::Duration::from_millis(500));

    let report = h.scan.run_cycle(t0()).await;
    assert_eq!(report.activity.candidates, 1);
    assert_eq!(report.activity.estimates, 0);
    assert_eq!(report.activity.unavailable, 1);
    assert_eq!(report.activity.opened, 0);
    assert!(h.venue.orders().is_empty());
}

// -- Exits -----------------------------------------------------------------

#[tokio::test]
async fn test_reversed_edge_exits_and_flips() {
    let mut h = opened_position().await;
    turn_against(&h);

    let report = h.scan.run_cycle(t0() + Duration::seconds(30)).await;
    assert_eq!(report.activity.exits, 1);

    let closed = &h.scan.book().closed()[0];
    assert_eq!(closed.state, PositionState::Closed);
    assert_eq!(closed.exit_reason, Some(ExitReason::EdgeReversal));
    assert_eq!(closed.exit_price, Some(dec!(0.45)));
    assert_eq!(closed.realized_pnl, Some(Decimal::ZERO));

    let exit_order = h.venue.orders().into_iter().find(|o| o.closing).unwrap();
    assert_eq!(exit_order.market_id, "PRES");
    assert_eq!(exit_order.side, Side::Yes);
    assert_eq!(exit_order.size, 222);

    // The same cycle enters the other side at the full budget.
    let flipped = h.scan.book().get("PRES").unwrap();
    assert_eq!(flipped.side, Side::No);
    assert_eq!(flipped.size, 181);
    assert_eq!(h.scan.risk().state().open_positions, 1);
}

#[tokio::test]
async fn test_held_position_kept_while_edge_holds() {
    let mut h = opened_position().await;
    h.fair.set("PRES", dec!(0.47));

    let report = h.scan.run_cycle(t0() + Duration::seconds(30)).await;
    assert_eq!(report.activity.exits, 0);
    let p = h.scan.book().get("PRES").unwrap();
    assert_eq!(p.state, PositionState::Open);
    // Marked at the YES bid, 1 - 0.56.
    assert_eq!(p.mark_price, Some(dec!(0.44)));
    assert_eq!(h.venue.orders().len(), 1);
}

#[tokio::test]
async fn test_failed_close_stays_closing_and_retries() {
    let mut h = opened_position().await;
    turn_against(&h);
    h.venue.fail_closes(true);

    for (i, at) in [30, 60].into_iter().enumerate() {
        let report = h.scan.run_cycle(t0() + Duration::seconds(at)).await;
        assert_eq!(report.activity.close_failures, 1);
        assert_eq!(report.activity.candidates, 0);
        let p = h.scan.book().get("PRES").unwrap();
        assert_eq!(p.state, PositionState::Closing);
        assert_eq!(p.close_failures, i as u32 + 1);
        assert_eq!(report.summary.closing_positions, 1);
    }
    assert_eq!(h.scan.risk().state().open_positions, 1);

    h.venue.fail_closes(false);
    let report = h.scan.run_cycle(t0() + Duration::seconds(90)).await;
    assert_eq!(report.activity.exits, 1);
    assert_eq!(h.scan.book().closed().len(), 1);
    assert_eq!(h.scan.book().closed()[0].close_failures, 2);
}

#[tokio::test]
async fn test_slow_close_stays_closing() {
    let mut h = harness_with(
        vec![make_market("PRES", dec!(0.45), dec!(0.56))],
        RiskConfig::default(),
        impatient(),
    );
    h.fair.set("PRES", dec!(0.52));
    h.scan.run_cycle(t0()).await;
    turn_against(&h);
    h.venue.delay_closes(std::time::Duration::from_millis(500));

    let report = h.scan.run_cycle(t0() + Duration::seconds(30)).await;
    assert_eq!(report.activity.close_failures, 1);
    assert_eq!(report.activity.exits, 0);
    let p = h.scan.book().get("PRES").unwrap();
    assert_eq!(p.state, PositionState::Closing);
    assert_eq!(p.size, 222);
    assert_eq!(h.scan.risk().state().committed, dec!(99.90));
}

#[tokio::test]
async fn test_partial_exit_books_sold_contracts() {
    let mut h = opened_position().await;
    turn_against(&h);
    h.venue.limit_close_fills(Some(100));

    let report = h.scan.run_cycle(t0() + Duration::seconds(30)).await;
    assert_eq!(report.activity.partial_exits, 1);
    assert_eq!(report.activity.exits, 0);
    let p = h.scan.book().get("PRES").unwrap();
    assert_eq!(p.state, PositionState::Closing);
    assert_eq!(p.size, 122);
    let state = h.scan.risk().state();
    assert_eq!(state.committed, dec!(54.90));
    assert_eq!(state.balance, dec!(9945.10));
    assert_eq!(state.open_positions, 1);

    h.venue.limit_close_fills(None);
    let report = h.scan.run_cycle(t0() + Duration::seconds(60)).await;
    assert_eq!(report.activity.exits, 1);

    let sells: Vec<u64> = h
        .venue
        .orders()
        .into_iter()
        .filter(|o| o.closing)
        .map(|o| o.size)
        .collect();
    assert_eq!(sells, vec![222, 122]);

    let closed = &h.scan.book().closed()[0];
    assert_eq!(closed.size, 122);
    assert_eq!(closed.realized_pnl, Some(Decimal::ZERO));
}

#[tokio::test]
async fn test_exits_run_when_snapshot_fails() {
    let mut h = opened_position().await;
    turn_against(&h);
    h.venue.fail_snapshot(true);

    let report = h.scan.run_cycle(t0() + Duration::seconds(30)).await;
    assert!(report.activity.snapshot_error.is_some());
    assert_eq!(report.activity.exits, 1);
    assert_eq!(report.activity.opened, 0);
    assert_eq!(h.scan.book().active_count(), 0);
}

// -- Settlement ------------------------------------------------------------

#[tokio::test]
async fn test_settlement_overrides_pending_exit() {
    let mut h = opened_position().await;
    turn_against(&h);
    h.venue.fail_closes(true);
    h.scan.run_cycle(t0() + Duration::seconds(30)).await;
    assert_eq!(h.scan.book().get("PRES").unwrap().state, PositionState::Closing);

    h.venue.settle("PRES", Side::Yes);
    let report = h.scan.run_cycle(t0() + Duration::seconds(60)).await;
    assert_eq!(report.activity.settlements, 1);
    assert_eq!(report.activity.realized_pnl, dec!(122.10));

    let closed = &h.scan.book().closed()[0];
    assert_eq!(closed.exit_reason, Some(ExitReason::Settlement));
    assert_eq!(closed.exit_price, Some(Decimal::ONE));
    assert_eq!(h.scan.book().active_count(), 0);

    let state = h.scan.risk().state();
    assert_eq!(state.daily_pnl, dec!(122.10));
    assert_eq!(state.balance, dec!(10122.10));
    assert_eq!(state.committed, Decimal::ZERO);
    assert_eq!(state.open_positions, 0);
}

// -- Balance ---------------------------------------------------------------

#[tokio::test]
async fn test_starting_balance_from_venue() {
    let venue = MockVenue::default();
    let timeout = std::time::Duration::from_secs(1);
    assert_eq!(scanner::starting_balance(&venue, dec!(10000), timeout).await, dec!(10000));

    venue.set_balance(Some(dec!(2500)));
    assert_eq!(scanner::starting_balance(&venue, dec!(10000), timeout).await, dec!(2500));

    venue.fail_balance(true);
    assert_eq!(scanner::starting_balance(&venue, dec!(10000), timeout).await, dec!(10000));
}

#[tokio::test]
async fn test_balance_synced_every_few_cycles() {
    let settings = LoopSettings {
        balance_sync_every: 2,
        ..LoopSettings::default()
    };
    let mut h = harness_with(
        vec![make_market("PRES", dec!(0.45), dec!(0.56))],
        RiskConfig::default(),
        settings,
    );
    h.fair.set("PRES", dec!(0.52));
    h.venue.set_balance(Some(dec!(5000)));

    let report = h.scan.run_cycle(t0()).await;
    assert!(!report.activity.balance_synced);
    assert_eq!(h.scan.risk().state().balance, dec!(9900.10));

    let report = h.scan.run_cycle(t0() + Duration::seconds(30)).await;
    assert!(report.activity.balance_synced);
    assert_eq!(h.scan.risk().state().balance, dec!(5000));
    assert_eq!(h.scan.risk().state().committed, dec!(99.90));
}

// -- Run loop --------------------------------------------------------------

#[tokio::test]
async fn test_shutdown_waits_for_cycle_in_progress() {
    let mut h = harness(vec![make_market("PRES", dec!(0.45), dec!(0.56))]);
    h.fair.set("PRES", dec!(0.52));
    h.venue.delay_orders(std::time::Duration::from_millis(200));

    let (tx, rx) = tokio::sync::oneshot::channel::<()>();
    tokio::spawn(async move {
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        let _ = tx.send(());
    });
    h.scan
        .run(async {
            let _ = rx.await;
        })
        .await;

    assert_eq!(h.scan.cycle_count(), 1);
    assert!(h.scan.book().has_position("PRES"));
    assert_eq!(h.venue.orders().len(), 1);
}

// -- Halt and reset --------------------------------------------------------

/// A 10% position on "A" settles against us for a $1,000 loss, which
/// breaches the 5% daily limit. "B" then offers a +10% edge.
async fn halted_harness() -> Harness {
    let risk = RiskConfig {
        risk_per_trade_pct: dec!(0.10),
        ..RiskConfig::default()
    };
    let mut h = harness_with(
        vec![make_market("A", dec!(0.50), dec!(0.51))],
        risk,
        LoopSettings::default(),
    );
    h.fair.set("A", dec!(0.60));
    h.scan.run_cycle(t0()).await;
    assert_eq!(h.scan.book().get("A").unwrap().size, 2000);

    h.venue.settle("A", Side::No);
    h.venue.add_market(make_market("B", dec!(0.40), dec!(0.61)));
    h.fair.set("B", dec!(0.50));
    h
}

#[tokio::test]
async fn test_halt_blocks_new_entries() {
    let mut h = halted_harness().await;

    let report = h.scan.run_cycle(t0() + Duration::minutes(1)).await;
    assert_eq!(report.activity.settlements, 1);
    assert_eq!(h.scan.risk().state().daily_pnl, dec!(-1000));
    assert!(report.summary.halted);
    assert_eq!(report.activity.opened, 0);
    assert!(!h.scan.book().has_position("B"));
    assert_err!(h.scan.risk().check_open(1, dec!(0.40)));

    let report = h.scan.run_cycle(t0() + Duration::hours(6)).await;
    assert!(report.summary.halted);
    assert!(!h.scan.book().has_position("B"));
}

#[tokio::test]
async fn test_daily_reset_clears_halt_once() {
    let mut h = halted_harness().await;
    h.scan.run_cycle(t0() + Duration::minutes(1)).await;
    assert!(h.scan.risk().is_halted());

    let next_day = t0() + Duration::days(1);
    let report = h.scan.run_cycle(next_day).await;
    assert!(report.activity.daily_reset);
    assert!(!report.summary.halted);
    assert_eq!(report.activity.opened, 1);

    let state = h.scan.risk().state();
    assert_eq!(state.starting_daily_balance, dec!(9000));
    assert_eq!(h.scan.book().get("B").unwrap().size, 2250);
    assert_ok!(h.scan.risk().check_open(1, dec!(0.40)));

    let report = h.scan.run_cycle(next_day + Duration::minutes(1)).await;
    assert!(!report.activity.daily_reset);
}
