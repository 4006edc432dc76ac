//! Scan loop: the cycle orchestrator.
//!
//! One task owns the risk manager and the position book. Each cycle:
//!
//! 0. apply a due daily reset and, every few cycles, take the free balance
//!    from the venue
//! 1. refresh every active position (settle, mark, exit or retry a close)
//! 2. fetch the open-market snapshot and log arbitrage inconsistencies
//! 3. estimate unpositioned markets concurrently, then detect, size,
//!    approve and open in ranked order
//! 4. reconcile into a [`CycleReport`] and publish it
//!
//! Estimation is the only concurrent step; every state mutation happens
//! afterwards, one at a time, in this loop. Every external call is bounded
//! by the configured call timeout.

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::config::EngineConfig;
use crate::dashboard::routes::AppState;
use crate::engine::accountant::{Accountant, CycleActivity, CycleReport};
use crate::engine::lifecycle::PositionBook;
use crate::providers::{ProviderError, ProviderRouter};
use crate::strategy::edge::{Edge, EdgeDetector};
use crate::strategy::risk::RiskManager;
use crate::strategy::{evaluate_entry, EntryDecision};
use crate::types::{ExitReason, Market, PositionState};
use crate::venue::{Execution, MarketData, VenueError};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct LoopSettings {
    pub scan_interval: Duration,
    /// Bound on every venue, feed and provider call.
    pub call_timeout: Duration,
    pub max_concurrent_estimates: usize,
    /// Re-read the venue balance every this many cycles; 0 never does.
    pub balance_sync_every: u64,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            scan_interval: Duration::from_secs(30),
            call_timeout: Duration::from_secs(10),
            max_concurrent_estimates: 8,
            balance_sync_every: 10,
        }
    }
}

impl From<&EngineConfig> for LoopSettings {
    fn from(cfg: &EngineConfig) -> Self {
        Self {
            scan_interval: Duration::from_secs(cfg.scan_interval_secs),
            call_timeout: Duration::from_secs(cfg.call_timeout_secs),
            max_concurrent_estimates: cfg.max_concurrent_estimates.max(1),
            balance_sync_every: cfg.balance_sync_cycles,
        }
    }
}

/// Free balance to start trading with: the venue's figure when it has
/// one, otherwise `configured`.
pub async fn starting_balance(
    execution: &dyn Execution,
    configured: Decimal,
    timeout: Duration,
) -> Decimal {
    match bounded(timeout, VenueError::Timeout, execution.fetch_balance()).await {
        Ok(Some(balance)) => {
            info!(balance = %format!("${:.2}", balance), "Starting from venue balance");
            balance
        }
        Ok(None) => configured,
        Err(e) => {
            warn!(
                error = %e,
                configured = %format!("${:.2}", configured),
                "Could not fetch venue balance, using configured balance"
            );
            configured
        }
    }
}

/// Run `fut`, turning an elapsed deadline into `on_timeout`.
async fn bounded<T, E>(
    limit: Duration,
    on_timeout: E,
    fut: impl Future<Output = Result<T, E>>,
) -> Result<T, E> {
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(on_timeout),
    }
}

// ---------------------------------------------------------------------------
// Scan loop
// ---------------------------------------------------------------------------

pub struct ScanLoop {
    market_data: Arc<dyn MarketData>,
    execution: Arc<dyn Execution>,
    providers: ProviderRouter,
    detector: EdgeDetector,
    risk: RiskManager,
    book: PositionBook,
    settings: LoopSettings,
    cycle: u64,
    dashboard: Option<AppState>,
}

impl ScanLoop {
    pub fn new(
        market_data: Arc<dyn MarketData>,
        execution: Arc<dyn Execution>,
        providers: ProviderRouter,
        detector: EdgeDetector,
        risk: RiskManager,
        settings: LoopSettings,
    ) -> Self {
        Self {
            market_data,
            execution,
            providers,
            detector,
            risk,
            book: PositionBook::new(),
            settings,
            cycle: 0,
            dashboard: None,
        }
    }

    /// Publish every cycle report to the monitoring dashboard.
    pub fn with_dashboard(mut self, state: AppState) -> Self {
        self.dashboard = Some(state);
        self
    }

    pub fn risk(&self) -> &RiskManager {
        &self.risk
    }

    pub fn book(&self) -> &PositionBook {
        &self.book
    }

    pub fn cycle_count(&self) -> u64 {
        self.cycle
    }

    /// Run cycles at the scan interval until `shutdown` resolves.
    ///
    /// Shutdown is only observed between cycles. Ticks missed while a
    /// cycle overruns are delayed, never burst.
    pub async fn run<S>(&mut self, shutdown: S)
    where
        S: Future<Output = ()>,
    {
        let mut interval = tokio::time::interval(self.settings.scan_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        info!(
            interval_secs = self.settings.scan_interval.as_secs(),
            paper = self.execution.is_paper(),
            "Entering scan loop. Press Ctrl+C to stop."
        );

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.run_cycle(Utc::now()).await;
                }
                _ = &mut shutdown => {
                    info!("Shutdown signal received.");
                    break;
                }
            }
        }

        let state = self.risk.state();
        info!(
            cycles = self.cycle,
            balance = %format!("${:.2}", state.balance),
            equity = %format!("${:.2}", state.equity()),
            active_positions = self.book.active_count(),
            closed_positions = self.book.closed().len(),
            "Scan loop stopped"
        );
    }

    /// Run one full cycle as of `now`.
    pub async fn run_cycle(&mut self, now: DateTime<Utc>) -> CycleReport {
        self.cycle += 1;
        debug!(cycle = self.cycle, "Starting cycle");
        let mut activity = CycleActivity::default();

        // 0. Daily reset and balance sync
        activity.daily_reset = self.risk.maybe_daily_reset(now);
        let every = self.settings.balance_sync_every;
        if every > 0 && self.cycle % every == 0 {
            activity.balance_synced = self.sync_balance().await;
        }

        // 1. Positions we already hold
        self.refresh_positions(now, &mut activity).await;

        // 2-3. Snapshot and entries
        match bounded(
            self.settings.call_timeout,
            VenueError::Timeout,
            self.market_data.list_open_markets(),
        )
        .await
        {
            Ok(markets) => {
                activity.markets_scanned = markets.len();
                self.flag_arbitrage(&markets, &mut activity);
                if self.risk.is_halted() {
                    info!("Trading halted, no new entries this cycle");
                } else {
                    self.scan_entries(markets, &mut activity).await;
                }
            }
            Err(e) => {
                warn!(error = %e, "Market snapshot failed, skipping entries this cycle");
                activity.snapshot_error = Some(e.to_string());
            }
        }

        // 4. Report
        let report = Accountant::reconcile(self.cycle, activity, self.risk.state(), &self.book, now);
        if let Some(dashboard) = &self.dashboard {
            dashboard
                .publish(report.clone(), self.book.active().cloned().collect())
                .await;
        }
        report
    }

    async fn sync_balance(&mut self) -> bool {
        match bounded(
            self.settings.call_timeout,
            VenueError::Timeout,
            self.execution.fetch_balance(),
        )
        .await
        {
            Ok(Some(balance)) => {
                self.risk.sync_balance(balance);
                true
            }
            Ok(None) => false,
            Err(e) => {
                warn!(error = %e, "Balance sync failed, keeping booked balance");
                false
            }
        }
    }

    // -- Exits -----------------------------------------------------------

    async fn refresh_positions(&mut self, now: DateTime<Utc>, activity: &mut CycleActivity) {
        for market_id in self.book.active_market_ids() {
            let market = match bounded(
                self.settings.call_timeout,
                VenueError::Timeout,
                self.market_data.get_market(&market_id),
            )
            .await
            {
                Ok(m) => m,
                Err(e) => {
                    warn!(market_id = %market_id, error = %e, "Could not refresh held market");
                    continue;
                }
            };

            if let Some(outcome) = market.settlement() {
                match self.book.settle(&mut self.risk, &market_id, outcome, now) {
                    Ok(pnl) => {
                        activity.settlements += 1;
                        activity.realized_pnl += pnl;
                    }
                    Err(e) => error!(market_id = %market_id, error = %e, "Settlement failed"),
                }
                continue;
            }

            let Some((side, state)) = self.book.get(&market_id).map(|p| (p.side, p.state)) else {
                continue;
            };
            let exit_price = market.bid_for(side);
            self.book.mark(&market_id, exit_price);

            if !market.is_open() {
                debug!(market_id = %market_id, "Market closed, awaiting settlement");
                continue;
            }

            match state {
                PositionState::Closing => {
                    self.try_close(&market_id, exit_price, now, activity).await;
                }
                PositionState::Open => {
                    let edge = self.current_edge(&market).await;
                    let exit = self.book.get(&market_id).is_some_and(|p| {
                        self.risk.should_exit(p, edge.as_ref(), market.status)
                    });
                    if exit {
                        if let Err(e) = self.book.begin_close(&market_id, ExitReason::EdgeReversal) {
                            error!(market_id = %market_id, error = %e, "Could not start exit");
                            continue;
                        }
                        self.try_close(&market_id, exit_price, now, activity).await;
                    }
                }
                PositionState::Closed => {}
            }
        }
    }

    /// Fresh edge for a held market, if a provider can estimate it.
    async fn current_edge(&self, market: &Market) -> Option<Edge> {
        match bounded(
            self.settings.call_timeout,
            ProviderError::Timeout,
            self.providers.estimate(market),
        )
        .await
        {
            Ok(estimate) => Some(self.detector.detect(market, &estimate)),
            Err(e) => {
                debug!(market_id = %market.id, reason = %e, "No estimate for held market");
                None
            }
        }
    }

    async fn try_close(
        &mut self,
        market_id: &str,
        price_limit: Decimal,
        now: DateTime<Utc>,
        activity: &mut CycleActivity,
    ) {
        let Some((position_id, side, size)) = self.book.get(market_id).map(|p| (p.id, p.side, p.size))
        else {
            return;
        };

        let result = bounded(
            self.settings.call_timeout,
            VenueError::Timeout,
            self.execution
                .close_position(market_id, position_id, side, size, price_limit),
        )
        .await
        .and_then(|close| {
            if close.filled_size == 0 {
                Err(VenueError::Rejected("exit filled nothing".to_string()))
            } else {
                Ok(close)
            }
        });

        match result {
            Ok(close) if close.filled_size < size => {
                match self
                    .book
                    .partial_close(&mut self.risk, market_id, close.filled_size, close.exit_price)
                {
                    Ok(pnl) => {
                        activity.partial_exits += 1;
                        activity.realized_pnl += pnl;
                        warn!(
                            market_id,
                            sold = close.filled_size,
                            remaining = size - close.filled_size,
                            "Exit partially filled, retrying the rest next cycle"
                        );
                    }
                    Err(e) => error!(market_id, error = %e, "Could not book partial exit"),
                }
            }
            Ok(close) => match self.book.confirm_close(&mut self.risk, market_id, close.exit_price, now) {
                Ok(pnl) => {
                    activity.exits += 1;
                    activity.realized_pnl += pnl;
                }
                Err(e) => error!(market_id, error = %e, "Could not book confirmed exit"),
            },
            Err(e) => {
                activity.close_failures += 1;
                if let Err(err) = self.book.close_failed(market_id, &e) {
                    error!(market_id, error = %err, "Could not record close failure");
                }
            }
        }
    }

    // -- Snapshot --------------------------------------------------------

    fn flag_arbitrage(&self, markets: &[Market], activity: &mut CycleActivity) {
        let Some(arbitrage) = self.providers.arbitrage() else {
            return;
        };
        let found = arbitrage.detect_inconsistencies(markets);
        for pair in &found {
            info!(
                implies = %pair.implies,
                implied = %pair.implied,
                implies_price = %format!("{:.0}¢", pair.implies_price * dec!(100)),
                implied_price = %format!("{:.0}¢", pair.implied_price * dec!(100)),
                gap = %format!("{:.0}¢", pair.gap() * dec!(100)),
                "Linked markets priced inconsistently"
            );
        }
        activity.arbitrage_flags = found.len();
    }

    // -- Entries ---------------------------------------------------------

    async fn scan_entries(&mut self, markets: Vec<Market>, activity: &mut CycleActivity) {
        let candidates: Vec<Market> = markets
            .into_iter()
            .filter(|m| m.is_open() && !self.book.has_position(&m.id))
            .filter(|m| self.providers.route(m).is_some())
            .collect();
        activity.candidates = candidates.len();
        if candidates.is_empty() {
            return;
        }

        let limit = self.settings.call_timeout;
        let providers = &self.providers;
        let results: Vec<_> = stream::iter(candidates)
            .map(|market| async move {
                let result = bounded(limit, ProviderError::Timeout, providers.estimate(&market)).await;
                (market, result)
            })
            .buffer_unordered(self.settings.max_concurrent_estimates.max(1))
            .collect()
            .await;

        let mut edges = Vec::new();
        for (market, result) in results {
            match result {
                Ok(estimate) => {
                    activity.estimates += 1;
                    edges.push(self.detector.detect(&market, &estimate));
                }
                Err(e) => {
                    activity.unavailable += 1;
                    debug!(market_id = %market.id, reason = %e, "No estimate, skipping market");
                }
            }
        }

        let ranked = self.detector.rank_actionable(edges);
        activity.edges_found = ranked.len();

        for edge in ranked {
            if let EntryDecision::Selected { edge, size } = evaluate_entry(edge, &self.risk) {
                self.open(edge, size, activity).await;
            }
        }
    }

    async fn open(&mut self, edge: Edge, size: u64, activity: &mut CycleActivity) {
        let result = bounded(
            self.settings.call_timeout,
            VenueError::Timeout,
            self.execution
                .place_order(&edge.market_id, edge.side, size, edge.entry_price),
        )
        .await;

        let fill = match result {
            Ok(fill) if fill.filled_size > 0 => fill,
            Ok(_) => {
                warn!(market_id = %edge.market_id, "Entry order filled nothing, dropping");
                activity.open_failures += 1;
                return;
            }
            Err(e) => {
                warn!(market_id = %edge.market_id, error = %e, "Entry order failed, dropping");
                activity.open_failures += 1;
                return;
            }
        };

        match self.book.open_from_fill(
            &mut self.risk,
            &edge.market_id,
            edge.side,
            &fill,
            edge.fair_value,
        ) {
            Ok(_) => activity.opened += 1,
            Err(e) => {
                error!(market_id = %edge.market_id, error = %e, "Filled order could not be booked");
                activity.open_failures += 1;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
