//! AUGUR: trading decision and risk engine for prediction markets.
//!
//! Entry point. Loads configuration, initialises structured logging,
//! wires the venue, feeds and fair-value providers together, and runs
//! the scan loop until Ctrl+C.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use augur::config::{self, AppConfig};
use augur::dashboard::{self, routes::DashboardState};
use augur::engine::scanner::{self, LoopSettings, ScanLoop};
use augur::feeds::news::NewsApiFeed;
use augur::feeds::polls::HttpPollFeed;
use augur::feeds::{CachedFeed, DataFeed};
use augur::providers::arbitrage::ArbitrageProvider;
use augur::providers::consensus::ConsensusProvider;
use augur::providers::polling::PollingProvider;
use augur::providers::ProviderRouter;
use augur::strategy::edge::{EdgeConfig, EdgeDetector};
use augur::strategy::risk::RiskManager;
use augur::types::MarketCategory;
use augur::venue::kalshi::KalshiClient;
use augur::venue::paper::PaperExecution;
use augur::venue::{Execution, MarketData};

const BANNER: &str = r#"
    _   _   _  ___ _   _ ___
   /_\ | | | |/ __| | | | _ \
  / _ \| |_| | (_ | |_| |   /
 /_/ \_\\___/ \___|\___/|_|_\

  Trading decision & risk engine
  v0.1.0
"#;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let config_path = std::env::var("AUGUR_CONFIG").unwrap_or_else(|_| "config.toml".to_string());
    let cfg = AppConfig::load(&config_path)?;

    init_logging(&cfg);

    println!("{BANNER}");
    info!(
        environment = %cfg.venue.environment,
        paper_trading = cfg.venue.paper_trading,
        initial_balance = %format!("${:.2}", cfg.engine.initial_balance),
        risk_per_trade = %format!("{:.1}%", cfg.engine.risk_per_trade_pct * 100.0),
        max_daily_drawdown = %format!("{:.1}%", cfg.engine.max_daily_drawdown_pct * 100.0),
        max_open_positions = cfg.engine.max_open_positions,
        scan_interval_secs = cfg.engine.scan_interval_secs,
        "AUGUR starting up"
    );

    let call_timeout = Duration::from_secs(cfg.engine.call_timeout_secs);

    // -- Venue -----------------------------------------------------------

    let api_key = AppConfig::resolve_secret(&cfg.venue.api_key_env);
    if api_key.is_none() {
        warn!(env = %cfg.venue.api_key_env, "No venue API key, market data only");
    }
    let kalshi = Arc::new(
        KalshiClient::new(
            cfg.venue.environment,
            api_key,
            call_timeout,
            cfg.venue.market_limit,
            cfg.venue.requests_per_sec,
        )
        .context("Failed to build venue client")?,
    );
    let market_data: Arc<dyn MarketData> = kalshi.clone();
    let execution: Arc<dyn Execution> = if cfg.venue.paper_trading {
        info!("Paper trading: orders are filled locally");
        Arc::new(PaperExecution::new())
    } else {
        kalshi
    };

    // -- Fair-value providers ---------------------------------------------

    let providers = build_providers(&cfg, call_timeout, market_data.clone())?;

    // -- Engine ----------------------------------------------------------

    let detector = EdgeDetector::new(EdgeConfig {
        deviation_threshold: cfg.deviation_threshold()?,
    });
    let mut risk_config = cfg.risk_config()?;
    risk_config.initial_balance =
        scanner::starting_balance(execution.as_ref(), risk_config.initial_balance, call_timeout).await;
    let risk = RiskManager::new(risk_config, chrono::Utc::now());

    let mut scan = ScanLoop::new(
        market_data,
        execution,
        providers,
        detector,
        risk,
        LoopSettings::from(&cfg.engine),
    );

    if cfg.dashboard.enabled {
        let state = Arc::new(DashboardState::new());
        dashboard::spawn_dashboard(state.clone(), cfg.dashboard.port).await?;
        scan = scan.with_dashboard(state);
    }

    // -- Main loop -------------------------------------------------------

    scan.run(async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Could not listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    })
    .await;

    info!("AUGUR shut down cleanly.");
    Ok(())
}

/// Route politics to polls, economics to news consensus, and linked
/// markets to the arbitrage provider. Feeds without configuration are
/// left out and their categories go unestimated.
fn build_providers(
    cfg: &AppConfig,
    call_timeout: Duration,
    market_data: Arc<dyn MarketData>,
) -> Result<ProviderRouter> {
    let ttl = chrono::Duration::minutes(cfg.feeds.cache_ttl_mins);
    let mut router = ProviderRouter::new();

    let polls: Arc<dyn DataFeed> = Arc::new(CachedFeed::new(
        HttpPollFeed::new(cfg.feeds.poll_url.clone(), call_timeout)?,
        ttl,
    ));
    router = router.with_category(
        MarketCategory::Politics,
        Arc::new(PollingProvider::new(polls, cfg.feeds.weighted_polls)),
    );

    let news_key = AppConfig::resolve_secret(&cfg.feeds.news_api_key_env);
    match (cfg.feeds.enable_news_triggers, news_key) {
        (true, Some(key)) => {
            let news: Arc<dyn DataFeed> =
                Arc::new(CachedFeed::new(NewsApiFeed::new(key, call_timeout)?, ttl));
            router = router.with_category(
                MarketCategory::Economics,
                Arc::new(ConsensusProvider::new(news)),
            );
        }
        (true, None) => warn!(
            env = %cfg.feeds.news_api_key_env,
            "No news API key, economics markets will not be estimated"
        ),
        (false, _) => info!("News feed disabled"),
    }

    if !cfg.links.is_empty() {
        info!(links = cfg.links.len(), "Arbitrage links loaded");
        router = router.with_arbitrage(Arc::new(ArbitrageProvider::new(
            cfg.links.clone(),
            market_data,
        )));
    }

    Ok(router)
}

/// Initialise the `tracing` subscriber.
fn init_logging(cfg: &config::AppConfig) {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("augur={}", cfg.logging.level)));

    let json_logging = std::env::var("AUGUR_LOG_JSON").is_ok();

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
