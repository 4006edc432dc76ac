//! Configuration loading from TOML with environment overrides.
//!
//! Reads `config.toml` (optional, every field has a default) and then
//! applies the named risk options from the environment, e.g.
//! `RISK_PER_TRADE_PCT=0.02`. Secrets are referenced by env-var name in
//! the config and resolved at startup via `std::env::var`.
//!
//! Configuration is read once; the engine never mutates it.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use secrecy::SecretString;
use serde::Deserialize;
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use tracing::info;

use crate::strategy::risk::RiskConfig;

/// Startup configuration failures. Always fatal.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {}", .0.join("; "))]
    Invalid(Vec<String>),

    #[error("Environment variable {name} has invalid value {value:?}")]
    BadEnv { name: String, value: String },
}

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AppConfig {
    pub engine: EngineConfig,
    pub venue: VenueConfig,
    pub feeds: FeedsConfig,
    pub dashboard: DashboardConfig,
    pub logging: LoggingConfig,
    /// Declared implication links between markets.
    pub links: Vec<LinkConfig>,
}

/// The named risk and scheduling options.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EngineConfig {
    pub initial_balance: f64,
    pub risk_per_trade_pct: f64,
    pub max_daily_drawdown_pct: f64,
    pub max_open_positions: usize,
    pub deviation_threshold: f64,
    pub stop_loss_deviation: f64,
    /// Trading stops while balance is below this fraction of the initial balance.
    pub min_balance_fraction: f64,
    pub scan_interval_secs: u64,
    /// Upper bound on every external call.
    pub call_timeout_secs: u64,
    pub max_concurrent_estimates: usize,
    /// Length of a trading day for the drawdown reset.
    pub daily_reset_hours: i64,
    /// Cycles between venue balance reads; 0 disables them.
    pub balance_sync_cycles: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            initial_balance: 10_000.0,
            risk_per_trade_pct: 0.01,
            max_daily_drawdown_pct: 0.05,
            max_open_positions: 5,
            deviation_threshold: 0.05,
            stop_loss_deviation: 0.05,
            min_balance_fraction: 0.5,
            scan_interval_secs: 30,
            call_timeout_secs: 10,
            max_concurrent_estimates: 8,
            daily_reset_hours: 24,
            balance_sync_cycles: 10,
        }
    }
}

/// Sandbox (demo API) or live (production API) trading.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Sandbox,
    Live,
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sandbox" | "demo" => Ok(Environment::Sandbox),
            "live" | "prod" => Ok(Environment::Live),
            other => Err(format!("unknown environment {other:?}")),
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Environment::Sandbox => write!(f, "SANDBOX"),
            Environment::Live => write!(f, "LIVE"),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct VenueConfig {
    pub environment: Environment,
    pub api_key_env: String,
    /// Fill orders locally instead of sending them to the venue.
    pub paper_trading: bool,
    pub market_limit: u32,
    pub requests_per_sec: u32,
}

impl Default for VenueConfig {
    fn default() -> Self {
        Self {
            environment: Environment::Sandbox,
            api_key_env: "KALSHI_API_KEY".to_string(),
            paper_trading: true,
            market_limit: 100,
            requests_per_sec: 10,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct FeedsConfig {
    pub poll_url: String,
    /// Weight polls by their reported sample size instead of a plain mean.
    pub weighted_polls: bool,
    pub news_api_key_env: String,
    pub enable_news_triggers: bool,
    pub cache_ttl_mins: i64,
}

impl Default for FeedsConfig {
    fn default() -> Self {
        Self {
            poll_url: "https://www.realclearpolitics.com".to_string(),
            weighted_polls: false,
            news_api_key_env: "NEWS_API_KEY".to_string(),
            enable_news_triggers: true,
            cache_ttl_mins: 15,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DashboardConfig {
    pub enabled: bool,
    pub port: u16,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: 8080,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// `implies` resolving YES guarantees `implied` resolves YES.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct LinkConfig {
    pub implies: String,
    pub implied: String,
}

impl AppConfig {
    /// Load configuration: TOML file (if present), then environment
    /// overrides, then validation.
    pub fn load(path: &str) -> Result<Self> {
        let mut config = if Path::new(path).exists() {
            let contents = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {path}"))?;
            toml::from_str::<AppConfig>(&contents)
                .with_context(|| format!("Failed to parse config file: {path}"))?
        } else {
            info!(path, "No config file found, using defaults");
            AppConfig::default()
        };

        config.apply_env(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Override the named options from an environment lookup.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let e = &mut self.engine;
        override_from(&lookup, "INITIAL_BALANCE", &mut e.initial_balance)?;
        override_from(&lookup, "RISK_PER_TRADE_PCT", &mut e.risk_per_trade_pct)?;
        override_from(&lookup, "MAX_DAILY_DRAWDOWN_PCT", &mut e.max_daily_drawdown_pct)?;
        override_from(&lookup, "MAX_OPEN_POSITIONS", &mut e.max_open_positions)?;
        override_from(&lookup, "DEVIATION_THRESHOLD", &mut e.deviation_threshold)?;
        override_from(&lookup, "STOP_LOSS_DEVIATION", &mut e.stop_loss_deviation)?;
        override_from(&lookup, "SCAN_INTERVAL_SECONDS", &mut e.scan_interval_secs)?;
        override_from(&lookup, "VENUE_ENV", &mut self.venue.environment)?;
        override_from(&lookup, "POLL_AGGREGATOR_URL", &mut self.feeds.poll_url)?;
        override_flag(&lookup, "ENABLE_NEWS_TRIGGERS", &mut self.feeds.enable_news_triggers)?;
        override_from(&lookup, "LOG_LEVEL", &mut self.logging.level)?;
        Ok(())
    }

    /// Check every risk parameter, collecting all problems.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let e = &self.engine;
        let mut errors = Vec::new();

        if e.initial_balance <= 0.0 {
            errors.push("INITIAL_BALANCE must be positive".to_string());
        }
        if e.risk_per_trade_pct <= 0.0 || e.risk_per_trade_pct > 0.1 {
            errors.push("RISK_PER_TRADE_PCT should be 0-10%".to_string());
        }
        if e.max_daily_drawdown_pct <= 0.0 || e.max_daily_drawdown_pct > 0.5 {
            errors.push("MAX_DAILY_DRAWDOWN_PCT should be 0-50%".to_string());
        }
        if e.max_open_positions == 0 {
            errors.push("MAX_OPEN_POSITIONS must be at least 1".to_string());
        }
        if e.deviation_threshold <= 0.0 || e.deviation_threshold >= 1.0 {
            errors.push("DEVIATION_THRESHOLD must be in (0, 1)".to_string());
        }
        if e.stop_loss_deviation <= 0.0 || e.stop_loss_deviation >= 1.0 {
            errors.push("STOP_LOSS_DEVIATION must be in (0, 1)".to_string());
        }
        if !(0.0..1.0).contains(&e.min_balance_fraction) {
            errors.push("min_balance_fraction must be in [0, 1)".to_string());
        }
        if e.scan_interval_secs == 0 {
            errors.push("SCAN_INTERVAL_SECONDS must be at least 1".to_string());
        }
        if e.call_timeout_secs == 0 || e.call_timeout_secs >= e.scan_interval_secs {
            errors.push("call_timeout_secs must be at least 1 and below the scan interval".to_string());
        }
        if e.max_concurrent_estimates == 0 {
            errors.push("max_concurrent_estimates must be at least 1".to_string());
        }
        if e.daily_reset_hours <= 0 {
            errors.push("daily_reset_hours must be positive".to_string());
        }
        if self.venue.requests_per_sec == 0 {
            errors.push("requests_per_sec must be at least 1".to_string());
        }
        if self.venue.environment == Environment::Live {
            if self.venue.paper_trading {
                errors.push("paper_trading cannot be enabled in the live environment".to_string());
            }
            if std::env::var(&self.venue.api_key_env).map(|k| k.is_empty()).unwrap_or(true) {
                errors.push(format!("{} not set", self.venue.api_key_env));
            }
        }
        for link in &self.links {
            if link.implies == link.implied {
                errors.push(format!("link {} cannot imply itself", link.implies));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(errors))
        }
    }

    /// Convert the engine section into the risk manager's decimal config.
    pub fn risk_config(&self) -> Result<RiskConfig, ConfigError> {
        let e = &self.engine;
        Ok(RiskConfig {
            initial_balance: to_decimal("INITIAL_BALANCE", e.initial_balance)?,
            risk_per_trade_pct: to_decimal("RISK_PER_TRADE_PCT", e.risk_per_trade_pct)?,
            max_daily_drawdown_pct: to_decimal("MAX_DAILY_DRAWDOWN_PCT", e.max_daily_drawdown_pct)?,
            max_open_positions: e.max_open_positions,
            stop_loss_deviation: to_decimal("STOP_LOSS_DEVIATION", e.stop_loss_deviation)?,
            min_balance_fraction: to_decimal("min_balance_fraction", e.min_balance_fraction)?,
            reset_period: chrono::Duration::hours(e.daily_reset_hours),
        })
    }

    /// Edge threshold as a decimal.
    pub fn deviation_threshold(&self) -> Result<Decimal, ConfigError> {
        to_decimal("DEVIATION_THRESHOLD", self.engine.deviation_threshold)
    }

    /// Resolve an environment variable name to its value.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }

    /// Resolve an optional secret; empty values count as unset.
    pub fn resolve_secret(env_name: &str) -> Option<SecretString> {
        std::env::var(env_name)
            .ok()
            .filter(|v| !v.is_empty())
            .map(SecretString::new)
    }
}

fn override_from<T, F>(lookup: &F, name: &str, slot: &mut T) -> Result<(), ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    if let Some(raw) = lookup(name) {
        *slot = raw.trim().parse().map_err(|_| ConfigError::BadEnv {
            name: name.to_string(),
            value: raw.clone(),
        })?;
    }
    Ok(())
}

/// Boolean override; accepts true/false, yes/no, on/off and 1/0 in any case.
fn override_flag<F>(lookup: &F, name: &str, slot: &mut bool) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(raw) = lookup(name) {
        let value = raw.trim().to_lowercase();
        *slot = match value.as_str() {
            "true" | "yes" | "on" | "1" => true,
            "false" | "no" | "off" | "0" => false,
            _ => {
                return Err(ConfigError::BadEnv {
                    name: name.to_string(),
                    value: raw,
                })
            }
        };
    }
    Ok(())
}

fn to_decimal(name: &str, value: f64) -> Result<Decimal, ConfigError> {
    Decimal::try_from(value)
        .map(|d| d.normalize())
        .map_err(|_| ConfigError::Invalid(vec![format!("{name} is not a finite number")]))
}
