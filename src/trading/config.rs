//! Trade configuration, loaded once at startup.

use std::time::Duration;

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// A tiered profit-taking level: at `profit_percent` gain, sell
/// `sell_percent` of the purchased amount.
///
/// The sum of `sell_percent` across all targets should stay at or below 1;
/// this is not enforced here and over-commitment surfaces as an
/// insufficient-balance failure on the exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfitTarget {
    /// Gain over the purchase price that triggers this target (e.g. 0.15)
    pub profit_percent: Decimal,

    /// Fraction of the purchased base amount to sell, in (0, 1]
    pub sell_percent: Decimal,
}

/// Immutable configuration for a trade.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeConfig {
    /// Quote asset whose pairs we watch for (e.g. "BTC")
    pub quote_asset: String,

    /// Amount of quote asset to spend once a base is confirmed
    pub quote_spend_amount: Decimal,

    /// Trailing stop distance as a fraction of price (e.g. 0.08)
    pub trailing_stop_percent: Decimal,

    /// How often the trailing-stop monitor polls the ticker (milliseconds)
    pub poll_interval_ms: u64,

    /// Slippage headroom subtracted from the computed buy quantity
    pub slippage_tolerance: Decimal,

    /// Ordered profit-taking tiers, booked as limit sells after the buy
    pub profit_targets: Vec<ProfitTarget>,

    /// When true, every order is flagged as a test order at the transport
    /// boundary; pricing and state-machine logic are unchanged
    pub simulate: bool,

    /// Chats/channels that may trigger a trade; empty allows all
    pub channel_allow_list: Vec<i64>,

    /// Reconciliation hook: cancel already-booked profit targets when a
    /// later submission in the batch fails. Off by default, which matches
    /// the original behavior of leaving partial bookings in place.
    pub cancel_on_partial_failure: bool,
}

impl Default for TradeConfig {
    fn default() -> Self {
        Self {
            quote_asset: "BTC".to_string(),
            quote_spend_amount: dec!(0.005),
            trailing_stop_percent: dec!(0.08),
            poll_interval_ms: 500,
            slippage_tolerance: dec!(0.02),
            profit_targets: vec![
                ProfitTarget { profit_percent: dec!(0.15), sell_percent: dec!(0.25) },
                ProfitTarget { profit_percent: dec!(0.30), sell_percent: dec!(0.25) },
                ProfitTarget { profit_percent: dec!(0.45), sell_percent: dec!(0.25) },
                ProfitTarget { profit_percent: dec!(0.60), sell_percent: dec!(0.25) },
            ],
            simulate: false,
            channel_allow_list: Vec::new(),
            cancel_on_partial_failure: false,
        }
    }
}

impl TradeConfig {
    /// Load configuration from environment variables, falling back to the
    /// defaults above for anything unset:
    /// - SEARCH_QUOTE
    /// - QUOTE_ASSET_AMOUNT
    /// - TRAILING_STOP_PERCENT
    /// - TRAILING_STOP_UPDATE_INTERVAL_MS
    /// - SLIPPAGE_TOLERANCE
    /// - PROFIT_TARGETS (JSON array of {profit_percent, sell_percent})
    /// - SIMULATE (true/false)
    /// - CHANNEL_TRIGGER_IDS (comma-separated chat IDs)
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(v) = std::env::var("SEARCH_QUOTE") {
            config.quote_asset = v;
        }
        if let Ok(v) = std::env::var("QUOTE_ASSET_AMOUNT") {
            config.quote_spend_amount = v.parse().context("Invalid QUOTE_ASSET_AMOUNT")?;
        }
        if let Ok(v) = std::env::var("TRAILING_STOP_PERCENT") {
            config.trailing_stop_percent = v.parse().context("Invalid TRAILING_STOP_PERCENT")?;
        }
        if let Ok(v) = std::env::var("TRAILING_STOP_UPDATE_INTERVAL_MS") {
            config.poll_interval_ms = v
                .parse()
                .context("Invalid TRAILING_STOP_UPDATE_INTERVAL_MS")?;
        }
        if let Ok(v) = std::env::var("SLIPPAGE_TOLERANCE") {
            config.slippage_tolerance = v.parse().context("Invalid SLIPPAGE_TOLERANCE")?;
        }
        if let Ok(v) = std::env::var("PROFIT_TARGETS") {
            config.profit_targets =
                serde_json::from_str(&v).context("Invalid PROFIT_TARGETS JSON")?;
        }
        if let Ok(v) = std::env::var("SIMULATE") {
            config.simulate = v.parse().context("Invalid SIMULATE")?;
        }
        if let Ok(v) = std::env::var("CHANNEL_TRIGGER_IDS") {
            config.channel_allow_list = v
                .split(',')
                .filter(|s| !s.trim().is_empty())
                .map(|s| s.trim().parse::<i64>().context("Invalid CHANNEL_TRIGGER_IDS entry"))
                .collect::<Result<_>>()?;
        }

        Ok(config)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}
