//! Trading logic: configuration, pricing policy, signal matching.

mod config;
pub mod pricing;
mod signal;

pub use config::{ProfitTarget, TradeConfig};
pub use signal::SignalMatcher;
