//! Listing sniper.
//!
//! Watches a Telegram feed for mentions of newly listed trading pairs,
//! confirms with the operator, market-buys, then manages the position with
//! tiered profit targets and a trailing stop until it is stopped out.

mod api;
mod bot;
mod models;
mod trading;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

use crate::api::{pump_updates, BinanceClient, MtprotoHttpTransport, ResilientClient};
use crate::bot::{Bot, StdinConfirm};
use crate::trading::TradeConfig;

/// Listing sniper CLI.
#[derive(Parser)]
#[command(name = "listing-sniper")]
#[command(about = "Trade newly listed pairs off a Telegram feed", long_about = None)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch for listings and run the trade lifecycle
    Run {
        /// Flag every order as a test order (nothing executes)
        #[arg(long)]
        simulate: bool,
    },

    /// Show the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let log_level = match cli.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let mut config = TradeConfig::from_env()?;

    match cli.command {
        Commands::Config => {
            println!("\n=== Trade Configuration ===\n");
            println!("Quote Asset:          {}", config.quote_asset);
            println!("Quote Spend Amount:   {}", config.quote_spend_amount);
            println!("Trailing Stop:        {}%", config.trailing_stop_percent * rust_decimal_macros::dec!(100));
            println!("Poll Interval:        {}ms", config.poll_interval_ms);
            println!("Slippage Tolerance:   {}%", config.slippage_tolerance * rust_decimal_macros::dec!(100));
            println!("Simulate:             {}", config.simulate);
            println!(
                "Channel Allow-List:   {}",
                if config.channel_allow_list.is_empty() {
                    "all channels".to_string()
                } else {
                    format!("{:?}", config.channel_allow_list)
                }
            );

            println!("\nProfit Targets:");
            for target in &config.profit_targets {
                println!(
                    "  at +{}% sell {}%",
                    target.profit_percent * rust_decimal_macros::dec!(100),
                    target.sell_percent * rust_decimal_macros::dec!(100)
                );
            }
        }

        Commands::Run { simulate } => {
            if simulate {
                config.simulate = true;
            }

            info!(
                quote = %config.quote_asset,
                simulate = config.simulate,
                "starting listing sniper"
            );

            let exchange = BinanceClient::from_env().context("exchange credentials missing")?;
            let transport =
                MtprotoHttpTransport::from_env().context("telegram credentials missing")?;
            let rpc = ResilientClient::new(transport);

            let (tx, rx) = tokio::sync::mpsc::channel(64);
            tokio::spawn(async move {
                if let Err(e) = pump_updates(rpc, tx).await {
                    error!(error = %e, "update pump stopped");
                }
            });

            let bot = Bot::new(config, exchange, StdinConfirm, rx);
            let outcome = bot.run().await?;

            info!(%outcome, "trade complete");
            println!("\n{outcome}");
        }
    }

    Ok(())
}
