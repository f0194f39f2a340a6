//! Feed Manager service entry point.
//!
//! Runs the feed service against the built-in mock session with a synthetic
//! feed. A production deployment injects its vendor `MarketSession`
//! implementation through the library API instead.

use std::sync::Arc;

use anyhow::{anyhow, Result};
use clap::Parser;
use tracing::info;

use feed_common::logging::{init_logging, LogConfig};
use feed_manager::{FeedService, MockSession, Settings, StaticUniverse};

/// Symbols served when neither config nor CLI supplies a universe
const DEFAULT_UNIVERSE: &[&str] = &["AAPL", "MSFT", "NVDA", "TSLA", "AMZN", "META", "SPY"];

#[derive(Parser)]
#[command(name = "feed-manager", about = "Market-data feed manager")]
struct Cli {
    /// Comma-separated symbols overriding the configured universe
    /// (priority order, most-preferred first)
    #[arg(long, value_delimiter = ',')]
    symbols: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    init_logging(LogConfig::from_env()).map_err(|e| anyhow!("logging init failed: {}", e))?;

    let cli = Cli::parse();
    let mut settings = Settings::load()?;
    if !cli.symbols.is_empty() {
        settings.universe.symbols = cli.symbols;
    }
    if settings.universe.symbols.is_empty() {
        settings.universe.symbols = DEFAULT_UNIVERSE.iter().map(|s| s.to_string()).collect();
    }
    info!("Universe: {:?}", settings.universe.symbols);

    let universe = Arc::new(StaticUniverse::from_names(&settings.universe.symbols));
    let (session, events) = MockSession::new();
    let service = FeedService::new(session.clone(), universe, settings);

    // Synthetic market data until shutdown
    let feed_task = session.spawn_synthetic_feed(service.shutdown_handle().subscribe());

    let on_signal = service.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown requested");
            on_signal.stop();
        }
    });

    service.start(events).await?;
    let _ = feed_task.await;
    Ok(())
}
