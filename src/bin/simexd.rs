//! simexd - run the full simulator: matching engine, TCP feed server,
//! synthetic market flow, and the quoting bot, wired together on one box.
//!
//! Usage: `simexd [config.json]`. Without a config file every component
//! runs with its defaults (feed on 0.0.0.0:9001).

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::EnvFilter;

use simex::bot::QuoteBot;
use simex::net::FeedServer;
use simex::sim::MarketSimulator;
use simex::Config;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let cfg = Config::load(config_path.as_deref()).context("loading configuration")?;

    info!(symbol = %cfg.engine.symbol, "starting matching engine");
    let (_server, gate, feed) = simex::spawn(cfg.engine.clone());

    let net = FeedServer::bind(cfg.net.listen_addr.as_str(), gate, feed)
        .with_context(|| format!("binding feed server on {}", cfg.net.listen_addr))?;
    let addr = net.local_addr();

    let _sim = if cfg.sim.enabled {
        info!("starting market simulator");
        Some(MarketSimulator::start(cfg.sim.clone(), addr).context("starting market simulator")?)
    } else {
        None
    };

    let _bot = if cfg.bot.enabled {
        info!("starting quote bot");
        Some(QuoteBot::start(cfg.bot.clone(), addr).context("starting quote bot")?)
    } else {
        None
    };

    info!(%addr, "system ready");
    loop {
        std::thread::sleep(Duration::from_secs(1));
    }
}
