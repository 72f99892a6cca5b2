//! Quoting and hedging strategy.
//!
//! A wire client like any other participant: it follows TOB frames to
//! maintain its view of the mid, accumulates inventory from TRADE frames
//! bearing its user id, and on a fixed cadence posts a two-sided quote
//! around an inventory-skewed reservation price. When inventory drifts past
//! the hedge tolerance it sends an aggressive order through the mid to pull
//! the position back toward flat.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::messages::{ServerMessage, Side};
use crate::net::WireClient;
use crate::sim::round_to_tick;

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    pub enabled: bool,
    pub user_id: u64,
    /// Absolute quoted spread; half on each side of the reservation price.
    pub spread: f64,
    /// Reservation-price shift per unit of inventory.
    pub skew: f64,
    pub qty: u64,
    /// Net position beyond which the bot hedges back toward flat.
    pub hedge_tolerance: f64,
    /// Largest single hedge order.
    pub max_hedge_qty: u64,
    pub update_interval_secs: f64,
    pub tick: f64,
    pub min_price: f64,
    pub max_price: f64,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            user_id: 9999,
            spread: 0.5,
            skew: 0.05,
            qty: 5,
            hedge_tolerance: 25.0,
            max_hedge_qty: 100,
            update_interval_secs: 0.2,
            tick: 0.01,
            min_price: 0.0001,
            max_price: 1e7,
        }
    }
}

/// Bid/ask quote prices around the inventory-skewed reservation price.
/// Long inventory shades both quotes down (eager to sell), short shades up.
pub fn quote_prices(cfg: &BotConfig, mid: f64, inventory: f64) -> (f64, f64) {
    let theo = mid - cfg.skew * inventory;
    let bid = round_to_tick(theo - 0.5 * cfg.spread, cfg.tick).clamp(cfg.min_price, cfg.max_price);
    let ask = round_to_tick(theo + 0.5 * cfg.spread, cfg.tick).clamp(cfg.min_price, cfg.max_price);
    (bid, ask)
}

/// Owns the strategy thread; stops and joins on drop.
pub struct QuoteBot {
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl QuoteBot {
    pub fn start(cfg: BotConfig, addr: SocketAddr) -> io::Result<Self> {
        let client = WireClient::connect(addr, Duration::from_millis(5))?;
        let running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&running);
        let thread = std::thread::Builder::new()
            .name("simex-bot".into())
            .spawn(move || run(cfg, client, flag))?;
        Ok(Self { running, thread: Some(thread) })
    }

    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for QuoteBot {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run(cfg: BotConfig, mut client: WireClient, running: Arc<AtomicBool>) {
    let interval = Duration::from_secs_f64(cfg.update_interval_secs);
    let mut last_mid = 0.0f64;
    let mut inventory = 0.0f64;
    let mut last_quote = Instant::now() - interval;
    info!(user_id = cfg.user_id, spread = cfg.spread, "quote bot started");

    while running.load(Ordering::Acquire) {
        // Drain the feed: mid from TOB, inventory from our own fills.
        loop {
            match client.poll_message() {
                Ok(Some(ServerMessage::TopOfBook(tob))) => {
                    if let Some(mid) = tob.mid() {
                        last_mid = mid;
                    }
                }
                Ok(Some(ServerMessage::Trade(tr))) => {
                    if tr.buy_user_id == cfg.user_id {
                        inventory += tr.quantity as f64;
                    }
                    if tr.sell_user_id == cfg.user_id {
                        inventory -= tr.quantity as f64;
                    }
                }
                Ok(Some(_)) => {}
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "quote bot lost its connection");
                    return;
                }
            }
        }

        if last_quote.elapsed() < interval {
            std::thread::sleep(Duration::from_millis(10));
            continue;
        }
        last_quote = Instant::now();

        if last_mid <= 0.0 {
            // No market yet.
            std::thread::sleep(Duration::from_millis(20));
            continue;
        }

        let (bid, ask) = quote_prices(&cfg, last_mid, inventory);
        let quoted = client
            .send_new_order(cfg.user_id, Side::Buy, bid, cfg.qty)
            .and_then(|_| client.send_new_order(cfg.user_id, Side::Sell, ask, cfg.qty));
        if let Err(e) = quoted {
            warn!(error = %e, "quote bot lost its connection");
            return;
        }
        debug!(bid, ask, inventory, "quoted");

        if inventory.abs() > cfg.hedge_tolerance {
            // Flatten through the mid; fills come back on the feed.
            let side = if inventory > 0.0 { Side::Sell } else { Side::Buy };
            let price = match side {
                Side::Sell => last_mid - 0.01,
                Side::Buy => last_mid + 0.01,
            };
            let price = round_to_tick(price, cfg.tick).clamp(cfg.min_price, cfg.max_price);
            let qty = (inventory.abs().min(cfg.max_hedge_qty as f64)) as u64;
            if qty > 0 {
                if let Err(e) = client.send_new_order(cfg.user_id, side, price, qty) {
                    warn!(error = %e, "quote bot lost its connection");
                    return;
                }
                debug!(?side, price, qty, inventory, "hedging");
            }
        }
    }
    info!("quote bot stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flat_inventory_quotes_symmetrically() {
        let cfg = BotConfig::default();
        let (bid, ask) = quote_prices(&cfg, 100.0, 0.0);
        assert!((bid - 99.75).abs() < 1e-9);
        assert!((ask - 100.25).abs() < 1e-9);
    }

    #[test]
    fn long_inventory_shades_quotes_down() {
        let cfg = BotConfig::default();
        let (bid, ask) = quote_prices(&cfg, 100.0, 10.0);
        let (flat_bid, flat_ask) = quote_prices(&cfg, 100.0, 0.0);
        assert!(bid < flat_bid);
        assert!(ask < flat_ask);
    }

    #[test]
    fn short_inventory_shades_quotes_up() {
        let cfg = BotConfig::default();
        let (bid, ask) = quote_prices(&cfg, 100.0, -10.0);
        assert!(bid > 99.75);
        assert!(ask > 100.25);
    }

    #[test]
    fn quotes_respect_price_bounds() {
        let cfg = BotConfig { min_price: 1.0, max_price: 100.0, ..Default::default() };
        let (bid, _) = quote_prices(&cfg, 1.0, 0.0);
        assert!(bid >= cfg.min_price);
        let (_, ask) = quote_prices(&cfg, 100.0, 0.0);
        assert!(ask <= cfg.max_price);
    }
}
