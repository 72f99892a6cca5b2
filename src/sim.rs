//! Synthetic market flow.
//!
//! A background thread evolves a mean-reverting log-price and mints limit
//! orders around it: passive depth on both sides plus a crossing pair near
//! the mid so trades print. Orders go through the wire like any other
//! client's; the simulated flow carries user id 0 and is not PnL-tracked.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::StandardNormal;
use serde::Deserialize;
use tracing::{info, warn};

use crate::messages::Side;
use crate::net::WireClient;

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    pub enabled: bool,
    pub user_id: u64,
    /// Initial price level.
    pub s0: f64,
    /// Annualized-ish volatility of the log process.
    pub sigma: f64,
    /// Mean-reversion speed toward `mean_level`.
    pub kappa: f64,
    pub mean_level: f64,
    /// Simulation step, also the pacing sleep.
    pub dt_secs: f64,
    pub tick: f64,
    pub min_qty: u64,
    pub max_qty: u64,
    /// RNG seed; 0 draws one from entropy.
    pub seed: u64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            user_id: 0,
            s0: 100.0,
            sigma: 0.2,
            kappa: 1.0,
            mean_level: 100.0,
            dt_secs: 0.15,
            tick: 0.01,
            min_qty: 1,
            max_qty: 20,
            seed: 0,
        }
    }
}

/// Quantize to the configured tick.
#[inline]
pub fn round_to_tick(x: f64, tick: f64) -> f64 {
    (x / tick).round() * tick
}

/// Ornstein-Uhlenbeck process on log price:
/// `d logS = kappa (log m - logS) dt + sigma sqrt(dt) z`.
/// The price is floored before taking the log so the process survives a
/// collapse to zero.
pub struct LogOuProcess {
    s: f64,
    floor: f64,
    kappa: f64,
    log_mean: f64,
    vol_step: f64,
    dt: f64,
}

impl LogOuProcess {
    pub fn new(s0: f64, mean_level: f64, kappa: f64, sigma: f64, dt: f64, floor: f64) -> Self {
        Self {
            s: s0,
            floor,
            kappa,
            log_mean: mean_level.ln(),
            vol_step: sigma * dt.sqrt(),
            dt,
        }
    }

    /// Advance one step with the given standard-normal shock and return the
    /// new price.
    pub fn step(&mut self, z: f64) -> f64 {
        let mut log_s = self.s.max(self.floor).ln();
        log_s += self.kappa * (self.log_mean - log_s) * self.dt + self.vol_step * z;
        self.s = log_s.exp();
        self.s
    }

    pub fn price(&self) -> f64 {
        self.s
    }
}

/// Owns the simulator thread; stops and joins on drop.
pub struct MarketSimulator {
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl MarketSimulator {
    /// Connect to the feed server and start generating flow.
    pub fn start(cfg: SimConfig, addr: SocketAddr) -> io::Result<Self> {
        // Short poll: the client only reads to keep its feed socket drained.
        let client = WireClient::connect(addr, Duration::from_millis(1))?;
        let running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&running);
        let thread = std::thread::Builder::new()
            .name("simex-sim".into())
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

impl Drop for MarketSimulator {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run(cfg: SimConfig, mut client: WireClient, running: Arc<AtomicBool>) {
    let mut rng = if cfg.seed == 0 {
        ChaCha8Rng::from_entropy()
    } else {
        ChaCha8Rng::seed_from_u64(cfg.seed)
    };
    let mut process =
        LogOuProcess::new(cfg.s0, cfg.mean_level, cfg.kappa, cfg.sigma, cfg.dt_secs, cfg.tick);
    let pacing = Duration::from_secs_f64(cfg.dt_secs);
    info!(s0 = cfg.s0, sigma = cfg.sigma, "market simulator started");

    while running.load(Ordering::Acquire) {
        let z: f64 = rng.sample(StandardNormal);
        let s = process.step(z);
        let mid = round_to_tick(s, cfg.tick).max(cfg.tick);

        let result = (|| -> io::Result<()> {
            // Passive depth around the mid.
            let passive_bid = round_to_tick(mid - 0.5, cfg.tick);
            let passive_ask = round_to_tick(mid + 0.5, cfg.tick);
            if passive_bid > 0.0 {
                let qty = rng.gen_range(cfg.min_qty..=cfg.max_qty);
                client.send_new_order(cfg.user_id, Side::Buy, passive_bid, qty)?;
            }
            let qty = rng.gen_range(cfg.min_qty..=cfg.max_qty);
            client.send_new_order(cfg.user_id, Side::Sell, passive_ask, qty)?;

            // A crossing pair near the mid so trades print: buy first, then
            // the sell that crosses it.
            let aggressive_bid = round_to_tick(mid + 0.05, cfg.tick);
            let aggressive_ask = round_to_tick(mid - 0.05, cfg.tick);
            if aggressive_ask < aggressive_bid && aggressive_ask > 0.0 {
                let qty = rng.gen_range(cfg.min_qty..=cfg.max_qty);
                client.send_new_order(cfg.user_id, Side::Buy, aggressive_bid, qty)?;
                client.send_new_order(cfg.user_id, Side::Sell, aggressive_ask, qty)?;
            }

            client.drain()
        })();
        if let Err(e) = result {
            warn!(error = %e, "market simulator lost its connection");
            break;
        }

        std::thread::sleep(pacing);
    }
    info!("market simulator stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tick_rounding() {
        assert!((round_to_tick(100.004, 0.01) - 100.0).abs() < 1e-9);
        assert!((round_to_tick(100.006, 0.01) - 100.01).abs() < 1e-9);
        assert!((round_to_tick(99.995, 0.01) - 100.0).abs() < 1e-9);
    }

    #[test]
    fn zero_noise_reverts_toward_mean() {
        let mut p = LogOuProcess::new(80.0, 100.0, 1.0, 0.2, 0.1, 0.01);
        let mut last_gap = (p.price().ln() - 100.0f64.ln()).abs();
        for _ in 0..50 {
            p.step(0.0);
            let gap = (p.price().ln() - 100.0f64.ln()).abs();
            assert!(gap < last_gap, "gap should shrink monotonically");
            last_gap = gap;
        }
        assert!((p.price() - 100.0).abs() < 1.0);
    }

    #[test]
    fn survives_price_collapse() {
        let mut p = LogOuProcess::new(0.0, 100.0, 1.0, 0.2, 0.1, 0.01);
        let s = p.step(0.0);
        assert!(s.is_finite());
        assert!(s > 0.0);
    }

    #[test]
    fn deterministic_under_fixed_seed() {
        let sample = |seed: u64| {
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            let mut p = LogOuProcess::new(100.0, 100.0, 1.0, 0.2, 0.1, 0.01);
            (0..100).map(|_| p.step(rng.sample(StandardNormal))).collect::<Vec<f64>>()
        };
        assert_eq!(sample(7), sample(7));
        assert_ne!(sample(7), sample(8));
    }
}
