//! Monte Carlo pricing of European terminal payoffs.
//!
//! Risk-neutral terminal sampling with two optional variance reducers:
//! antithetic pairing (each sample averages the payoff at `z` and `-z`) and
//! a control variate on the discounted terminal spot, whose expectation is
//! exactly `s0`. Work is fanned out with rayon in fixed-size chunks, each
//! with its own seeded RNG stream, so results are deterministic for a given
//! seed regardless of thread scheduling.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::StandardNormal;
use rayon::prelude::*;

/// Samples per rayon task.
const CHUNK: usize = 8192;

/// Per-chunk RNG stream spacing.
const SEED_STRIDE: u64 = 0x9E37_79B9_7F4A_7C15;

#[derive(Clone, Copy, Debug)]
pub struct McOptions {
    /// Number of samples. With antithetic pairing each sample still counts
    /// once (it averages two evaluations).
    pub n_paths: usize,
    /// RNG seed; 0 draws one from entropy.
    pub seed: u64,
    pub antithetic: bool,
    pub control_variate: bool,
}

impl Default for McOptions {
    fn default() -> Self {
        Self { n_paths: 100_000, seed: 0, antithetic: true, control_variate: true }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct McResult {
    pub price: f64,
    pub std_error: f64,
    pub n_samples: usize,
}

/// Accumulators for the payoff `y` and the control `x = disc * S_T`.
#[derive(Clone, Copy, Default)]
struct Acc {
    sum_y: f64,
    sum_y2: f64,
    sum_x: f64,
    sum_x2: f64,
    sum_xy: f64,
    n: usize,
}

impl Acc {
    fn add(&mut self, y: f64, x: f64) {
        self.sum_y += y;
        self.sum_y2 += y * y;
        self.sum_x += x;
        self.sum_x2 += x * x;
        self.sum_xy += x * y;
        self.n += 1;
    }

    fn merge(mut self, other: Acc) -> Acc {
        self.sum_y += other.sum_y;
        self.sum_y2 += other.sum_y2;
        self.sum_x += other.sum_x;
        self.sum_x2 += other.sum_x2;
        self.sum_xy += other.sum_xy;
        self.n += other.n;
        self
    }
}

#[inline]
fn payoff(st: f64, k: f64, is_call: bool) -> f64 {
    if is_call {
        (st - k).max(0.0)
    } else {
        (k - st).max(0.0)
    }
}

/// Price a European call/put by risk-neutral terminal simulation.
pub fn monte_carlo_terminal(
    s0: f64,
    k: f64,
    r: f64,
    sigma: f64,
    t: f64,
    is_call: bool,
    opts: &McOptions,
) -> McResult {
    let seed = if opts.seed == 0 { rand::thread_rng().gen() } else { opts.seed };
    let n = opts.n_paths.max(2);

    let drift = (r - 0.5 * sigma * sigma) * t;
    let vol = sigma * t.sqrt();
    let disc = (-r * t).exp();
    let antithetic = opts.antithetic;

    let n_chunks = n.div_ceil(CHUNK);
    let acc = (0..n_chunks)
        .into_par_iter()
        .map(|chunk| {
            let mut rng =
                ChaCha8Rng::seed_from_u64(seed.wrapping_add((chunk as u64).wrapping_mul(SEED_STRIDE)));
            let count = CHUNK.min(n - chunk * CHUNK);
            let mut acc = Acc::default();
            for _ in 0..count {
                let z: f64 = rng.sample(StandardNormal);
                let (y, x) = if antithetic {
                    let up = s0 * (drift + vol * z).exp();
                    let dn = s0 * (drift - vol * z).exp();
                    (
                        0.5 * disc * (payoff(up, k, is_call) + payoff(dn, k, is_call)),
                        0.5 * disc * (up + dn),
                    )
                } else {
                    let st = s0 * (drift + vol * z).exp();
                    (disc * payoff(st, k, is_call), disc * st)
                };
                acc.add(y, x);
            }
            acc
        })
        .reduce(Acc::default, Acc::merge);

    let nf = acc.n as f64;
    let mean_y = acc.sum_y / nf;
    let mean_x = acc.sum_x / nf;
    let var_y = (acc.sum_y2 - nf * mean_y * mean_y) / (nf - 1.0);
    let var_x = (acc.sum_x2 - nf * mean_x * mean_x) / (nf - 1.0);
    let cov = (acc.sum_xy - nf * mean_x * mean_y) / (nf - 1.0);

    let (price, variance) = if opts.control_variate && var_x > 0.0 {
        let beta = cov / var_x;
        // E[disc * S_T] = s0 under the risk-neutral drift.
        (mean_y - beta * (mean_x - s0), (var_y - beta * cov).max(0.0))
    } else {
        (mean_y, var_y.max(0.0))
    };

    McResult { price, std_error: (variance / nf).sqrt(), n_samples: acc.n }
}
