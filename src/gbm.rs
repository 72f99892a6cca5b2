//! Geometric Brownian motion sampling.
//!
//! Exact log-normal stepping: `S_T = S_0 exp((mu - sigma^2/2) T + sigma
//! sqrt(T) Z)`. Seedable for reproducible experiments; seed 0 draws one
//! from entropy.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::StandardNormal;

pub struct Gbm {
    s0: f64,
    mu: f64,
    sigma: f64,
    rng: ChaCha8Rng,
}

impl Gbm {
    pub fn new(s0: f64, mu: f64, sigma: f64, seed: u64) -> Self {
        let rng = if seed == 0 {
            ChaCha8Rng::from_entropy()
        } else {
            ChaCha8Rng::seed_from_u64(seed)
        };
        Self { s0, mu, sigma, rng }
    }

    pub fn reseed(&mut self, seed: u64) {
        self.rng = if seed == 0 {
            ChaCha8Rng::from_entropy()
        } else {
            ChaCha8Rng::seed_from_u64(seed)
        };
    }

    /// One terminal sample at horizon `t` (years).
    pub fn sample_terminal(&mut self, t: f64) -> f64 {
        let z: f64 = self.rng.sample(StandardNormal);
        let drift = (self.mu - 0.5 * self.sigma * self.sigma) * t;
        let vol = self.sigma * t.sqrt();
        self.s0 * (drift + vol * z).exp()
    }

    /// A discretized path of `n_steps` increments over `[0, t]`, starting
    /// at `s0`; the returned vector has `n_steps + 1` points.
    pub fn sample_path(&mut self, t: f64, n_steps: usize) -> Vec<f64> {
        let mut path = Vec::with_capacity(n_steps + 1);
        path.push(self.s0);
        if n_steps == 0 {
            return path;
        }

        let dt = t / n_steps as f64;
        let drift_dt = (self.mu - 0.5 * self.sigma * self.sigma) * dt;
        let vol_sqrt_dt = self.sigma * dt.sqrt();

        let mut s = self.s0;
        for _ in 0..n_steps {
            let z: f64 = self.rng.sample(StandardNormal);
            s *= (drift_dt + vol_sqrt_dt * z).exp();
            path.push(s);
        }
        path
    }

    /// `n_paths` independent terminal samples at horizon `t`.
    pub fn sample_terminal_batch(&mut self, n_paths: usize, t: f64) -> Vec<f64> {
        let drift = (self.mu - 0.5 * self.sigma * self.sigma) * t;
        let vol = self.sigma * t.sqrt();
        (0..n_paths)
            .map(|_| {
                let z: f64 = self.rng.sample(StandardNormal);
                self.s0 * (drift + vol * z).exp()
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_has_n_plus_one_points_starting_at_s0() {
        let mut gbm = Gbm::new(100.0, 0.05, 0.2, 42);
        let path = gbm.sample_path(1.0, 250);
        assert_eq!(path.len(), 251);
        assert_eq!(path[0], 100.0);
        assert!(path.iter().all(|s| s.is_finite() && *s > 0.0));
    }

    #[test]
    fn zero_steps_returns_just_the_start() {
        let mut gbm = Gbm::new(100.0, 0.05, 0.2, 42);
        assert_eq!(gbm.sample_path(1.0, 0), vec![100.0]);
    }

    #[test]
    fn zero_vol_is_deterministic_drift() {
        let mut gbm = Gbm::new(100.0, 0.1, 0.0, 42);
        let st = gbm.sample_terminal(2.0);
        assert!((st - 100.0 * (0.1f64 * 2.0).exp()).abs() < 1e-9);
    }

    #[test]
    fn fixed_seed_reproduces_samples() {
        let mut a = Gbm::new(100.0, 0.05, 0.2, 7);
        let mut b = Gbm::new(100.0, 0.05, 0.2, 7);
        assert_eq!(a.sample_terminal_batch(100, 1.0), b.sample_terminal_batch(100, 1.0));

        a.reseed(7);
        let again = a.sample_terminal_batch(100, 1.0);
        b.reseed(7);
        assert_eq!(again, b.sample_terminal_batch(100, 1.0));
    }

    #[test]
    fn batch_mean_is_near_the_forward() {
        let mut gbm = Gbm::new(100.0, 0.05, 0.2, 1234);
        let batch = gbm.sample_terminal_batch(200_000, 1.0);
        let mean = batch.iter().sum::<f64>() / batch.len() as f64;
        let forward = 100.0 * (0.05f64).exp();
        assert!((mean - forward).abs() / forward < 0.01);
    }
}
