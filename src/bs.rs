//! Black-Scholes closed forms: prices and greeks for European options.
//!
//! Inputs are spot `s`, strike `k`, risk-free rate `r`, volatility `sigma`
//! (annualized), and time to expiry `t` in years. The formulas assume all
//! of `s`, `k`, `sigma`, `t` strictly positive; callers handle degenerate
//! contracts.

use statrs::function::erf::erf;

use std::f64::consts::PI;

#[derive(Clone, Copy, Debug)]
pub struct BsInputs {
    pub s: f64,
    pub k: f64,
    pub r: f64,
    pub sigma: f64,
    pub t: f64,
}

/// Standard normal density.
pub fn norm_pdf(x: f64) -> f64 {
    (-0.5 * x * x).exp() / (2.0 * PI).sqrt()
}

/// Standard normal CDF.
pub fn norm_cdf(x: f64) -> f64 {
    0.5 * (1.0 + erf(x / std::f64::consts::SQRT_2))
}

fn d1(inp: &BsInputs) -> f64 {
    ((inp.s / inp.k).ln() + (inp.r + 0.5 * inp.sigma * inp.sigma) * inp.t)
        / (inp.sigma * inp.t.sqrt())
}

fn d2(inp: &BsInputs) -> f64 {
    d1(inp) - inp.sigma * inp.t.sqrt()
}

pub fn call_price(inp: &BsInputs) -> f64 {
    let d1 = d1(inp);
    let d2 = d1 - inp.sigma * inp.t.sqrt();
    inp.s * norm_cdf(d1) - inp.k * (-inp.r * inp.t).exp() * norm_cdf(d2)
}

pub fn put_price(inp: &BsInputs) -> f64 {
    let d1 = d1(inp);
    let d2 = d1 - inp.sigma * inp.t.sqrt();
    inp.k * (-inp.r * inp.t).exp() * norm_cdf(-d2) - inp.s * norm_cdf(-d1)
}

pub fn call_delta(inp: &BsInputs) -> f64 {
    norm_cdf(d1(inp))
}

pub fn put_delta(inp: &BsInputs) -> f64 {
    norm_cdf(d1(inp)) - 1.0
}

/// Gamma; identical for calls and puts.
pub fn gamma(inp: &BsInputs) -> f64 {
    norm_pdf(d1(inp)) / (inp.s * inp.sigma * inp.t.sqrt())
}

/// Vega; identical for calls and puts.
pub fn vega(inp: &BsInputs) -> f64 {
    inp.s * norm_pdf(d1(inp)) * inp.t.sqrt()
}

pub fn call_theta(inp: &BsInputs) -> f64 {
    let d1 = d1(inp);
    let d2 = d1 - inp.sigma * inp.t.sqrt();
    let term1 = -(inp.s * norm_pdf(d1) * inp.sigma) / (2.0 * inp.t.sqrt());
    let term2 = inp.r * inp.k * (-inp.r * inp.t).exp() * norm_cdf(d2);
    term1 - term2
}

pub fn put_theta(inp: &BsInputs) -> f64 {
    let d1 = d1(inp);
    let d2 = d1 - inp.sigma * inp.t.sqrt();
    let term1 = -(inp.s * norm_pdf(d1) * inp.sigma) / (2.0 * inp.t.sqrt());
    let term2 = inp.r * inp.k * (-inp.r * inp.t).exp() * norm_cdf(-d2);
    term1 + term2
}

pub fn call_rho(inp: &BsInputs) -> f64 {
    inp.k * inp.t * (-inp.r * inp.t).exp() * norm_cdf(d2(inp))
}

pub fn put_rho(inp: &BsInputs) -> f64 {
    -inp.k * inp.t * (-inp.r * inp.t).exp() * norm_cdf(-d2(inp))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn atm() -> BsInputs {
        BsInputs { s: 100.0, k: 100.0, r: 0.05, sigma: 0.2, t: 1.0 }
    }

    #[test]
    fn normal_cdf_reference_points() {
        assert!((norm_cdf(0.0) - 0.5).abs() < 1e-12);
        assert!((norm_cdf(1.0) - 0.841344746).abs() < 1e-8);
        assert!((norm_cdf(-1.0) - 0.158655254).abs() < 1e-8);
    }

    #[test]
    fn call_price_reference_value() {
        // Standard textbook case: S=K=100, r=5%, sigma=20%, T=1.
        assert!((call_price(&atm()) - 10.450583572).abs() < 1e-6);
    }

    #[test]
    fn put_call_parity() {
        let inp = atm();
        let lhs = call_price(&inp) - put_price(&inp);
        let rhs = inp.s - inp.k * (-inp.r * inp.t).exp();
        assert!((lhs - rhs).abs() < 1e-10);
    }

    #[test]
    fn deltas_are_bounded_and_consistent() {
        let inp = atm();
        let cd = call_delta(&inp);
        let pd = put_delta(&inp);
        assert!(cd > 0.0 && cd < 1.0);
        assert!(pd > -1.0 && pd < 0.0);
        assert!((cd - pd - 1.0).abs() < 1e-12);
        assert!((cd - 0.636830651).abs() < 1e-8);
    }

    #[test]
    fn gamma_and_vega_are_positive() {
        let inp = atm();
        assert!(gamma(&inp) > 0.0);
        assert!(vega(&inp) > 0.0);
    }

    #[test]
    fn deep_itm_call_approaches_forward_intrinsic() {
        let inp = BsInputs { s: 300.0, k: 100.0, r: 0.01, sigma: 0.2, t: 0.5 };
        let intrinsic = inp.s - inp.k * (-inp.r * inp.t).exp();
        assert!((call_price(&inp) - intrinsic).abs() < 1e-3);
    }
}
