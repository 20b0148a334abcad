//! Beta schedules for the diffusion forward/reverse process.
//!
//! Precomputes the cumulative-alpha tables and posterior coefficients the
//! reverse process needs. Train and validation phases run different
//! schedules; the facade swaps the active one on request.

use anyhow::{ensure, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// "linear", "quad", "const", or "cosine". Anything else runs linear.
    pub schedule: String,
    pub n_timestep: usize,
    pub linear_start: f64,
    pub linear_end: f64,
}

#[derive(Debug, Clone)]
pub struct BetaSchedule {
    n_timestep: usize,
    betas: Vec<f64>,
    alphas_cumprod: Vec<f64>,
    sqrt_alphas_cumprod: Vec<f64>,
    sqrt_one_minus_alphas_cumprod: Vec<f64>,
    sqrt_recip_alphas_cumprod: Vec<f64>,
    sqrt_recipm1_alphas_cumprod: Vec<f64>,
    posterior_log_variance_clipped: Vec<f64>,
    posterior_mean_coef1: Vec<f64>,
    posterior_mean_coef2: Vec<f64>,
}

impl BetaSchedule {
    pub fn new(cfg: &ScheduleConfig) -> Result<Self> {
        ensure!(cfg.n_timestep > 0, "n_timestep must be positive");
        let n = cfg.n_timestep;

        let betas = match cfg.schedule.as_str() {
            "quad" => {
                let start = cfg.linear_start.sqrt();
                let end = cfg.linear_end.sqrt();
                (0..n)
                    .map(|i| {
                        let t = start + (end - start) * i as f64 / (n as f64 - 1.0).max(1.0);
                        t * t
                    })
                    .collect()
            }
            "const" => vec![cfg.linear_end; n],
            "cosine" => cosine_betas(n),
            _ => (0..n)
                .map(|i| {
                    cfg.linear_start
                        + (cfg.linear_end - cfg.linear_start) * i as f64 / (n as f64 - 1.0).max(1.0)
                })
                .collect(),
        };

        let alphas: Vec<f64> = betas.iter().map(|b| 1.0 - b).collect();
        let mut alphas_cumprod = Vec::with_capacity(n);
        let mut acc = 1.0;
        for a in &alphas {
            acc *= a;
            alphas_cumprod.push(acc);
        }

        let sqrt_alphas_cumprod: Vec<f64> = alphas_cumprod.iter().map(|a| a.sqrt()).collect();
        let sqrt_one_minus_alphas_cumprod: Vec<f64> =
            alphas_cumprod.iter().map(|a| (1.0 - a).sqrt()).collect();
        let sqrt_recip_alphas_cumprod: Vec<f64> =
            alphas_cumprod.iter().map(|a| (1.0 / a).sqrt()).collect();
        let sqrt_recipm1_alphas_cumprod: Vec<f64> =
            alphas_cumprod.iter().map(|a| (1.0 / a - 1.0).sqrt()).collect();

        let mut posterior_variance = Vec::with_capacity(n);
        let mut posterior_mean_coef1 = Vec::with_capacity(n);
        let mut posterior_mean_coef2 = Vec::with_capacity(n);
        for t in 0..n {
            let acp_prev = if t == 0 { 1.0 } else { alphas_cumprod[t - 1] };
            let acp = alphas_cumprod[t];
            posterior_variance.push(betas[t] * (1.0 - acp_prev) / (1.0 - acp));
            posterior_mean_coef1.push(betas[t] * acp_prev.sqrt() / (1.0 - acp));
            posterior_mean_coef2.push((1.0 - acp_prev) * alphas[t].sqrt() / (1.0 - acp));
        }
        let posterior_log_variance_clipped: Vec<f64> = posterior_variance
            .iter()
            .map(|v| v.max(1e-20).ln())
            .collect();

        Ok(Self {
            n_timestep: n,
            betas,
            alphas_cumprod,
            sqrt_alphas_cumprod,
            sqrt_one_minus_alphas_cumprod,
            sqrt_recip_alphas_cumprod,
            sqrt_recipm1_alphas_cumprod,
            posterior_log_variance_clipped,
            posterior_mean_coef1,
            posterior_mean_coef2,
        })
    }

    pub fn n_timestep(&self) -> usize {
        self.n_timestep
    }

    pub fn sqrt_alphas_cumprod(&self, t: usize) -> f64 {
        self.sqrt_alphas_cumprod[t]
    }

    pub fn sqrt_one_minus_alphas_cumprod(&self, t: usize) -> f64 {
        self.sqrt_one_minus_alphas_cumprod[t]
    }

    /// x0 estimate from a noisy sample and a noise prediction.
    pub fn predict_start_from_noise(&self, t: usize, x_t: f64, noise: f64) -> f64 {
        self.sqrt_recip_alphas_cumprod[t] * x_t - self.sqrt_recipm1_alphas_cumprod[t] * noise
    }

    /// Mean of q(x_{t-1} | x_t, x0).
    pub fn posterior_mean(&self, t: usize, x_start: f64, x_t: f64) -> f64 {
        self.posterior_mean_coef1[t] * x_start + self.posterior_mean_coef2[t] * x_t
    }

    /// Standard deviation of the reverse-step posterior.
    pub fn posterior_std(&self, t: usize) -> f64 {
        (0.5 * self.posterior_log_variance_clipped[t]).exp()
    }

    pub fn betas(&self) -> &[f64] {
        &self.betas
    }

    pub fn alphas_cumprod(&self) -> &[f64] {
        &self.alphas_cumprod
    }
}

fn cosine_betas(n: usize) -> Vec<f64> {
    let s = 0.008;
    let acp = |i: usize| {
        let t = i as f64 / n as f64;
        (((t + s) / (1.0 + s)) * std::f64::consts::FRAC_PI_2).cos().powi(2)
    };
    let a0 = acp(0);
    (1..=n)
        .map(|i| (1.0 - (acp(i) / a0) / (acp(i - 1) / a0)).min(0.999))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn linear(n: usize) -> BetaSchedule {
        BetaSchedule::new(&ScheduleConfig {
            schedule: "linear".into(),
            n_timestep: n,
            linear_start: 1e-6,
            linear_end: 1e-2,
        })
        .unwrap()
    }

    #[test]
    fn linear_schedule_spans_the_configured_range() {
        let s = linear(100);
        assert!((s.betas()[0] - 1e-6).abs() < 1e-12);
        assert!((s.betas()[99] - 1e-2).abs() < 1e-12);
    }

    #[test]
    fn alphas_cumprod_is_monotonically_decreasing() {
        let s = linear(200);
        for w in s.alphas_cumprod().windows(2) {
            assert!(w[1] < w[0]);
        }
        assert!(s.alphas_cumprod()[0] < 1.0);
    }

    #[test]
    fn predict_start_inverts_the_forward_process() {
        let s = linear(50);
        let (x0, noise, t) = (0.3f64, -0.7f64, 20usize);
        let x_t = s.sqrt_alphas_cumprod(t) * x0 + s.sqrt_one_minus_alphas_cumprod(t) * noise;
        let recovered = s.predict_start_from_noise(t, x_t, noise);
        assert!((recovered - x0).abs() < 1e-9);
    }

    #[test]
    fn unknown_schedule_falls_back_to_linear() {
        let a = linear(10);
        let b = BetaSchedule::new(&ScheduleConfig {
            schedule: "mystery".into(),
            n_timestep: 10,
            linear_start: 1e-6,
            linear_end: 1e-2,
        })
        .unwrap();
        assert_eq!(a.betas(), b.betas());
    }

    #[test]
    fn cosine_betas_stay_in_unit_range() {
        let s = BetaSchedule::new(&ScheduleConfig {
            schedule: "cosine".into(),
            n_timestep: 100,
            linear_start: 0.0,
            linear_end: 0.0,
        })
        .unwrap();
        for &b in s.betas() {
            assert!(b > 0.0 && b <= 0.999);
        }
    }
}
