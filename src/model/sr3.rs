//! Concrete diffusion facade: a compact conditional noise predictor trained
//! with Adam, plus DDPM-style reverse sampling over the active schedule.
//!
//! The predictor is deliberately small (a per-channel affine model over the
//! noisy state, the conditioning image, and the noise level). The harness
//! around it carries the full contract the training controller relies on,
//! including schedule switching, checkpointing, and result visuals.

use anyhow::{anyhow, Context, Result};
use rand::Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::path::{Path, PathBuf};

use super::schedule::{BetaSchedule, ScheduleConfig};
use super::{DiffusionModel, Visuals};
use crate::data::Sample;
use crate::tensor::ImageTensor;

const CHANNELS: usize = 3;
/// Per channel: weight on x_t, weight on conditioning, weight on the noise
/// level, bias.
const PARAMS_PER_CHANNEL: usize = 4;
const N_PARAMS: usize = CHANNELS * PARAMS_PER_CHANNEL;

struct ResidualPredictor {
    weights: Vec<f32>,
}

impl ResidualPredictor {
    fn new() -> Self {
        Self {
            weights: vec![0.0; N_PARAMS],
        }
    }

    /// Predict the noise component of `x_t` given the conditioning image and
    /// the scalar noise level for the current timestep.
    fn forward(&self, x_t: &[f32], cond: &[f32], plane: usize, noise_level: f32) -> Vec<f32> {
        let mut out = vec![0.0f32; CHANNELS * plane];
        for c in 0..CHANNELS {
            let w = &self.weights[c * PARAMS_PER_CHANNEL..(c + 1) * PARAMS_PER_CHANNEL];
            for i in 0..plane {
                let idx = c * plane + i;
                out[idx] = w[0] * x_t[idx] + w[1] * cond[idx] + w[2] * noise_level + w[3];
            }
        }
        out
    }
}

struct Adam {
    lr: f32,
    beta1: f32,
    beta2: f32,
    eps: f32,
    t: u64,
    m: Vec<f32>,
    v: Vec<f32>,
}

impl Adam {
    fn new(lr: f32, n_params: usize) -> Self {
        Self {
            lr,
            beta1: 0.9,
            beta2: 0.999,
            eps: 1e-8,
            t: 0,
            m: vec![0.0; n_params],
            v: vec![0.0; n_params],
        }
    }

    fn step(&mut self, params: &mut [f32], grads: &[f32]) {
        self.t += 1;
        let bc1 = 1.0 - self.beta1.powi(self.t as i32);
        let bc2 = 1.0 - self.beta2.powi(self.t as i32);
        for i in 0..params.len() {
            self.m[i] = self.beta1 * self.m[i] + (1.0 - self.beta1) * grads[i];
            self.v[i] = self.beta2 * self.v[i] + (1.0 - self.beta2) * grads[i] * grads[i];
            let m_hat = self.m[i] / bc1;
            let v_hat = self.v[i] / bc2;
            params[i] -= self.lr * m_hat / (v_hat.sqrt() + self.eps);
        }
    }
}

#[derive(Serialize, Deserialize)]
struct GenState {
    epoch: u64,
    step: u64,
    weights: Vec<f32>,
}

#[derive(Serialize, Deserialize)]
struct OptState {
    t: u64,
    m: Vec<f32>,
    v: Vec<f32>,
}

pub struct Sr3Model {
    net: ResidualPredictor,
    opt: Adam,
    schedule: Option<(BetaSchedule, String)>,
    data: Vec<Sample>,
    visuals: Option<Visuals>,
    log: BTreeMap<String, f64>,
    begin_step: u64,
    begin_epoch: u64,
    checkpoint_dir: PathBuf,
}

impl Sr3Model {
    pub fn new(lr: f32, checkpoint_dir: PathBuf) -> Self {
        Self {
            net: ResidualPredictor::new(),
            opt: Adam::new(lr, N_PARAMS),
            schedule: None,
            data: Vec::new(),
            visuals: None,
            log: BTreeMap::new(),
            begin_step: 0,
            begin_epoch: 0,
            checkpoint_dir,
        }
    }

    /// Restore weights, optimizer moments, and the (epoch, step) counters
    /// from a checkpoint prefix such as `experiments/checkpoint/I5000_E3`.
    pub fn load_state(&mut self, prefix: &Path) -> Result<()> {
        let gen_path = PathBuf::from(format!("{}_gen.json", prefix.display()));
        let opt_path = PathBuf::from(format!("{}_opt.json", prefix.display()));

        let gen: GenState = serde_json::from_reader(
            File::open(&gen_path)
                .with_context(|| format!("Failed to open resume state: {}", gen_path.display()))?,
        )
        .with_context(|| format!("Failed to parse resume state: {}", gen_path.display()))?;
        anyhow::ensure!(
            gen.weights.len() == N_PARAMS,
            "resume state has {} weights, expected {}",
            gen.weights.len(),
            N_PARAMS
        );

        let opt: OptState = serde_json::from_reader(
            File::open(&opt_path)
                .with_context(|| format!("Failed to open resume state: {}", opt_path.display()))?,
        )
        .with_context(|| format!("Failed to parse resume state: {}", opt_path.display()))?;

        self.net.weights = gen.weights;
        self.begin_step = gen.step;
        self.begin_epoch = gen.epoch;
        self.opt.t = opt.t;
        self.opt.m = opt.m;
        self.opt.v = opt.v;
        Ok(())
    }

    fn active_schedule(&self) -> Result<&BetaSchedule> {
        self.schedule
            .as_ref()
            .map(|(s, _)| s)
            .context("noise schedule has not been set")
    }

    pub fn schedule_phase(&self) -> Option<&str> {
        self.schedule.as_ref().map(|(_, p)| p.as_str())
    }
}

impl DiffusionModel for Sr3Model {
    fn feed_data(&mut self, batch: Vec<Sample>) {
        self.data = batch;
    }

    fn optimize_parameters(&mut self) -> Result<()> {
        let schedule = self
            .schedule
            .as_ref()
            .map(|(s, _)| s)
            .context("noise schedule has not been set")?;
        anyhow::ensure!(!self.data.is_empty(), "no data has been fed");

        let mut rng = rand::thread_rng();
        let normal = Normal::new(0.0f32, 1.0).map_err(|e| anyhow!("bad noise sigma: {}", e))?;

        let mut grads = vec![0.0f32; N_PARAMS];
        let mut total_loss = 0.0f64;

        for sample in &self.data {
            let plane = sample.hr.height() * sample.hr.width();
            anyhow::ensure!(
                sample.sr.height() == sample.hr.height()
                    && sample.sr.width() == sample.hr.width(),
                "conditioning image shape does not match ground truth"
            );
            let t = rng.gen_range(0..schedule.n_timestep());
            let sa = schedule.sqrt_alphas_cumprod(t) as f32;
            let s1ma = schedule.sqrt_one_minus_alphas_cumprod(t) as f32;

            let x0 = sample.hr.data();
            let cond = sample.sr.data();
            let noise: Vec<f32> = (0..CHANNELS * plane).map(|_| normal.sample(&mut rng)).collect();
            let x_t: Vec<f32> = x0
                .iter()
                .zip(&noise)
                .map(|(&x, &n)| sa * x + s1ma * n)
                .collect();

            let eps_hat = self.net.forward(&x_t, cond, plane, s1ma);

            let n_elems = (CHANNELS * plane) as f64;
            for c in 0..CHANNELS {
                let base = c * PARAMS_PER_CHANNEL;
                for i in 0..plane {
                    let idx = c * plane + i;
                    let e = (eps_hat[idx] - noise[idx]) as f64;
                    total_loss += e * e / n_elems;
                    let g = (2.0 * e / n_elems) as f32;
                    grads[base] += g * x_t[idx];
                    grads[base + 1] += g * cond[idx];
                    grads[base + 2] += g * s1ma;
                    grads[base + 3] += g;
                }
            }
        }

        let inv_batch = 1.0 / self.data.len() as f32;
        for g in &mut grads {
            *g *= inv_batch;
        }
        self.opt.step(&mut self.net.weights, &grads);

        self.log
            .insert("l_pix".to_string(), total_loss / self.data.len() as f64);
        Ok(())
    }

    fn get_current_log(&self) -> BTreeMap<String, f64> {
        self.log.clone()
    }

    fn test(&mut self, continuous: bool) -> Result<()> {
        let schedule = self.active_schedule()?.clone();
        let sample = self.data.first().context("no data has been fed")?.clone();

        let cond = &sample.sr;
        let (h, w) = (cond.height(), cond.width());
        let plane = h * w;

        let mut rng = rand::thread_rng();
        let normal = Normal::new(0.0f32, 1.0).map_err(|e| anyhow!("bad noise sigma: {}", e))?;
        let mut x: Vec<f32> = (0..CHANNELS * plane).map(|_| normal.sample(&mut rng)).collect();

        let n = schedule.n_timestep();
        let stride = (n / 8).max(1);
        let mut chain: Vec<ImageTensor> = Vec::new();

        for t in (0..n).rev() {
            let s1ma = schedule.sqrt_one_minus_alphas_cumprod(t) as f32;
            let eps_hat = self.net.forward(&x, cond.data(), plane, s1ma);
            let std = schedule.posterior_std(t);
            for i in 0..CHANNELS * plane {
                let x0 = schedule
                    .predict_start_from_noise(t, x[i] as f64, eps_hat[i] as f64)
                    .clamp(-1.0, 1.0);
                let mut next = schedule.posterior_mean(t, x0, x[i] as f64);
                if t > 0 {
                    next += std * normal.sample(&mut rng) as f64;
                }
                x[i] = next as f32;
            }
            if continuous && t % stride == 0 && t > 0 {
                chain.push(ImageTensor::new(CHANNELS, h, w, x.clone())?);
            }
        }
        let final_state = ImageTensor::new(CHANNELS, h, w, x)?;

        let sr = if continuous {
            chain.push(final_state);
            ImageTensor::concat_width(&chain)?
        } else {
            final_state
        };

        self.visuals = Some(Visuals {
            sr,
            hr: sample.hr.clone(),
            lr: sample.lr.clone().unwrap_or_else(|| sample.sr.clone()),
            inf: sample.sr.clone(),
        });
        Ok(())
    }

    fn get_current_visuals(&self) -> Result<Visuals> {
        self.visuals
            .clone()
            .context("no visuals available; run test() first")
    }

    fn set_new_noise_schedule(&mut self, cfg: &ScheduleConfig, phase: &str) -> Result<()> {
        self.schedule = Some((BetaSchedule::new(cfg)?, phase.to_string()));
        Ok(())
    }

    fn save_network(&self, epoch: u64, step: u64) -> Result<()> {
        std::fs::create_dir_all(&self.checkpoint_dir).with_context(|| {
            format!(
                "Failed to create checkpoint directory: {}",
                self.checkpoint_dir.display()
            )
        })?;
        let prefix = self.checkpoint_dir.join(format!("I{}_E{}", step, epoch));

        let gen = GenState {
            epoch,
            step,
            weights: self.net.weights.clone(),
        };
        let gen_path = PathBuf::from(format!("{}_gen.json", prefix.display()));
        serde_json::to_writer(
            File::create(&gen_path)
                .with_context(|| format!("Failed to write checkpoint: {}", gen_path.display()))?,
            &gen,
        )?;

        let opt = OptState {
            t: self.opt.t,
            m: self.opt.m.clone(),
            v: self.opt.v.clone(),
        };
        let opt_path = PathBuf::from(format!("{}_opt.json", prefix.display()));
        serde_json::to_writer(
            File::create(&opt_path)
                .with_context(|| format!("Failed to write checkpoint: {}", opt_path.display()))?,
            &opt,
        )?;
        Ok(())
    }

    fn begin_step(&self) -> u64 {
        self.begin_step
    }

    fn begin_epoch(&self) -> u64 {
        self.begin_epoch
    }
}
