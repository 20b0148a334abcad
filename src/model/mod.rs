//! Diffusion model facade.
//!
//! The training controller only sees the [`DiffusionModel`] trait: feed a
//! batch, take an optimizer step, read back scalar logs, run inference, and
//! persist checkpoints. [`Sr3Model`] is the concrete implementation.

pub mod schedule;
pub mod sr3;

pub use schedule::{BetaSchedule, ScheduleConfig};
pub use sr3::Sr3Model;

use anyhow::Result;
use std::collections::BTreeMap;

use crate::config::Config;
use crate::data::Sample;
use crate::tensor::ImageTensor;

/// The four named visuals produced by an inference pass.
#[derive(Debug, Clone)]
pub struct Visuals {
    /// Model output at target resolution.
    pub sr: ImageTensor,
    /// Ground truth.
    pub hr: ImageTensor,
    /// Raw low-resolution input (conditioning image when absent).
    pub lr: ImageTensor,
    /// Interpolated conditioning input fed to the model.
    pub inf: ImageTensor,
}

pub trait DiffusionModel {
    fn feed_data(&mut self, batch: Vec<Sample>);

    fn optimize_parameters(&mut self) -> Result<()>;

    /// Scalar metrics for the last optimizer step.
    fn get_current_log(&self) -> BTreeMap<String, f64>;

    /// Run the reverse process on the fed batch. With `continuous` set, the
    /// SR visual becomes a strip of intermediate states instead of only the
    /// final image.
    fn test(&mut self, continuous: bool) -> Result<()>;

    fn get_current_visuals(&self) -> Result<Visuals>;

    fn set_new_noise_schedule(&mut self, cfg: &ScheduleConfig, phase: &str) -> Result<()>;

    fn save_network(&self, epoch: u64, step: u64) -> Result<()>;

    /// Step counter restored from a resume state, 0 for a fresh run.
    fn begin_step(&self) -> u64;

    /// Epoch counter restored from a resume state, 0 for a fresh run.
    fn begin_epoch(&self) -> u64;
}

pub fn create_model(cfg: &Config) -> Result<Sr3Model> {
    let mut model = Sr3Model::new(cfg.train.optimizer.lr, cfg.path.checkpoint.clone());
    if let Some(resume) = &cfg.path.resume_state {
        model.load_state(resume)?;
    }
    Ok(model)
}
