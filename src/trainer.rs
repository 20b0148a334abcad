//! Training controller.
//!
//! Drives the step-budgeted training loop: epochs over the training
//! dataloader, with three independently gated periodic side effects
//! (progress logging, validation, checkpointing) and a validation sub-phase
//! that swaps the noise schedule, dumps result images, and averages
//! PSNR/SSIM.

use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::config::{Config, TrainConfig};
use crate::data::DataLoader;
use crate::logging::RunLogs;
use crate::metrics::{calculate_psnr, calculate_ssim, save_img, tensor2img};
use crate::model::{DiffusionModel, ScheduleConfig};

pub struct Trainer<M: DiffusionModel> {
    model: M,
    train_loader: Option<DataLoader>,
    val_loader: Option<DataLoader>,
    train_cfg: TrainConfig,
    schedules: BTreeMap<String, ScheduleConfig>,
    results_dir: PathBuf,
    resume: bool,
    logs: RunLogs,
}

impl<M: DiffusionModel> Trainer<M> {
    pub fn new(
        model: M,
        train_loader: Option<DataLoader>,
        val_loader: Option<DataLoader>,
        cfg: &Config,
        logs: RunLogs,
    ) -> Self {
        Self {
            model,
            train_loader,
            val_loader,
            train_cfg: cfg.train.clone(),
            schedules: cfg.model.beta_schedule.clone(),
            results_dir: cfg.path.results.clone(),
            resume: cfg.path.resume_state.is_some(),
            logs,
        }
    }

    /// Run the training loop until the step budget is reached.
    pub fn train(&mut self) -> Result<()> {
        let Trainer {
            model,
            train_loader,
            val_loader,
            train_cfg,
            schedules,
            results_dir,
            resume,
            logs,
        } = self;
        let train_loader = train_loader
            .as_ref()
            .context("no training dataset configured")?;

        let mut current_step = model.begin_step();
        let mut current_epoch = model.begin_epoch();
        let n_iter = train_cfg.n_iter;

        if *resume {
            logs.base(&format!(
                "Resuming training from epoch: {}, iter: {}.",
                current_epoch, current_step
            ))?;
        }

        let train_schedule = schedules
            .get("train")
            .context("missing beta_schedule for phase [train]")?;
        model.set_new_noise_schedule(train_schedule, "train")?;

        while current_step < n_iter {
            current_epoch += 1;
            for batch in train_loader.epoch() {
                current_step += 1;
                if current_step > n_iter {
                    break;
                }
                model.feed_data(batch?);
                model.optimize_parameters()?;

                if current_step % train_cfg.print_freq == 0 {
                    let step_log = model.get_current_log();
                    let mut message =
                        format!("<epoch:{:3}, iter:{:8}> ", current_epoch, current_step);
                    for (k, v) in &step_log {
                        message.push_str(&format!("{}: {:.4e} ", k, v));
                    }
                    logs.base(&message)?;
                }

                if current_step % train_cfg.val_freq == 0 {
                    run_validation(
                        model,
                        val_loader.as_ref(),
                        logs,
                        schedules,
                        results_dir,
                        current_epoch,
                        current_step,
                        true,
                    )?;
                }

                if current_step % train_cfg.save_checkpoint_freq == 0 {
                    logs.base("Saving models and training states.")?;
                    model.save_network(current_epoch, current_step)?;
                }
            }
        }

        logs.base("End of training.")?;
        Ok(())
    }

    /// Run the validation sub-phase once, outside of training (phase "val").
    pub fn run_validation_once(&mut self) -> Result<()> {
        let Trainer {
            model,
            val_loader,
            schedules,
            results_dir,
            logs,
            ..
        } = self;
        let epoch = model.begin_epoch();
        let step = model.begin_step();
        run_validation(
            model,
            val_loader.as_ref(),
            logs,
            schedules,
            results_dir,
            epoch,
            step,
            false,
        )?;
        Ok(())
    }
}

/// Validation sub-phase: swap to the validation schedule, run inference on
/// every validation sample, write the four result images per sample, and
/// log mean PSNR/SSIM. Restores the training schedule afterwards when
/// requested.
#[allow(clippy::too_many_arguments)]
fn run_validation<M: DiffusionModel>(
    model: &mut M,
    val_loader: Option<&DataLoader>,
    logs: &mut RunLogs,
    schedules: &BTreeMap<String, ScheduleConfig>,
    results_dir: &Path,
    current_epoch: u64,
    current_step: u64,
    restore_train_schedule: bool,
) -> Result<(f64, f64)> {
    let val_loader = val_loader.context("no validation dataset configured")?;

    let result_path = results_dir.join(current_epoch.to_string());
    std::fs::create_dir_all(&result_path).with_context(|| {
        format!(
            "Failed to create result directory: {}",
            result_path.display()
        )
    })?;

    let val_schedule = schedules
        .get("val")
        .context("missing beta_schedule for phase [val]")?;
    model.set_new_noise_schedule(val_schedule, "val")?;

    let mut avg_psnr = 0.0f64;
    let mut avg_ssim = 0.0f64;
    let mut idx = 0u64;

    for batch in val_loader.epoch() {
        idx += 1;
        model.feed_data(batch?);
        model.test(false)?;
        let visuals = model.get_current_visuals()?;

        let sr_img = tensor2img(&visuals.sr)?;
        let hr_img = tensor2img(&visuals.hr)?;
        let lr_img = tensor2img(&visuals.lr)?;
        let inf_img = tensor2img(&visuals.inf)?;

        save_img(
            &hr_img,
            &result_path.join(format!("{}_{}_hr.png", current_step, idx)),
        )?;
        save_img(
            &sr_img,
            &result_path.join(format!("{}_{}_sr.png", current_step, idx)),
        )?;
        save_img(
            &lr_img,
            &result_path.join(format!("{}_{}_lr.png", current_step, idx)),
        )?;
        save_img(
            &inf_img,
            &result_path.join(format!("{}_{}_inf.png", current_step, idx)),
        )?;

        avg_psnr += calculate_psnr(&sr_img, &hr_img)?;
        avg_ssim += calculate_ssim(&sr_img, &hr_img)?;
    }

    anyhow::ensure!(idx > 0, "validation dataloader yielded no samples");
    avg_psnr /= idx as f64;
    avg_ssim /= idx as f64;

    if restore_train_schedule {
        let train_schedule = schedules
            .get("train")
            .context("missing beta_schedule for phase [train]")?;
        model.set_new_noise_schedule(train_schedule, "train")?;
    }

    logs.base(&format!(
        "# Validation # PSNR: {:.4e}, SSIM: {:.4e}",
        avg_psnr, avg_ssim
    ))?;
    logs.val(&format!(
        "<epoch:{:3}, iter:{:8}> psnr: {:.4e}, ssim: {:.4e}",
        current_epoch, current_step, avg_psnr, avg_ssim
    ))?;

    Ok((avg_psnr, avg_ssim))
}
