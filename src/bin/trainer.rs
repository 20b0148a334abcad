use anyhow::{Context, Result};
use clap::Parser;
use log::info;
use std::path::PathBuf;

use srdiffusion::data::{create_dataloader, create_dataset};
use srdiffusion::logging::{init_logger, RunLogs};
use srdiffusion::model::create_model;
use srdiffusion::{load_config, Trainer};

#[derive(Parser, Debug)]
#[command(author, version, about = "Train a diffusion super-resolution model", long_about = None)]
struct Args {
    /// JSON file for configuration
    #[arg(short, long, default_value = "config/sr_sr3_16_128.json")]
    config: PathBuf,

    /// Run either train (training) or val (generation)
    #[arg(short, long, default_value = "train", value_parser = ["train", "val"])]
    phase: String,

    /// GPU id list; accepted for config compatibility, execution is CPU-only
    #[arg(long)]
    gpu_ids: Option<String>,

    /// Shrink the run for a quick smoke test
    #[arg(short, long)]
    debug: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logger(args.debug);

    let mut opt = load_config(&args.config)
        .with_context(|| format!("Failed to load config: {}", args.config.display()))?;
    if args.debug {
        opt.apply_debug();
    }
    if let Some(gpu_ids) = &args.gpu_ids {
        info!("gpu_ids [{}] ignored: this build runs on CPU", gpu_ids);
    }

    let mut logs = RunLogs::new(&opt.path.log)?;
    logs.base(&format!(
        "Config: {}",
        serde_json::to_string_pretty(&opt).unwrap_or_default()
    ))?;

    // Build one dataset/dataloader per configured phase section. The
    // training section is skipped entirely when only generating.
    let mut train_loader = None;
    let mut val_loader = None;
    for (phase, dataset_opt) in &opt.datasets {
        if phase == "train" && args.phase != "val" {
            let dataset = create_dataset(dataset_opt, phase, &mut logs)?;
            train_loader = Some(create_dataloader(dataset, dataset_opt, phase)?);
        } else if phase == "val" {
            let dataset = create_dataset(dataset_opt, phase, &mut logs)?;
            val_loader = Some(create_dataloader(dataset, dataset_opt, phase)?);
        }
    }
    logs.base("Initial dataset finished.")?;

    let model = create_model(&opt)?;
    logs.base("Initial model finished.")?;

    let mut trainer = Trainer::new(model, train_loader, val_loader, &opt, logs);
    if args.phase == "val" {
        trainer.run_validation_once()?;
    } else {
        trainer.train()?;
    }

    Ok(())
}
