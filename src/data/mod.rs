//! Dataset construction and batching.
//!
//! `create_dataset` picks a concrete dataset implementation from the
//! configured mode tag; `create_dataloader` wraps it with per-phase batching
//! policy. Both take the raw phase tag, since dataset sections are keyed by
//! arbitrary strings in the config file.

pub mod harmonization;
pub mod loader;
pub mod lrhr;
pub mod sr;

pub use harmonization::HarmonizationDataset;
pub use loader::DataLoader;
pub use lrhr::LrHrDataset;
pub use sr::SrDataset;

use anyhow::Result;
use thiserror::Error;

use crate::config::DatasetConfig;
use crate::logging::RunLogs;
use crate::tensor::ImageTensor;

#[derive(Debug, Error)]
pub enum DataError {
    #[error("dataloader [{0}] is not found")]
    UnknownPhase(String),
    #[error("data type [{0}] is not recognized")]
    UnknownDataType(String),
    #[error("l_resolution must be non-zero to derive a scaling factor")]
    ZeroLowResolution,
    #[error("dataset config is missing required field [{0}]")]
    MissingField(&'static str),
}

/// One training or validation example. `sr` is the conditioning image at
/// target resolution (upsampled low-res input, or the composite for
/// harmonization); `hr` is the ground truth; `lr` is the raw low-res input
/// (or mask) when the dataset provides one.
#[derive(Debug, Clone)]
pub struct Sample {
    pub hr: ImageTensor,
    pub sr: ImageTensor,
    pub lr: Option<ImageTensor>,
    pub index: usize,
}

pub trait Dataset: Send + Sync {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn get(&self, index: usize) -> Result<Sample>;
}

/// Dataset selection modes. Anything the config tag does not name maps to
/// `GenericSr`; that fallback is deliberate, not an error path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatasetMode {
    PairedLrHr,
    HrOnly,
    Harmonization,
    GenericSr,
}

impl DatasetMode {
    pub fn from_tag(tag: Option<&str>) -> Self {
        match tag {
            Some("LRHR") => DatasetMode::PairedLrHr,
            Some("HR") => DatasetMode::HrOnly,
            Some("HARM") => DatasetMode::Harmonization,
            _ => DatasetMode::GenericSr,
        }
    }
}

/// A dataset constructed by [`create_dataset`]. Concrete variants stay
/// visible so callers (and tests) can inspect construction flags.
pub enum BuiltDataset {
    LrHr(LrHrDataset),
    Harmonization(HarmonizationDataset),
    Sr(SrDataset),
}

impl BuiltDataset {
    pub fn kind(&self) -> &'static str {
        match self {
            BuiltDataset::LrHr(_) => "LrHrDataset",
            BuiltDataset::Harmonization(_) => "HarmonizationDataset",
            BuiltDataset::Sr(_) => "SrDataset",
        }
    }
}

impl Dataset for BuiltDataset {
    fn len(&self) -> usize {
        match self {
            BuiltDataset::LrHr(d) => d.len(),
            BuiltDataset::Harmonization(d) => d.len(),
            BuiltDataset::Sr(d) => d.len(),
        }
    }

    fn get(&self, index: usize) -> Result<Sample> {
        match self {
            BuiltDataset::LrHr(d) => d.get(index),
            BuiltDataset::Harmonization(d) => d.get(index),
            BuiltDataset::Sr(d) => d.get(index),
        }
    }
}

/// Construct the dataset selected by `cfg.mode` for the given phase tag.
///
/// - "LRHR" / "HR": paired low/high-resolution folders; the low-res image is
///   only loaded for "LRHR".
/// - "HARM": harmonization pairs, with the training split chosen by phase.
/// - anything else (including absent): generic super-resolution over a plain
///   image folder, with `scaling_factor = r_resolution / l_resolution`.
pub fn create_dataset(
    cfg: &DatasetConfig,
    phase: &str,
    logs: &mut RunLogs,
) -> Result<BuiltDataset> {
    let mode = DatasetMode::from_tag(cfg.mode.as_deref());
    let dataroot = cfg
        .dataroot
        .as_deref()
        .ok_or(DataError::MissingField("dataroot"))?;

    let dataset = match mode {
        DatasetMode::PairedLrHr | DatasetMode::HrOnly => {
            let l_res = cfg.l_resolution.ok_or(DataError::MissingField("l_resolution"))?;
            let r_res = cfg.r_resolution.ok_or(DataError::MissingField("r_resolution"))?;
            BuiltDataset::LrHr(LrHrDataset::new(
                dataroot,
                cfg.datatype.as_deref().unwrap_or("img"),
                l_res,
                r_res,
                phase,
                cfg.data_len.unwrap_or(-1),
                mode == DatasetMode::PairedLrHr,
            )?)
        }
        DatasetMode::Harmonization => {
            BuiltDataset::Harmonization(HarmonizationDataset::new(dataroot, phase == "train")?)
        }
        DatasetMode::GenericSr => {
            let l_res = cfg.l_resolution.ok_or(DataError::MissingField("l_resolution"))?;
            let r_res = cfg.r_resolution.ok_or(DataError::MissingField("r_resolution"))?;
            if l_res == 0 {
                return Err(DataError::ZeroLowResolution.into());
            }
            let scaling_factor = r_res / l_res;
            BuiltDataset::Sr(SrDataset::new(
                dataroot,
                cfg.name.as_deref().unwrap_or(""),
                scaling_factor,
            )?)
        }
    };

    logs.base(&format!(
        "Dataset [{} - {}] is created.",
        dataset.kind(),
        cfg.name.as_deref().unwrap_or("")
    ))?;
    Ok(dataset)
}

/// Wrap a dataset with the batching policy for the given phase tag.
///
/// Training takes batch size, shuffle flag, and worker count from the
/// config. Validation always runs batch 1, unshuffled, single worker, no
/// matter what the config says. Any other phase tag is an error.
pub fn create_dataloader(
    dataset: BuiltDataset,
    cfg: &DatasetConfig,
    phase: &str,
) -> Result<DataLoader> {
    match phase {
        "train" => Ok(DataLoader::new(
            dataset,
            cfg.batch_size.unwrap_or(1),
            cfg.use_shuffle.unwrap_or(true),
            cfg.num_workers.unwrap_or(1),
        )),
        "val" => Ok(DataLoader::new(dataset, 1, false, 1)),
        other => Err(DataError::UnknownPhase(other.to_string()).into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;
    use std::path::Path;
    use tempfile::TempDir;

    fn write_png(path: &Path, w: u32, h: u32, fill: u8) {
        let img = RgbImage::from_pixel(w, h, image::Rgb([fill, fill / 2, 255 - fill]));
        img.save(path).unwrap();
    }

    fn logs(dir: &Path) -> RunLogs {
        RunLogs::new(&dir.join("logs")).unwrap()
    }

    fn paired_root(dir: &Path, l: u32, r: u32, with_lr: bool) -> std::path::PathBuf {
        let root = dir.join("paired");
        std::fs::create_dir_all(root.join(format!("hr_{}", r))).unwrap();
        std::fs::create_dir_all(root.join(format!("sr_{}_{}", l, r))).unwrap();
        write_png(&root.join(format!("hr_{}/0001.png", r)), r, r, 200);
        write_png(&root.join(format!("sr_{}_{}/0001.png", l, r)), r, r, 90);
        if with_lr {
            std::fs::create_dir_all(root.join(format!("lr_{}", l))).unwrap();
            write_png(&root.join(format!("lr_{}/0001.png", l)), l, l, 40);
        }
        root
    }

    fn cfg_for(mode: &str, root: &Path) -> DatasetConfig {
        DatasetConfig {
            name: Some("test".into()),
            mode: Some(mode.into()),
            dataroot: Some(root.to_path_buf()),
            datatype: Some("img".into()),
            l_resolution: Some(4),
            r_resolution: Some(16),
            ..Default::default()
        }
    }

    #[test]
    fn lrhr_mode_loads_the_low_res_image() {
        let tmp = TempDir::new().unwrap();
        let root = paired_root(tmp.path(), 4, 16, true);
        let mut logs = logs(tmp.path());

        let ds = create_dataset(&cfg_for("LRHR", &root), "train", &mut logs).unwrap();
        match &ds {
            BuiltDataset::LrHr(d) => {
                assert!(d.need_lr());
                assert_eq!(d.split(), "train");
            }
            _ => panic!("expected LrHrDataset"),
        }
        let sample = ds.get(0).unwrap();
        assert!(sample.lr.is_some());
    }

    #[test]
    fn hr_mode_skips_the_low_res_image() {
        let tmp = TempDir::new().unwrap();
        let root = paired_root(tmp.path(), 4, 16, false);
        let mut logs = logs(tmp.path());

        let ds = create_dataset(&cfg_for("HR", &root), "val", &mut logs).unwrap();
        match &ds {
            BuiltDataset::LrHr(d) => {
                assert!(!d.need_lr());
                assert_eq!(d.split(), "val");
            }
            _ => panic!("expected LrHrDataset"),
        }
        assert!(ds.get(0).unwrap().lr.is_none());
    }

    #[test]
    fn harm_mode_training_flag_follows_phase() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("harm");
        std::fs::create_dir_all(&root).unwrap();
        std::fs::write(root.join("IHD_train.txt"), "").unwrap();
        std::fs::write(root.join("IHD_test.txt"), "").unwrap();
        let mut logs = logs(tmp.path());

        let train = create_dataset(&cfg_for("HARM", &root), "train", &mut logs).unwrap();
        let val = create_dataset(&cfg_for("HARM", &root), "val", &mut logs).unwrap();
        match (&train, &val) {
            (BuiltDataset::Harmonization(t), BuiltDataset::Harmonization(v)) => {
                assert!(t.is_for_train());
                assert!(!v.is_for_train());
            }
            _ => panic!("expected HarmonizationDataset"),
        }
    }

    #[test]
    fn unknown_mode_falls_through_to_generic_sr() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("flat");
        std::fs::create_dir_all(&root).unwrap();
        write_png(&root.join("a.png"), 16, 16, 120);
        let mut logs = logs(tmp.path());

        let ds = create_dataset(&cfg_for("FOO", &root), "train", &mut logs).unwrap();
        match &ds {
            BuiltDataset::Sr(d) => assert_eq!(d.scaling_factor(), 4),
            _ => panic!("expected SrDataset fallback"),
        }
    }

    #[test]
    fn zero_l_resolution_is_an_arithmetic_error() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("flat");
        std::fs::create_dir_all(&root).unwrap();
        let mut logs = logs(tmp.path());

        let mut cfg = cfg_for("FOO", &root);
        cfg.l_resolution = Some(0);
        let err = create_dataset(&cfg, "train", &mut logs)
            .map(|_| ())
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DataError>(),
            Some(DataError::ZeroLowResolution)
        ));
    }

    #[test]
    fn val_loader_policy_overrides_config() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("flat");
        std::fs::create_dir_all(&root).unwrap();
        write_png(&root.join("a.png"), 16, 16, 10);
        let mut logs = logs(tmp.path());

        let mut cfg = cfg_for("FOO", &root);
        cfg.batch_size = Some(32);
        cfg.use_shuffle = Some(true);
        cfg.num_workers = Some(8);

        let ds = create_dataset(&cfg, "val", &mut logs).unwrap();
        let loader = create_dataloader(ds, &cfg, "val").unwrap();
        assert_eq!(loader.batch_size(), 1);
        assert!(!loader.shuffle());
        assert_eq!(loader.num_workers(), 1);
    }

    #[test]
    fn train_loader_takes_config_verbatim() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("flat");
        std::fs::create_dir_all(&root).unwrap();
        let mut logs = logs(tmp.path());

        let mut cfg = cfg_for("FOO", &root);
        cfg.batch_size = Some(6);
        cfg.use_shuffle = Some(false);
        cfg.num_workers = Some(3);

        let ds = create_dataset(&cfg, "train", &mut logs).unwrap();
        let loader = create_dataloader(ds, &cfg, "train").unwrap();
        assert_eq!(loader.batch_size(), 6);
        assert!(!loader.shuffle());
        assert_eq!(loader.num_workers(), 3);
    }

    #[test]
    fn unknown_phase_is_a_hard_error() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("flat");
        std::fs::create_dir_all(&root).unwrap();
        let mut logs = logs(tmp.path());

        let cfg = cfg_for("FOO", &root);
        let ds = create_dataset(&cfg, "train", &mut logs).unwrap();
        let err = create_dataloader(ds, &cfg, "test").map(|_| ()).unwrap_err();
        match err.downcast_ref::<DataError>() {
            Some(DataError::UnknownPhase(p)) => assert_eq!(p, "test"),
            other => panic!("expected UnknownPhase, got {:?}", other),
        }
    }
}
