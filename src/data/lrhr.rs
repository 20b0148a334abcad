//! Paired low/high-resolution dataset.
//!
//! Expects the folder layout produced by the dataset preparation script:
//!
//! ```text
//! dataroot/
//!   hr_{r}/          ground-truth images at the target resolution
//!   sr_{l}_{r}/      low-res inputs pre-upsampled to the target resolution
//!   lr_{l}/          raw low-res inputs (only read when need_lr is set)
//! ```
//!
//! Files are matched by name across the folders.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use super::{DataError, Dataset, Sample};
use crate::tensor::ImageTensor;

pub struct LrHrDataset {
    hr_paths: Vec<PathBuf>,
    sr_dir: PathBuf,
    lr_dir: PathBuf,
    split: String,
    need_lr: bool,
}

impl LrHrDataset {
    pub fn new(
        dataroot: &Path,
        datatype: &str,
        l_resolution: u32,
        r_resolution: u32,
        split: &str,
        data_len: i64,
        need_lr: bool,
    ) -> Result<Self> {
        if datatype != "img" {
            return Err(DataError::UnknownDataType(datatype.to_string()).into());
        }

        let hr_dir = dataroot.join(format!("hr_{}", r_resolution));
        let sr_dir = dataroot.join(format!("sr_{}_{}", l_resolution, r_resolution));
        let lr_dir = dataroot.join(format!("lr_{}", l_resolution));

        let mut hr_paths = scan_images(&hr_dir)?;
        if data_len > 0 {
            hr_paths.truncate(data_len as usize);
        }

        Ok(Self {
            hr_paths,
            sr_dir,
            lr_dir,
            split: split.to_string(),
            need_lr,
        })
    }

    pub fn need_lr(&self) -> bool {
        self.need_lr
    }

    pub fn split(&self) -> &str {
        &self.split
    }
}

impl Dataset for LrHrDataset {
    fn len(&self) -> usize {
        self.hr_paths.len()
    }

    fn get(&self, index: usize) -> Result<Sample> {
        let hr_path = self.hr_paths.get(index).with_context(|| {
            format!("sample index {} out of range (len {})", index, self.hr_paths.len())
        })?;
        let file_name = hr_path
            .file_name()
            .context("HR image path has no file name")?;

        let hr = load_tensor(hr_path)?;
        let sr = load_tensor(&self.sr_dir.join(file_name))?;
        let lr = if self.need_lr {
            Some(load_tensor(&self.lr_dir.join(file_name))?)
        } else {
            None
        };

        Ok(Sample {
            hr,
            sr,
            lr,
            index,
        })
    }
}

pub(crate) fn load_tensor(path: &Path) -> Result<ImageTensor> {
    let img = image::open(path)
        .with_context(|| format!("Failed to open image: {}", path.display()))?
        .to_rgb8();
    Ok(ImageTensor::from_rgb(&img))
}

/// Sorted list of image files directly under `dir`.
pub(crate) fn scan_images(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = std::fs::read_dir(dir)
        .with_context(|| format!("Failed to read dataset directory: {}", dir.display()))?;

    let mut paths = Vec::new();
    for entry in entries {
        let path = entry?.path();
        if let Some(ext) = path.extension() {
            let ext = ext.to_string_lossy().to_lowercase();
            if matches!(ext.as_str(), "jpg" | "jpeg" | "png" | "webp" | "bmp") {
                paths.push(path);
            }
        }
    }
    paths.sort();
    Ok(paths)
}
