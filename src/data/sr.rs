//! Generic super-resolution dataset over a plain folder of images.
//!
//! The low-resolution input is synthesized on the fly: the ground truth is
//! cropped to a multiple of the scaling factor, downsampled with Lanczos,
//! and upsampled back with Catmull-Rom for the conditioning image.

use anyhow::{Context, Result};
use image::imageops::{self, FilterType};
use std::path::{Path, PathBuf};

use super::{lrhr::scan_images, Dataset, Sample};
use crate::tensor::ImageTensor;

pub struct SrDataset {
    paths: Vec<PathBuf>,
    config_name: String,
    scaling_factor: u32,
}

impl SrDataset {
    pub fn new(data_folder: &Path, config_name: &str, scaling_factor: u32) -> Result<Self> {
        let paths = scan_images(data_folder)?;
        Ok(Self {
            paths,
            config_name: config_name.to_string(),
            scaling_factor: scaling_factor.max(1),
        })
    }

    pub fn config_name(&self) -> &str {
        &self.config_name
    }

    pub fn scaling_factor(&self) -> u32 {
        self.scaling_factor
    }
}

impl Dataset for SrDataset {
    fn len(&self) -> usize {
        self.paths.len()
    }

    fn get(&self, index: usize) -> Result<Sample> {
        let path = self.paths.get(index).with_context(|| {
            format!("sample index {} out of range (len {})", index, self.paths.len())
        })?;
        let img = image::open(path)
            .map_err(|e| anyhow::anyhow!("Failed to open image {}: {}", path.display(), e))?
            .to_rgb8();

        let sf = self.scaling_factor;
        let hr_w = (img.width() / sf).max(1) * sf;
        let hr_h = (img.height() / sf).max(1) * sf;
        let hr_img = imageops::crop_imm(&img, 0, 0, hr_w, hr_h).to_image();

        let lr_img = imageops::resize(&hr_img, hr_w / sf, hr_h / sf, FilterType::Lanczos3);
        let sr_img = imageops::resize(&lr_img, hr_w, hr_h, FilterType::CatmullRom);

        Ok(Sample {
            hr: ImageTensor::from_rgb(&hr_img),
            sr: ImageTensor::from_rgb(&sr_img),
            lr: Some(ImageTensor::from_rgb(&lr_img)),
            index,
        })
    }
}
