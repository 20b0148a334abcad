//! iHarmony4-style harmonization dataset.
//!
//! The dataset root holds one split listing per phase (`IHD_train.txt`,
//! `IHD_test.txt`); each line is a composite image path relative to the
//! root, e.g. `Hday2night/composite_images/d90000001-10_1_2.jpg`. The
//! ground-truth image and foreground mask are derived from the composite
//! name: `{real}_{m}_{n}.jpg` pairs with `real_images/{real}.jpg` and
//! `masks/{real}_{m}.png`.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use super::{lrhr::load_tensor, Dataset, Sample};

pub struct HarmonizationDataset {
    root: PathBuf,
    composites: Vec<PathBuf>,
    is_for_train: bool,
}

impl HarmonizationDataset {
    pub fn new(dataset_root: &Path, is_for_train: bool) -> Result<Self> {
        let list_name = if is_for_train {
            "IHD_train.txt"
        } else {
            "IHD_test.txt"
        };
        let list_path = dataset_root.join(list_name);
        let listing = std::fs::read_to_string(&list_path)
            .with_context(|| format!("Failed to read split listing: {}", list_path.display()))?;

        let composites = listing
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(PathBuf::from)
            .collect();

        Ok(Self {
            root: dataset_root.to_path_buf(),
            composites,
            is_for_train,
        })
    }

    pub fn is_for_train(&self) -> bool {
        self.is_for_train
    }

    fn companion_paths(&self, composite: &Path) -> Result<(PathBuf, PathBuf)> {
        let stem = composite
            .file_stem()
            .and_then(|s| s.to_str())
            .with_context(|| format!("Bad composite path: {}", composite.display()))?;
        let parts: Vec<&str> = stem.split('_').collect();
        anyhow::ensure!(
            parts.len() >= 3,
            "composite name [{}] does not follow real_mask_variant",
            stem
        );

        let scene = composite
            .parent()
            .and_then(Path::parent)
            .with_context(|| format!("Bad composite path: {}", composite.display()))?;
        let real = self
            .root
            .join(scene)
            .join("real_images")
            .join(format!("{}.jpg", parts[0]));
        let mask = self
            .root
            .join(scene)
            .join("masks")
            .join(format!("{}_{}.png", parts[0], parts[1]));
        Ok((real, mask))
    }
}

impl Dataset for HarmonizationDataset {
    fn len(&self) -> usize {
        self.composites.len()
    }

    fn get(&self, index: usize) -> Result<Sample> {
        let composite_rel = self.composites.get(index).with_context(|| {
            format!("sample index {} out of range (len {})", index, self.composites.len())
        })?;
        let (real_path, mask_path) = self.companion_paths(composite_rel)?;

        let composite = load_tensor(&self.root.join(composite_rel))?;
        let real = load_tensor(&real_path)?;
        let mask = load_tensor(&mask_path)?;

        // The composite is the conditioning input, the real photo the target.
        Ok(Sample {
            hr: real,
            sr: composite,
            lr: Some(mask),
            index,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;
    use tempfile::TempDir;

    fn build_root(tmp: &TempDir) -> PathBuf {
        let root = tmp.path().to_path_buf();
        let scene = root.join("Hday2night");
        for dir in ["composite_images", "real_images", "masks"] {
            std::fs::create_dir_all(scene.join(dir)).unwrap();
        }
        RgbImage::from_pixel(8, 8, image::Rgb([120, 60, 30]))
            .save(scene.join("composite_images/d900_1_2.jpg"))
            .unwrap();
        RgbImage::from_pixel(8, 8, image::Rgb([110, 70, 40]))
            .save(scene.join("real_images/d900.jpg"))
            .unwrap();
        RgbImage::from_pixel(8, 8, image::Rgb([255, 255, 255]))
            .save(scene.join("masks/d900_1.png"))
            .unwrap();
        std::fs::write(
            root.join("IHD_train.txt"),
            "Hday2night/composite_images/d900_1_2.jpg\n",
        )
        .unwrap();
        std::fs::write(root.join("IHD_test.txt"), "").unwrap();
        root
    }

    #[test]
    fn split_listing_selects_by_phase() {
        let tmp = TempDir::new().unwrap();
        let root = build_root(&tmp);
        let train = HarmonizationDataset::new(&root, true).unwrap();
        let test = HarmonizationDataset::new(&root, false).unwrap();
        assert_eq!(train.len(), 1);
        assert_eq!(test.len(), 0);
    }

    #[test]
    fn sample_carries_composite_real_and_mask() {
        let tmp = TempDir::new().unwrap();
        let root = build_root(&tmp);
        let ds = HarmonizationDataset::new(&root, true).unwrap();
        let s = ds.get(0).unwrap();
        assert_eq!((s.hr.height(), s.hr.width()), (8, 8));
        assert_eq!((s.sr.height(), s.sr.width()), (8, 8));
        assert!(s.lr.is_some());
    }

    #[test]
    fn out_of_range_index_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let root = build_root(&tmp);
        let ds = HarmonizationDataset::new(&root, true).unwrap();
        assert!(ds.get(1).is_err());
    }

    #[test]
    fn malformed_composite_name_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let root = build_root(&tmp);
        std::fs::write(
            root.join("IHD_train.txt"),
            "Hday2night/composite_images/noparts.jpg\n",
        )
        .unwrap();
        let ds = HarmonizationDataset::new(&root, true).unwrap();
        assert!(ds.get(0).is_err());
    }
}
