//! Image-quality metrics and result image output.

use anyhow::{ensure, Context, Result};
use image::{ImageFormat, RgbImage};
use std::path::Path;

use crate::tensor::ImageTensor;

/// Convert a model tensor to a displayable 8-bit image.
pub fn tensor2img(tensor: &ImageTensor) -> Result<RgbImage> {
    tensor.to_rgb()
}

pub fn save_img(img: &RgbImage, path: &Path) -> Result<()> {
    match path.extension().and_then(|s| s.to_str()) {
        Some("jpg") | Some("jpeg") => img
            .save_with_format(path, ImageFormat::Jpeg)
            .with_context(|| format!("Failed to save image: {}", path.display()))?,
        _ => img
            .save_with_format(path, ImageFormat::Png)
            .with_context(|| format!("Failed to save image: {}", path.display()))?,
    }
    Ok(())
}

/// Peak signal-to-noise ratio in dB between two 8-bit images.
/// Identical images yield positive infinity.
pub fn calculate_psnr(a: &RgbImage, b: &RgbImage) -> Result<f64> {
    ensure!(
        a.dimensions() == b.dimensions(),
        "PSNR dimension mismatch: {:?} vs {:?}",
        a.dimensions(),
        b.dimensions()
    );
    let mut sq_err = 0.0f64;
    for (pa, pb) in a.pixels().zip(b.pixels()) {
        for c in 0..3 {
            let d = pa.0[c] as f64 - pb.0[c] as f64;
            sq_err += d * d;
        }
    }
    let mse = sq_err / (a.width() as f64 * a.height() as f64 * 3.0);
    if mse == 0.0 {
        return Ok(f64::INFINITY);
    }
    Ok(20.0 * (255.0 / mse.sqrt()).log10())
}

/// Mean structural similarity over non-overlapping 8x8 luma windows, with
/// the standard constants K1=0.01, K2=0.03 on an 8-bit dynamic range.
pub fn calculate_ssim(a: &RgbImage, b: &RgbImage) -> Result<f64> {
    ensure!(
        a.dimensions() == b.dimensions(),
        "SSIM dimension mismatch: {:?} vs {:?}",
        a.dimensions(),
        b.dimensions()
    );
    let (w, h) = (a.width() as usize, a.height() as usize);
    let luma_a = to_luma(a);
    let luma_b = to_luma(b);

    const C1: f64 = (0.01 * 255.0) * (0.01 * 255.0);
    const C2: f64 = (0.03 * 255.0) * (0.03 * 255.0);
    const WIN: usize = 8;

    let mut total = 0.0f64;
    let mut windows = 0usize;
    let mut by = 0;
    while by < h {
        let bh = WIN.min(h - by);
        let mut bx = 0;
        while bx < w {
            let bw = WIN.min(w - bx);
            let n = (bw * bh) as f64;

            let (mut sum_a, mut sum_b) = (0.0, 0.0);
            let (mut sum_aa, mut sum_bb, mut sum_ab) = (0.0, 0.0, 0.0);
            for y in by..by + bh {
                for x in bx..bx + bw {
                    let va = luma_a[y * w + x];
                    let vb = luma_b[y * w + x];
                    sum_a += va;
                    sum_b += vb;
                    sum_aa += va * va;
                    sum_bb += vb * vb;
                    sum_ab += va * vb;
                }
            }
            let mu_a = sum_a / n;
            let mu_b = sum_b / n;
            let var_a = sum_aa / n - mu_a * mu_a;
            let var_b = sum_bb / n - mu_b * mu_b;
            let cov = sum_ab / n - mu_a * mu_b;

            total += ((2.0 * mu_a * mu_b + C1) * (2.0 * cov + C2))
                / ((mu_a * mu_a + mu_b * mu_b + C1) * (var_a + var_b + C2));
            windows += 1;
            bx += WIN;
        }
        by += WIN;
    }
    Ok(total / windows as f64)
}

fn to_luma(img: &RgbImage) -> Vec<f64> {
    img.pixels()
        .map(|p| 0.299 * p.0[0] as f64 + 0.587 * p.0[1] as f64 + 0.114 * p.0[2] as f64)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient(w: u32, h: u32, seed: u8) -> RgbImage {
        let mut img = RgbImage::new(w, h);
        for (x, y, px) in img.enumerate_pixels_mut() {
            let v = (x * 7 + y * 13) as u8;
            px.0 = [v.wrapping_add(seed), v, v.wrapping_mul(3)];
        }
        img
    }

    #[test]
    fn psnr_of_identical_images_is_infinite() {
        let img = gradient(16, 16, 0);
        assert!(calculate_psnr(&img, &img).unwrap().is_infinite());
    }

    #[test]
    fn psnr_of_uniform_offset_matches_closed_form() {
        let a = RgbImage::from_pixel(8, 8, image::Rgb([100, 100, 100]));
        let b = RgbImage::from_pixel(8, 8, image::Rgb([110, 110, 110]));
        // MSE = 100 everywhere, so PSNR = 20*log10(255/10).
        let psnr = calculate_psnr(&a, &b).unwrap();
        assert!((psnr - 20.0 * (25.5f64).log10()).abs() < 1e-9);
    }

    #[test]
    fn ssim_of_identical_images_is_one() {
        let img = gradient(24, 24, 3);
        let ssim = calculate_ssim(&img, &img).unwrap();
        assert!((ssim - 1.0).abs() < 1e-12);
    }

    #[test]
    fn ssim_degrades_for_different_images() {
        let a = gradient(24, 24, 0);
        let b = gradient(24, 24, 90);
        let ssim = calculate_ssim(&a, &b).unwrap();
        assert!(ssim < 1.0);
    }

    #[test]
    fn dimension_mismatch_is_an_error() {
        let a = gradient(8, 8, 0);
        let b = gradient(8, 4, 0);
        assert!(calculate_psnr(&a, &b).is_err());
        assert!(calculate_ssim(&a, &b).is_err());
    }
}
