//! CHW float image tensors in `[-1, 1]`.
//!
//! The value mapping to and from 8-bit images follows the usual diffusion
//! convention: `u8 = (clamp(v, -1, 1) + 1) * 127.5`.

use anyhow::{ensure, Context, Result};
use image::{ImageBuffer, Rgb, RgbImage};

#[derive(Debug, Clone, PartialEq)]
pub struct ImageTensor {
    channels: usize,
    height: usize,
    width: usize,
    data: Vec<f32>,
}

impl ImageTensor {
    pub fn new(channels: usize, height: usize, width: usize, data: Vec<f32>) -> Result<Self> {
        ensure!(
            data.len() == channels * height * width,
            "tensor data length {} does not match shape [{}, {}, {}]",
            data.len(),
            channels,
            height,
            width
        );
        Ok(Self {
            channels,
            height,
            width,
            data,
        })
    }

    pub fn zeros(channels: usize, height: usize, width: usize) -> Self {
        Self {
            channels,
            height,
            width,
            data: vec![0.0; channels * height * width],
        }
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [f32] {
        &mut self.data
    }

    /// Decode an RGB image into a 3xHxW tensor in `[-1, 1]`.
    pub fn from_rgb(img: &RgbImage) -> Self {
        let (width, height) = (img.width() as usize, img.height() as usize);
        let mut data = vec![0.0f32; 3 * height * width];
        for (x, y, px) in img.enumerate_pixels() {
            let (x, y) = (x as usize, y as usize);
            for c in 0..3 {
                data[c * height * width + y * width + x] = px.0[c] as f32 / 127.5 - 1.0;
            }
        }
        Self {
            channels: 3,
            height,
            width,
            data,
        }
    }

    /// Encode back to an 8-bit RGB image, clamping to `[-1, 1]` first.
    pub fn to_rgb(&self) -> Result<RgbImage> {
        ensure!(
            self.channels == 3,
            "Expected 3 channels (RGB), got {}",
            self.channels
        );
        let plane = self.height * self.width;
        let mut raw = Vec::with_capacity(3 * plane);
        for i in 0..plane {
            for c in 0..3 {
                let v = self.data[c * plane + i].clamp(-1.0, 1.0);
                raw.push(((v + 1.0) * 127.5).round() as u8);
            }
        }
        ImageBuffer::<Rgb<u8>, Vec<u8>>::from_raw(self.width as u32, self.height as u32, raw)
            .context("Failed to create image buffer")
    }

    /// Concatenate tensors of equal channel count and height along width.
    pub fn concat_width(parts: &[Self]) -> Result<Self> {
        ensure!(!parts.is_empty(), "cannot concatenate zero tensors");
        let (c, h) = (parts[0].channels, parts[0].height);
        let total_w: usize = parts.iter().map(|p| p.width).sum();
        let mut out = Self::zeros(c, h, total_w);
        let mut x_off = 0;
        for part in parts {
            ensure!(
                part.channels == c && part.height == h,
                "concat shape mismatch"
            );
            for ch in 0..c {
                for y in 0..h {
                    for x in 0..part.width {
                        out.data[ch * h * total_w + y * total_w + x_off + x] =
                            part.data[ch * part.height * part.width + y * part.width + x];
                    }
                }
            }
            x_off += part.width;
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rgb_round_trip_is_exact() {
        let mut img = RgbImage::new(4, 2);
        for (i, px) in img.pixels_mut().enumerate() {
            px.0 = [(i * 30) as u8, 255 - (i * 20) as u8, 128];
        }
        let t = ImageTensor::from_rgb(&img);
        assert_eq!(t.channels(), 3);
        assert_eq!((t.height(), t.width()), (2, 4));
        let back = t.to_rgb().unwrap();
        assert_eq!(img, back);
    }

    #[test]
    fn values_are_clamped_on_encode() {
        let t = ImageTensor::new(3, 1, 1, vec![-5.0, 0.0, 5.0]).unwrap();
        let img = t.to_rgb().unwrap();
        assert_eq!(img.get_pixel(0, 0).0, [0, 128, 255]);
    }

    #[test]
    fn concat_width_stitches_frames() {
        let a = ImageTensor::zeros(3, 2, 2);
        let b = ImageTensor::zeros(3, 2, 3);
        let cat = ImageTensor::concat_width(&[a, b]).unwrap();
        assert_eq!(cat.width(), 5);
        assert_eq!(cat.height(), 2);
    }
}
