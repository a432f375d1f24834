//! Detector input preparation: luma conversion and histogram equalization.

use image::{GrayImage, RgbImage};

/// BT.601 luma in 14-bit fixed point, the weighting cascades are trained on.
const LUMA_R: u32 = 4899;
const LUMA_G: u32 = 9617;
const LUMA_B: u32 = 1868;
const LUMA_SHIFT: u32 = 14;

pub fn to_gray(img: &RgbImage) -> GrayImage {
    let (width, height) = img.dimensions();
    let mut gray = GrayImage::new(width, height);
    for (dst, src) in gray.pixels_mut().zip(img.pixels()) {
        let [r, g, b] = src.0;
        let y = (r as u32 * LUMA_R + g as u32 * LUMA_G + b as u32 * LUMA_B
            + (1 << (LUMA_SHIFT - 1)))
            >> LUMA_SHIFT;
        dst.0[0] = y.min(255) as u8;
    }
    gray
}

/// Spread intensities over the full 0..=255 range through the image's CDF.
pub fn equalize_histogram(gray: &GrayImage) -> GrayImage {
    let mut hist = [0u32; 256];
    for pixel in gray.pixels() {
        hist[pixel.0[0] as usize] += 1;
    }
    let total = gray.width() * gray.height();
    let lut = equalization_lut(&hist, total);

    let mut out = gray.clone();
    for pixel in out.pixels_mut() {
        pixel.0[0] = lut[pixel.0[0] as usize];
    }
    out
}

fn identity_lut() -> [u8; 256] {
    let mut lut = [0u8; 256];
    for (i, item) in lut.iter_mut().enumerate() {
        *item = i as u8;
    }
    lut
}

fn equalization_lut(hist: &[u32; 256], total: u32) -> [u8; 256] {
    let Some(first) = hist.iter().position(|&count| count > 0) else {
        return identity_lut();
    };
    let cdf_min = hist[first];
    // single intensity: nothing to spread
    if cdf_min == total {
        return identity_lut();
    }

    let scale = 255.0 / (total - cdf_min) as f64;
    let mut lut = [0u8; 256];
    let mut cumulative = 0u32;
    for i in (first + 1)..256 {
        cumulative += hist[i];
        lut[i] = (cumulative as f64 * scale).round().clamp(0.0, 255.0) as u8;
    }
    lut
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Luma, Rgb};

    #[test]
    fn gray_uses_bt601_weights() {
        let mut img = RgbImage::new(4, 1);
        img.put_pixel(0, 0, Rgb([255, 0, 0]));
        img.put_pixel(1, 0, Rgb([0, 255, 0]));
        img.put_pixel(2, 0, Rgb([0, 0, 255]));
        img.put_pixel(3, 0, Rgb([255, 255, 255]));

        let gray = to_gray(&img);
        assert_eq!(gray.get_pixel(0, 0).0[0], 76);
        assert_eq!(gray.get_pixel(1, 0).0[0], 150);
        assert_eq!(gray.get_pixel(2, 0).0[0], 29);
        assert_eq!(gray.get_pixel(3, 0).0[0], 255);
    }

    #[test]
    fn equalize_stretches_narrow_range() {
        let mut gray = GrayImage::new(4, 4);
        for (i, pixel) in gray.pixels_mut().enumerate() {
            pixel.0[0] = 100 + (i % 4) as u8 * 10;
        }
        let eq = equalize_histogram(&gray);
        let min = eq.pixels().map(|p| p.0[0]).min().unwrap();
        let max = eq.pixels().map(|p| p.0[0]).max().unwrap();
        assert_eq!(min, 0);
        assert_eq!(max, 255);
        // ordering of intensities is preserved
        assert!(eq.get_pixel(1, 0).0[0] < eq.get_pixel(2, 0).0[0]);
    }

    #[test]
    fn equalize_keeps_constant_image() {
        let gray = GrayImage::from_pixel(8, 8, Luma([42]));
        assert_eq!(equalize_histogram(&gray), gray);
    }

    #[test]
    fn equalize_empty_image() {
        let gray = GrayImage::new(0, 0);
        assert_eq!(equalize_histogram(&gray).dimensions(), (0, 0));
    }
}
