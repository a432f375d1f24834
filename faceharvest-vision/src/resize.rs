//! Crop/resize stage.
//!
//! Resizing has two modes. Given a single target dimension, the other one is
//! derived from the source aspect ratio. Given both, the output is forced to
//! exactly that box and non-square regions get distorted.

use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, ImageBuffer, Pixel};
use serde::{Deserialize, Serialize};

use crate::face::FaceRegion;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Interpolation {
    /// Pixel-area averaging; falls back to bilinear when enlarging.
    #[default]
    Area,
    Nearest,
    Triangle,
    CatmullRom,
    Lanczos3,
}

impl Interpolation {
    fn filter(self) -> FilterType {
        match self {
            Interpolation::Area | Interpolation::Triangle => FilterType::Triangle,
            Interpolation::Nearest => FilterType::Nearest,
            Interpolation::CatmullRom => FilterType::CatmullRom,
            Interpolation::Lanczos3 => FilterType::Lanczos3,
        }
    }
}

/// Output size for a `src_width` x `src_height` input, `None` meaning "keep as is".
pub fn target_dimensions(
    src_width: u32,
    src_height: u32,
    width: Option<u32>,
    height: Option<u32>,
) -> Option<(u32, u32)> {
    if src_width == 0 || src_height == 0 {
        return None;
    }
    let derive = |other: u32, given: u32, along: u32| {
        let ratio = given as f64 / along as f64;
        ((other as f64 * ratio).round() as u32).max(1)
    };
    match (width, height) {
        (None, None) => None,
        (Some(w), Some(h)) => Some((w, h)),
        (None, Some(h)) => Some((derive(src_width, h, src_height), h)),
        (Some(w), None) => Some((w, derive(src_height, w, src_width))),
    }
}

pub fn resize(
    img: &DynamicImage,
    width: Option<u32>,
    height: Option<u32>,
    interpolation: Interpolation,
) -> DynamicImage {
    let (src_width, src_height) = img.dimensions();
    let Some((w, h)) = target_dimensions(src_width, src_height, width, height) else {
        return img.clone();
    };
    if (w, h) == (src_width, src_height) || w == 0 || h == 0 {
        return img.clone();
    }

    let enlarging = w > src_width || h > src_height;
    if interpolation != Interpolation::Area || enlarging {
        return img.resize_exact(w, h, interpolation.filter());
    }

    match img {
        DynamicImage::ImageLuma8(buf) => DynamicImage::ImageLuma8(resize_area(buf, w, h)),
        DynamicImage::ImageLumaA8(buf) => DynamicImage::ImageLumaA8(resize_area(buf, w, h)),
        DynamicImage::ImageRgb8(buf) => DynamicImage::ImageRgb8(resize_area(buf, w, h)),
        DynamicImage::ImageRgba8(buf) => DynamicImage::ImageRgba8(resize_area(buf, w, h)),
        other => other.resize_exact(w, h, FilterType::Triangle),
    }
}

/// Cut `region` out of `img` (clamped to its bounds).
pub fn crop(img: &DynamicImage, region: &FaceRegion) -> DynamicImage {
    let region = region.clamp_to(img.width(), img.height());
    img.crop_imm(region.x, region.y, region.width, region.height)
}

pub fn crop_resize(
    img: &DynamicImage,
    region: &FaceRegion,
    width: Option<u32>,
    height: Option<u32>,
    interpolation: Interpolation,
) -> DynamicImage {
    resize(&crop(img, region), width, height, interpolation)
}

/// Downscale by averaging the source area covered by each output pixel.
fn resize_area<P>(src: &ImageBuffer<P, Vec<u8>>, width: u32, height: u32) -> ImageBuffer<P, Vec<u8>>
where
    P: Pixel<Subpixel = u8>,
{
    let (src_width, src_height) = src.dimensions();
    let sx = src_width as f64 / width as f64;
    let sy = src_height as f64 / height as f64;
    let channels = P::CHANNEL_COUNT as usize;

    let mut out = ImageBuffer::<P, Vec<u8>>::new(width, height);
    let mut acc = vec![0f64; channels];
    for oy in 0..height {
        let y0 = oy as f64 * sy;
        let y1 = y0 + sy;
        for ox in 0..width {
            let x0 = ox as f64 * sx;
            let x1 = x0 + sx;

            acc.iter_mut().for_each(|v| *v = 0.0);
            let mut total = 0.0;
            for iy in (y0.floor() as u32)..(y1.ceil() as u32).min(src_height) {
                let wy = (y1.min(iy as f64 + 1.0) - y0.max(iy as f64)).max(0.0);
                if wy == 0.0 {
                    continue;
                }
                for ix in (x0.floor() as u32)..(x1.ceil() as u32).min(src_width) {
                    let wx = (x1.min(ix as f64 + 1.0) - x0.max(ix as f64)).max(0.0);
                    let weight = wx * wy;
                    if weight == 0.0 {
                        continue;
                    }
                    for (sum, &value) in acc.iter_mut().zip(src.get_pixel(ix, iy).channels()) {
                        *sum += value as f64 * weight;
                    }
                    total += weight;
                }
            }

            if total > 0.0 {
                let pixel = out.get_pixel_mut(ox, oy);
                for (dst, sum) in pixel.channels_mut().iter_mut().zip(&acc) {
                    *dst = (sum / total).round().clamp(0.0, 255.0) as u8;
                }
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn gradient(width: u32, height: u32) -> DynamicImage {
        let mut img = RgbImage::new(width, height);
        for (x, y, pixel) in img.enumerate_pixels_mut() {
            *pixel = Rgb([(x * 255 / width) as u8, (y * 255 / height) as u8, 128]);
        }
        DynamicImage::ImageRgb8(img)
    }

    #[test]
    fn exact_box_ignores_aspect_ratio() {
        for (w, h) in [(100, 40), (40, 100), (80, 80), (300, 65), (20, 30)] {
            let out = resize(&gradient(w, h), Some(64), Some(64), Interpolation::Area);
            assert_eq!(out.dimensions(), (64, 64), "input {w}x{h}");
        }
    }

    #[test]
    fn same_size_is_unchanged() {
        let img = gradient(64, 64);
        let out = resize(&img, Some(64), Some(64), Interpolation::Area);
        assert_eq!(out, img);
    }

    #[test]
    fn height_only_preserves_aspect() {
        for (w, h, target) in [(100u32, 40u32, 64u32), (45, 70, 64), (333, 101, 20)] {
            let out = resize(&gradient(w, h), None, Some(target), Interpolation::Area);
            let expected = (w as f64 * target as f64 / h as f64).round() as u32;
            assert_eq!(out.dimensions(), (expected, target));
        }
    }

    #[test]
    fn width_only_preserves_aspect() {
        let out = resize(&gradient(90, 50), Some(30), None, Interpolation::Area);
        assert_eq!(out.dimensions(), (30, 17));
    }

    #[test]
    fn no_target_returns_input() {
        let img = gradient(33, 21);
        assert_eq!(resize(&img, None, None, Interpolation::Area), img);
    }

    #[test]
    fn area_averages_blocks() {
        let mut img = RgbImage::new(2, 2);
        img.put_pixel(0, 0, Rgb([0, 0, 0]));
        img.put_pixel(1, 0, Rgb([100, 100, 100]));
        img.put_pixel(0, 1, Rgb([200, 200, 200]));
        img.put_pixel(1, 1, Rgb([100, 100, 100]));

        let out = resize(&DynamicImage::ImageRgb8(img), Some(1), Some(1), Interpolation::Area);
        assert_eq!(out.to_rgb8().get_pixel(0, 0), &Rgb([100, 100, 100]));
    }

    #[test]
    fn nearest_picks_a_source_pixel() {
        let mut img = RgbImage::new(2, 1);
        img.put_pixel(0, 0, Rgb([0, 0, 0]));
        img.put_pixel(1, 0, Rgb([200, 200, 200]));
        let img = DynamicImage::ImageRgb8(img);

        let nearest = resize(&img, Some(1), Some(1), Interpolation::Nearest).to_rgb8();
        assert!([0, 200].contains(&nearest.get_pixel(0, 0).0[0]));
        let area = resize(&img, Some(1), Some(1), Interpolation::Area).to_rgb8();
        assert_eq!(area.get_pixel(0, 0), &Rgb([100, 100, 100]));
    }

    #[test]
    fn crop_resize_produces_square_artifact() {
        let img = gradient(200, 150);
        let region = FaceRegion::new(10, 20, 120, 80);
        let out = crop_resize(&img, &region, Some(64), Some(64), Interpolation::Area);
        assert_eq!(out.dimensions(), (64, 64));
    }

    #[test]
    fn crop_clamps_overhanging_region() {
        let img = gradient(100, 100);
        let out = crop(&img, &FaceRegion::new(80, 90, 40, 40));
        assert_eq!(out.dimensions(), (20, 10));
    }
}
