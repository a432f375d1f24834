//! Color filter: keeps multi-channel color images, drops grayscale ones.

use image::ExtendedColorType;
use log::{error, info, warn};

use crate::config::Disposition;
use crate::scan::ImageRef;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// RGB or RGBA.
    Color,
    /// Single channel.
    Grayscale,
    /// Anything else: luma+alpha, CMYK, palette or unknown layouts.
    Unrecognized,
}

pub fn classify(color: ExtendedColorType) -> Classification {
    match color {
        ExtendedColorType::Cmyk8 | ExtendedColorType::Unknown(_) => Classification::Unrecognized,
        other => match other.channel_count() {
            1 => Classification::Grayscale,
            3 | 4 => Classification::Color,
            _ => Classification::Unrecognized,
        },
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterOutcome {
    /// Surviving images, input order preserved.
    pub kept: Vec<ImageRef>,
    pub grayscale: usize,
    pub unrecognized: usize,
    pub failed: usize,
}

/// Build the surviving subset of `images`; the input is never modified.
///
/// Files that cannot be opened are logged and excluded. Unrecognized layouts
/// follow `unrecognized`.
pub fn filter_images(images: &[ImageRef], unrecognized: Disposition) -> FilterOutcome {
    let mut outcome = FilterOutcome::default();
    for image in images {
        let color = match image.color_type() {
            Ok(color) => color,
            Err(err) => {
                error!("Image {} could not be opened: {}", image.file_name, err);
                outcome.failed += 1;
                continue;
            }
        };

        match classify(color) {
            Classification::Color => {
                info!("Image {} is a colored image", image.file_name);
                outcome.kept.push(image.clone());
            }
            Classification::Grayscale => {
                info!("Image {} is not a colored image, skipping", image.file_name);
                outcome.grayscale += 1;
            }
            Classification::Unrecognized => {
                outcome.unrecognized += 1;
                match unrecognized {
                    Disposition::Keep => {
                        warn!(
                            "Image {} has an unrecognizable layout ({:?}), keeping",
                            image.file_name, color
                        );
                        outcome.kept.push(image.clone());
                    }
                    Disposition::Exclude => {
                        warn!(
                            "Image {} has an unrecognizable layout ({:?}), skipping",
                            image.file_name, color
                        );
                    }
                }
            }
        }
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_by_channel_layout() {
        assert_eq!(classify(ExtendedColorType::Rgb8), Classification::Color);
        assert_eq!(classify(ExtendedColorType::Rgba8), Classification::Color);
        assert_eq!(classify(ExtendedColorType::Rgb16), Classification::Color);
        assert_eq!(classify(ExtendedColorType::L8), Classification::Grayscale);
        assert_eq!(classify(ExtendedColorType::L1), Classification::Grayscale);
        assert_eq!(classify(ExtendedColorType::La8), Classification::Unrecognized);
        assert_eq!(classify(ExtendedColorType::Cmyk8), Classification::Unrecognized);
        assert_eq!(classify(ExtendedColorType::Unknown(4)), Classification::Unrecognized);
    }
}
