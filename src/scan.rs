//! Directory scanner: lists candidate images by file-name suffix.

use std::fs;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use image::error::DecodingError;
use image::{DynamicImage, ExtendedColorType, ImageDecoder, ImageError, ImageFormat, ImageReader};
use log::info;

use crate::error::HarvestError;

/// Raster format inferred from the file-name suffix only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    Jpeg,
    Png,
}

impl SourceFormat {
    /// Case-sensitive match on a trailing `.jpg` or `.png`.
    pub fn from_file_name(name: &str) -> Option<Self> {
        if name.ends_with(".jpg") {
            Some(SourceFormat::Jpeg)
        } else if name.ends_with(".png") {
            Some(SourceFormat::Png)
        } else {
            None
        }
    }

    pub fn image_format(self) -> ImageFormat {
        match self {
            SourceFormat::Jpeg => ImageFormat::Jpeg,
            SourceFormat::Png => ImageFormat::Png,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRef {
    pub path: PathBuf,
    pub file_name: String,
    pub format: SourceFormat,
}

impl ImageRef {
    pub fn new(dir: &Path, file_name: &str) -> Option<Self> {
        SourceFormat::from_file_name(file_name).map(|format| Self {
            path: dir.join(file_name),
            file_name: file_name.to_string(),
            format,
        })
    }

    fn reader(&self) -> Result<ImageReader<BufReader<fs::File>>, HarvestError> {
        let mut reader = ImageReader::open(&self.path)
            .map_err(|source| self.decode_error(ImageError::IoError(source)))?;
        // the suffix decides the decoder, content is never sniffed
        reader.set_format(self.format.image_format());
        Ok(reader)
    }

    fn decode_error(&self, source: ImageError) -> HarvestError {
        HarvestError::Decode {
            path: self.path.clone(),
            source,
        }
    }

    /// Channel layout as stored in the file, read from the header only.
    ///
    /// Palette-indexed PNGs come back as `Unknown(bit_depth)`.
    pub fn color_type(&self) -> Result<ExtendedColorType, HarvestError> {
        if self.format == SourceFormat::Png {
            if let Some(depth) = self.png_palette_depth()? {
                return Ok(ExtendedColorType::Unknown(depth));
            }
        }
        let decoder = self
            .reader()?
            .into_decoder()
            .map_err(|source| self.decode_error(source))?;
        Ok(decoder.original_color_type())
    }

    /// The image decoders expand palettes and report the expanded layout, so
    /// the IHDR color type is read directly.
    fn png_palette_depth(&self) -> Result<Option<u8>, HarvestError> {
        let file = fs::File::open(&self.path)
            .map_err(|source| self.decode_error(ImageError::IoError(source)))?;
        let reader = png::Decoder::new(BufReader::new(file))
            .read_info()
            .map_err(|err| {
                self.decode_error(ImageError::Decoding(DecodingError::new(
                    ImageFormat::Png.into(),
                    err,
                )))
            })?;
        let info = reader.info();
        Ok((info.color_type == png::ColorType::Indexed).then_some(info.bit_depth as u8))
    }

    /// Fully decode the image as 3-channel RGB whatever its stored layout.
    pub fn decode_color(&self) -> Result<DynamicImage, HarvestError> {
        let img = self
            .reader()?
            .decode()
            .map_err(|source| self.decode_error(source))?;
        Ok(DynamicImage::ImageRgb8(img.into_rgb8()))
    }
}

/// List `dir` (non-recursively) in directory order.
///
/// Entries are classified by name only, so a subdirectory called `x.png` is
/// returned like any other image.
pub fn scan_directory(dir: &Path) -> Result<Vec<ImageRef>, HarvestError> {
    let io_err = |source: std::io::Error| HarvestError::Io {
        path: dir.to_path_buf(),
        source,
    };

    let mut images = Vec::new();
    for entry in fs::read_dir(dir).map_err(io_err)? {
        let entry = entry.map_err(io_err)?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            info!("Unrecognized file {}", name.to_string_lossy());
            continue;
        };
        match ImageRef::new(dir, name) {
            Some(image) => {
                info!("Found image {}", name);
                images.push(image);
            }
            None => info!("Unrecognized file {}", name),
        }
    }
    Ok(images)
}
