//! Artifact naming and persistence.

use std::path::{Path, PathBuf};

use image::{DynamicImage, ImageFormat};

use crate::config::Naming;
use crate::error::HarvestError;

/// Source file name with a trailing `.jpg` or `.png` removed.
pub fn source_stem(file_name: &str) -> &str {
    file_name
        .strip_suffix(".jpg")
        .or_else(|| file_name.strip_suffix(".png"))
        .unwrap_or(file_name)
}

/// Destination of the `index`-th region found in `file_name`.
pub fn artifact_path(output_dir: &Path, file_name: &str, index: usize, naming: Naming) -> PathBuf {
    let stem = source_stem(file_name);
    let name = match naming {
        Naming::PerRegion => format!("{stem}_{index}.png"),
        Naming::PerSource => format!("{stem}.png"),
    };
    output_dir.join(name)
}

/// Encode `artifact` as PNG at `path`. The parent directory must exist.
pub fn write_artifact(artifact: &DynamicImage, path: &Path) -> Result<(), HarvestError> {
    artifact
        .save_with_format(path, ImageFormat::Png)
        .map_err(|source| HarvestError::Write {
            path: path.to_path_buf(),
            source,
        })
}
