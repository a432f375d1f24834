//! Batch driver: scan → filter → detect → crop/resize → write.

use std::fmt;

use faceharvest_vision::{CascadeClassifier, FaceDetector, Pipeline};
use log::{debug, error, info, warn};

use crate::config::Config;
use crate::error::HarvestError;
use crate::filter::filter_images;
use crate::scan::{scan_directory, ImageRef};
use crate::writer::{artifact_path, write_artifact};

/// Counters for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Entries accepted by the scanner.
    pub found: usize,
    /// Images that passed the color filter.
    pub kept: usize,
    /// Images the color filter could not open.
    pub open_failures: usize,
    /// Kept images that failed full decoding during detection.
    pub decode_failures: usize,
    pub faces: usize,
    pub written: usize,
    pub write_failures: usize,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} found, {} kept, {} unreadable, {} undecodable, {} faces, {} written, {} write failures",
            self.found,
            self.kept,
            self.open_failures,
            self.decode_failures,
            self.faces,
            self.written,
            self.write_failures
        )
    }
}

/// Load the configured cascade, failing fast when the file is missing.
pub fn load_detector(cfg: &Config) -> Result<CascadeClassifier, HarvestError> {
    if !cfg.cascade_path.is_file() {
        let msg = format!("{}: not found", cfg.cascade_path.display());
        error!("Cascade {}", msg);
        return Err(HarvestError::Configuration(msg));
    }
    let classifier = CascadeClassifier::from_file(&cfg.cascade_path, cfg.detect_params())?;
    info!("Loaded cascade {}", cfg.cascade_path.display());
    Ok(classifier)
}

/// Run the whole pipeline with the configured cascade.
///
/// Only configuration and directory-listing errors are returned; per-image
/// and per-artifact failures are logged and counted in the summary.
pub fn run(cfg: &Config) -> Result<RunSummary, HarvestError> {
    cfg.validate()?;
    let detector = load_detector(cfg)?;
    run_with_detector(cfg, Box::new(detector))
}

/// Same as [`run`] with a caller-supplied detector.
pub fn run_with_detector(
    cfg: &Config,
    detector: Box<dyn FaceDetector>,
) -> Result<RunSummary, HarvestError> {
    cfg.validate()?;
    let images = scan_directory(&cfg.source_dir)?;
    let filtered = filter_images(&images, cfg.unrecognized);

    let mut summary = RunSummary {
        found: images.len(),
        kept: filtered.kept.len(),
        open_failures: filtered.failed,
        ..RunSummary::default()
    };
    let pipeline = Pipeline::new(detector, cfg.output_size).interpolation(cfg.interpolation);
    harvest_faces(&pipeline, &filtered.kept, cfg, &mut summary);

    info!("Run finished: {}", summary);
    Ok(summary)
}

/// Detect faces in already filtered `images` and write their crops.
pub fn detect_faces(images: &[ImageRef], cfg: &Config) -> Result<RunSummary, HarvestError> {
    cfg.validate()?;
    let detector = load_detector(cfg)?;
    let pipeline =
        Pipeline::new(Box::new(detector), cfg.output_size).interpolation(cfg.interpolation);

    let mut summary = RunSummary {
        found: images.len(),
        kept: images.len(),
        ..RunSummary::default()
    };
    harvest_faces(&pipeline, images, cfg, &mut summary);
    Ok(summary)
}

/// Process `images` strictly in order, one at a time.
pub fn harvest_faces(
    pipeline: &Pipeline,
    images: &[ImageRef],
    cfg: &Config,
    summary: &mut RunSummary,
) {
    for image in images {
        let img = match image.decode_color() {
            Ok(img) => img,
            Err(err) => {
                warn!("Skipping {}: {}", image.file_name, err);
                summary.decode_failures += 1;
                continue;
            }
        };

        let crops = pipeline.extract_faces(&img);
        info!("Found {} faces in {}", crops.len(), image.file_name);
        summary.faces += crops.len();

        for (index, crop) in crops.iter().enumerate() {
            let path = artifact_path(&cfg.output_dir, &image.file_name, index, cfg.naming);
            match write_artifact(&crop.image, &path) {
                Ok(()) => {
                    debug!(
                        "Cropped 1 image from {} at {:?} to {}",
                        image.file_name,
                        crop.region,
                        path.display()
                    );
                    summary.written += 1;
                }
                Err(err) => {
                    error!("{}", err);
                    summary.write_failures += 1;
                }
            }
        }
    }
}
