use image::DynamicImage;

use crate::face::{FaceDetector, FaceRegion};
use crate::preprocess;
use crate::resize::{self, Interpolation};

/// One detected face and its resized crop.
#[derive(Debug, Clone)]
pub struct FaceCrop {
    pub region: FaceRegion,
    pub image: DynamicImage,
}

/// Full pipeline: grayscale → equalize → detect → crop → resize
pub struct Pipeline {
    detector: Box<dyn FaceDetector>,
    output_size: u32,
    interpolation: Interpolation,
}

impl Pipeline {
    pub fn new(detector: Box<dyn FaceDetector>, output_size: u32) -> Self {
        Self {
            detector,
            output_size,
            interpolation: Interpolation::default(),
        }
    }

    pub fn interpolation(mut self, interpolation: Interpolation) -> Self {
        self.interpolation = interpolation;
        self
    }

    /// Locate faces in a color image.
    pub fn detect(&self, img: &DynamicImage) -> Vec<FaceRegion> {
        let gray = match img.as_rgb8() {
            Some(rgb) => preprocess::to_gray(rgb),
            None => preprocess::to_gray(&img.to_rgb8()),
        };
        let equalized = preprocess::equalize_histogram(&gray);
        self.detector.detect(&equalized)
    }

    /// Detect faces and return each one cut out and resized to the output square.
    pub fn extract_faces(&self, img: &DynamicImage) -> Vec<FaceCrop> {
        self.detect(img)
            .into_iter()
            .map(|region| FaceCrop {
                region,
                image: resize::crop_resize(
                    img,
                    &region,
                    Some(self.output_size),
                    Some(self.output_size),
                    self.interpolation,
                ),
            })
            .collect()
    }
}
