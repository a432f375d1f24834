pub mod config;
pub mod error;
pub mod filter;
pub mod harvest;
pub mod scan;
pub mod writer;

pub use error::HarvestError;
pub use harvest::{run, run_with_detector, RunSummary};

// Re-export vision types for convenience
pub use faceharvest_vision::{
    face, pipeline, resize, CascadeClassifier, DetectParams, FaceDetector, FaceRegion, Pipeline,
};
