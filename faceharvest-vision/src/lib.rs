pub mod cascade;
pub mod face;
pub mod model;
pub mod pipeline;
pub mod preprocess;
pub mod resize;

// Re-export commonly used types
pub use cascade::{CascadeClassifier, DetectParams};
pub use face::{FaceDetector, FaceRegion};
pub use model::{CascadeError, CascadeModel};
pub use pipeline::{FaceCrop, Pipeline};
pub use resize::Interpolation;
