use std::path::PathBuf;

use faceharvest_vision::CascadeError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HarvestError {
    /// Bad or missing run configuration; aborts the whole run.
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("configuration error: {0}")]
    Cascade(#[from] CascadeError),

    #[error("failed to list {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to decode {}: {source}", .path.display())]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("failed to write {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
}

impl HarvestError {
    /// Whether the error stops the run rather than a single image or artifact.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            HarvestError::Configuration(_) | HarvestError::Cascade(_) | HarvestError::Io { .. }
        )
    }
}
