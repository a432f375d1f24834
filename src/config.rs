use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use faceharvest_vision::{DetectParams, Interpolation};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::error::HarvestError;

pub static CONFIG_PATH: Lazy<&'static Path> = Lazy::new(|| {
    Path::new(option_env!("FACEHARVEST_CONFIG_PATH").unwrap_or("faceharvest.toml"))
});

/// What to do with images whose channel layout is neither color nor grayscale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    #[default]
    Exclude,
    Keep,
}

/// How artifact file names are derived from the source file name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum Naming {
    /// `<stem>_<index>.png`, one file per detected region.
    #[default]
    PerRegion,
    /// `<stem>.png`; later regions of the same source overwrite earlier ones.
    PerSource,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub source_dir: PathBuf,
    pub cascade_path: PathBuf,
    pub output_dir: PathBuf,
    pub output_size: u32,
    pub interpolation: Interpolation,
    pub scale_factor: f64,
    pub min_neighbors: u32,
    pub min_size: u32,
    pub unrecognized: Disposition,
    pub naming: Naming,
}

impl Default for Config {
    fn default() -> Self {
        let detect = DetectParams::default();
        Self {
            source_dir: PathBuf::from("images"),
            cascade_path: PathBuf::from("cascade/lbpcascade_animeface.xml"),
            output_dir: PathBuf::from("data"),
            output_size: 64,
            interpolation: Interpolation::default(),
            scale_factor: detect.scale_factor,
            min_neighbors: detect.min_neighbors,
            min_size: detect.min_size,
            unrecognized: Disposition::default(),
            naming: Naming::default(),
        }
    }
}

impl Config {
    pub fn detect_params(&self) -> DetectParams {
        DetectParams {
            scale_factor: self.scale_factor,
            min_neighbors: self.min_neighbors,
            min_size: self.min_size,
        }
    }

    pub fn validate(&self) -> Result<(), HarvestError> {
        let invalid = |msg: String| Err(HarvestError::Configuration(msg));
        if self.source_dir.as_os_str().is_empty() {
            return invalid("source_dir is empty".to_string());
        }
        if self.cascade_path.as_os_str().is_empty() {
            return invalid("cascade_path is empty".to_string());
        }
        if self.output_dir.as_os_str().is_empty() {
            return invalid("output_dir is empty".to_string());
        }
        if self.output_size == 0 {
            return invalid("output_size must be > 0".to_string());
        }
        if self.min_size == 0 {
            return invalid("min_size must be > 0".to_string());
        }
        if !(self.scale_factor > 1.0 && self.scale_factor.is_finite()) {
            return invalid(format!(
                "scale_factor must be greater than 1.0, got {}",
                self.scale_factor
            ));
        }
        Ok(())
    }
}

/// Load the config at `path`, or at [`CONFIG_PATH`] when none is given.
///
/// A missing default file yields `Config::default()`; a missing explicit
/// file is an error.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let explicit = path.is_some();
    let path = path.unwrap_or(&CONFIG_PATH);
    if !path.exists() {
        if explicit {
            anyhow::bail!("config file {} does not exist", path.display());
        }
        return Ok(Config::default());
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading config at {}", path.display()))?;
    toml::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))
}

pub fn save_config(cfg: &Config, path: Option<&Path>) -> Result<()> {
    let path = path.unwrap_or(&CONFIG_PATH);
    let data = toml::to_string_pretty(cfg)?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, data).with_context(|| format!("writing config {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_run() {
        let cfg = Config::default();
        assert_eq!(cfg.output_size, 64);
        assert_eq!(cfg.min_neighbors, 5);
        assert_eq!(cfg.min_size, 64);
        assert!((cfg.scale_factor - 1.1).abs() < f64::EPSILON);
        assert_eq!(cfg.output_dir, PathBuf::from("data"));
        assert_eq!(cfg.unrecognized, Disposition::Exclude);
        assert_eq!(cfg.naming, Naming::PerRegion);
        assert_eq!(cfg.interpolation, Interpolation::Area);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn partial_toml_falls_back_to_defaults() {
        let cfg: Config = toml::from_str(
            r#"
source_dir = "/srv/grabber"
naming = "per_source"
unrecognized = "keep"
interpolation = "lanczos3"
"#,
        )
        .unwrap();
        assert_eq!(cfg.interpolation, Interpolation::Lanczos3);
        assert_eq!(cfg.source_dir, PathBuf::from("/srv/grabber"));
        assert_eq!(cfg.naming, Naming::PerSource);
        assert_eq!(cfg.unrecognized, Disposition::Keep);
        assert_eq!(cfg.output_size, 64);
    }

    #[test]
    fn validate_rejects_bad_values() {
        let bad_scale = Config {
            scale_factor: 1.0,
            ..Config::default()
        };
        assert!(matches!(
            bad_scale.validate(),
            Err(HarvestError::Configuration(_))
        ));

        let bad_size = Config {
            output_size: 0,
            ..Config::default()
        };
        assert!(bad_size.validate().is_err());

        let no_source = Config {
            source_dir: PathBuf::new(),
            ..Config::default()
        };
        assert!(no_source.validate().is_err());
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("faceharvest.toml");
        let cfg = Config {
            min_neighbors: 3,
            naming: Naming::PerSource,
            ..Config::default()
        };
        save_config(&cfg, Some(&path)).unwrap();
        assert_eq!(load_config(Some(&path)).unwrap(), cfg);
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_config(Some(&dir.path().join("missing.toml"))).is_err());
    }
}
