// config.rs - Settings of the feature extraction element
use crate::dims::{DEFAULT_MAX_THREADS_PER_BLOCK, DEFAULT_SEARCH_CAP};
use crate::error::ExtractError;
use crate::features::{FeatureGrid, MotionThresholds};
use crate::reduction::{ReductionSettings, KERNEL_SOURCE};
use serde::Deserialize;
use std::path::{Path, PathBuf};

fn default_device_id() -> i32 {
    -1
}
fn default_grid_width() -> u32 {
    FeatureGrid::DEFAULT_COLS
}
fn default_grid_height() -> u32 {
    FeatureGrid::DEFAULT_ROWS
}
fn default_motion_threshold_squared() -> f32 {
    MotionThresholds::default().motion_threshold_squared
}
fn default_magnitude_quadrant_threshold_squared() -> f32 {
    MotionThresholds::default().magnitude_quadrant_threshold_squared
}
fn default_kernel_source_location() -> PathBuf {
    PathBuf::from("./motion_features.cu")
}
fn default_max_threads_per_block() -> u32 {
    DEFAULT_MAX_THREADS_PER_BLOCK
}
fn default_multiplier_search_cap() -> u32 {
    DEFAULT_SEARCH_CAP
}

#[derive(Clone, Debug, Deserialize)]
pub struct FeatureExtractorConfig {
    #[serde(default = "default_device_id")]
    pub device_id: i32,
    #[serde(default = "default_grid_width")]
    pub features_grid_width: u32,
    #[serde(default = "default_grid_height")]
    pub features_grid_height: u32,
    #[serde(default = "default_motion_threshold_squared")]
    pub motion_threshold_squared: f32,
    #[serde(default = "default_magnitude_quadrant_threshold_squared")]
    pub magnitude_quadrant_threshold_squared: f32,
    /// Kernel source file. The built-in source is used when it does not exist.
    #[serde(default = "default_kernel_source_location")]
    pub kernel_source_location: PathBuf,
    #[serde(default = "default_max_threads_per_block")]
    pub max_threads_per_block: u32,
    #[serde(default = "default_multiplier_search_cap")]
    pub multiplier_search_cap: u32,
}

impl Default for FeatureExtractorConfig {
    fn default() -> Self {
        Self {
            device_id: default_device_id(),
            features_grid_width: default_grid_width(),
            features_grid_height: default_grid_height(),
            motion_threshold_squared: default_motion_threshold_squared(),
            magnitude_quadrant_threshold_squared: default_magnitude_quadrant_threshold_squared(),
            kernel_source_location: default_kernel_source_location(),
            max_threads_per_block: default_max_threads_per_block(),
            multiplier_search_cap: default_multiplier_search_cap(),
        }
    }
}

fn check_threshold(name: &str, value: f32) -> Result<(), ExtractError> {
    if !value.is_finite() || value < 0.0 {
        return Err(ExtractError::Configuration(format!(
            "{name} must be a finite non-negative number, got {value}"
        )));
    }
    Ok(())
}

impl FeatureExtractorConfig {
    pub fn validate(&self) -> Result<(), ExtractError> {
        if self.device_id < -1 {
            return Err(ExtractError::Configuration(format!(
                "device_id must be -1 or a device index, got {}",
                self.device_id
            )));
        }
        if self.features_grid_width == 0 || self.features_grid_height == 0 {
            return Err(ExtractError::Configuration(format!(
                "feature grid must be non-empty, got {}x{}",
                self.features_grid_width, self.features_grid_height
            )));
        }
        check_threshold("motion_threshold_squared", self.motion_threshold_squared)?;
        check_threshold(
            "magnitude_quadrant_threshold_squared",
            self.magnitude_quadrant_threshold_squared,
        )?;
        if !(1..=DEFAULT_MAX_THREADS_PER_BLOCK).contains(&self.max_threads_per_block) {
            return Err(ExtractError::Configuration(format!(
                "max_threads_per_block must be within 1..={DEFAULT_MAX_THREADS_PER_BLOCK}, got {}",
                self.max_threads_per_block
            )));
        }
        if self.multiplier_search_cap < 2 {
            return Err(ExtractError::Configuration(format!(
                "multiplier_search_cap must be at least 2, got {}",
                self.multiplier_search_cap
            )));
        }
        Ok(())
    }

    pub fn settings(&self) -> ReductionSettings {
        ReductionSettings {
            grid_width: self.features_grid_width,
            grid_height: self.features_grid_height,
            thresholds: MotionThresholds {
                motion_threshold_squared: self.motion_threshold_squared,
                magnitude_quadrant_threshold_squared: self.magnitude_quadrant_threshold_squared,
            },
            max_threads_per_block: self.max_threads_per_block,
            search_cap: self.multiplier_search_cap,
        }
    }

    /// Read the configured kernel source, or fall back to the built-in one
    /// when the file is absent. Any other read failure is an error.
    pub fn load_kernel_source(&self) -> Result<String, ExtractError> {
        read_kernel_source(&self.kernel_source_location)
    }
}

fn read_kernel_source(path: &Path) -> Result<String, ExtractError> {
    match std::fs::read_to_string(path) {
        Ok(source) => {
            tracing::debug!(path = %path.display(), "loaded kernel source");
            Ok(source)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(path = %path.display(), "kernel source not found, using built-in");
            Ok(KERNEL_SOURCE.to_string())
        }
        Err(e) => Err(ExtractError::KernelCompile(format!(
            "cannot read {}: {e}",
            path.display()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = FeatureExtractorConfig::default();
        assert_eq!(config.device_id, -1);
        assert_eq!(
            (config.features_grid_width, config.features_grid_height),
            (20, 20)
        );
        assert_eq!(config.motion_threshold_squared, 4.0);
        assert_eq!(config.magnitude_quadrant_threshold_squared, 2.25);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn invalid_values_are_rejected() {
        let bad = [
            FeatureExtractorConfig {
                features_grid_width: 0,
                ..Default::default()
            },
            FeatureExtractorConfig {
                motion_threshold_squared: -1.0,
                ..Default::default()
            },
            FeatureExtractorConfig {
                magnitude_quadrant_threshold_squared: f32::INFINITY,
                ..Default::default()
            },
            FeatureExtractorConfig {
                max_threads_per_block: 2048,
                ..Default::default()
            },
            FeatureExtractorConfig {
                multiplier_search_cap: 1,
                ..Default::default()
            },
            FeatureExtractorConfig {
                device_id: -3,
                ..Default::default()
            },
        ];
        for config in &bad {
            let err = config.validate().unwrap_err();
            assert!(err.is_fatal(), "{config:?}");
        }
    }

    #[test]
    fn missing_source_falls_back_to_builtin() {
        let config = FeatureExtractorConfig {
            kernel_source_location: PathBuf::from("/nonexistent/motion_features.cu"),
            ..Default::default()
        };
        assert_eq!(config.load_kernel_source().unwrap(), KERNEL_SOURCE);
    }

    #[test]
    fn settings_carry_thresholds() {
        let config = FeatureExtractorConfig {
            features_grid_width: 8,
            motion_threshold_squared: 1.0,
            ..Default::default()
        };
        let settings = config.settings();
        assert_eq!(settings.grid_width, 8);
        assert_eq!(settings.grid_height, 20);
        assert_eq!(settings.thresholds.motion_threshold_squared, 1.0);
        assert_eq!(settings.thresholds.magnitude_quadrant_threshold_squared, 2.25);
    }
}
