use anyhow::{Context, Result};
use gpu_context::BackendKind;
use motion_features::FeatureExtractorConfig;
use optical_flow::OpticalFlowConfig;
use serde::Deserialize;
use std::path::Path;

/// Whole-application configuration. Every section may be omitted.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub feature_extractor: FeatureExtractorConfig,
    #[serde(default)]
    pub optical_flow: OpticalFlowConfig,
    #[serde(default)]
    pub runner: RunnerConfig,
}

impl AppConfig {
    pub fn from_file(p: impl AsRef<Path>) -> Result<Self> {
        let p = p.as_ref();
        let content = std::fs::read_to_string(p)
            .with_context(|| format!("reading config {}", p.display()))?;
        Self::from_toml(&content).with_context(|| format!("parsing config {}", p.display()))
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    #[default]
    Json,
    Summary,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RunnerConfig {
    #[serde(default)]
    pub backend: BackendKind,
    #[serde(default = "default_frames")]
    pub frames: u64,
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    /// Synthetic motion, in pixels per frame.
    #[serde(default = "default_shift_x")]
    pub shift_x: f32,
    #[serde(default)]
    pub shift_y: f32,
    #[serde(default)]
    pub report: ReportFormat,
}

fn default_frames() -> u64 {
    8
}
fn default_width() -> u32 {
    640
}
fn default_height() -> u32 {
    360
}
fn default_shift_x() -> f32 {
    2.0
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            frames: default_frames(),
            width: default_width(),
            height: default_height(),
            shift_x: default_shift_x(),
            shift_y: 0.0,
            report: ReportFormat::default(),
        }
    }
}
