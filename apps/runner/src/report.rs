// report.rs - Per-frame feature reports
use motion_features::{FeatureGridMeta, MotionFeatures};
use serde::Serialize;

/// Feature columns in row-major cell order. Serializes as `{}` when empty.
#[derive(Debug, Default, Serialize)]
pub struct FeatureColumns {
    #[serde(rename = "Cell-Pixels-Count", skip_serializing_if = "Vec::is_empty")]
    pub pixels: Vec<u32>,
    #[serde(rename = "Motion-Count", skip_serializing_if = "Vec::is_empty")]
    pub count: Vec<u32>,
    #[serde(rename = "X0-To-X1-Magnitude", skip_serializing_if = "Vec::is_empty")]
    pub x0_to_x1: Vec<f32>,
    #[serde(rename = "X1-To-X0-Magnitude", skip_serializing_if = "Vec::is_empty")]
    pub x1_to_x0: Vec<f32>,
    #[serde(rename = "Y0-To-Y1-Magnitude", skip_serializing_if = "Vec::is_empty")]
    pub y0_to_y1: Vec<f32>,
    #[serde(rename = "Y1-To-Y0-Magnitude", skip_serializing_if = "Vec::is_empty")]
    pub y1_to_y0: Vec<f32>,
}

impl FeatureColumns {
    fn from_cells(cells: &[MotionFeatures]) -> Self {
        Self {
            pixels: cells.iter().map(|c| c.pixels).collect(),
            count: cells.iter().map(|c| c.count).collect(),
            x0_to_x1: cells.iter().map(|c| c.x0_to_x1_magnitude).collect(),
            x1_to_x0: cells.iter().map(|c| c.x1_to_x0_magnitude).collect(),
            y0_to_y1: cells.iter().map(|c| c.y0_to_y1_magnitude).collect(),
            y1_to_y0: cells.iter().map(|c| c.y1_to_y0_magnitude).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.pixels.is_empty()
    }
}

#[derive(Debug, Serialize)]
pub struct FrameReport {
    #[serde(rename = "Frame-Number")]
    pub frame_number: u64,
    #[serde(rename = "Frame-Timestamp")]
    pub frame_timestamp: u64,
    #[serde(rename = "Number-Of-Features")]
    pub number_of_features: usize,
    #[serde(rename = "Feature-Grid-Width")]
    pub grid_width: u32,
    #[serde(rename = "Feature-Grid-Height")]
    pub grid_height: u32,
    #[serde(rename = "Features")]
    pub features: FeatureColumns,
}

impl FrameReport {
    pub fn from_meta(meta: &FeatureGridMeta) -> Self {
        Self {
            frame_number: meta.frame_number,
            frame_timestamp: meta.timestamp_ns,
            number_of_features: MotionFeatures::FEATURE_COUNT,
            grid_width: meta.grid.cols(),
            grid_height: meta.grid.rows(),
            features: FeatureColumns::from_cells(&meta.grid.snapshot()),
        }
    }

    /// Report for a frame that left the pipeline without features.
    pub fn empty(frame_number: u64, frame_timestamp: u64, grid_width: u32, grid_height: u32) -> Self {
        Self {
            frame_number,
            frame_timestamp,
            number_of_features: MotionFeatures::FEATURE_COUNT,
            grid_width,
            grid_height,
            features: FeatureColumns::default(),
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// One-line digest for terminals.
    pub fn summary(&self) -> String {
        if self.features.is_empty() {
            return format!("frame {:>5}: no features", self.frame_number);
        }
        let f = &self.features;
        let pixels: u64 = f.pixels.iter().map(|&p| u64::from(p)).sum();
        let moving: u64 = f.count.iter().map(|&c| u64::from(c)).sum();
        let sum = |v: &[f32]| v.iter().map(|&x| f64::from(x)).sum::<f64>();
        format!(
            "frame {:>5}: {moving}/{pixels} moving, x+ {:.1} x- {:.1} y+ {:.1} y- {:.1}",
            self.frame_number,
            sum(&f.x0_to_x1),
            sum(&f.x1_to_x0),
            sum(&f.y0_to_y1),
            sum(&f.y1_to_y0),
        )
    }
}
