//! Motion feature extraction.
//!
//! Reduces a dense optical flow field into a fixed grid of per-cell motion
//! statistics: how many pixels moved, and how far they moved in each of the
//! four axis directions. The reduction runs on the GPU in two stages (see
//! [`ReductionPipeline`]); [`FeatureExtractor`] wraps it as a pipeline element
//! that attaches a [`FeatureGridMeta`] to every buffer carrying flow.
mod config;
mod dims;
mod error;
mod extractor;
mod features;
mod host_kernels;
mod meta;
mod reduction;

pub use config::FeatureExtractorConfig;
pub use dims::{block_dims, DimensionFitter, DEFAULT_MAX_THREADS_PER_BLOCK, DEFAULT_SEARCH_CAP};
pub use error::ExtractError;
pub use extractor::FeatureExtractor;
pub use features::{FeatureArray, FeatureCell, FeatureGrid, MotionFeatures, MotionThresholds};
pub use meta::FeatureGridMeta;
pub use reduction::{
    ReductionPipeline, ReductionPlan, ReductionSettings, CONSOLIDATION_KERNEL, EXTRACTION_KERNEL,
    KERNEL_SOURCE, MODULE_NAME,
};
