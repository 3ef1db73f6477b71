// extractor.rs - The feature extraction element
use crate::config::FeatureExtractorConfig;
use crate::error::ExtractError;
use crate::meta::FeatureGridMeta;
use crate::reduction::ReductionPipeline;
use common_io::{Stage, VideoBuffer};
use gpu_context::GpuContext;
use optical_flow::FlowFieldMeta;
use std::sync::Arc;

/// Reduces each buffer's flow field into a [`FeatureGridMeta`].
///
/// Buffers are always forwarded. A buffer without flow, or one whose
/// extraction fails, simply leaves without a feature grid.
pub struct FeatureExtractor {
    config: FeatureExtractorConfig,
    ctx: Arc<GpuContext>,
    pipeline: Option<ReductionPipeline>,
    frame_num: u64,
}

impl FeatureExtractor {
    pub fn new(config: FeatureExtractorConfig, ctx: Arc<GpuContext>) -> Self {
        Self {
            config,
            ctx,
            pipeline: None,
            frame_num: 0,
        }
    }

    pub fn config(&self) -> &FeatureExtractorConfig {
        &self.config
    }

    pub fn is_started(&self) -> bool {
        self.pipeline.is_some()
    }

    /// Frames seen since start, including those that produced no grid.
    pub fn frame_number(&self) -> u64 {
        self.frame_num
    }

    /// Compute the feature grid for `buffer` without attaching it.
    pub fn extract(&self, buffer: &VideoBuffer) -> Result<Option<FeatureGridMeta>, ExtractError> {
        let pipeline = self.pipeline.as_ref().ok_or_else(|| {
            ExtractError::Configuration("feature extractor used before start".into())
        })?;
        if buffer.device_memory_for(&self.ctx).is_none() {
            return Err(ExtractError::UnsupportedInput(format!(
                "{} ({:?}) is not accessible from {}",
                buffer.id(),
                buffer.loc(),
                self.ctx.id()
            )));
        }
        let Some(flow) = buffer.attached::<FlowFieldMeta>() else {
            return Ok(None);
        };

        let grid = pipeline.extract(flow.flow())?;
        Ok(Some(FeatureGridMeta::new(
            grid,
            self.frame_num,
            buffer.meta.timestamp_ns(),
        )))
    }
}

impl Stage<VideoBuffer, VideoBuffer> for FeatureExtractor {
    type Error = ExtractError;

    fn name(&self) -> &'static str {
        "motion_features"
    }

    fn start(&mut self) -> Result<(), ExtractError> {
        self.config.validate()?;
        if self.config.device_id >= 0 && self.config.device_id as u32 != self.ctx.device_id() {
            return Err(ExtractError::Configuration(format!(
                "configured for device {} but the context is on device {}",
                self.config.device_id,
                self.ctx.device_id()
            )));
        }
        let source = self.config.load_kernel_source()?;
        self.pipeline = None;
        self.pipeline = Some(ReductionPipeline::compile(
            &self.ctx,
            &source,
            self.config.settings(),
        )?);
        self.frame_num = 0;
        tracing::info!(
            device = self.ctx.device_id(),
            grid_width = self.config.features_grid_width,
            grid_height = self.config.features_grid_height,
            "feature extractor started"
        );
        Ok(())
    }

    fn stop(&mut self) -> Result<(), ExtractError> {
        self.pipeline = None;
        self.frame_num = 0;
        tracing::info!("feature extractor stopped");
        Ok(())
    }

    fn process(&mut self, mut buffer: VideoBuffer) -> VideoBuffer {
        match self.extract(&buffer) {
            Ok(Some(meta)) => {
                buffer.attach(meta);
            }
            Ok(None) => {
                tracing::trace!(frame = self.frame_num, "no flow attached, nothing to extract");
            }
            Err(e) => {
                tracing::error!(
                    frame = self.frame_num,
                    error = %e,
                    "feature extraction failed, frame forwarded without features"
                );
            }
        }
        self.frame_num += 1;
        buffer
    }
}
