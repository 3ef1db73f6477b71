// stage.rs - The optical flow element
use crate::error::FlowError;
use crate::meta::FlowFieldMeta;
use crate::pair::{FramePairState, PairState};
use crate::provider::FlowProvider;
use crate::vector::VectorGridSize;
use common_io::{Stage, VideoBuffer};
use gpu_context::GpuContext;
use serde::Deserialize;
use std::sync::Arc;

fn default_device_id() -> i32 {
    -1
}

#[derive(Clone, Debug, Deserialize)]
pub struct OpticalFlowConfig {
    #[serde(default = "default_device_id")]
    pub device_id: i32,
    #[serde(default)]
    pub output_vector_grid_size: VectorGridSize,
}

impl Default for OpticalFlowConfig {
    fn default() -> Self {
        Self {
            device_id: default_device_id(),
            output_vector_grid_size: VectorGridSize::One,
        }
    }
}

impl OpticalFlowConfig {
    pub fn validate(&self) -> Result<(), FlowError> {
        if self.device_id < -1 {
            return Err(FlowError::Configuration(format!(
                "device_id must be -1 or a device index, got {}",
                self.device_id
            )));
        }
        if !self.output_vector_grid_size.is_output_size() {
            return Err(FlowError::Configuration(format!(
                "output_vector_grid_size must be 1, 2 or 4, got {}",
                self.output_vector_grid_size
            )));
        }
        Ok(())
    }
}

/// Computes flow between consecutive frames and attaches it to the later one.
pub struct OpticalFlowStage<P: FlowProvider> {
    config: OpticalFlowConfig,
    ctx: Arc<GpuContext>,
    provider: P,
    pairs: FramePairState,
    provider_ready: bool,
    started: bool,
}

impl<P: FlowProvider> OpticalFlowStage<P> {
    pub fn new(config: OpticalFlowConfig, ctx: Arc<GpuContext>, provider: P) -> Self {
        Self {
            config,
            ctx,
            provider,
            pairs: FramePairState::new(),
            provider_ready: false,
            started: false,
        }
    }

    pub fn pair_state(&self) -> PairState {
        self.pairs.state()
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    pub fn context(&self) -> &Arc<GpuContext> {
        &self.ctx
    }

    /// Run one frame through the pair machine. Returns whether flow was attached.
    pub fn process_frame(&mut self, buffer: &mut VideoBuffer) -> Result<bool, FlowError> {
        if !self.started {
            return Err(FlowError::Configuration(
                "optical flow element used before start".into(),
            ));
        }
        if buffer.device_memory_for(&self.ctx).is_none() {
            return Err(FlowError::UnsupportedInput(format!(
                "{} ({:?}) is not accessible from {}",
                buffer.id(),
                buffer.loc(),
                self.ctx.id()
            )));
        }

        let ctx = Arc::clone(&self.ctx);
        let _guard = match ctx.push() {
            Ok(guard) => guard,
            Err(e) => {
                // The frame cannot be retained without the context.
                self.pairs.reset();
                return Err(e.into());
            }
        };
        if self.pairs.is_armed() && !self.provider_ready {
            if let Err(e) = self.provider.initialize(&ctx) {
                self.pairs.retain(buffer);
                return Err(e);
            }
            self.provider_ready = true;
            tracing::debug!(provider = self.provider.name(), "flow provider initialized");
        }

        let provider = &mut self.provider;
        let flow = self.pairs.advance(&*buffer, |previous, current| {
            provider.compute(&ctx, previous, current)
        })?;

        match flow {
            Some(flow) => {
                buffer.attach(FlowFieldMeta::new(flow));
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn release(&mut self) {
        self.pairs.reset();
        self.provider.reset();
        self.provider_ready = false;
    }
}

impl<P: FlowProvider> Stage<VideoBuffer, VideoBuffer> for OpticalFlowStage<P> {
    type Error = FlowError;

    fn name(&self) -> &'static str {
        "optical_flow"
    }

    fn start(&mut self) -> Result<(), FlowError> {
        self.config.validate()?;
        if self.config.device_id >= 0 && self.config.device_id as u32 != self.ctx.device_id() {
            return Err(FlowError::Configuration(format!(
                "configured for device {} but the context is on device {}",
                self.config.device_id,
                self.ctx.device_id()
            )));
        }
        let declared = self.provider.vector_grid_size();
        if declared != self.config.output_vector_grid_size {
            tracing::warn!(
                configured = %self.config.output_vector_grid_size,
                provider = %declared,
                "provider output granularity differs from configuration; using the provider's"
            );
        }
        self.release();
        self.started = true;
        tracing::info!(
            provider = self.provider.name(),
            device = self.ctx.device_id(),
            "optical flow started"
        );
        Ok(())
    }

    fn stop(&mut self) -> Result<(), FlowError> {
        self.release();
        self.started = false;
        tracing::info!(provider = self.provider.name(), "optical flow stopped");
        Ok(())
    }

    fn process(&mut self, mut buffer: VideoBuffer) -> VideoBuffer {
        if let Err(e) = self.process_frame(&mut buffer) {
            tracing::error!(
                frame = buffer.meta.frame_idx,
                error = %e,
                "optical flow failed, frame forwarded without flow"
            );
        }
        buffer
    }
}
