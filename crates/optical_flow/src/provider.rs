use crate::error::FlowError;
use crate::field::FlowField;
use crate::vector::VectorGridSize;
use common_io::VideoBuffer;
use gpu_context::GpuContext;
use std::sync::Arc;

/// A dense optical-flow algorithm.
///
/// Software and hardware implementations are interchangeable behind this
/// trait. The context is current whenever a method is called.
pub trait FlowProvider: Send {
    fn name(&self) -> &'static str;

    /// Granularity of the vectors `compute` returns.
    fn vector_grid_size(&self) -> VectorGridSize;

    /// Build algorithm objects. Called once before the first `compute` after
    /// construction or `reset`.
    fn initialize(&mut self, _ctx: &Arc<GpuContext>) -> Result<(), FlowError> {
        Ok(())
    }

    fn compute(
        &mut self,
        ctx: &Arc<GpuContext>,
        previous: &VideoBuffer,
        current: &VideoBuffer,
    ) -> Result<FlowField, FlowError>;

    /// Release any cached algorithm objects.
    fn reset(&mut self) {}
}
