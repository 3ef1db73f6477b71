use crate::field::FlowField;
use crate::vector::VectorGridSize;
use common_io::{BranchPolicy, BufferMeta, MetaError};
use gpu_context::GpuError;

/// Flow field attached to the frame it was computed for.
///
/// Downstream elements may overwrite the vectors in place, so a duplicated
/// buffer gets its own copy of the device matrix instead of a shared handle.
#[derive(Debug)]
pub struct FlowFieldMeta {
    flow: FlowField,
}

impl FlowFieldMeta {
    pub fn new(flow: FlowField) -> Self {
        Self { flow }
    }

    pub fn flow(&self) -> &FlowField {
        &self.flow
    }

    pub fn vector_grid_size(&self) -> VectorGridSize {
        self.flow.grid_size()
    }
}

impl BufferMeta for FlowFieldMeta {
    const KIND: &'static str = "optical-flow";
    const BRANCH_POLICY: BranchPolicy = BranchPolicy::DeepCopy;

    fn deep_copy(&self) -> Result<Self, MetaError> {
        let vectors = self
            .flow
            .matrix()
            .deep_copy()
            .map_err(|source| MetaError::DeepCopy {
                kind: Self::KIND,
                source,
            })?;
        let flow = FlowField::from_device(vectors, self.flow.grid_size()).map_err(|e| {
            MetaError::DeepCopy {
                kind: Self::KIND,
                source: GpuError::InvalidArgument(e.to_string()),
            }
        })?;
        Ok(Self { flow })
    }
}
