// matrix.rs - Owned pitched device allocations
use crate::backend::{PitchedAlloc, PitchedArray};
use crate::context::GpuContext;
use crate::error::{GpuError, Result};
use std::sync::Arc;

/// A pitched 2D allocation that frees itself under its owning context.
///
/// The matrix keeps its context alive. Freeing requires the context to be
/// current; if it cannot be made current the memory is leaked and a warning
/// is logged.
#[derive(Debug)]
pub struct DeviceMatrix {
    ctx: Arc<GpuContext>,
    alloc: PitchedAlloc,
}

impl DeviceMatrix {
    pub fn alloc(
        ctx: &Arc<GpuContext>,
        width_bytes: usize,
        height: usize,
        elem_size: usize,
    ) -> Result<Self> {
        if elem_size == 0 || width_bytes % elem_size != 0 {
            return Err(GpuError::InvalidArgument(format!(
                "row width {width_bytes} is not a multiple of element size {elem_size}"
            )));
        }
        let _guard = ctx.push()?;
        let alloc = ctx.backend().alloc_pitched(width_bytes, height, elem_size)?;
        Ok(Self {
            ctx: Arc::clone(ctx),
            alloc,
        })
    }

    /// Allocate and fill from tightly packed host rows.
    pub fn upload(
        ctx: &Arc<GpuContext>,
        width_bytes: usize,
        height: usize,
        elem_size: usize,
        host: &[u8],
    ) -> Result<Self> {
        let matrix = Self::alloc(ctx, width_bytes, height, elem_size)?;
        {
            let _guard = ctx.push()?;
            ctx.backend()
                .copy_to_device_2d(&matrix.alloc, host, width_bytes)?;
        }
        Ok(matrix)
    }

    /// Read the matrix back as tightly packed rows.
    pub fn download(&self) -> Result<Vec<u8>> {
        let mut host = vec![0u8; self.alloc.width_bytes * self.alloc.height];
        let _guard = self.ctx.push()?;
        self.ctx
            .backend()
            .copy_to_host_2d(&self.alloc, &mut host, self.alloc.width_bytes)?;
        Ok(host)
    }

    /// Independent copy of the matrix on the same context.
    pub fn deep_copy(&self) -> Result<Self> {
        let copy = Self::alloc(
            &self.ctx,
            self.alloc.width_bytes,
            self.alloc.height,
            self.alloc.elem_size,
        )?;
        {
            let _guard = self.ctx.push()?;
            self.ctx.backend().copy_device_2d(&self.alloc, &copy.alloc)?;
        }
        Ok(copy)
    }

    pub fn context(&self) -> &Arc<GpuContext> {
        &self.ctx
    }

    pub fn is_accessible_from(&self, ctx: &GpuContext) -> bool {
        self.ctx.id() == ctx.id()
    }

    pub fn pitched(&self) -> &PitchedAlloc {
        &self.alloc
    }

    pub fn as_kernel_arg(&self) -> PitchedArray {
        self.alloc.as_kernel_arg()
    }

    pub fn width_bytes(&self) -> usize {
        self.alloc.width_bytes
    }

    pub fn height(&self) -> usize {
        self.alloc.height
    }

    pub fn pitch(&self) -> usize {
        self.alloc.pitch
    }

    pub fn elem_size(&self) -> usize {
        self.alloc.elem_size
    }

    pub fn cols(&self) -> usize {
        self.alloc.cols()
    }
}

impl Drop for DeviceMatrix {
    fn drop(&mut self) {
        match self.ctx.push() {
            Ok(_guard) => {
                if let Err(e) = self.ctx.backend().free(&self.alloc) {
                    tracing::warn!(context = %self.ctx.id(), error = %e, "failed to free device matrix");
                }
            }
            Err(e) => {
                tracing::warn!(
                    context = %self.ctx.id(),
                    bytes = self.alloc.pitch * self.alloc.height,
                    error = %e,
                    "context unavailable, leaking device matrix"
                );
            }
        }
    }
}
