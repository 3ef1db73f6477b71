// reduction.rs - Flow field to feature grid, on the device
use crate::dims::{self, DimensionFitter, DEFAULT_MAX_THREADS_PER_BLOCK, DEFAULT_SEARCH_CAP};
use crate::error::ExtractError;
use crate::features::{FeatureGrid, MotionFeatures, MotionThresholds};
use crate::host_kernels;
use gpu_context::{DeviceMatrix, FunctionHandle, GpuContext, KernelParams, LaunchDims, ModuleHandle};
use optical_flow::FlowField;
use std::sync::Arc;

pub const MODULE_NAME: &str = "motion_features";
pub const EXTRACTION_KERNEL: &str = "motion_feature_extraction_kernel";
pub const CONSOLIDATION_KERNEL: &str = "motion_feature_consolidation_kernel";

/// Kernel source compiled into the crate, used when no file is configured.
pub const KERNEL_SOURCE: &str = include_str!("../kernels/motion_features.cu");

const RECORD_SIZE: usize = std::mem::size_of::<MotionFeatures>();

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ReductionSettings {
    pub grid_width: u32,
    pub grid_height: u32,
    pub thresholds: MotionThresholds,
    pub max_threads_per_block: u32,
    pub search_cap: u32,
}

impl Default for ReductionSettings {
    fn default() -> Self {
        Self {
            grid_width: FeatureGrid::DEFAULT_COLS,
            grid_height: FeatureGrid::DEFAULT_ROWS,
            thresholds: MotionThresholds::default(),
            max_threads_per_block: DEFAULT_MAX_THREADS_PER_BLOCK,
            search_cap: DEFAULT_SEARCH_CAP,
        }
    }
}

impl ReductionSettings {
    pub fn fitter(&self) -> DimensionFitter {
        DimensionFitter {
            max_threads_per_block: self.max_threads_per_block,
            search_cap: self.search_cap,
        }
    }
}

/// Launch geometry for one flow shape.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReductionPlan {
    pub multiplier: u32,
    pub pixel_width: u32,
    pub pixel_height: u32,
    pub extraction: LaunchDims,
    pub consolidation: LaunchDims,
}

impl ReductionPlan {
    /// Plan the reduction of a `vectors_w × vectors_h` field whose vectors
    /// each cover `vector_grid_size` pixels per axis.
    pub fn new(
        settings: &ReductionSettings,
        vectors_w: u32,
        vectors_h: u32,
        vector_grid_size: u32,
    ) -> Result<Self, ExtractError> {
        let (gw, gh) = (settings.grid_width, settings.grid_height);
        if gw == 0 || gh == 0 {
            return Err(ExtractError::Configuration(format!(
                "feature grid must be non-empty, got {gw}x{gh}"
            )));
        }
        let pixel_width = vectors_w.checked_mul(vector_grid_size);
        let pixel_height = vectors_h.checked_mul(vector_grid_size);
        let (pixel_width, pixel_height) = match (pixel_width, pixel_height) {
            (Some(w), Some(h)) if w > 0 && h > 0 => (w, h),
            _ => {
                return Err(ExtractError::UnsupportedInput(format!(
                    "cannot reduce a {vectors_w}x{vectors_h} flow field at vector grid size {vector_grid_size}"
                )))
            }
        };

        let multiplier = settings.fitter().fit(pixel_width, pixel_height, gw, gh);
        let block = dims::block_dims(pixel_width, pixel_height, gw, gh, multiplier);
        let threads = u64::from(block.0) * u64::from(block.1);
        if threads > u64::from(settings.max_threads_per_block) {
            return Err(ExtractError::Configuration(format!(
                "{pixel_width}x{pixel_height} flow cannot be split onto a {gw}x{gh} grid \
                 within {} threads per block (best block is {}x{})",
                settings.max_threads_per_block, block.0, block.1
            )));
        }

        Ok(Self {
            multiplier,
            pixel_width,
            pixel_height,
            extraction: LaunchDims::new_2d((gw * multiplier, gh * multiplier), block),
            consolidation: LaunchDims::new_2d((gw, gh), (1, 1)),
        })
    }

    pub fn oversampled_width(&self) -> u32 {
        self.extraction.grid.0
    }

    pub fn oversampled_height(&self) -> u32 {
        self.extraction.grid.1
    }
}

/// Compiled reduction kernels bound to one context.
///
/// The module is loaded for the lifetime of the pipeline and unloaded on
/// drop. Every [`extract`](Self::extract) call allocates its own scratch
/// matrices, so a failed frame leaves nothing behind.
pub struct ReductionPipeline {
    ctx: Arc<GpuContext>,
    settings: ReductionSettings,
    module: ModuleHandle,
    extraction: FunctionHandle,
    consolidation: FunctionHandle,
}

impl ReductionPipeline {
    pub fn compile(
        ctx: &Arc<GpuContext>,
        source: &str,
        settings: ReductionSettings,
    ) -> Result<Self, ExtractError> {
        host_kernels::install();
        let _guard = ctx.push()?;
        let backend = ctx.backend();
        let module = backend
            .compile_module(MODULE_NAME, source, &[EXTRACTION_KERNEL, CONSOLIDATION_KERNEL])?;

        let functions = backend
            .get_function(module, EXTRACTION_KERNEL)
            .and_then(|e| Ok((e, backend.get_function(module, CONSOLIDATION_KERNEL)?)));
        let (extraction, consolidation) = match functions {
            Ok(pair) => pair,
            Err(e) => {
                backend.unload_module(module);
                return Err(e.into());
            }
        };

        tracing::debug!(
            module = MODULE_NAME,
            context = %ctx.id(),
            grid_width = settings.grid_width,
            grid_height = settings.grid_height,
            "reduction kernels compiled"
        );
        Ok(Self {
            ctx: Arc::clone(ctx),
            settings,
            module,
            extraction,
            consolidation,
        })
    }

    pub fn settings(&self) -> &ReductionSettings {
        &self.settings
    }

    pub fn context(&self) -> &Arc<GpuContext> {
        &self.ctx
    }

    pub fn plan_for(&self, flow: &FlowField) -> Result<ReductionPlan, ExtractError> {
        ReductionPlan::new(
            &self.settings,
            flow.width(),
            flow.height(),
            flow.grid_size().as_u32(),
        )
    }

    /// Reduce one flow field into a `grid_height × grid_width` feature grid.
    pub fn extract(&self, flow: &FlowField) -> Result<FeatureGrid, ExtractError> {
        if !flow.matrix().is_accessible_from(&self.ctx) {
            return Err(ExtractError::UnsupportedInput(format!(
                "flow field lives on {}, pipeline runs on {}",
                flow.context().id(),
                self.ctx.id()
            )));
        }
        let plan = self.plan_for(flow)?;
        let (gw, gh) = (self.settings.grid_width, self.settings.grid_height);

        let oversampled = DeviceMatrix::alloc(
            &self.ctx,
            plan.oversampled_width() as usize * RECORD_SIZE,
            plan.oversampled_height() as usize,
            RECORD_SIZE,
        )?;
        let consolidated =
            DeviceMatrix::alloc(&self.ctx, gw as usize * RECORD_SIZE, gh as usize, RECORD_SIZE)?;

        {
            let _guard = self.ctx.push()?;
            let backend = self.ctx.backend();

            let params = KernelParams::new()
                .push(&flow.matrix().as_kernel_arg())
                .push(&(flow.grid_size().as_u32() as i32))
                .push(&self.settings.thresholds)
                .push(&oversampled.as_kernel_arg());
            backend.launch(&self.extraction, plan.extraction, &params)?;

            let params = KernelParams::new()
                .push(&oversampled.as_kernel_arg())
                .push(&plan.multiplier)
                .push(&consolidated.as_kernel_arg());
            backend.launch(&self.consolidation, plan.consolidation, &params)?;
        }

        let bytes = consolidated.download()?;
        let records: Vec<MotionFeatures> = bytes
            .chunks_exact(RECORD_SIZE)
            .map(bytemuck::pod_read_unaligned)
            .collect();
        tracing::trace!(
            multiplier = plan.multiplier,
            pixels = u64::from(plan.pixel_width) * u64::from(plan.pixel_height),
            "flow field reduced"
        );
        FeatureGrid::from_records(gh, gw, &records)
    }
}

impl Drop for ReductionPipeline {
    fn drop(&mut self) {
        match self.ctx.push() {
            Ok(_guard) => self.ctx.backend().unload_module(self.module),
            Err(e) => tracing::warn!(
                context = %self.ctx.id(),
                error = %e,
                "context unavailable, reduction module not unloaded"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_for_full_hd() {
        let plan = ReductionPlan::new(&ReductionSettings::default(), 1920, 1080, 1).unwrap();
        assert_eq!(plan.multiplier, 3);
        assert_eq!(plan.extraction, LaunchDims::new_2d((60, 60), (32, 18)));
        assert_eq!(plan.consolidation, LaunchDims::new_2d((20, 20), (1, 1)));
    }

    #[test]
    fn plan_accounts_for_vector_grid_size() {
        let plan = ReductionPlan::new(&ReductionSettings::default(), 480, 270, 4).unwrap();
        assert_eq!((plan.pixel_width, plan.pixel_height), (1920, 1080));
        assert_eq!(plan.multiplier, 3);
    }

    #[test]
    fn plan_rejects_unreachable_thread_ceiling() {
        let settings = ReductionSettings {
            max_threads_per_block: 64,
            search_cap: 2,
            ..ReductionSettings::default()
        };
        let err = ReductionPlan::new(&settings, 1920, 1080, 1).unwrap_err();
        assert!(matches!(err, ExtractError::Configuration(_)));
    }

    #[test]
    fn plan_rejects_empty_inputs() {
        let settings = ReductionSettings::default();
        assert!(matches!(
            ReductionPlan::new(&settings, 0, 10, 1),
            Err(ExtractError::UnsupportedInput(_))
        ));
        let empty_grid = ReductionSettings {
            grid_width: 0,
            ..settings
        };
        assert!(matches!(
            ReductionPlan::new(&empty_grid, 10, 10, 1),
            Err(ExtractError::Configuration(_))
        ));
    }

    #[test]
    fn embedded_source_declares_both_kernels() {
        assert!(KERNEL_SOURCE.contains(EXTRACTION_KERNEL));
        assert!(KERNEL_SOURCE.contains(CONSOLIDATION_KERNEL));
    }
}
