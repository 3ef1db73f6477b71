// host_kernels.rs - Host versions of the reduction kernels
//
// Same launch geometry and summation order as kernels/motion_features.cu.
// Threads outside the flow contribute a zero record on the device; adding
// zero never changes a non-negative sum, so they are skipped here.
use crate::features::{MotionFeatures, MotionThresholds};
use crate::reduction::{CONSOLIDATION_KERNEL, EXTRACTION_KERNEL};
use gpu_context::{
    register_host_kernel, GpuError, HostMemory, KernelParams, LaunchDims, PitchedArray, Result,
};
use optical_flow::{FlowField, MotionVector};
use std::sync::Once;

const RECORD_SIZE: u64 = std::mem::size_of::<MotionFeatures>() as u64;

pub(crate) fn install() {
    static INSTALL: Once = Once::new();
    INSTALL.call_once(|| {
        register_host_kernel(EXTRACTION_KERNEL, extraction_kernel);
        register_host_kernel(CONSOLIDATION_KERNEL, consolidation_kernel);
    });
}

fn expect_elem_size(array: &PitchedArray, size: u64, what: &str) -> Result<()> {
    if array.elem_size != size {
        return Err(GpuError::InvalidArgument(format!(
            "{what} elements are {} bytes, expected {size}",
            array.elem_size
        )));
    }
    Ok(())
}

fn extraction_kernel(memory: &mut HostMemory, dims: LaunchDims, params: &KernelParams) -> Result<()> {
    let flow: PitchedArray = params.get(0)?;
    let grid_size: i32 = params.get(1)?;
    let thresholds: MotionThresholds = params.get(2)?;
    let out: PitchedArray = params.get(3)?;
    expect_elem_size(&flow, FlowField::ELEM_SIZE as u64, "flow")?;
    expect_elem_size(&out, RECORD_SIZE, "oversampled")?;

    let grid = u64::try_from(grid_size)
        .ok()
        .filter(|g| *g > 0)
        .ok_or_else(|| GpuError::InvalidArgument(format!("vector grid size {grid_size}")))?;
    let pixel_width = flow.cols() * grid;
    let pixel_height = flow.height * grid;
    let (block_x, block_y) = (u64::from(dims.block.0), u64::from(dims.block.1));

    for by in 0..u64::from(dims.grid.1) {
        for bx in 0..u64::from(dims.grid.0) {
            let mut acc = MotionFeatures::ZERO;
            for ty in 0..block_y {
                let y = by * block_y + ty;
                if y >= pixel_height {
                    break;
                }
                let row = (y / grid) * flow.pitch;
                for tx in 0..block_x {
                    let x = bx * block_x + tx;
                    if x >= pixel_width {
                        break;
                    }
                    let offset = row + (x / grid) * FlowField::ELEM_SIZE as u64;
                    let raw: [i16; 2] = memory.read(flow.device_ptr, offset as usize)?;
                    acc.accumulate(&thresholds.classify(MotionVector::from_fixed(raw)));
                }
            }
            memory.write(
                out.device_ptr,
                (by * out.pitch + bx * RECORD_SIZE) as usize,
                &acc,
            )?;
        }
    }
    Ok(())
}

fn consolidation_kernel(
    memory: &mut HostMemory,
    dims: LaunchDims,
    params: &KernelParams,
) -> Result<()> {
    let input: PitchedArray = params.get(0)?;
    let multiplier = u64::from(params.get::<u32>(1)?);
    let out: PitchedArray = params.get(2)?;
    expect_elem_size(&input, RECORD_SIZE, "oversampled")?;
    expect_elem_size(&out, RECORD_SIZE, "consolidated")?;

    for cy in 0..u64::from(dims.grid.1) {
        for cx in 0..u64::from(dims.grid.0) {
            let mut acc = MotionFeatures::ZERO;
            for j in 0..multiplier {
                let row = (cy * multiplier + j) * input.pitch;
                for i in 0..multiplier {
                    let record: MotionFeatures = memory.read(
                        input.device_ptr,
                        (row + (cx * multiplier + i) * RECORD_SIZE) as usize,
                    )?;
                    acc.accumulate(&record);
                }
            }
            memory.write(
                out.device_ptr,
                (cy * out.pitch + cx * RECORD_SIZE) as usize,
                &acc,
            )?;
        }
    }
    Ok(())
}
