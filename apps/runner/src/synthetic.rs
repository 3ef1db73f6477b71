// synthetic.rs - Moving test frames and a flow provider that knows the motion
use anyhow::Result;
use common_io::{ColorSpace, FrameMemory, FrameMeta, PixelFormat, VideoBuffer};
use gpu_context::{DeviceMatrix, GpuContext};
use optical_flow::{FlowError, FlowField, FlowProvider, MotionVector, VectorGridSize};
use std::sync::Arc;

const FRAME_INTERVAL_NS: u64 = 16_666_667;

/// Gray8 checkerboard translated by `frame_idx · shift`, uploaded to `ctx`.
pub fn moving_frame(
    ctx: &Arc<GpuContext>,
    width: u32,
    height: u32,
    frame_idx: u64,
    shift: (f32, f32),
) -> Result<VideoBuffer> {
    let ox = (shift.0 * frame_idx as f32).round() as i64;
    let oy = (shift.1 * frame_idx as f32).round() as i64;
    let mut pixels = Vec::with_capacity(width as usize * height as usize);
    for y in 0..i64::from(height) {
        for x in 0..i64::from(width) {
            let cell = ((x - ox).div_euclid(16) + (y - oy).div_euclid(16)) & 1;
            pixels.push(if cell == 0 { 32 } else { 224 });
        }
    }
    let matrix = DeviceMatrix::upload(ctx, width as usize, height as usize, 1, &pixels)?;
    let meta = FrameMeta {
        source_id: 0,
        width,
        height,
        pixfmt: PixelFormat::Gray8,
        colorspace: ColorSpace::BT709,
        frame_idx,
        pts_ns: frame_idx * FRAME_INTERVAL_NS,
        reference_ts_ns: None,
        stride_bytes: width,
    };
    Ok(VideoBuffer::new(meta, FrameMemory::Device(Arc::new(matrix))))
}

/// Emits the one-frame shift the generator applies, as a uniform field.
pub struct ShiftFlowProvider {
    motion: MotionVector,
    grid_size: VectorGridSize,
}

impl ShiftFlowProvider {
    pub fn new(shift: (f32, f32), grid_size: VectorGridSize) -> Self {
        Self {
            motion: MotionVector::new(shift.0, shift.1),
            grid_size,
        }
    }
}

impl FlowProvider for ShiftFlowProvider {
    fn name(&self) -> &'static str {
        "synthetic-shift"
    }

    fn vector_grid_size(&self) -> VectorGridSize {
        self.grid_size
    }

    fn compute(
        &mut self,
        ctx: &Arc<GpuContext>,
        previous: &VideoBuffer,
        current: &VideoBuffer,
    ) -> Result<FlowField, FlowError> {
        if (previous.meta.width, previous.meta.height) != (current.meta.width, current.meta.height) {
            return Err(FlowError::UnsupportedInput(format!(
                "frame size changed from {}x{} to {}x{}",
                previous.meta.width, previous.meta.height, current.meta.width, current.meta.height
            )));
        }
        let grid = self.grid_size.as_u32();
        let w = current.meta.width / grid;
        let h = current.meta.height / grid;
        FlowField::from_vectors(
            ctx,
            w,
            h,
            self.grid_size,
            &vec![self.motion; w as usize * h as usize],
        )
    }
}
