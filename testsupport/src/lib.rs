use common_io::{ColorSpace, FrameMemory, FrameMeta, PixelFormat, VideoBuffer};
use gpu_context::{DeviceMatrix, GpuContext, HostBackend};
use optical_flow::{FlowError, FlowField, FlowProvider, MotionVector, VectorGridSize};
use std::sync::Arc;

/// A host-backend context plus a handle on the backend for fault injection
/// and introspection.
pub fn host_context() -> (Arc<HostBackend>, Arc<GpuContext>) {
    let backend = Arc::new(HostBackend::new(0));
    let ctx = GpuContext::new(backend.clone());
    (backend, ctx)
}

pub fn frame_meta(w: u32, h: u32, frame_idx: u64) -> FrameMeta {
    FrameMeta {
        source_id: 0,
        width: w,
        height: h,
        pixfmt: PixelFormat::Gray8,
        colorspace: ColorSpace::BT709,
        frame_idx,
        pts_ns: frame_idx * 40_000_000,
        reference_ts_ns: None,
        stride_bytes: w,
    }
}

/// Gray8 frame resident on `ctx`, every pixel set to `frame_idx as u8`.
pub fn make_gpu_frame(ctx: &Arc<GpuContext>, w: u32, h: u32, frame_idx: u64) -> VideoBuffer {
    let pixels = vec![frame_idx as u8; w as usize * h as usize];
    let matrix = DeviceMatrix::upload(ctx, w as usize, h as usize, 1, &pixels)
        .expect("upload synthetic frame");
    VideoBuffer::new(
        frame_meta(w, h, frame_idx),
        FrameMemory::Device(Arc::new(matrix)),
    )
}

/// Same content as [`make_gpu_frame`], in host memory.
pub fn make_host_frame(w: u32, h: u32, frame_idx: u64) -> VideoBuffer {
    let pixels = vec![frame_idx as u8; w as usize * h as usize];
    VideoBuffer::new(
        frame_meta(w, h, frame_idx),
        FrameMemory::Host(Arc::new(pixels)),
    )
}

/// Flow field where every vector is `v`.
pub fn uniform_flow(
    ctx: &Arc<GpuContext>,
    w: u32,
    h: u32,
    grid_size: VectorGridSize,
    v: MotionVector,
) -> FlowField {
    flow_from_fn(ctx, w, h, grid_size, |_, _| v)
}

/// Flow field with the vector at `(x, y)` given by `f(x, y)`.
pub fn flow_from_fn(
    ctx: &Arc<GpuContext>,
    w: u32,
    h: u32,
    grid_size: VectorGridSize,
    f: impl Fn(u32, u32) -> MotionVector,
) -> FlowField {
    let vectors: Vec<MotionVector> = (0..h)
        .flat_map(|y| (0..w).map(move |x| (x, y)))
        .map(|(x, y)| f(x, y))
        .collect();
    FlowField::from_vectors(ctx, w, h, grid_size, &vectors).expect("upload synthetic flow")
}

/// One `compute` call as seen by [`ScriptedFlowProvider`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FramePair {
    pub previous: u64,
    pub current: u64,
    /// First pixel of each frame as read back from its memory.
    pub previous_fill: u8,
    pub current_fill: u8,
}

/// Flow provider that records every pair it is handed.
///
/// The flow it returns encodes the pair: every vector is
/// `(previous frame_idx, current frame_idx)`.
#[derive(Debug)]
pub struct ScriptedFlowProvider {
    grid_size: VectorGridSize,
    fail_on_frame: Option<u64>,
    init_failures: usize,
    pub calls: Vec<FramePair>,
    pub initialized: usize,
    pub resets: usize,
}

impl ScriptedFlowProvider {
    pub fn new(grid_size: VectorGridSize) -> Self {
        Self {
            grid_size,
            fail_on_frame: None,
            init_failures: 0,
            calls: Vec::new(),
            initialized: 0,
            resets: 0,
        }
    }

    /// Fail the call whose current frame has index `frame_idx`.
    pub fn failing_on(mut self, frame_idx: u64) -> Self {
        self.fail_on_frame = Some(frame_idx);
        self
    }

    /// Fail the next `count` calls to `initialize`.
    pub fn failing_initialize(mut self, count: usize) -> Self {
        self.init_failures = count;
        self
    }

    pub fn pairs(&self) -> Vec<(u64, u64)> {
        self.calls.iter().map(|c| (c.previous, c.current)).collect()
    }
}

fn first_pixel(buffer: &VideoBuffer) -> Result<u8, FlowError> {
    match buffer.memory() {
        FrameMemory::Host(data) => Ok(data.first().copied().unwrap_or(0)),
        FrameMemory::Device(matrix) => Ok(matrix.download()?.first().copied().unwrap_or(0)),
    }
}

impl FlowProvider for ScriptedFlowProvider {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn vector_grid_size(&self) -> VectorGridSize {
        self.grid_size
    }

    fn initialize(&mut self, _ctx: &Arc<GpuContext>) -> Result<(), FlowError> {
        if self.init_failures > 0 {
            self.init_failures -= 1;
            return Err(FlowError::Provider {
                provider: self.name(),
                reason: "scripted initialisation failure".into(),
            });
        }
        self.initialized += 1;
        Ok(())
    }

    fn compute(
        &mut self,
        ctx: &Arc<GpuContext>,
        previous: &VideoBuffer,
        current: &VideoBuffer,
    ) -> Result<FlowField, FlowError> {
        self.calls.push(FramePair {
            previous: previous.meta.frame_idx,
            current: current.meta.frame_idx,
            previous_fill: first_pixel(previous)?,
            current_fill: first_pixel(current)?,
        });
        if self.fail_on_frame == Some(current.meta.frame_idx) {
            return Err(FlowError::Provider {
                provider: self.name(),
                reason: format!("scripted failure on frame {}", current.meta.frame_idx),
            });
        }
        let grid = self.grid_size.as_u32();
        let v = MotionVector::new(
            previous.meta.frame_idx as f32,
            current.meta.frame_idx as f32,
        );
        let w = (current.meta.width / grid).max(1);
        let h = (current.meta.height / grid).max(1);
        let vectors = vec![v; w as usize * h as usize];
        FlowField::from_vectors(ctx, w, h, self.grid_size, &vectors)
    }

    fn reset(&mut self) {
        self.resets += 1;
    }
}
