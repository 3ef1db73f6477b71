mod buffer;
mod meta;

pub use buffer::{BufferId, FrameMemory, VideoBuffer};
pub use meta::{BranchPolicy, BufferMeta, MetaError, MetaTable};

use gpu_context::ContextId;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PixelFormat {
    Gray8,
    NV12,
    YUV422_8,
    BGRA8,
}

impl PixelFormat {
    /// Bytes per pixel of the first plane.
    pub fn luma_bytes_per_pixel(&self) -> u32 {
        match self {
            PixelFormat::Gray8 | PixelFormat::NV12 => 1,
            PixelFormat::YUV422_8 => 2,
            PixelFormat::BGRA8 => 4,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ColorSpace {
    BT601,
    BT709,
    BT2020,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MemLoc {
    Cpu,
    Gpu { device: u32, context: ContextId },
}

#[derive(Clone, Debug)]
pub struct FrameMeta {
    pub source_id: u32,
    pub width: u32,
    pub height: u32,
    pub pixfmt: PixelFormat,
    pub colorspace: ColorSpace,
    pub frame_idx: u64,
    pub pts_ns: u64,
    /// Capture-clock timestamp, when the source provides one.
    pub reference_ts_ns: Option<u64>,
    pub stride_bytes: u32,
}

impl FrameMeta {
    pub fn timestamp_ns(&self) -> u64 {
        self.reference_ts_ns.unwrap_or(self.pts_ns)
    }
}

/// A stream transform: started once, fed frames in order, stopped.
///
/// `start`/`stop` report setup failures, which are fatal to the element.
/// Per-frame failures are handled inside `process`.
pub trait Stage<I, O> {
    type Error: std::error::Error + Send + Sync + 'static;

    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    fn start(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }

    fn stop(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }

    fn process(&mut self, input: I) -> O;
}

#[cfg(test)]
mod tests {
    use super::*;
    use gpu_context::{DeviceMatrix, GpuContext, HostBackend};
    use std::sync::Arc;

    #[derive(Debug)]
    struct Tag;

    impl BufferMeta for Tag {
        const KIND: &'static str = "tag";
        const BRANCH_POLICY: BranchPolicy = BranchPolicy::Share;
    }

    fn frame_meta(w: u32, h: u32) -> FrameMeta {
        FrameMeta {
            source_id: 0,
            width: w,
            height: h,
            pixfmt: PixelFormat::Gray8,
            colorspace: ColorSpace::BT709,
            frame_idx: 0,
            pts_ns: 40,
            reference_ts_ns: None,
            stride_bytes: w,
        }
    }

    #[test]
    fn timestamp_prefers_reference_clock() {
        let mut meta = frame_meta(4, 4);
        assert_eq!(meta.timestamp_ns(), 40);
        meta.reference_ts_ns = Some(7);
        assert_eq!(meta.timestamp_ns(), 7);
    }

    #[test]
    fn duplicate_shares_pixels_and_gets_new_identity() {
        let ctx = GpuContext::new(Arc::new(HostBackend::new(0)));
        let matrix = DeviceMatrix::upload(&ctx, 4, 2, 1, &[9; 8]).unwrap();
        let mut buffer = VideoBuffer::new(frame_meta(4, 2), FrameMemory::Device(Arc::new(matrix)));
        buffer.attach(Tag);
        assert!(buffer.is_writable());

        let dup = buffer.duplicate();
        assert_ne!(dup.id(), buffer.id());
        assert!(!buffer.is_writable());
        assert!(Arc::ptr_eq(
            dup.attached::<Tag>().unwrap(),
            buffer.attached::<Tag>().unwrap()
        ));
        assert!(matches!(dup.loc(), MemLoc::Gpu { device: 0, .. }));
    }

    #[test]
    fn copy_frame_is_private_and_bare() {
        let ctx = GpuContext::new(Arc::new(HostBackend::new(0)));
        let matrix = DeviceMatrix::upload(&ctx, 4, 1, 1, &[1, 2, 3, 4]).unwrap();
        let mut buffer = VideoBuffer::new(frame_meta(4, 1), FrameMemory::Device(Arc::new(matrix)));
        buffer.attach(Tag);

        let copy = buffer.copy_frame().unwrap();
        assert!(buffer.is_writable());
        assert!(copy.is_writable());
        assert!(copy.metas().is_empty());
        let pixels = copy.memory().device().unwrap().download().unwrap();
        assert_eq!(pixels, vec![1, 2, 3, 4]);
        assert!(buffer.device_memory_for(&ctx).is_some());
    }

    #[test]
    fn host_memory_is_not_device_accessible() {
        let ctx = GpuContext::new(Arc::new(HostBackend::new(0)));
        let buffer = VideoBuffer::new(frame_meta(2, 2), FrameMemory::Host(Arc::new(vec![0; 4])));
        assert_eq!(buffer.loc(), MemLoc::Cpu);
        assert!(buffer.device_memory_for(&ctx).is_none());
    }
}
