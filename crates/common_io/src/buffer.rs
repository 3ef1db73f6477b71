// buffer.rs - Frames moving through the pipeline
use crate::meta::{BufferMeta, MetaTable};
use crate::{FrameMeta, MemLoc};
use gpu_context::{DeviceMatrix, GpuContext, GpuError};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_BUFFER_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(u64);

impl BufferId {
    fn next() -> Self {
        BufferId(NEXT_BUFFER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for BufferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "buf#{}", self.0)
    }
}

/// Pixel storage behind a buffer.
#[derive(Clone, Debug)]
pub enum FrameMemory {
    Host(Arc<Vec<u8>>),
    Device(Arc<DeviceMatrix>),
}

impl FrameMemory {
    pub fn loc(&self) -> MemLoc {
        match self {
            FrameMemory::Host(_) => MemLoc::Cpu,
            FrameMemory::Device(m) => MemLoc::Gpu {
                device: m.context().device_id(),
                context: m.context().id(),
            },
        }
    }

    pub fn device(&self) -> Option<&Arc<DeviceMatrix>> {
        match self {
            FrameMemory::Device(m) => Some(m),
            FrameMemory::Host(_) => None,
        }
    }
}

/// A frame plus its attached metadata.
///
/// Buffers are single-owner. Branching a stream goes through
/// [`VideoBuffer::duplicate`], which shares the pixels and applies each
/// metadata kind's branch policy.
pub struct VideoBuffer {
    id: BufferId,
    pub meta: FrameMeta,
    memory: FrameMemory,
    attached: MetaTable,
}

impl VideoBuffer {
    pub fn new(meta: FrameMeta, memory: FrameMemory) -> Self {
        Self {
            id: BufferId::next(),
            meta,
            memory,
            attached: MetaTable::new(),
        }
    }

    pub fn id(&self) -> BufferId {
        self.id
    }

    pub fn memory(&self) -> &FrameMemory {
        &self.memory
    }

    pub fn loc(&self) -> MemLoc {
        self.memory.loc()
    }

    /// Device memory of this buffer, if it is usable from `ctx`.
    pub fn device_memory_for(&self, ctx: &GpuContext) -> Option<&Arc<DeviceMatrix>> {
        self.memory
            .device()
            .filter(|m| m.is_accessible_from(ctx))
    }

    /// True when no other buffer shares this buffer's pixels.
    pub fn is_writable(&self) -> bool {
        match &self.memory {
            FrameMemory::Host(data) => Arc::strong_count(data) == 1,
            FrameMemory::Device(matrix) => Arc::strong_count(matrix) == 1,
        }
    }

    pub fn device_memory_mut(&mut self) -> Option<&mut DeviceMatrix> {
        match &mut self.memory {
            FrameMemory::Device(matrix) => Arc::get_mut(matrix),
            FrameMemory::Host(_) => None,
        }
    }

    pub fn attach<T: BufferMeta>(&mut self, meta: T) -> Arc<T> {
        let meta = Arc::new(meta);
        self.attached.insert(Arc::clone(&meta));
        meta
    }

    pub fn attach_shared<T: BufferMeta>(&mut self, meta: Arc<T>) {
        self.attached.insert(meta);
    }

    pub fn attached<T: BufferMeta>(&self) -> Option<&Arc<T>> {
        self.attached.get::<T>()
    }

    pub fn detach<T: BufferMeta>(&mut self) -> Option<Arc<T>> {
        self.attached.remove::<T>()
    }

    pub fn metas(&self) -> &MetaTable {
        &self.attached
    }

    /// Duplicate onto another branch: pixels are shared, metadata follows its
    /// kind's branch policy. Entries that cannot be branched are dropped from
    /// the duplicate.
    pub fn duplicate(&self) -> VideoBuffer {
        let (attached, errors) = self.attached.branch();
        for e in errors {
            tracing::warn!(buffer = %self.id, error = %e, "metadata dropped from duplicated buffer");
        }
        VideoBuffer {
            id: BufferId::next(),
            meta: self.meta.clone(),
            memory: self.memory.clone(),
            attached,
        }
    }

    /// Independent copy of the frame pixels without any metadata.
    pub fn copy_frame(&self) -> Result<VideoBuffer, GpuError> {
        let memory = match &self.memory {
            FrameMemory::Host(data) => FrameMemory::Host(Arc::new(data.as_ref().clone())),
            FrameMemory::Device(matrix) => FrameMemory::Device(Arc::new(matrix.deep_copy()?)),
        };
        Ok(VideoBuffer::new(self.meta.clone(), memory))
    }
}

impl fmt::Debug for VideoBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VideoBuffer")
            .field("id", &self.id)
            .field("frame_idx", &self.meta.frame_idx)
            .field("loc", &self.memory.loc())
            .field("metas", &self.attached)
            .finish()
    }
}
