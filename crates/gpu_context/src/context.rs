// context.rs - Device contexts and the scoped push/pop discipline
use crate::backend::ComputeBackend;
use crate::error::Result;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a [`GpuContext`]. Memory allocated under one context is only
/// usable from the same context.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ContextId(u64);

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ctx#{}", self.0)
    }
}

/// A GPU execution context on one device.
///
/// Shared between elements with `Arc`. Nothing here is thread-affine: the
/// context is made current on whichever thread calls [`GpuContext::push`].
pub struct GpuContext {
    id: ContextId,
    backend: Arc<dyn ComputeBackend>,
}

impl GpuContext {
    pub fn new(backend: Arc<dyn ComputeBackend>) -> Arc<Self> {
        let id = ContextId(NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed));
        tracing::debug!(
            context = %id,
            backend = backend.name(),
            device = backend.device_id(),
            "created GPU context"
        );
        Arc::new(Self { id, backend })
    }

    pub fn id(&self) -> ContextId {
        self.id
    }

    pub fn device_id(&self) -> u32 {
        self.backend.device_id()
    }

    pub fn backend(&self) -> &dyn ComputeBackend {
        self.backend.as_ref()
    }

    /// Make this context current until the returned guard is dropped.
    pub fn push(&self) -> Result<ContextGuard<'_>> {
        self.backend.push_context()?;
        Ok(ContextGuard { ctx: self })
    }
}

impl fmt::Debug for GpuContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GpuContext")
            .field("id", &self.id)
            .field("backend", &self.backend.name())
            .field("device", &self.backend.device_id())
            .finish()
    }
}

/// Pops the context on drop, including on early returns and `?` paths.
#[must_use = "the context is popped as soon as the guard is dropped"]
pub struct ContextGuard<'a> {
    ctx: &'a GpuContext,
}

impl ContextGuard<'_> {
    pub fn context(&self) -> &GpuContext {
        self.ctx
    }
}

impl Drop for ContextGuard<'_> {
    fn drop(&mut self) {
        self.ctx.backend.pop_context();
    }
}
