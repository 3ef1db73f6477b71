//! GPU compute backend seam.
//!
//! Elements never talk to a driver directly. They hold an `Arc<GpuContext>`,
//! push it for the duration of any GPU work and go through the
//! [`ComputeBackend`] capability set. Two backends exist: [`HostBackend`]
//! (always built, simulated device memory) and `CudaBackend` (cudarc, behind
//! the `gpu` feature).
mod backend;
mod context;
mod error;
mod host;
mod matrix;

#[cfg(feature = "gpu")]
mod cuda;

pub use backend::{
    ComputeBackend, DevicePtr, FunctionHandle, KernelArg, KernelParams, LaunchDims, ModuleHandle,
    PitchedAlloc, PitchedArray,
};
pub use context::{ContextGuard, ContextId, GpuContext};
pub use error::{GpuError, Result};
pub use host::{register_host_kernel, FaultPlan, HostBackend, HostKernelFn, HostMemory, LaunchRecord};
pub use matrix::DeviceMatrix;

#[cfg(feature = "gpu")]
pub use cuda::CudaBackend;

use serde::Deserialize;
use std::sync::Arc;

/// Which backend an element should run on.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Host,
    Cuda,
}

/// Resolve a configured device id; −1 means "any device" and selects 0.
pub fn resolve_device_id(device_id: i32) -> Result<u32> {
    match device_id {
        -1 => Ok(0),
        id if id >= 0 => Ok(id as u32),
        id => Err(GpuError::InvalidArgument(format!("invalid device id {id}"))),
    }
}

/// Open a context on the requested backend.
pub fn open(kind: BackendKind, device_id: i32) -> Result<Arc<GpuContext>> {
    let device = resolve_device_id(device_id)?;
    match kind {
        BackendKind::Host => Ok(GpuContext::new(Arc::new(HostBackend::new(device)))),
        BackendKind::Cuda => open_cuda(device),
    }
}

#[cfg(feature = "gpu")]
fn open_cuda(device: u32) -> Result<Arc<GpuContext>> {
    Ok(GpuContext::new(Arc::new(CudaBackend::new(device)?)))
}

#[cfg(not(feature = "gpu"))]
fn open_cuda(_device: u32) -> Result<Arc<GpuContext>> {
    Err(GpuError::Unavailable(
        "built without the `gpu` feature".to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_id_resolution() {
        assert_eq!(resolve_device_id(-1).unwrap(), 0);
        assert_eq!(resolve_device_id(2).unwrap(), 2);
        assert!(resolve_device_id(-2).is_err());
    }

    #[test]
    fn open_host_context() {
        let ctx = open(BackendKind::Host, 1).unwrap();
        assert_eq!(ctx.device_id(), 1);
        assert_eq!(ctx.backend().name(), "host");
    }

    #[cfg(not(feature = "gpu"))]
    #[test]
    fn cuda_requires_feature() {
        assert!(matches!(
            open(BackendKind::Cuda, 0),
            Err(GpuError::Unavailable(_))
        ));
    }
}
