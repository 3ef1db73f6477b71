// cuda.rs - CUDA backend on top of cudarc
use crate::backend::{
    check_host_span, ComputeBackend, FunctionHandle, KernelParams, LaunchDims, ModuleHandle,
    PitchedAlloc,
};
use crate::error::{GpuError, Result};
use cudarc::driver::{CudaDevice, CudaFunction, CudaSlice, DevicePtr, LaunchAsync, LaunchConfig};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

// Row alignment used for pitched allocations (matches the texture alignment
// cuMemAllocPitch picks on current hardware).
const PITCH_ALIGN: usize = 256;

struct CudaModule {
    name: String,
}

#[derive(Default)]
struct CudaState {
    allocations: HashMap<u64, CudaSlice<u8>>,
    modules: HashMap<u64, CudaModule>,
    functions: HashMap<u64, CudaFunction>,
    next_handle: u64,
}

/// Backend driving a real device through cudarc.
///
/// cudarc binds the primary context of the device to the calling thread, so
/// `push_context` binds and `pop_context` leaves the binding in place.
pub struct CudaBackend {
    device: Arc<CudaDevice>,
    device_id: u32,
    state: Mutex<CudaState>,
}

impl CudaBackend {
    pub fn new(device_id: u32) -> Result<Self> {
        let device = CudaDevice::new(device_id as usize).map_err(|e| GpuError::Context {
            device: device_id,
            reason: format!("failed to initialize CUDA device: {e:?}"),
        })?;
        tracing::info!(device = device_id, "CUDA device initialized");
        Ok(Self {
            device,
            device_id,
            state: Mutex::new(CudaState {
                next_handle: 1,
                ..CudaState::default()
            }),
        })
    }

    fn state(&self) -> MutexGuard<'_, CudaState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn copy_error(what: &str, e: impl std::fmt::Debug) -> GpuError {
        GpuError::Copy(format!("{what}: {e:?}"))
    }
}

impl ComputeBackend for CudaBackend {
    fn name(&self) -> &'static str {
        "cuda"
    }

    fn device_id(&self) -> u32 {
        self.device_id
    }

    fn push_context(&self) -> Result<()> {
        self.device.bind_to_thread().map_err(|e| GpuError::Context {
            device: self.device_id,
            reason: format!("{e:?}"),
        })
    }

    fn pop_context(&self) {}

    fn alloc_pitched(
        &self,
        width_bytes: usize,
        height: usize,
        elem_size: usize,
    ) -> Result<PitchedAlloc> {
        let pitch = width_bytes.max(1).div_ceil(PITCH_ALIGN) * PITCH_ALIGN;
        let bytes = pitch * height.max(1);
        let slice = self
            .device
            .alloc_zeros::<u8>(bytes)
            .map_err(|e| GpuError::Allocation {
                bytes,
                reason: format!("{e:?}"),
            })?;
        let ptr = *slice.device_ptr();
        self.state().allocations.insert(ptr, slice);
        Ok(PitchedAlloc {
            ptr,
            pitch,
            width_bytes,
            height,
            elem_size,
        })
    }

    fn free(&self, alloc: &PitchedAlloc) -> Result<()> {
        // Dropping the slice releases the memory.
        self.state()
            .allocations
            .remove(&alloc.ptr)
            .map(|_| ())
            .ok_or_else(|| GpuError::InvalidArgument(format!("double free of {:#x}", alloc.ptr)))
    }

    fn copy_to_device_2d(&self, dst: &PitchedAlloc, src: &[u8], src_pitch: usize) -> Result<()> {
        check_host_span("upload", src.len(), src_pitch, dst.width_bytes, dst.height)?;
        let mut staging = vec![0u8; dst.pitch * dst.height];
        for row in 0..dst.height {
            let from = row * src_pitch;
            let to = row * dst.pitch;
            staging[to..to + dst.width_bytes].copy_from_slice(&src[from..from + dst.width_bytes]);
        }
        let mut state = self.state();
        let slice = state
            .allocations
            .get_mut(&dst.ptr)
            .ok_or_else(|| GpuError::Copy(format!("{:#x} is not a live allocation", dst.ptr)))?;
        self.device
            .htod_sync_copy_into(&staging, slice)
            .map_err(|e| Self::copy_error("host to device copy failed", e))
    }

    fn copy_to_host_2d(&self, src: &PitchedAlloc, dst: &mut [u8], dst_pitch: usize) -> Result<()> {
        check_host_span("download", dst.len(), dst_pitch, src.width_bytes, src.height)?;
        let staged = {
            let state = self.state();
            let slice = state
                .allocations
                .get(&src.ptr)
                .ok_or_else(|| GpuError::Copy(format!("{:#x} is not a live allocation", src.ptr)))?;
            self.device
                .dtoh_sync_copy(slice)
                .map_err(|e| Self::copy_error("device to host copy failed", e))?
        };
        for row in 0..src.height {
            let from = row * src.pitch;
            let to = row * dst_pitch;
            dst[to..to + src.width_bytes].copy_from_slice(&staged[from..from + src.width_bytes]);
        }
        Ok(())
    }

    fn copy_device_2d(&self, src: &PitchedAlloc, dst: &PitchedAlloc) -> Result<()> {
        if src.width_bytes != dst.width_bytes || src.height != dst.height {
            return Err(GpuError::InvalidArgument(format!(
                "device copy between {}x{} and {}x{} allocations",
                src.width_bytes, src.height, dst.width_bytes, dst.height
            )));
        }
        if src.pitch != dst.pitch {
            let mut host = vec![0u8; src.width_bytes * src.height];
            self.copy_to_host_2d(src, &mut host, src.width_bytes)?;
            return self.copy_to_device_2d(dst, &host, src.width_bytes);
        }
        let mut state = self.state();
        let mut target = state
            .allocations
            .remove(&dst.ptr)
            .ok_or_else(|| GpuError::Copy(format!("{:#x} is not a live allocation", dst.ptr)))?;
        let result = match state.allocations.get(&src.ptr) {
            Some(source) => self
                .device
                .dtod_copy(source, &mut target)
                .map_err(|e| Self::copy_error("device to device copy failed", e)),
            None => Err(GpuError::Copy(format!(
                "{:#x} is not a live allocation",
                src.ptr
            ))),
        };
        state.allocations.insert(dst.ptr, target);
        result
    }

    fn compile_module(
        &self,
        module: &str,
        source: &str,
        entry_points: &[&'static str],
    ) -> Result<ModuleHandle> {
        let ptx = cudarc::nvrtc::compile_ptx(source).map_err(|e| GpuError::Compile {
            module: module.to_string(),
            reason: format!("{e:?}"),
        })?;
        self.device
            .load_ptx(ptx, module, entry_points)
            .map_err(|e| GpuError::Compile {
                module: module.to_string(),
                reason: format!("failed to load PTX: {e:?}"),
            })?;
        let mut state = self.state();
        let handle = state.next_handle;
        state.next_handle += 1;
        state.modules.insert(
            handle,
            CudaModule {
                name: module.to_string(),
            },
        );
        tracing::info!(module, device = self.device_id, "CUDA module loaded");
        Ok(ModuleHandle(handle))
    }

    fn get_function(&self, module: ModuleHandle, name: &'static str) -> Result<FunctionHandle> {
        let mut state = self.state();
        let module_name = state
            .modules
            .get(&module.0)
            .map(|m| m.name.clone())
            .ok_or_else(|| GpuError::MissingFunction(name.to_string()))?;
        let func = self
            .device
            .get_func(&module_name, name)
            .ok_or_else(|| GpuError::MissingFunction(name.to_string()))?;
        let id = state.next_handle;
        state.next_handle += 1;
        state.functions.insert(id, func);
        Ok(FunctionHandle { module, name, id })
    }

    fn unload_module(&self, module: ModuleHandle) {
        // cudarc keeps the module resident until the device is dropped; only the
        // handles are released here.
        let mut state = self.state();
        state.modules.remove(&module.0);
        if state.modules.is_empty() {
            state.functions.clear();
        }
    }

    fn launch(
        &self,
        function: &FunctionHandle,
        dims: LaunchDims,
        params: &KernelParams,
    ) -> Result<()> {
        let func = self
            .state()
            .functions
            .get(&function.id)
            .cloned()
            .ok_or_else(|| GpuError::MissingFunction(function.name.to_string()))?;
        let config = LaunchConfig {
            grid_dim: dims.grid,
            block_dim: dims.block,
            shared_mem_bytes: 0,
        };
        let mut raw: Vec<*mut std::ffi::c_void> = params
            .args()
            .iter()
            .map(|arg| arg.as_ptr() as *mut std::ffi::c_void)
            .collect();

        // SAFETY: every pointer in `raw` refers to an argument owned by `params`,
        // which outlives the launch, and each argument is laid out exactly as
        // the kernel signature declares it.
        unsafe {
            func.launch(config, &mut raw).map_err(|e| GpuError::Launch {
                function: function.name.to_string(),
                reason: format!("{e:?}"),
            })?;
        }
        self.synchronize().map_err(|e| GpuError::Launch {
            function: function.name.to_string(),
            reason: e.to_string(),
        })
    }

    fn synchronize(&self) -> Result<()> {
        self.device.synchronize().map_err(|e| GpuError::Launch {
            function: "synchronize".into(),
            reason: format!("{e:?}"),
        })
    }
}
