// host.rs - Host reference backend
//
// Simulates device memory in host RAM and runs kernels as registered Rust
// functions with the same grid/block semantics as the CUDA versions. Used by
// every default test and by the runner when no GPU is present.
use crate::backend::{
    check_host_span, ComputeBackend, DevicePtr, FunctionHandle, KernelParams, LaunchDims,
    ModuleHandle, PitchedAlloc,
};
use crate::error::{GpuError, Result};
use bytemuck::Pod;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, OnceLock, RwLock};

const HOST_PITCH_ALIGN: usize = 64;
const HOST_PTR_BASE: u64 = 0x1000_0000;
const HOST_PTR_GAP: u64 = 0x1000;
const MAX_THREADS_PER_BLOCK: u64 = 1024;

/// Host implementation of a kernel entry point.
pub type HostKernelFn = fn(&mut HostMemory, LaunchDims, &KernelParams) -> Result<()>;

fn host_kernels() -> &'static RwLock<HashMap<&'static str, HostKernelFn>> {
    static KERNELS: OnceLock<RwLock<HashMap<&'static str, HostKernelFn>>> = OnceLock::new();
    KERNELS.get_or_init(|| RwLock::new(HashMap::new()))
}

/// Make `kernel` available to every [`HostBackend`] under `name`. A module
/// compiled on the host backend can only resolve entry points registered here.
pub fn register_host_kernel(name: &'static str, kernel: HostKernelFn) {
    let mut table = host_kernels().write().unwrap_or_else(|e| e.into_inner());
    table.insert(name, kernel);
}

fn lookup_host_kernel(name: &str) -> Option<HostKernelFn> {
    let table = host_kernels().read().unwrap_or_else(|e| e.into_inner());
    table.get(name).copied()
}

/// Simulated device memory, addressed by [`DevicePtr`].
#[derive(Debug, Default)]
pub struct HostMemory {
    allocations: BTreeMap<u64, Vec<u8>>,
}

impl HostMemory {
    fn locate(&self, ptr: DevicePtr, offset: usize, len: usize) -> Result<(u64, usize)> {
        let (&base, bytes) = self
            .allocations
            .range(..=ptr)
            .next_back()
            .ok_or_else(|| GpuError::InvalidArgument(format!("{ptr:#x} is not device memory")))?;
        let start = (ptr - base) as usize + offset;
        if start + len > bytes.len() {
            return Err(GpuError::InvalidArgument(format!(
                "access of {len} bytes at {ptr:#x}+{offset} is out of bounds"
            )));
        }
        Ok((base, start))
    }

    pub fn read<T: Pod>(&self, ptr: DevicePtr, offset: usize) -> Result<T> {
        let len = std::mem::size_of::<T>();
        let (base, start) = self.locate(ptr, offset, len)?;
        let bytes = &self.allocations[&base][start..start + len];
        Ok(bytemuck::pod_read_unaligned(bytes))
    }

    pub fn write<T: Pod>(&mut self, ptr: DevicePtr, offset: usize, value: &T) -> Result<()> {
        let len = std::mem::size_of::<T>();
        let (base, start) = self.locate(ptr, offset, len)?;
        if let Some(bytes) = self.allocations.get_mut(&base) {
            bytes[start..start + len].copy_from_slice(bytemuck::bytes_of(value));
        }
        Ok(())
    }

    fn rows(&self, alloc: &PitchedAlloc) -> Result<&Vec<u8>> {
        self.allocations
            .get(&alloc.ptr)
            .ok_or_else(|| GpuError::Copy(format!("{:#x} is not a live allocation", alloc.ptr)))
    }

    fn rows_mut(&mut self, alloc: &PitchedAlloc) -> Result<&mut Vec<u8>> {
        self.allocations
            .get_mut(&alloc.ptr)
            .ok_or_else(|| GpuError::Copy(format!("{:#x} is not a live allocation", alloc.ptr)))
    }
}

/// Failures the host backend should simulate.
#[derive(Clone, Debug, Default)]
pub struct FaultPlan {
    pub fail_context_push: bool,
    /// Fail every allocation once this many have succeeded.
    pub fail_allocation_after: Option<usize>,
    pub fail_copy: bool,
    pub fail_compile: bool,
    pub fail_launch_of: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LaunchRecord {
    pub function: &'static str,
    pub dims: LaunchDims,
}

#[derive(Debug)]
struct HostModule {
    name: String,
    entry_points: Vec<&'static str>,
}

#[derive(Debug)]
struct HostState {
    memory: HostMemory,
    next_ptr: u64,
    next_handle: u64,
    modules: HashMap<u64, HostModule>,
    context_depth: usize,
    allocations_made: usize,
    faults: FaultPlan,
    launches: Vec<LaunchRecord>,
}

/// Reference backend that never needs a GPU.
#[derive(Debug)]
pub struct HostBackend {
    device_id: u32,
    state: Mutex<HostState>,
}

impl HostBackend {
    pub fn new(device_id: u32) -> Self {
        Self {
            device_id,
            state: Mutex::new(HostState {
                memory: HostMemory::default(),
                next_ptr: HOST_PTR_BASE,
                next_handle: 1,
                modules: HashMap::new(),
                context_depth: 0,
                allocations_made: 0,
                faults: FaultPlan::default(),
                launches: Vec::new(),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, HostState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_faults(&self, faults: FaultPlan) {
        self.state().faults = faults;
    }

    pub fn clear_faults(&self) {
        self.state().faults = FaultPlan::default();
    }

    pub fn live_allocations(&self) -> usize {
        self.state().memory.allocations.len()
    }

    pub fn context_depth(&self) -> usize {
        self.state().context_depth
    }

    pub fn loaded_modules(&self) -> usize {
        self.state().modules.len()
    }

    pub fn launches(&self) -> Vec<LaunchRecord> {
        self.state().launches.clone()
    }
}

fn round_up(value: usize, align: usize) -> usize {
    value.div_ceil(align) * align
}

fn declares_kernel(source: &str, name: &str) -> bool {
    let tokens: Vec<&str> = source
        .split(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .filter(|t| !t.is_empty())
        .collect();
    tokens
        .windows(3)
        .any(|w| w[0] == "__global__" && w[1] == "void" && w[2] == name)
}

impl ComputeBackend for HostBackend {
    fn name(&self) -> &'static str {
        "host"
    }

    fn device_id(&self) -> u32 {
        self.device_id
    }

    fn push_context(&self) -> Result<()> {
        let mut state = self.state();
        if state.faults.fail_context_push {
            return Err(GpuError::Context {
                device: self.device_id,
                reason: "simulated context failure".into(),
            });
        }
        state.context_depth += 1;
        Ok(())
    }

    fn pop_context(&self) {
        let mut state = self.state();
        state.context_depth = state.context_depth.saturating_sub(1);
    }

    fn alloc_pitched(
        &self,
        width_bytes: usize,
        height: usize,
        elem_size: usize,
    ) -> Result<PitchedAlloc> {
        let mut state = self.state();
        let pitch = round_up(width_bytes.max(1), HOST_PITCH_ALIGN);
        let bytes = pitch * height;
        if let Some(limit) = state.faults.fail_allocation_after {
            if state.allocations_made >= limit {
                return Err(GpuError::Allocation {
                    bytes,
                    reason: "simulated out of memory".into(),
                });
            }
        }
        let ptr = state.next_ptr;
        state.next_ptr += round_up(bytes.max(1), HOST_PTR_GAP as usize) as u64 + HOST_PTR_GAP;
        state.allocations_made += 1;
        state.memory.allocations.insert(ptr, vec![0u8; bytes]);
        Ok(PitchedAlloc {
            ptr,
            pitch,
            width_bytes,
            height,
            elem_size,
        })
    }

    fn free(&self, alloc: &PitchedAlloc) -> Result<()> {
        self.state()
            .memory
            .allocations
            .remove(&alloc.ptr)
            .map(|_| ())
            .ok_or_else(|| GpuError::InvalidArgument(format!("double free of {:#x}", alloc.ptr)))
    }

    fn copy_to_device_2d(&self, dst: &PitchedAlloc, src: &[u8], src_pitch: usize) -> Result<()> {
        check_host_span("upload", src.len(), src_pitch, dst.width_bytes, dst.height)?;
        let mut state = self.state();
        if state.faults.fail_copy {
            return Err(GpuError::Copy("simulated upload failure".into()));
        }
        let rows = state.memory.rows_mut(dst)?;
        for row in 0..dst.height {
            let from = row * src_pitch;
            let to = row * dst.pitch;
            rows[to..to + dst.width_bytes].copy_from_slice(&src[from..from + dst.width_bytes]);
        }
        Ok(())
    }

    fn copy_to_host_2d(&self, src: &PitchedAlloc, dst: &mut [u8], dst_pitch: usize) -> Result<()> {
        check_host_span("download", dst.len(), dst_pitch, src.width_bytes, src.height)?;
        let state = self.state();
        if state.faults.fail_copy {
            return Err(GpuError::Copy("simulated download failure".into()));
        }
        let rows = state.memory.rows(src)?;
        for row in 0..src.height {
            let from = row * src.pitch;
            let to = row * dst_pitch;
            dst[to..to + src.width_bytes].copy_from_slice(&rows[from..from + src.width_bytes]);
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
        let mut state = self.state();
        if state.faults.fail_copy {
            return Err(GpuError::Copy("simulated device copy failure".into()));
        }
        let staged = state.memory.rows(src)?.clone();
        let rows = state.memory.rows_mut(dst)?;
        for row in 0..src.height {
            let from = row * src.pitch;
            let to = row * dst.pitch;
            rows[to..to + src.width_bytes].copy_from_slice(&staged[from..from + src.width_bytes]);
        }
        Ok(())
    }

    fn compile_module(
        &self,
        module: &str,
        source: &str,
        entry_points: &[&'static str],
    ) -> Result<ModuleHandle> {
        let mut state = self.state();
        if state.faults.fail_compile {
            return Err(GpuError::Compile {
                module: module.to_string(),
                reason: "simulated compiler failure".into(),
            });
        }
        for name in entry_points {
            if !declares_kernel(source, name) {
                return Err(GpuError::Compile {
                    module: module.to_string(),
                    reason: format!("source does not declare `__global__ void {name}`"),
                });
            }
            if lookup_host_kernel(name).is_none() {
                return Err(GpuError::Compile {
                    module: module.to_string(),
                    reason: format!("no host implementation registered for `{name}`"),
                });
            }
        }
        let handle = state.next_handle;
        state.next_handle += 1;
        state.modules.insert(
            handle,
            HostModule {
                name: module.to_string(),
                entry_points: entry_points.to_vec(),
            },
        );
        tracing::debug!(module, entry_points = entry_points.len(), "host module loaded");
        Ok(ModuleHandle(handle))
    }

    fn get_function(&self, module: ModuleHandle, name: &'static str) -> Result<FunctionHandle> {
        let mut state = self.state();
        let known = state
            .modules
            .get(&module.0)
            .map(|m| m.entry_points.contains(&name))
            .unwrap_or(false);
        if !known {
            return Err(GpuError::MissingFunction(name.to_string()));
        }
        let id = state.next_handle;
        state.next_handle += 1;
        Ok(FunctionHandle { module, name, id })
    }

    fn unload_module(&self, module: ModuleHandle) {
        if let Some(m) = self.state().modules.remove(&module.0) {
            tracing::debug!(module = %m.name, "host module unloaded");
        }
    }

    fn launch(
        &self,
        function: &FunctionHandle,
        dims: LaunchDims,
        params: &KernelParams,
    ) -> Result<()> {
        let mut state = self.state();
        let launch_error = |reason: &str| GpuError::Launch {
            function: function.name.to_string(),
            reason: reason.to_string(),
        };
        if !state.modules.contains_key(&function.module.0) {
            return Err(launch_error("module is not loaded"));
        }
        if state.faults.fail_launch_of.as_deref() == Some(function.name) {
            return Err(launch_error("simulated launch failure"));
        }
        let threads = dims.threads_per_block();
        if threads == 0 || dims.grid.0 == 0 || dims.grid.1 == 0 || dims.grid.2 == 0 {
            return Err(launch_error("empty launch configuration"));
        }
        if threads > MAX_THREADS_PER_BLOCK {
            return Err(launch_error("too many threads per block"));
        }
        let kernel = lookup_host_kernel(function.name)
            .ok_or_else(|| GpuError::MissingFunction(function.name.to_string()))?;
        state.launches.push(LaunchRecord {
            function: function.name,
            dims,
        });
        kernel(&mut state.memory, dims, params)
    }

    fn synchronize(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fill_kernel(memory: &mut HostMemory, dims: LaunchDims, params: &KernelParams) -> Result<()> {
        let target: crate::PitchedArray = params.get(0)?;
        let value: u32 = params.get(1)?;
        for row in 0..dims.grid.1 as u64 {
            for col in 0..target.cols() {
                memory.write(target.device_ptr, (row * target.pitch + col * 4) as usize, &value)?;
            }
        }
        Ok(())
    }

    const FILL_SOURCE: &str = r#"
        extern "C" __global__ void host_test_fill(PitchedArray target, unsigned int value) {}
    "#;

    #[test]
    fn kernel_declaration_scan() {
        assert!(declares_kernel(FILL_SOURCE, "host_test_fill"));
        assert!(!declares_kernel(FILL_SOURCE, "host_test_missing"));
        assert!(!declares_kernel("void host_test_fill()", "host_test_fill"));
    }

    #[test]
    fn compile_launch_and_read_back() {
        register_host_kernel("host_test_fill", fill_kernel);
        let host = HostBackend::new(0);
        let alloc = host.alloc_pitched(12, 2, 4).unwrap();
        assert_eq!(alloc.pitch, HOST_PITCH_ALIGN);

        let module = host
            .compile_module("fill", FILL_SOURCE, &["host_test_fill"])
            .unwrap();
        let func = host.get_function(module, "host_test_fill").unwrap();
        let params = KernelParams::new().push(&alloc.as_kernel_arg()).push(&9u32);
        host.launch(&func, LaunchDims::new_2d((1, 2), (3, 1)), &params)
            .unwrap();

        let mut out = vec![0u8; 24];
        host.copy_to_host_2d(&alloc, &mut out, 12).unwrap();
        let words: &[u32] = bytemuck::cast_slice(&out);
        assert_eq!(words, &[9; 6]);
        assert_eq!(host.launches().len(), 1);

        host.free(&alloc).unwrap();
        assert_eq!(host.live_allocations(), 0);
        assert!(host.free(&alloc).is_err());
    }

    #[test]
    fn compile_rejects_undeclared_entry_points() {
        let host = HostBackend::new(0);
        let err = host
            .compile_module("fill", "__global__ void other() {}", &["host_test_fill"])
            .unwrap_err();
        assert!(matches!(err, GpuError::Compile { .. }));
    }

    #[test]
    fn oversized_blocks_fail_to_launch() {
        register_host_kernel("host_test_fill", fill_kernel);
        let host = HostBackend::new(0);
        let module = host
            .compile_module("fill", FILL_SOURCE, &["host_test_fill"])
            .unwrap();
        let func = host.get_function(module, "host_test_fill").unwrap();
        let err = host
            .launch(&func, LaunchDims::new_2d((1, 1), (64, 32)), &KernelParams::new())
            .unwrap_err();
        assert!(matches!(err, GpuError::Launch { .. }));

        host.unload_module(module);
        assert!(host
            .launch(&func, LaunchDims::new_2d((1, 1), (1, 1)), &KernelParams::new())
            .is_err());
    }

    #[test]
    fn faults_are_injected() {
        let host = HostBackend::new(3);
        host.set_faults(FaultPlan {
            fail_allocation_after: Some(1),
            ..FaultPlan::default()
        });
        assert!(host.alloc_pitched(16, 1, 4).is_ok());
        assert!(matches!(
            host.alloc_pitched(16, 1, 4),
            Err(GpuError::Allocation { .. })
        ));

        host.set_faults(FaultPlan {
            fail_context_push: true,
            ..FaultPlan::default()
        });
        assert!(matches!(
            host.push_context(),
            Err(GpuError::Context { device: 3, .. })
        ));
        host.clear_faults();
        host.push_context().unwrap();
        assert_eq!(host.context_depth(), 1);
        host.pop_context();
        assert_eq!(host.context_depth(), 0);
    }
}
