// backend.rs - The capability set every GPU backend provides
use crate::error::{GpuError, Result};
use bytemuck::{Pod, Zeroable};

/// Raw device address as understood by the backend that produced it.
pub type DevicePtr = u64;

/// A pitched 2D device allocation.
///
/// `width_bytes` is the number of meaningful bytes per row, `pitch` the
/// distance between row starts chosen by the backend (always >= width_bytes).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PitchedAlloc {
    pub ptr: DevicePtr,
    pub pitch: usize,
    pub width_bytes: usize,
    pub height: usize,
    pub elem_size: usize,
}

impl PitchedAlloc {
    pub fn cols(&self) -> usize {
        if self.elem_size == 0 {
            0
        } else {
            self.width_bytes / self.elem_size
        }
    }

    /// Kernel-side view of this allocation.
    pub fn as_kernel_arg(&self) -> PitchedArray {
        PitchedArray {
            device_ptr: self.ptr,
            pitch: self.pitch as u64,
            width: self.width_bytes as u64,
            height: self.height as u64,
            elem_size: self.elem_size as u64,
        }
    }
}

/// Layout-compatible with the `PitchedArray` struct used by the kernels.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct PitchedArray {
    pub device_ptr: u64,
    pub pitch: u64,
    pub width: u64,
    pub height: u64,
    pub elem_size: u64,
}

impl PitchedArray {
    pub fn cols(&self) -> u64 {
        if self.elem_size == 0 {
            0
        } else {
            self.width / self.elem_size
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ModuleHandle(pub u64);

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct FunctionHandle {
    pub module: ModuleHandle,
    pub name: &'static str,
    pub id: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LaunchDims {
    pub grid: (u32, u32, u32),
    pub block: (u32, u32, u32),
}

impl LaunchDims {
    pub fn new_2d(grid: (u32, u32), block: (u32, u32)) -> Self {
        Self {
            grid: (grid.0, grid.1, 1),
            block: (block.0, block.1, 1),
        }
    }

    pub fn threads_per_block(&self) -> u64 {
        u64::from(self.block.0) * u64::from(self.block.1) * u64::from(self.block.2)
    }
}

/// One by-value kernel argument. Stored in 8-byte words so the driver can
/// read any argument up to 8-byte alignment straight out of the buffer.
#[derive(Clone, Debug)]
pub struct KernelArg {
    words: Vec<u64>,
    len: usize,
}

impl KernelArg {
    pub fn bytes(&self) -> &[u8] {
        &bytemuck::cast_slice::<u64, u8>(&self.words)[..self.len]
    }

    pub fn as_ptr(&self) -> *const u8 {
        self.words.as_ptr() as *const u8
    }
}

/// Ordered argument list for a kernel launch.
#[derive(Clone, Debug, Default)]
pub struct KernelParams {
    args: Vec<KernelArg>,
}

impl KernelParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push<T: Pod>(mut self, value: &T) -> Self {
        let raw = bytemuck::bytes_of(value);
        let mut words = vec![0u64; raw.len().div_ceil(8)];
        bytemuck::cast_slice_mut::<u64, u8>(&mut words)[..raw.len()].copy_from_slice(raw);
        self.args.push(KernelArg {
            words,
            len: raw.len(),
        });
        self
    }

    pub fn len(&self) -> usize {
        self.args.len()
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    pub fn args(&self) -> &[KernelArg] {
        &self.args
    }

    /// Read argument `index` back as `T`.
    pub fn get<T: Pod>(&self, index: usize) -> Result<T> {
        let arg = self.args.get(index).ok_or_else(|| {
            GpuError::InvalidArgument(format!("kernel argument {index} is missing"))
        })?;
        if arg.len != std::mem::size_of::<T>() {
            return Err(GpuError::InvalidArgument(format!(
                "kernel argument {index} is {} bytes, expected {}",
                arg.len,
                std::mem::size_of::<T>()
            )));
        }
        Ok(bytemuck::pod_read_unaligned(arg.bytes()))
    }
}

/// Minimal GPU capability set consumed by the processing elements.
///
/// Every method that touches device memory or kernels expects the context
/// to be current on the calling thread; callers hold a
/// [`crate::ContextGuard`] for the duration.
pub trait ComputeBackend: Send + Sync {
    fn name(&self) -> &'static str;

    fn device_id(&self) -> u32;

    fn push_context(&self) -> Result<()>;

    fn pop_context(&self);

    fn alloc_pitched(&self, width_bytes: usize, height: usize, elem_size: usize)
        -> Result<PitchedAlloc>;

    fn free(&self, alloc: &PitchedAlloc) -> Result<()>;

    /// Copy `height` rows of `dst.width_bytes` from host memory laid out with
    /// `src_pitch` into the device allocation.
    fn copy_to_device_2d(&self, dst: &PitchedAlloc, src: &[u8], src_pitch: usize) -> Result<()>;

    /// Copy the allocation into host memory laid out with `dst_pitch`.
    fn copy_to_host_2d(&self, src: &PitchedAlloc, dst: &mut [u8], dst_pitch: usize) -> Result<()>;

    fn copy_device_2d(&self, src: &PitchedAlloc, dst: &PitchedAlloc) -> Result<()>;

    fn compile_module(
        &self,
        module: &str,
        source: &str,
        entry_points: &[&'static str],
    ) -> Result<ModuleHandle>;

    fn get_function(&self, module: ModuleHandle, name: &'static str) -> Result<FunctionHandle>;

    fn unload_module(&self, module: ModuleHandle);

    /// Launch and wait for completion.
    fn launch(&self, function: &FunctionHandle, dims: LaunchDims, params: &KernelParams)
        -> Result<()>;

    fn synchronize(&self) -> Result<()>;
}

pub(crate) fn check_host_span(
    what: &str,
    host_len: usize,
    host_pitch: usize,
    width_bytes: usize,
    height: usize,
) -> Result<()> {
    if height == 0 {
        return Ok(());
    }
    if host_pitch < width_bytes {
        return Err(GpuError::Copy(format!(
            "{what}: host pitch {host_pitch} is smaller than the row width {width_bytes}"
        )));
    }
    let needed = host_pitch * (height - 1) + width_bytes;
    if host_len < needed {
        return Err(GpuError::Copy(format!(
            "{what}: host buffer holds {host_len} bytes, {needed} required"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn params_round_trip_struct_arguments() {
        let array = PitchedArray {
            device_ptr: 0x1000,
            pitch: 512,
            width: 480,
            height: 20,
            elem_size: 24,
        };
        let params = KernelParams::new().push(&array).push(&3i32).push(&[1.5f32, 2.0f32]);

        assert_eq!(params.len(), 3);
        assert_eq!(params.get::<PitchedArray>(0).unwrap(), array);
        assert_eq!(params.get::<i32>(1).unwrap(), 3);
        assert_eq!(params.get::<[f32; 2]>(2).unwrap(), [1.5, 2.0]);
        assert!(params.get::<u64>(1).is_err());
        assert!(params.get::<i32>(7).is_err());
    }

    #[test]
    fn pitched_array_matches_kernel_layout() {
        assert_eq!(std::mem::size_of::<PitchedArray>(), 40);
        let alloc = PitchedAlloc {
            ptr: 7,
            pitch: 256,
            width_bytes: 96,
            height: 4,
            elem_size: 24,
        };
        assert_eq!(alloc.cols(), 4);
        assert_eq!(alloc.as_kernel_arg().cols(), 4);
    }

    #[test]
    fn host_span_validation() {
        assert!(check_host_span("t", 100, 10, 10, 10).is_ok());
        assert!(check_host_span("t", 99, 10, 10, 10).is_err());
        assert!(check_host_span("t", 100, 8, 10, 10).is_err());
        assert!(check_host_span("t", 0, 0, 10, 0).is_ok());
    }
}
