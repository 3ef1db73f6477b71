// error.rs - Backend-level failures
use thiserror::Error;

/// Failures reported by a [`crate::ComputeBackend`].
///
/// These are deliberately coarse; the element crates map them onto their own
/// taxonomies (see `motion_features::ExtractError`).
#[derive(Debug, Error)]
pub enum GpuError {
    #[error("could not make the context of device {device} current: {reason}")]
    Context { device: u32, reason: String },

    #[error("could not allocate {bytes} bytes of device memory: {reason}")]
    Allocation { bytes: usize, reason: String },

    #[error("memory copy failed: {0}")]
    Copy(String),

    #[error("kernel module `{module}` failed to compile: {reason}")]
    Compile { module: String, reason: String },

    #[error("kernel function `{0}` is not available in the loaded module")]
    MissingFunction(String),

    #[error("launch of kernel `{function}` failed: {reason}")]
    Launch { function: String, reason: String },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("backend unavailable: {0}")]
    Unavailable(String),
}

pub type Result<T> = std::result::Result<T, GpuError>;
