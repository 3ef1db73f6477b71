use gpu_context::GpuError;

#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error("device context cannot be made current: {0}")]
    Context(String),

    #[error("GPU allocation failed: {0}")]
    Allocation(String),

    #[error("kernel compilation failed: {0}")]
    KernelCompile(String),

    #[error("kernel launch failed: {0}")]
    KernelLaunch(String),

    #[error("GPU copy failed: {0}")]
    Copy(String),

    #[error("unsupported input: {0}")]
    UnsupportedInput(String),
}

impl ExtractError {
    /// Setup-phase errors halt the element; everything else only costs the
    /// current frame its metadata.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ExtractError::Configuration(_) | ExtractError::KernelCompile(_)
        )
    }
}

impl From<GpuError> for ExtractError {
    fn from(e: GpuError) -> Self {
        let message = e.to_string();
        match e {
            GpuError::Context { .. } | GpuError::Unavailable(_) => ExtractError::Context(message),
            GpuError::Allocation { .. } => ExtractError::Allocation(message),
            GpuError::Copy(_) => ExtractError::Copy(message),
            GpuError::Compile { .. } | GpuError::MissingFunction(_) => {
                ExtractError::KernelCompile(message)
            }
            GpuError::Launch { .. } => ExtractError::KernelLaunch(message),
            GpuError::InvalidArgument(_) => ExtractError::Configuration(message),
        }
    }
}
