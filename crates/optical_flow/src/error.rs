use gpu_context::GpuError;

#[derive(Debug, thiserror::Error)]
pub enum FlowError {
    #[error("invalid optical flow configuration: {0}")]
    Configuration(String),

    #[error("GPU context unavailable: {0}")]
    Context(String),

    #[error("GPU allocation failed: {0}")]
    Allocation(String),

    #[error("GPU copy failed: {0}")]
    Copy(String),

    #[error("unsupported input: {0}")]
    UnsupportedInput(String),

    #[error("invalid flow field: {0}")]
    InvalidField(String),

    #[error("flow provider `{provider}` failed: {reason}")]
    Provider {
        provider: &'static str,
        reason: String,
    },
}

impl From<GpuError> for FlowError {
    fn from(e: GpuError) -> Self {
        match e {
            GpuError::Context { .. } => FlowError::Context(e.to_string()),
            GpuError::Allocation { .. } => FlowError::Allocation(e.to_string()),
            GpuError::Copy(_) => FlowError::Copy(e.to_string()),
            GpuError::InvalidArgument(_) => FlowError::InvalidField(e.to_string()),
            GpuError::Compile { .. }
            | GpuError::MissingFunction(_)
            | GpuError::Launch { .. }
            | GpuError::Unavailable(_) => FlowError::Provider {
                provider: "backend",
                reason: e.to_string(),
            },
        }
    }
}
