// field.rs - GPU-resident flow fields
use crate::error::FlowError;
use crate::vector::{MotionVector, VectorGridSize};
use gpu_context::{DeviceMatrix, GpuContext};
use std::sync::Arc;

/// Dense flow output of one frame pair.
///
/// `width × height` vectors of `[i16; 2]` in S10.5 fixed point, each
/// standing for a `grid_size × grid_size` block of source pixels.
#[derive(Debug)]
pub struct FlowField {
    vectors: DeviceMatrix,
    width: u32,
    height: u32,
    grid_size: VectorGridSize,
}

impl FlowField {
    pub const ELEM_SIZE: usize = 4;

    /// Wrap a device matrix produced by a flow algorithm.
    pub fn from_device(vectors: DeviceMatrix, grid_size: VectorGridSize) -> Result<Self, FlowError> {
        if vectors.elem_size() != Self::ELEM_SIZE {
            return Err(FlowError::InvalidField(format!(
                "flow vectors must be {} bytes, got {}",
                Self::ELEM_SIZE,
                vectors.elem_size()
            )));
        }
        if vectors.cols() == 0 || vectors.height() == 0 {
            return Err(FlowError::InvalidField("flow field is empty".into()));
        }
        let width = u32::try_from(vectors.cols())
            .map_err(|_| FlowError::InvalidField("flow field too wide".into()))?;
        let height = u32::try_from(vectors.height())
            .map_err(|_| FlowError::InvalidField("flow field too tall".into()))?;
        Ok(Self {
            vectors,
            width,
            height,
            grid_size,
        })
    }

    /// Upload raw fixed-point vectors in row-major order.
    pub fn from_fixed(
        ctx: &Arc<GpuContext>,
        width: u32,
        height: u32,
        grid_size: VectorGridSize,
        raw: &[[i16; 2]],
    ) -> Result<Self, FlowError> {
        let expected = width as usize * height as usize;
        if expected == 0 || raw.len() != expected {
            return Err(FlowError::InvalidField(format!(
                "{width}x{height} flow field needs {expected} vectors, got {}",
                raw.len()
            )));
        }
        let bytes: &[u8] = bytemuck::cast_slice(raw);
        let matrix = DeviceMatrix::upload(
            ctx,
            width as usize * Self::ELEM_SIZE,
            height as usize,
            Self::ELEM_SIZE,
            bytes,
        )?;
        Self::from_device(matrix, grid_size)
    }

    pub fn from_vectors(
        ctx: &Arc<GpuContext>,
        width: u32,
        height: u32,
        grid_size: VectorGridSize,
        vectors: &[MotionVector],
    ) -> Result<Self, FlowError> {
        let raw: Vec<[i16; 2]> = vectors.iter().map(|v| v.to_fixed()).collect();
        Self::from_fixed(ctx, width, height, grid_size, &raw)
    }

    /// Read the field back, decoded, in row-major order.
    pub fn download_vectors(&self) -> Result<Vec<MotionVector>, FlowError> {
        let bytes = self.vectors.download()?;
        Ok(bytes
            .chunks_exact(Self::ELEM_SIZE)
            .map(|c| {
                MotionVector::from_fixed([
                    i16::from_ne_bytes([c[0], c[1]]),
                    i16::from_ne_bytes([c[2], c[3]]),
                ])
            })
            .collect())
    }

    pub fn deep_copy(&self) -> Result<Self, FlowError> {
        Ok(Self {
            vectors: self.vectors.deep_copy()?,
            width: self.width,
            height: self.height,
            grid_size: self.grid_size,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn grid_size(&self) -> VectorGridSize {
        self.grid_size
    }

    /// Width of the source frame region the field covers.
    pub fn pixel_width(&self) -> u32 {
        self.width * self.grid_size.as_u32()
    }

    pub fn pixel_height(&self) -> u32 {
        self.height * self.grid_size.as_u32()
    }

    pub fn matrix(&self) -> &DeviceMatrix {
        &self.vectors
    }

    pub fn context(&self) -> &Arc<GpuContext> {
        self.vectors.context()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gpu_context::HostBackend;

    fn ctx() -> Arc<GpuContext> {
        GpuContext::new(Arc::new(HostBackend::new(0)))
    }

    #[test]
    fn vectors_survive_upload() {
        let ctx = ctx();
        let vectors = vec![
            MotionVector::new(1.0, -1.0),
            MotionVector::new(0.5, 0.25),
            MotionVector::new(-3.0, 2.0),
            MotionVector::ZERO,
            MotionVector::new(0.03125, 0.0),
            MotionVector::new(10.0, -10.0),
        ];
        let field = FlowField::from_vectors(&ctx, 3, 2, VectorGridSize::Two, &vectors).unwrap();
        assert_eq!(field.pixel_width(), 6);
        assert_eq!(field.pixel_height(), 4);
        assert_eq!(field.download_vectors().unwrap(), vectors);
    }

    #[test]
    fn vector_count_must_match_dimensions() {
        let ctx = ctx();
        let err = FlowField::from_fixed(&ctx, 2, 2, VectorGridSize::One, &[[0, 0]; 3]).unwrap_err();
        assert!(matches!(err, FlowError::InvalidField(_)));
        assert!(FlowField::from_fixed(&ctx, 0, 2, VectorGridSize::One, &[]).is_err());
    }

    #[test]
    fn wrong_element_size_is_rejected() {
        let ctx = ctx();
        let matrix = DeviceMatrix::alloc(&ctx, 16, 2, 8).unwrap();
        assert!(FlowField::from_device(matrix, VectorGridSize::One).is_err());
    }
}
