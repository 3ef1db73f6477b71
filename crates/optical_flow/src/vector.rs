// vector.rs - Motion vectors and their granularity
use serde::Deserialize;
use std::fmt;

/// Flow vectors are stored as S10.5 fixed point: 1/32 pixel per unit.
pub const FIXED_POINT_SCALE: f32 = 32.0;

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct MotionVector {
    pub dx: f32,
    pub dy: f32,
}

impl MotionVector {
    pub const ZERO: MotionVector = MotionVector { dx: 0.0, dy: 0.0 };

    pub fn new(dx: f32, dy: f32) -> Self {
        Self { dx, dy }
    }

    pub fn from_fixed(raw: [i16; 2]) -> Self {
        Self {
            dx: f32::from(raw[0]) / FIXED_POINT_SCALE,
            dy: f32::from(raw[1]) / FIXED_POINT_SCALE,
        }
    }

    /// Round to the nearest 1/32 pixel, saturating at the i16 range.
    pub fn to_fixed(self) -> [i16; 2] {
        [
            (self.dx * FIXED_POINT_SCALE).round() as i16,
            (self.dy * FIXED_POINT_SCALE).round() as i16,
        ]
    }

    pub fn squared_magnitude(self) -> f32 {
        self.dx * self.dx + self.dy * self.dy
    }
}

/// Number of source pixels (per axis) a single flow vector stands for.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Deserialize)]
#[serde(try_from = "u32")]
pub enum VectorGridSize {
    #[default]
    One = 1,
    Two = 2,
    Four = 4,
    Eight = 8,
}

impl VectorGridSize {
    pub fn as_u32(self) -> u32 {
        self as u32
    }

    /// Hardware flow engines emit vectors at 1, 2 or 4; 8 is a hint-only size.
    pub fn is_output_size(self) -> bool {
        !matches!(self, VectorGridSize::Eight)
    }
}

impl TryFrom<u32> for VectorGridSize {
    type Error = String;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(VectorGridSize::One),
            2 => Ok(VectorGridSize::Two),
            4 => Ok(VectorGridSize::Four),
            8 => Ok(VectorGridSize::Eight),
            other => Err(format!("vector grid size must be 1, 2, 4 or 8, got {other}")),
        }
    }
}

impl fmt::Display for VectorGridSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u32())
    }
}
