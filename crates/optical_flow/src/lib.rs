//! Optical flow between consecutive frames.
//!
//! The flow algorithms themselves live behind [`FlowProvider`]. This crate
//! owns what surrounds them: the fixed-point vector format, GPU-resident
//! [`FlowField`]s, the frame-pairing state machine and the element that
//! attaches [`FlowFieldMeta`] to outgoing buffers.
mod error;
mod field;
mod meta;
mod pair;
mod provider;
mod stage;
mod vector;

pub use error::FlowError;
pub use field::FlowField;
pub use meta::FlowFieldMeta;
pub use pair::{FramePairState, PairState};
pub use provider::FlowProvider;
pub use stage::{OpticalFlowConfig, OpticalFlowStage};
pub use vector::{MotionVector, VectorGridSize, FIXED_POINT_SCALE};
