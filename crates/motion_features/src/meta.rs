use crate::features::FeatureGrid;
use common_io::{BranchPolicy, BufferMeta};

/// Feature grid computed for one frame.
///
/// Duplicated buffers share the grid; cells are individually reference
/// counted so a consumer may keep one alive past the buffer.
#[derive(Debug)]
pub struct FeatureGridMeta {
    pub grid: FeatureGrid,
    pub frame_number: u64,
    pub timestamp_ns: u64,
}

impl FeatureGridMeta {
    pub fn new(grid: FeatureGrid, frame_number: u64, timestamp_ns: u64) -> Self {
        Self {
            grid,
            frame_number,
            timestamp_ns,
        }
    }
}

impl BufferMeta for FeatureGridMeta {
    const KIND: &'static str = "motion-features";
    const BRANCH_POLICY: BranchPolicy = BranchPolicy::Share;
}
