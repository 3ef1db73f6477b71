// dims.rs - Fitting the oversampled extraction grid to the thread-block ceiling

/// Threads per block on every CUDA device this code targets.
pub const DEFAULT_MAX_THREADS_PER_BLOCK: u32 = 1024;
pub const DEFAULT_SEARCH_CAP: u32 = 400;

/// Finds the oversampling multiplier `m` for the extraction stage.
///
/// Extraction runs one block per cell of a `(grid_w·m) × (grid_h·m)` grid and
/// one thread per pixel, so a block covers
/// `ceil(flow_w / (grid_w·m)) × ceil(flow_h / (grid_h·m))` threads.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DimensionFitter {
    pub max_threads_per_block: u32,
    pub search_cap: u32,
}

impl Default for DimensionFitter {
    fn default() -> Self {
        Self {
            max_threads_per_block: DEFAULT_MAX_THREADS_PER_BLOCK,
            search_cap: DEFAULT_SEARCH_CAP,
        }
    }
}

impl DimensionFitter {
    pub fn fit(&self, flow_w: u32, flow_h: u32, grid_w: u32, grid_h: u32) -> u32 {
        solve(
            flow_w,
            flow_h,
            grid_w,
            grid_h,
            self.max_threads_per_block,
            self.search_cap,
        )
    }
}

/// Block dimensions for multiplier `m`.
pub fn block_dims(flow_w: u32, flow_h: u32, grid_w: u32, grid_h: u32, m: u32) -> (u32, u32) {
    let cells_x = u64::from(grid_w) * u64::from(m);
    let cells_y = u64::from(grid_h) * u64::from(m);
    (
        u64::from(flow_w).div_ceil(cells_x.max(1)) as u32,
        u64::from(flow_h).div_ceil(cells_y.max(1)) as u32,
    )
}

/// Search `m = 1 .. search_cap-1`.
///
/// The first `m` that tiles the flow exactly while staying under the thread
/// ceiling wins outright. Otherwise the smallest `m` under the ceiling is
/// returned, or 1 if none was found. The search ends early once the next
/// multiplier would shrink cells to a single pixel in either axis.
pub fn solve(
    flow_w: u32,
    flow_h: u32,
    grid_w: u32,
    grid_h: u32,
    max_threads_per_block: u32,
    search_cap: u32,
) -> u32 {
    if grid_w == 0 || grid_h == 0 {
        return 1;
    }
    let (fw, fh) = (u64::from(flow_w), u64::from(flow_h));
    let (gw, gh) = (u64::from(grid_w), u64::from(grid_h));
    let mut fallback = None;

    for m in 1..search_cap {
        let cells_x = gw * u64::from(m);
        let cells_y = gh * u64::from(m);
        let threads = fw.div_ceil(cells_x) * fh.div_ceil(cells_y);

        if threads <= u64::from(max_threads_per_block) {
            if fw % cells_x == 0 && fh % cells_y == 0 {
                return m;
            }
            fallback.get_or_insert(m);
        }

        if cells_x + gw >= fw || cells_y + gh >= fh {
            break;
        }
    }

    fallback.unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_hd_onto_20x20() {
        assert_eq!(solve(1920, 1080, 20, 20, 1024, 400), 3);
        assert_eq!(block_dims(1920, 1080, 20, 20, 3), (32, 18));
    }

    #[test]
    fn common_resolutions() {
        let fitter = DimensionFitter::default();
        assert_eq!(fitter.fit(1280, 720, 20, 20), 2);
        assert_eq!(fitter.fit(640, 360, 20, 20), 1);
        assert_eq!(fitter.fit(3840, 2160, 20, 20), 6);
        assert_eq!(fitter.fit(1000, 1000, 20, 20), 2);
    }

    #[test]
    fn exact_tiling_beats_earlier_in_bound_multiplier() {
        // m=2 fits (8x36 threads) but leaves a ragged edge; m=3 tiles exactly.
        assert_eq!(block_dims(150, 720, 10, 10, 2), (8, 36));
        assert_eq!(solve(150, 720, 10, 10, 1024, 400), 3);
    }

    #[test]
    fn falls_back_to_first_in_bound_multiplier() {
        // 1930 is never divisible by 20·m, so the first fitting m is kept.
        assert_eq!(solve(1930, 1080, 20, 20, 1024, 400), 3);
        assert_eq!(block_dims(1930, 1080, 20, 20, 3), (33, 18));
    }

    #[test]
    fn returns_one_when_nothing_fits() {
        assert_eq!(solve(1920, 1080, 20, 20, 1024, 3), 1);
        assert_eq!(solve(1920, 1080, 0, 20, 1024, 400), 1);
    }

    #[test]
    fn small_flow_stops_immediately() {
        assert_eq!(solve(40, 40, 20, 20, 1024, 400), 1);
        assert_eq!(solve(20, 20, 20, 20, 1024, 400), 1);
    }

    #[test]
    fn result_respects_the_thread_ceiling() {
        let shapes = [
            (1920, 1080, 20, 20),
            (1930, 1080, 20, 20),
            (1921, 1081, 20, 20),
            (720, 480, 16, 9),
            (600, 400, 10, 10),
            (352, 288, 11, 9),
            (160, 120, 20, 20),
            (64, 48, 4, 4),
        ];
        for &(fw, fh, gw, gh) in &shapes {
            for max_threads in [64, 256, 1024] {
                let m = solve(fw, fh, gw, gh, max_threads, 400);
                let (bx, by) = block_dims(fw, fh, gw, gh, m);
                assert!(m >= 1);
                assert!(
                    bx * by <= max_threads,
                    "{fw}x{fh} on {gw}x{gh}: m={m} gives {bx}x{by} > {max_threads}"
                );
            }
        }
    }
}
