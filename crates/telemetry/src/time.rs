// time.rs - Monotonic clock shared by every measurement
use std::sync::OnceLock;
use std::time::Instant;

fn epoch() -> Instant {
    static T0: OnceLock<Instant> = OnceLock::new();
    *T0.get_or_init(Instant::now)
}

/// Nanoseconds since the first call in this process.
#[inline]
pub fn now_ns() -> u64 {
    epoch().elapsed().as_nanos() as u64
}

/// Milliseconds elapsed since `start_ns`.
#[inline]
pub fn since_ms(start_ns: u64) -> f64 {
    now_ns().saturating_sub(start_ns) as f64 / 1_000_000.0
}
