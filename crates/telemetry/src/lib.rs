//! Per-stage latency measurement.
//!
//! Output goes to stderr through whichever backend is enabled: `human-log`
//! prints `[lat] name=1.23ms`, `json` prints one object per line. With `json`
//! enabled it takes precedence.
mod time;

#[cfg(feature = "json")]
mod json;
#[cfg(all(feature = "human-log", not(feature = "json")))]
mod log;

pub use time::{now_ns, since_ms};

/// Report the time elapsed since `start_ns` under `name`.
pub fn record_ms(name: &str, start_ns: u64) {
    let ms = since_ms(start_ns);

    #[cfg(feature = "json")]
    json::emit(name, ms);

    #[cfg(all(not(feature = "json"), feature = "human-log"))]
    log::emit(name, ms);

    #[cfg(not(any(feature = "json", feature = "human-log")))]
    let _ = (name, ms);
}

/// Run `stage.process(input)` and record how long it took.
pub fn time_stage<I, O, S: common_io::Stage<I, O>>(
    name: &'static str,
    stage: &mut S,
    input: I,
) -> O {
    let t0 = now_ns();
    let output = stage.process(input);
    record_ms(name, t0);
    output
}
