// log.rs - Human-readable latency lines
pub(crate) fn format(name: &str, ms: f64) -> String {
    format!("[lat] {name}={ms:.2}ms")
}

#[inline]
pub fn emit(name: &str, ms: f64) {
    eprintln!("{}", format(name, ms));
}
