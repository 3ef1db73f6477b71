// json.rs - One JSON object per measurement, for machine parsing
pub(crate) fn format(ts_ns: u64, name: &str, ms: f64) -> String {
    serde_json::json!({
        "ts": ts_ns,
        "name": name,
        "ms": (ms * 1000.0).round() / 1000.0,
    })
    .to_string()
}

#[inline]
pub fn emit(name: &str, ms: f64) {
    eprintln!("{}", format(super::now_ns(), name, ms));
}
