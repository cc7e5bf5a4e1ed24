use std::time::Duration;

/// Shortest iteration we report, so the rate stays finite.
const MIN_ELAPSED: Duration = Duration::from_micros(1);

/// Throughput of one iteration: `1000 / elapsed_ms`.
pub fn fps_from_elapsed(elapsed: Duration) -> f64 {
    let elapsed_ms = elapsed.max(MIN_ELAPSED).as_secs_f64() * 1000.0;
    1000.0 / elapsed_ms
}

/// Throughput formatted to two decimals, as shown next to the video.
pub fn format_fps(elapsed: Duration) -> String {
    format!("{:.2}", fps_from_elapsed(elapsed))
}
