use regex::Regex;
use std::sync::LazyLock;

static DURATION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Duration: (\d+):(\d+):([\d.]+)").expect("invalid duration regex"));
static TIME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"out_time_ms=(\d+)").expect("invalid time regex"));

/// One line of FFmpeg output. Returns (fraction done in 0.0-1.0, known duration in seconds).
///
/// `Duration:` lines come from stderr; `out_time_ms=` lines from `-progress pipe:1`.
/// `out_time_ms` is in microseconds despite its name.
pub fn parse_ffmpeg_progress(
    line: &str,
    current_duration: Option<f64>,
) -> (Option<f64>, Option<f64>) {
    if let Some(caps) = DURATION_RE.captures(line) {
        let hours: f64 = caps[1].parse().unwrap_or(0.0);
        let minutes: f64 = caps[2].parse().unwrap_or(0.0);
        let seconds: f64 = caps[3].parse().unwrap_or(0.0);
        let duration = hours * 3600.0 + minutes * 60.0 + seconds;
        if duration > 0.0 {
            return (None, Some(duration));
        }
        return (None, current_duration);
    }

    if let Some(caps) = TIME_RE.captures(line)
        && let Some(dur) = current_duration
        && dur > 0.0
    {
        let micros: i64 = caps[1].parse().unwrap_or(0);
        let elapsed = micros as f64 / 1_000_000.0;
        return (Some((elapsed / dur).clamp(0.0, 1.0)), Some(dur));
    }

    (None, current_duration)
}

/// Fraction done (0.0-1.0) to a whole percent.
pub fn to_percent(fraction: f64) -> u8 {
    if fraction.is_nan() {
        return 0;
    }
    (fraction.clamp(0.0, 1.0) * 100.0).round() as u8
}
