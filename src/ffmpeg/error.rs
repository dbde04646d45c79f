//! Map FFmpeg exit codes to user-facing messages.
//!
//! Exit codes are from ffmpeg.c: 1 (general), 69 (rate exceeded),
//! 123 (hard exit), 255 (signal). -1 is used for spawn failure.
//! Stderr is kept as detail for debugging.

use serde::Serialize;

/// Error payload for the sidecar. The UI shows `summary`; `detail` is expandable.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FfmpegErrorPayload {
    pub summary: String,
    pub detail: String,
}

pub fn parse_ffmpeg_error(stderr: &str, exit_code: Option<i32>) -> FfmpegErrorPayload {
    let summary = match exit_code {
        Some(code) => known_exit_code_summary(code)
            .unwrap_or_else(|| format!("FFmpeg failed (exit code {}).", code)),
        None => first_line_truncated(stderr, SUMMARY_MAX_LEN),
    };
    FfmpegErrorPayload {
        summary,
        detail: stderr.trim().to_string(),
    }
}

/// One-line message for a file row: the exit-code summary plus the last meaningful stderr line.
pub fn inline_error_message(stderr: &str, exit_code: i32) -> String {
    let summary = parse_ffmpeg_error(stderr, Some(exit_code)).summary;
    match last_meaningful_line(stderr) {
        Some(line) => format!("{} {}", summary, truncate(line, SUMMARY_MAX_LEN)),
        None => summary,
    }
}

const SUMMARY_MAX_LEN: usize = 120;
const ELLIPSIS: &str = "…";

fn known_exit_code_summary(code: i32) -> Option<String> {
    match code {
        -1 => Some("FFmpeg not found or failed to start.".into()),
        1 => Some("FFmpeg failed.".into()),
        69 => Some("Encoding rate limit exceeded.".into()),
        123 | 255 => Some("Encoding was stopped.".into()),
        _ => None,
    }
}

// Progress key=value lines and the "Conversion failed!" trailer say nothing about the cause.
fn last_meaningful_line(stderr: &str) -> Option<&str> {
    stderr
        .lines()
        .rev()
        .map(str::trim)
        .find(|l| !l.is_empty() && !l.starts_with("Conversion failed") && !is_progress_line(l))
}

fn is_progress_line(line: &str) -> bool {
    line.split_once('=')
        .is_some_and(|(key, _)| !key.is_empty() && key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'))
}

fn truncate(line: &str, max_len: usize) -> String {
    if line.len() <= max_len {
        return line.to_string();
    }
    let mut end = max_len.saturating_sub(ELLIPSIS.len());
    while !line.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}{}", &line[..end], ELLIPSIS)
}

fn first_line_truncated(stderr: &str, max_len: usize) -> String {
    let first = stderr
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or("");
    truncate(first, max_len)
}
