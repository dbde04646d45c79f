//! ffprobe-based metadata extraction.

use crate::engine::ProbeResult;
use crate::error::AppError;
use serde::Deserialize;
use std::path::Path;
use std::process::Command;

use super::discovery::get_ffprobe_path;

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
    size: Option<String>,
    #[serde(default)]
    bit_rate: Option<String>,
    #[serde(default)]
    format_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
    #[serde(default)]
    codec_name: Option<String>,
    #[serde(default)]
    bit_rate: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    format: Option<FfprobeFormat>,
    streams: Option<Vec<FfprobeStream>>,
}

fn parse_frame_rate(s: &str) -> Option<f64> {
    let (num, den) = s.split_once('/')?;
    let num: f64 = num.trim().parse().ok()?;
    let den: f64 = den.trim().parse().ok()?;
    if den == 0.0 {
        return None;
    }
    Some(num / den)
}

fn parse_bit_rate(s: &str) -> Option<u64> {
    s.trim().parse().ok()
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoMetadata {
    pub duration: f64,
    pub width: u32,
    pub height: u32,
    pub size: u64,
    pub fps: f64,
    pub codec_name: Option<String>,
    pub format_name: Option<String>,
    /// Container bitrate in bits/s, falling back to the video stream's.
    pub bit_rate: Option<u64>,
}

impl From<&VideoMetadata> for ProbeResult {
    fn from(meta: &VideoMetadata) -> Self {
        ProbeResult {
            duration_secs: meta.duration,
            width: meta.width,
            height: meta.height,
            bitrate_kbps: meta.bit_rate.map(|b| (b / 1000) as u32),
        }
    }
}

pub fn parse_ffprobe_json(json: &str) -> Result<VideoMetadata, AppError> {
    let output: FfprobeOutput = serde_json::from_str(json)
        .map_err(|e| AppError::Probe(format!("unreadable ffprobe output: {}", e)))?;

    let format = output.format.as_ref();
    let duration = format
        .and_then(|f| f.duration.as_deref())
        .and_then(|s| s.parse::<f64>().ok())
        .filter(|d| d.is_finite() && *d >= 0.0)
        .unwrap_or(0.0);
    let size = format
        .and_then(|f| f.size.as_deref())
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(0);

    let video_stream = output
        .streams
        .as_ref()
        .and_then(|streams| streams.iter().find(|s| s.codec_type.as_deref() == Some("video")));
    let width = video_stream.and_then(|s| s.width).unwrap_or(0);
    let height = video_stream.and_then(|s| s.height).unwrap_or(0);
    let fps = video_stream
        .and_then(|s| s.r_frame_rate.as_deref())
        .and_then(parse_frame_rate)
        .unwrap_or(0.0);
    let bit_rate = format
        .and_then(|f| f.bit_rate.as_deref())
        .and_then(parse_bit_rate)
        .or_else(|| {
            video_stream
                .and_then(|s| s.bit_rate.as_deref())
                .and_then(parse_bit_rate)
        });

    Ok(VideoMetadata {
        duration,
        width,
        height,
        size,
        fps,
        codec_name: video_stream.and_then(|s| s.codec_name.clone()),
        format_name: format.and_then(|f| f.format_name.clone()),
        bit_rate,
    })
}

/// Run ffprobe on a file.
pub fn get_video_metadata(path: &Path) -> Result<VideoMetadata, AppError> {
    let ffprobe = get_ffprobe_path()?;

    log::debug!(
        target: "batchvideo::ffmpeg::ffprobe",
        "probing {}",
        path.display()
    );

    let output = Command::new(&ffprobe)
        .args([
            "-v",
            "quiet",
            "-print_format",
            "json",
            "-show_format",
            "-show_streams",
        ])
        .arg(path)
        .output()
        .map_err(|e| AppError::Probe(format!("failed to run ffprobe: {}", e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(AppError::Probe(format!(
            "ffprobe exited with {}: {}",
            output.status,
            stderr.trim()
        )));
    }

    let json = String::from_utf8(output.stdout)
        .map_err(|_| AppError::Probe("ffprobe output was not valid UTF-8".to_string()))?;

    parse_ffprobe_json(&json)
}
