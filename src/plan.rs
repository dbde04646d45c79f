//! Bitrate/quality planning: turns compression intent into encoder rate control.

use serde::Serialize;

use crate::settings::{CompressionMethod, CompressionSettings};

/// Lowest video bitrate a size target may produce.
pub const MIN_VIDEO_BITRATE_KBPS: u32 = 500;
/// Share of the size budget kept for the (passed-through) audio stream.
pub const AUDIO_RESERVE_KBPS: f64 = 128.0;

const BYTES_PER_MB: f64 = 1_048_576.0;
const KBITS_PER_MB: f64 = 8.0 * 1024.0;

/// Rate control for one encode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "mode", rename_all = "camelCase")]
pub enum EncodePlan {
    /// Average video bitrate target, used to hit a size.
    #[serde(rename_all = "camelCase")]
    Bitrate { video_kbps: u32 },
    /// CRF target with an optional VBV ceiling.
    #[serde(rename_all = "camelCase")]
    ConstantQuality {
        value: u32,
        cap_kbps: Option<u32>,
        buffer_kbps: Option<u32>,
    },
}

fn video_bitrate_from_total(total_kbps: f64) -> u32 {
    let video = (total_kbps - AUDIO_RESERVE_KBPS).round();
    if video.is_nan() || video < MIN_VIDEO_BITRATE_KBPS as f64 {
        MIN_VIDEO_BITRATE_KBPS
    } else {
        video as u32
    }
}

fn usable_duration(duration_secs: Option<f64>) -> Option<f64> {
    duration_secs.filter(|d| d.is_finite() && *d > 0.0)
}

/// Constant-quality plan from the configured quality value and optional cap.
pub fn constant_quality_plan(settings: &CompressionSettings) -> EncodePlan {
    EncodePlan::ConstantQuality {
        value: settings.effective_quality(),
        cap_kbps: settings.effective_max_bitrate(),
        buffer_kbps: settings.effective_buffer_size(),
    }
}

/// Plans rate control for one file.
///
/// Returns None when a size-targeting method cannot be computed (unknown duration,
/// empty source); callers then use [`constant_quality_plan`].
pub fn plan_encode(
    settings: &CompressionSettings,
    original_size_bytes: u64,
    duration_secs: Option<f64>,
) -> Option<EncodePlan> {
    let total_kbps = match settings.effective_method() {
        CompressionMethod::Quality => return Some(constant_quality_plan(settings)),
        CompressionMethod::Percentage => {
            let duration = usable_duration(duration_secs)?;
            let percentage = settings.effective_target_percentage();
            if original_size_bytes == 0 || percentage <= 0.0 {
                return None;
            }
            let target_size_mb = (original_size_bytes as f64 / BYTES_PER_MB) * (percentage / 100.0);
            target_size_mb * KBITS_PER_MB / duration
        }
        // A rate, not a per-file total: the result does not depend on duration.
        CompressionMethod::SizePerMinute => {
            usable_duration(duration_secs)?;
            let mb_per_minute = settings.effective_target_size_per_minute();
            if mb_per_minute <= 0.0 {
                return None;
            }
            mb_per_minute * KBITS_PER_MB / 60.0
        }
    };

    Some(EncodePlan::Bitrate {
        video_kbps: video_bitrate_from_total(total_kbps),
    })
}

/// [`plan_encode`], falling back to constant quality when no size target can be computed.
pub fn plan_or_fallback(
    settings: &CompressionSettings,
    original_size_bytes: u64,
    duration_secs: Option<f64>,
) -> EncodePlan {
    plan_encode(settings, original_size_bytes, duration_secs).unwrap_or_else(|| {
        log::debug!(
            target: "batchvideo::plan",
            "size target not computable (duration={:?}, size={}); using constant quality",
            duration_secs,
            original_size_bytes
        );
        constant_quality_plan(settings)
    })
}
