//! Output size prediction shown next to each file before processing.

use crate::settings::{CompressionMethod, CompressionSettings};

const BYTES_PER_MB: f64 = 1_048_576.0;

/// Expected output size in bytes, or None when it depends on content.
///
/// LUT-only mode applies no compression target, so nothing is predicted there.
pub fn predict_output_size(
    original_size_bytes: u64,
    duration_secs: Option<f64>,
    settings: &CompressionSettings,
) -> Option<u64> {
    if settings.effective_lut_only_mode() {
        return None;
    }
    match settings.effective_method() {
        CompressionMethod::Percentage => {
            let percentage = settings.effective_target_percentage();
            if original_size_bytes == 0 || percentage <= 0.0 {
                return None;
            }
            Some((original_size_bytes as f64 * percentage / 100.0).round() as u64)
        }
        CompressionMethod::SizePerMinute => {
            let duration = duration_secs.filter(|d| d.is_finite() && *d > 0.0)?;
            let mb_per_minute = settings.effective_target_size_per_minute();
            Some((mb_per_minute * (duration / 60.0) * BYTES_PER_MB).round() as u64)
        }
        CompressionMethod::Quality => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentage_halves_100mb() {
        let settings = CompressionSettings {
            compression_method: Some(CompressionMethod::Percentage),
            target_percentage: Some(50.0),
            ..Default::default()
        };
        assert_eq!(predict_output_size(104_857_600, None, &settings), Some(52_428_800));
    }

    #[test]
    fn percentage_of_empty_source_is_unknown() {
        let settings = CompressionSettings {
            compression_method: Some(CompressionMethod::Percentage),
            target_percentage: Some(50.0),
            ..Default::default()
        };
        assert_eq!(predict_output_size(0, Some(60.0), &settings), None);
        assert!(crate::plan::plan_encode(&settings, 0, Some(60.0)).is_none());
    }

    #[test]
    fn size_per_minute_scales_with_duration() {
        let settings = CompressionSettings {
            compression_method: Some(CompressionMethod::SizePerMinute),
            target_size_per_minute: Some(15.0),
            ..Default::default()
        };
        assert_eq!(
            predict_output_size(1, Some(120.0), &settings),
            Some(31_457_280)
        );
        assert_eq!(predict_output_size(1, Some(0.0), &settings), None);
        assert_eq!(predict_output_size(1, None, &settings), None);
    }

    #[test]
    fn quality_is_not_predictable() {
        let settings = CompressionSettings::default();
        assert_eq!(predict_output_size(104_857_600, Some(60.0), &settings), None);
    }

    #[test]
    fn lut_only_suppresses_every_method() {
        for method in [
            CompressionMethod::Percentage,
            CompressionMethod::SizePerMinute,
            CompressionMethod::Quality,
        ] {
            let settings = CompressionSettings {
                compression_method: Some(method),
                lut_only_mode: Some(true),
                ..Default::default()
            };
            assert_eq!(predict_output_size(104_857_600, Some(60.0), &settings), None);
        }
    }
}
