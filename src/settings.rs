//! Compression settings shared by the whole batch.
//!
//! Every field is optional on the wire; `effective_*` accessors apply the defaults the
//! settings panel starts with, so a partially filled payload is always usable.

use std::fmt;
use std::ops::RangeInclusive;

use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Constant-quality value used when none is configured, and by the planning fallback.
pub const DEFAULT_QUALITY: u32 = 23;
/// Fixed CRF for LUT-only mode: visually lossless at the fastest preset.
pub const LUT_ONLY_QUALITY: u32 = 18;

pub const PERCENTAGE_RANGE: RangeInclusive<f64> = 10.0..=100.0;
pub const SIZE_PER_MINUTE_RANGE: RangeInclusive<f64> = 5.0..=100.0;
pub const QUALITY_RANGE: RangeInclusive<u32> = 18..=28;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompressionMethod {
    Percentage,
    SizePerMinute,
    #[default]
    Quality,
}

/// x264/x265 speed presets, ordered fastest (lowest quality) to slowest (highest quality).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpeedPreset {
    Ultrafast,
    Superfast,
    Veryfast,
    Faster,
    Fast,
    #[default]
    Medium,
    Slow,
    Slower,
    Veryslow,
}

impl SpeedPreset {
    pub const ALL: [SpeedPreset; 9] = [
        SpeedPreset::Ultrafast,
        SpeedPreset::Superfast,
        SpeedPreset::Veryfast,
        SpeedPreset::Faster,
        SpeedPreset::Fast,
        SpeedPreset::Medium,
        SpeedPreset::Slow,
        SpeedPreset::Slower,
        SpeedPreset::Veryslow,
    ];

    pub fn fastest() -> Self {
        SpeedPreset::Ultrafast
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SpeedPreset::Ultrafast => "ultrafast",
            SpeedPreset::Superfast => "superfast",
            SpeedPreset::Veryfast => "veryfast",
            SpeedPreset::Faster => "faster",
            SpeedPreset::Fast => "fast",
            SpeedPreset::Medium => "medium",
            SpeedPreset::Slow => "slow",
            SpeedPreset::Slower => "slower",
            SpeedPreset::Veryslow => "veryslow",
        }
    }
}

impl fmt::Display for SpeedPreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Codec {
    /// H.264: widest playback support.
    #[default]
    H264,
    /// H.265: smaller files.
    H265,
}

impl Codec {
    /// FFmpeg encoder name.
    pub fn encoder(self) -> &'static str {
        match self {
            Codec::H264 => "libx264",
            Codec::H265 => "libx265",
        }
    }

    /// Codec used when only the LUT is baked in.
    pub fn compatibility() -> Self {
        Codec::H264
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Resolution {
    #[default]
    #[serde(rename = "original")]
    Original,
    #[serde(rename = "1920")]
    W1920,
    #[serde(rename = "1280")]
    W1280,
    #[serde(rename = "854")]
    W854,
}

impl Resolution {
    /// Target output width, or None to keep the source size.
    pub fn width(self) -> Option<u32> {
        match self {
            Resolution::Original => None,
            Resolution::W1920 => Some(1920),
            Resolution::W1280 => Some(1280),
            Resolution::W854 => Some(854),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CompressionSettings {
    pub compression_method: Option<CompressionMethod>,
    /// Percent of the original size, used by `percentage`.
    pub target_percentage: Option<f64>,
    /// MB per minute of footage, used by `size_per_minute`.
    pub target_size_per_minute: Option<f64>,
    /// CRF, used by `quality` and by the planning fallback.
    pub quality_value: Option<u32>,
    /// kbps ceiling for constant-quality encodes. 0 = unset.
    pub max_bitrate: Option<u32>,
    /// kbps rate-control buffer. 0 = derive as twice the ceiling.
    pub buffer_size: Option<u32>,
    pub preset: Option<SpeedPreset>,
    pub codec: Option<Codec>,
    pub resolution: Option<Resolution>,
    /// Only bake in the LUT. Has no effect without a LUT.
    pub lut_only_mode: Option<bool>,
}

impl Default for CompressionSettings {
    fn default() -> Self {
        Self {
            compression_method: Some(CompressionMethod::Quality),
            target_percentage: Some(60.0),
            target_size_per_minute: Some(15.0),
            quality_value: Some(DEFAULT_QUALITY),
            max_bitrate: Some(0),
            buffer_size: Some(0),
            preset: Some(SpeedPreset::Medium),
            codec: Some(Codec::H264),
            resolution: Some(Resolution::Original),
            lut_only_mode: Some(false),
        }
    }
}

impl CompressionSettings {
    pub fn effective_method(&self) -> CompressionMethod {
        self.compression_method.unwrap_or_default()
    }

    pub fn effective_target_percentage(&self) -> f64 {
        self.target_percentage.unwrap_or(60.0)
    }

    pub fn effective_target_size_per_minute(&self) -> f64 {
        self.target_size_per_minute.unwrap_or(15.0)
    }

    pub fn effective_quality(&self) -> u32 {
        self.quality_value.unwrap_or(DEFAULT_QUALITY)
    }

    /// Bitrate ceiling in kbps, None when unset.
    pub fn effective_max_bitrate(&self) -> Option<u32> {
        self.max_bitrate.filter(|&b| b > 0)
    }

    /// Buffer size in kbps; only meaningful alongside a ceiling.
    pub fn effective_buffer_size(&self) -> Option<u32> {
        let max_bitrate = self.effective_max_bitrate()?;
        Some(
            self.buffer_size
                .filter(|&b| b > 0)
                .unwrap_or(max_bitrate.saturating_mul(2)),
        )
    }

    pub fn effective_preset(&self) -> SpeedPreset {
        self.preset.unwrap_or_default()
    }

    pub fn effective_codec(&self) -> Codec {
        self.codec.unwrap_or_default()
    }

    pub fn effective_resolution(&self) -> Resolution {
        self.resolution.unwrap_or_default()
    }

    pub fn effective_lut_only_mode(&self) -> bool {
        self.lut_only_mode.unwrap_or(false)
    }

    /// Checks values against the ranges the settings panel offers.
    pub fn validate(&self) -> Result<(), AppError> {
        if let Some(p) = self.target_percentage
            && !PERCENTAGE_RANGE.contains(&p)
        {
            return Err(AppError::InvalidSettings(format!(
                "targetPercentage must be within {}-{}, got {}",
                PERCENTAGE_RANGE.start(),
                PERCENTAGE_RANGE.end(),
                p
            )));
        }
        if let Some(s) = self.target_size_per_minute
            && !SIZE_PER_MINUTE_RANGE.contains(&s)
        {
            return Err(AppError::InvalidSettings(format!(
                "targetSizePerMinute must be within {}-{} MB/min, got {}",
                SIZE_PER_MINUTE_RANGE.start(),
                SIZE_PER_MINUTE_RANGE.end(),
                s
            )));
        }
        if let Some(q) = self.quality_value
            && !QUALITY_RANGE.contains(&q)
        {
            return Err(AppError::InvalidSettings(format!(
                "qualityValue must be within {}-{}, got {}",
                QUALITY_RANGE.start(),
                QUALITY_RANGE.end(),
                q
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_settings_panel() {
        let s = CompressionSettings::default();
        assert_eq!(s.effective_method(), CompressionMethod::Quality);
        assert_eq!(s.effective_target_percentage(), 60.0);
        assert_eq!(s.effective_target_size_per_minute(), 15.0);
        assert_eq!(s.effective_quality(), 23);
        assert_eq!(s.effective_max_bitrate(), None);
        assert_eq!(s.effective_buffer_size(), None);
        assert_eq!(s.effective_preset(), SpeedPreset::Medium);
        assert_eq!(s.effective_codec(), Codec::H264);
        assert_eq!(s.effective_resolution(), Resolution::Original);
        assert!(!s.effective_lut_only_mode());
    }

    #[test]
    fn partial_payload_falls_back_to_defaults() {
        let s: CompressionSettings = serde_json::from_str(
            r#"{"compressionMethod":"size_per_minute","targetSizePerMinute":20,"resolution":"1280"}"#,
        )
        .expect("parse settings");
        assert_eq!(s.effective_method(), CompressionMethod::SizePerMinute);
        assert_eq!(s.effective_target_size_per_minute(), 20.0);
        assert_eq!(s.effective_resolution().width(), Some(1280));
        assert_eq!(s.effective_quality(), DEFAULT_QUALITY);
        assert_eq!(s.effective_preset(), SpeedPreset::Medium);
    }

    #[test]
    fn buffer_defaults_to_twice_the_cap() {
        let s = CompressionSettings {
            max_bitrate: Some(2000),
            buffer_size: Some(0),
            ..Default::default()
        };
        assert_eq!(s.effective_buffer_size(), Some(4000));

        let s = CompressionSettings {
            max_bitrate: Some(2000),
            buffer_size: Some(3000),
            ..Default::default()
        };
        assert_eq!(s.effective_buffer_size(), Some(3000));
    }

    #[test]
    fn buffer_without_cap_is_ignored() {
        let s = CompressionSettings {
            max_bitrate: Some(0),
            buffer_size: Some(3000),
            ..Default::default()
        };
        assert_eq!(s.effective_buffer_size(), None);
    }

    #[test]
    fn presets_are_ordered_fastest_first() {
        assert_eq!(SpeedPreset::ALL.first(), Some(&SpeedPreset::fastest()));
        assert!(SpeedPreset::ALL.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(SpeedPreset::Veryslow.to_string(), "veryslow");
    }

    #[test]
    fn validate_rejects_out_of_range_values() {
        let too_small = CompressionSettings {
            target_percentage: Some(5.0),
            ..Default::default()
        };
        assert!(matches!(
            too_small.validate(),
            Err(AppError::InvalidSettings(_))
        ));

        let crf = CompressionSettings {
            quality_value: Some(40),
            ..Default::default()
        };
        assert!(crf.validate().is_err());

        let spm = CompressionSettings {
            target_size_per_minute: Some(0.0),
            ..Default::default()
        };
        assert!(spm.validate().is_err());

        assert!(CompressionSettings::default().validate().is_ok());
    }

    #[test]
    fn codec_maps_to_encoder() {
        assert_eq!(Codec::H264.encoder(), "libx264");
        assert_eq!(Codec::H265.encoder(), "libx265");
        assert_eq!(Codec::compatibility(), Codec::H264);
    }
}
